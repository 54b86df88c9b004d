//! Binary encoding/decoding for control envelopes.
//!
//! This module converts between:
//! - raw envelope payloads (`&[u8]`, one per frame)
//! - high-level `cplane_core::ControlMessage`
//!
//! Envelope model (all integers big-endian):
//!
//! ```text
//! [0]   : msg_type (WireControlType as u8)
//! [1]   : version  (PROTOCOL_VERSION)
//! [2..4]: reserved = 0
//! [4..] : body (depends on msg_type)
//!
//! str   = u32 len + UTF-8 bytes
//! opt   = u8 present (0/1) + str if present
//! vec   = u32 count + items
//!
//! EngineHello (1):        version:str, registration_token:opt
//! EngineHelloAck (2):     accepted:u8, server_version:str
//! Ping (3) / Pong (4):    timestamp:u64
//! ConnectionReady (5):    session_id:str
//! SessionOpen (6):        session_id:str, session_type:u8, host:str, port:u16,
//!                         params:vec<param>, jump_hosts:vec<jump>
//! SessionOpenResult (7):  session_id:str, success:u8, error_message:opt,
//!                         connection_id:opt
//! SessionClose (8):       session_id:str
//! SessionClosed (9):      session_id:str, reason:str
//! SessionJoin (10):       session_id:str
//! SessionResize (11):     session_id:str, cols:u16, rows:u16
//! ExecCommand (12):       request_id:str, host:str, port:u16, params:vec<param>,
//!                         command:str, jump_hosts:vec<jump>
//! ExecCommandResult (13): request_id:str, success:u8, stdout:str, stderr:str,
//!                         exit_code:i32, error_message:opt
//! PortCheck (14):         request_id:str, targets:vec<target>, timeout_ms:u32
//! PortCheckResult (15):   request_id:str, results:vec<entry>
//!
//! param  = key:str, value:str
//! jump   = host:str, port:u16, username:str, password:opt, private_key:opt,
//!          passphrase:opt
//! target = id:str, host:str, port:u16
//! entry  = id:str, online:u8
//! ```

use cplane_core::{
    ConnectionParam, ConnectionReady, ControlMessage, EngineHello, EngineHelloAck, ExecCommand,
    ExecCommandResult, JumpHost, Ping, Pong, PortCheck, PortCheckEntry, PortCheckResult,
    PortCheckTarget, SessionClose, SessionClosed, SessionJoin, SessionOpen, SessionOpenResult,
    SessionResize, SessionType,
};

use bytes::BufMut;

use crate::error::ProtocolError;
use crate::wire_types::{
    put_bool, put_count, put_header, put_opt_str, put_str, split_header, WireControlType,
    WireReader,
};

/// Encode a single control envelope.
///
/// The encoded bytes are appended to `out`.
pub fn encode_control(msg: &ControlMessage, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    match msg {
        ControlMessage::EngineHello(m) => {
            put_header(out, WireControlType::EngineHello as u8);
            put_str(out, &m.version)?;
            put_opt_str(out, m.registration_token.as_deref())?;
        }
        ControlMessage::EngineHelloAck(m) => {
            put_header(out, WireControlType::EngineHelloAck as u8);
            put_bool(out, m.accepted);
            put_str(out, &m.server_version)?;
        }
        ControlMessage::Ping(m) => {
            put_header(out, WireControlType::Ping as u8);
            out.put_u64(m.timestamp);
        }
        ControlMessage::Pong(m) => {
            put_header(out, WireControlType::Pong as u8);
            out.put_u64(m.timestamp);
        }
        ControlMessage::ConnectionReady(m) => {
            put_header(out, WireControlType::ConnectionReady as u8);
            put_str(out, &m.session_id)?;
        }
        ControlMessage::SessionOpen(m) => {
            put_header(out, WireControlType::SessionOpen as u8);
            put_str(out, &m.session_id)?;
            out.put_u8(m.session_type.as_u8());
            put_str(out, &m.host)?;
            out.put_u16(m.port);
            put_params(out, &m.params)?;
            put_jump_hosts(out, &m.jump_hosts)?;
        }
        ControlMessage::SessionOpenResult(m) => {
            put_header(out, WireControlType::SessionOpenResult as u8);
            put_str(out, &m.session_id)?;
            put_bool(out, m.success);
            put_opt_str(out, m.error_message.as_deref())?;
            put_opt_str(out, m.connection_id.as_deref())?;
        }
        ControlMessage::SessionClose(m) => {
            put_header(out, WireControlType::SessionClose as u8);
            put_str(out, &m.session_id)?;
        }
        ControlMessage::SessionClosed(m) => {
            put_header(out, WireControlType::SessionClosed as u8);
            put_str(out, &m.session_id)?;
            put_str(out, &m.reason)?;
        }
        ControlMessage::SessionJoin(m) => {
            put_header(out, WireControlType::SessionJoin as u8);
            put_str(out, &m.session_id)?;
        }
        ControlMessage::SessionResize(m) => {
            put_header(out, WireControlType::SessionResize as u8);
            put_str(out, &m.session_id)?;
            out.put_u16(m.cols);
            out.put_u16(m.rows);
        }
        ControlMessage::ExecCommand(m) => {
            put_header(out, WireControlType::ExecCommand as u8);
            put_str(out, &m.request_id)?;
            put_str(out, &m.host)?;
            out.put_u16(m.port);
            put_params(out, &m.params)?;
            put_str(out, &m.command)?;
            put_jump_hosts(out, &m.jump_hosts)?;
        }
        ControlMessage::ExecCommandResult(m) => {
            put_header(out, WireControlType::ExecCommandResult as u8);
            put_str(out, &m.request_id)?;
            put_bool(out, m.success);
            put_str(out, &m.stdout)?;
            put_str(out, &m.stderr)?;
            out.put_i32(m.exit_code);
            put_opt_str(out, m.error_message.as_deref())?;
        }
        ControlMessage::PortCheck(m) => {
            put_header(out, WireControlType::PortCheck as u8);
            put_str(out, &m.request_id)?;
            put_count(out, m.targets.len())?;
            for t in &m.targets {
                put_str(out, &t.id)?;
                put_str(out, &t.host)?;
                out.put_u16(t.port);
            }
            out.put_u32(m.timeout_ms);
        }
        ControlMessage::PortCheckResult(m) => {
            put_header(out, WireControlType::PortCheckResult as u8);
            put_str(out, &m.request_id)?;
            put_count(out, m.results.len())?;
            for e in &m.results {
                put_str(out, &e.id)?;
                put_bool(out, e.online);
            }
        }
    }

    Ok(())
}

/// Decode a single control envelope.
///
/// The buffer must contain exactly one envelope (one frame payload).
pub fn decode_control(buf: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let (msg_type, body) = split_header(buf)?;
    let wire_type =
        WireControlType::from_u8(msg_type).ok_or(ProtocolError::UnknownMessageType(msg_type))?;

    let mut r = WireReader::new(body);

    let msg = match wire_type {
        WireControlType::EngineHello => ControlMessage::EngineHello(EngineHello {
            version: r.string("version")?,
            registration_token: r.opt_string("registration_token")?,
        }),
        WireControlType::EngineHelloAck => ControlMessage::EngineHelloAck(EngineHelloAck {
            accepted: r.bool("accepted")?,
            server_version: r.string("server_version")?,
        }),
        WireControlType::Ping => ControlMessage::Ping(Ping {
            timestamp: r.u64()?,
        }),
        WireControlType::Pong => ControlMessage::Pong(Pong {
            timestamp: r.u64()?,
        }),
        WireControlType::ConnectionReady => ControlMessage::ConnectionReady(ConnectionReady {
            session_id: r.string("session_id")?,
        }),
        WireControlType::SessionOpen => {
            let session_id = r.string("session_id")?;
            let type_byte = r.u8()?;
            let session_type = SessionType::from_u8(type_byte)
                .ok_or(ProtocolError::InvalidField("session_type"))?;
            ControlMessage::SessionOpen(SessionOpen {
                session_id,
                session_type,
                host: r.string("host")?,
                port: r.u16()?,
                params: read_params(&mut r)?,
                jump_hosts: read_jump_hosts(&mut r)?,
            })
        }
        WireControlType::SessionOpenResult => {
            ControlMessage::SessionOpenResult(SessionOpenResult {
                session_id: r.string("session_id")?,
                success: r.bool("success")?,
                error_message: r.opt_string("error_message")?,
                connection_id: r.opt_string("connection_id")?,
            })
        }
        WireControlType::SessionClose => ControlMessage::SessionClose(SessionClose {
            session_id: r.string("session_id")?,
        }),
        WireControlType::SessionClosed => ControlMessage::SessionClosed(SessionClosed {
            session_id: r.string("session_id")?,
            reason: r.string("reason")?,
        }),
        WireControlType::SessionJoin => ControlMessage::SessionJoin(SessionJoin {
            session_id: r.string("session_id")?,
        }),
        WireControlType::SessionResize => ControlMessage::SessionResize(SessionResize {
            session_id: r.string("session_id")?,
            cols: r.u16()?,
            rows: r.u16()?,
        }),
        WireControlType::ExecCommand => ControlMessage::ExecCommand(ExecCommand {
            request_id: r.string("request_id")?,
            host: r.string("host")?,
            port: r.u16()?,
            params: read_params(&mut r)?,
            command: r.string("command")?,
            jump_hosts: read_jump_hosts(&mut r)?,
        }),
        WireControlType::ExecCommandResult => {
            ControlMessage::ExecCommandResult(ExecCommandResult {
                request_id: r.string("request_id")?,
                success: r.bool("success")?,
                stdout: r.string("stdout")?,
                stderr: r.string("stderr")?,
                exit_code: r.i32()?,
                error_message: r.opt_string("error_message")?,
            })
        }
        WireControlType::PortCheck => {
            let request_id = r.string("request_id")?;
            let count = r.count(10)?;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(PortCheckTarget {
                    id: r.string("target.id")?,
                    host: r.string("target.host")?,
                    port: r.u16()?,
                });
            }
            ControlMessage::PortCheck(PortCheck {
                request_id,
                targets,
                timeout_ms: r.u32()?,
            })
        }
        WireControlType::PortCheckResult => {
            let request_id = r.string("request_id")?;
            let count = r.count(5)?;
            let mut results = Vec::with_capacity(count);
            for _ in 0..count {
                results.push(PortCheckEntry {
                    id: r.string("entry.id")?,
                    online: r.bool("entry.online")?,
                });
            }
            ControlMessage::PortCheckResult(PortCheckResult {
                request_id,
                results,
            })
        }
    };

    Ok(msg)
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn put_params(out: &mut Vec<u8>, params: &[ConnectionParam]) -> Result<(), ProtocolError> {
    put_count(out, params.len())?;
    for p in params {
        put_str(out, &p.key)?;
        put_str(out, &p.value)?;
    }
    Ok(())
}

fn put_jump_hosts(out: &mut Vec<u8>, hosts: &[JumpHost]) -> Result<(), ProtocolError> {
    put_count(out, hosts.len())?;
    for jh in hosts {
        put_str(out, &jh.host)?;
        out.put_u16(jh.port);
        put_str(out, &jh.username)?;
        put_opt_str(out, jh.password.as_deref())?;
        put_opt_str(out, jh.private_key.as_deref())?;
        put_opt_str(out, jh.passphrase.as_deref())?;
    }
    Ok(())
}

fn read_params(r: &mut WireReader<'_>) -> Result<Vec<ConnectionParam>, ProtocolError> {
    let count = r.count(8)?;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        params.push(ConnectionParam {
            key: r.string("param.key")?,
            value: r.string("param.value")?,
        });
    }
    Ok(params)
}

fn read_jump_hosts(r: &mut WireReader<'_>) -> Result<Vec<JumpHost>, ProtocolError> {
    let count = r.count(13)?;
    let mut hosts = Vec::with_capacity(count);
    for _ in 0..count {
        hosts.push(JumpHost {
            host: r.string("jump_host.host")?,
            port: r.u16()?,
            username: r.string("jump_host.username")?,
            password: r.opt_string("jump_host.password")?,
            private_key: r.opt_string("jump_host.private_key")?,
            passphrase: r.opt_string("jump_host.passphrase")?,
        });
    }
    Ok(hosts)
}
