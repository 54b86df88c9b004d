//! Binary encoding/decoding for file-transfer envelopes.
//!
//! Same header as control envelopes, followed by the request id:
//!
//! ```text
//! [0]    : msg_type (WireTransferType as u8)
//! [1]    : version
//! [2..4] : reserved = 0
//! [4..8] : request_id (u32 BE)
//! [8..]  : body
//!
//! ListDir, Stat, Mkdir, Unlink,
//! Realpath, ReadFile, WriteBegin : path:str
//! WriteData                      : data:bytes
//! WriteEnd, Ready, Ok, FileEnd   : (empty)
//! Rmdir                          : path:str, recursive:u8
//! Rename                         : old_path:str, new_path:str
//! Chmod                          : path:str, mode:u32
//! Exec                           : command:str
//! SearchDirs                     : search_path:str, max_results:u32
//! Error                          : message:str
//! DirList                        : vec<name:str, is_dir:u8, is_symlink:u8,
//!                                      mtime:u64, size:u64, mode:u32>
//! StatResult                     : size:u64, mode:u32, uid:u32, gid:u32,
//!                                  atime:u64, mtime:u64, owner:str,
//!                                  group:str, is_dir:u8
//! RealpathResult                 : path:str, is_dir:u8
//! FileData                       : data:bytes, total_size:u64
//! ExecResult                     : stdout:str, stderr:str, exit_code:i32
//! SearchResult                   : vec<str>
//! ```

use bytes::BufMut;

use cplane_core::{DirEntry, ExecOutput, FileStat, TransferBody, TransferMessage};

use crate::error::ProtocolError;
use crate::wire_types::{
    put_bool, put_bytes, put_count, put_header, put_str, split_header, WireReader,
    WireTransferType,
};

/// Encode a single file-transfer envelope.
///
/// The encoded bytes are appended to `out`.
pub fn encode_transfer(msg: &TransferMessage, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let rid = msg.request_id;

    match &msg.body {
        TransferBody::Ready => start(out, WireTransferType::Ready, rid),
        TransferBody::Ok => start(out, WireTransferType::Ok, rid),
        TransferBody::FileEnd => start(out, WireTransferType::FileEnd, rid),
        TransferBody::WriteEnd => start(out, WireTransferType::WriteEnd, rid),

        TransferBody::ListDir { path } => path_req(out, WireTransferType::ListDir, rid, path)?,
        TransferBody::Stat { path } => path_req(out, WireTransferType::Stat, rid, path)?,
        TransferBody::Mkdir { path } => path_req(out, WireTransferType::Mkdir, rid, path)?,
        TransferBody::Unlink { path } => path_req(out, WireTransferType::Unlink, rid, path)?,
        TransferBody::Realpath { path } => path_req(out, WireTransferType::Realpath, rid, path)?,
        TransferBody::ReadFile { path } => path_req(out, WireTransferType::ReadFile, rid, path)?,
        TransferBody::WriteBegin { path } => {
            path_req(out, WireTransferType::WriteBegin, rid, path)?
        }

        TransferBody::WriteData { data } => encode_write_data(rid, data, out)?,
        TransferBody::Rmdir { path, recursive } => {
            start(out, WireTransferType::Rmdir, rid);
            put_str(out, path)?;
            put_bool(out, *recursive);
        }
        TransferBody::Rename { old_path, new_path } => {
            start(out, WireTransferType::Rename, rid);
            put_str(out, old_path)?;
            put_str(out, new_path)?;
        }
        TransferBody::Chmod { path, mode } => {
            start(out, WireTransferType::Chmod, rid);
            put_str(out, path)?;
            out.put_u32(*mode);
        }
        TransferBody::Exec { command } => {
            start(out, WireTransferType::Exec, rid);
            put_str(out, command)?;
        }
        TransferBody::SearchDirs {
            search_path,
            max_results,
        } => {
            start(out, WireTransferType::SearchDirs, rid);
            put_str(out, search_path)?;
            out.put_u32(*max_results);
        }

        TransferBody::Error { message } => {
            start(out, WireTransferType::Error, rid);
            put_str(out, message)?;
        }
        TransferBody::DirList { entries } => {
            start(out, WireTransferType::DirList, rid);
            put_count(out, entries.len())?;
            for e in entries {
                put_str(out, &e.name)?;
                put_bool(out, e.is_dir);
                put_bool(out, e.is_symlink);
                out.put_u64(e.mtime);
                out.put_u64(e.size);
                out.put_u32(e.mode);
            }
        }
        TransferBody::StatResult(s) => {
            start(out, WireTransferType::StatResult, rid);
            out.put_u64(s.size);
            out.put_u32(s.mode);
            out.put_u32(s.uid);
            out.put_u32(s.gid);
            out.put_u64(s.atime);
            out.put_u64(s.mtime);
            put_str(out, &s.owner)?;
            put_str(out, &s.group)?;
            put_bool(out, s.is_dir);
        }
        TransferBody::RealpathResult { path, is_dir } => {
            start(out, WireTransferType::RealpathResult, rid);
            put_str(out, path)?;
            put_bool(out, *is_dir);
        }
        TransferBody::FileData { data, total_size } => {
            start(out, WireTransferType::FileData, rid);
            put_bytes(out, data)?;
            out.put_u64(*total_size);
        }
        TransferBody::ExecResult(x) => {
            start(out, WireTransferType::ExecResult, rid);
            put_str(out, &x.stdout)?;
            put_str(out, &x.stderr)?;
            out.put_i32(x.exit_code);
        }
        TransferBody::SearchResult { directories } => {
            start(out, WireTransferType::SearchResult, rid);
            put_count(out, directories.len())?;
            for d in directories {
                put_str(out, d)?;
            }
        }
    }

    Ok(())
}

/// Encode a `WriteData` envelope straight from a borrowed chunk.
///
/// Used by writers that split a large buffer without copying each
/// chunk into a `TransferBody` first.
pub fn encode_write_data(request_id: u32, data: &[u8], out: &mut Vec<u8>) -> Result<(), ProtocolError> {
    start(out, WireTransferType::WriteData, request_id);
    put_bytes(out, data)
}

/// Decode a single file-transfer envelope.
pub fn decode_transfer(buf: &[u8]) -> Result<TransferMessage, ProtocolError> {
    let (msg_type, body) = split_header(buf)?;
    let wire_type =
        WireTransferType::from_u8(msg_type).ok_or(ProtocolError::UnknownMessageType(msg_type))?;

    let mut r = WireReader::new(body);
    let request_id = r.u32()?;

    let body = match wire_type {
        WireTransferType::Ready => TransferBody::Ready,
        WireTransferType::Ok => TransferBody::Ok,
        WireTransferType::FileEnd => TransferBody::FileEnd,
        WireTransferType::WriteEnd => TransferBody::WriteEnd,

        WireTransferType::ListDir => TransferBody::ListDir { path: r.string("path")? },
        WireTransferType::Stat => TransferBody::Stat { path: r.string("path")? },
        WireTransferType::Mkdir => TransferBody::Mkdir { path: r.string("path")? },
        WireTransferType::Unlink => TransferBody::Unlink { path: r.string("path")? },
        WireTransferType::Realpath => TransferBody::Realpath { path: r.string("path")? },
        WireTransferType::ReadFile => TransferBody::ReadFile { path: r.string("path")? },
        WireTransferType::WriteBegin => TransferBody::WriteBegin { path: r.string("path")? },

        WireTransferType::WriteData => TransferBody::WriteData {
            data: r.bytes()?.to_vec(),
        },
        WireTransferType::Rmdir => TransferBody::Rmdir {
            path: r.string("path")?,
            recursive: r.bool("recursive")?,
        },
        WireTransferType::Rename => TransferBody::Rename {
            old_path: r.string("old_path")?,
            new_path: r.string("new_path")?,
        },
        WireTransferType::Chmod => TransferBody::Chmod {
            path: r.string("path")?,
            mode: r.u32()?,
        },
        WireTransferType::Exec => TransferBody::Exec {
            command: r.string("command")?,
        },
        WireTransferType::SearchDirs => TransferBody::SearchDirs {
            search_path: r.string("search_path")?,
            max_results: r.u32()?,
        },

        WireTransferType::Error => TransferBody::Error {
            message: r.string("message")?,
        },
        WireTransferType::DirList => {
            let count = r.count(26)?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(DirEntry {
                    name: r.string("entry.name")?,
                    is_dir: r.bool("entry.is_dir")?,
                    is_symlink: r.bool("entry.is_symlink")?,
                    mtime: r.u64()?,
                    size: r.u64()?,
                    mode: r.u32()?,
                });
            }
            TransferBody::DirList { entries }
        }
        WireTransferType::StatResult => TransferBody::StatResult(FileStat {
            size: r.u64()?,
            mode: r.u32()?,
            uid: r.u32()?,
            gid: r.u32()?,
            atime: r.u64()?,
            mtime: r.u64()?,
            owner: r.string("owner")?,
            group: r.string("group")?,
            is_dir: r.bool("is_dir")?,
        }),
        WireTransferType::RealpathResult => TransferBody::RealpathResult {
            path: r.string("path")?,
            is_dir: r.bool("is_dir")?,
        },
        WireTransferType::FileData => TransferBody::FileData {
            data: r.bytes()?.to_vec(),
            total_size: r.u64()?,
        },
        WireTransferType::ExecResult => TransferBody::ExecResult(ExecOutput {
            stdout: r.string("stdout")?,
            stderr: r.string("stderr")?,
            exit_code: r.i32()?,
        }),
        WireTransferType::SearchResult => {
            let count = r.count(4)?;
            let mut directories = Vec::with_capacity(count);
            for _ in 0..count {
                directories.push(r.string("directory")?);
            }
            TransferBody::SearchResult { directories }
        }
    };

    Ok(TransferMessage { request_id, body })
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

fn start(out: &mut Vec<u8>, ty: WireTransferType, request_id: u32) {
    put_header(out, ty as u8);
    out.put_u32(request_id);
}

fn path_req(
    out: &mut Vec<u8>,
    ty: WireTransferType,
    request_id: u32,
    path: &str,
) -> Result<(), ProtocolError> {
    start(out, ty, request_id);
    put_str(out, path)
}
