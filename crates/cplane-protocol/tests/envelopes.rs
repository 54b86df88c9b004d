// crates/cplane-protocol/tests/envelopes.rs
use cplane_core::{
    ConnectionParam, ControlMessage, DirEntry, EngineHello, JumpHost, PortCheckEntry,
    PortCheckResult, SessionOpen, SessionType, TransferBody, TransferMessage,
};
use cplane_protocol::builders::{control_frame, write_data_frame};
use cplane_protocol::wire_types::{WireControlType, PROTOCOL_VERSION};
use cplane_protocol::{
    decode_control, decode_transfer, encode_control, encode_transfer, FrameReader, ProtocolError,
};

fn encoded(msg: &ControlMessage) -> Vec<u8> {
    let mut out = Vec::new();
    encode_control(msg, &mut out).expect("encode");
    out
}

#[test]
fn engine_hello_layout() {
    let msg = ControlMessage::EngineHello(EngineHello {
        version: "0.1.0".into(),
        registration_token: Some("tok".into()),
    });
    let buf = encoded(&msg);

    assert_eq!(buf[0], WireControlType::EngineHello as u8);
    assert_eq!(buf[1], PROTOCOL_VERSION);
    assert_eq!(&buf[2..4], &[0, 0]);
    // version: u32 len + bytes
    assert_eq!(&buf[4..8], &5u32.to_be_bytes());
    assert_eq!(&buf[8..13], b"0.1.0");
    // token present
    assert_eq!(buf[13], 1);

    assert_eq!(decode_control(&buf).expect("decode"), msg);
}

#[test]
fn hello_without_token_decodes_to_none() {
    let msg = ControlMessage::EngineHello(EngineHello {
        version: "0.1.0".into(),
        registration_token: None,
    });
    match decode_control(&encoded(&msg)).expect("decode") {
        ControlMessage::EngineHello(h) => assert_eq!(h.registration_token, None),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn session_open_carries_params_and_jump_hosts() {
    let mut jump = JumpHost::new("bastion", "ops");
    jump.private_key = Some("-----BEGIN KEY-----".into());

    let msg = ControlMessage::SessionOpen(SessionOpen {
        session_id: "s1".into(),
        session_type: SessionType::Ssh,
        host: "10.0.0.5".into(),
        port: 22,
        params: vec![
            ConnectionParam::new("username", "root"),
            ConnectionParam::new("term", "xterm-256color"),
        ],
        jump_hosts: vec![jump],
    });

    let decoded = decode_control(&encoded(&msg)).expect("decode");
    assert_eq!(decoded, msg);
    match decoded {
        ControlMessage::SessionOpen(open) => {
            assert_eq!(open.jump_hosts[0].port, 22);
            assert_eq!(open.jump_hosts[0].password, None);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn port_check_result_entries_keep_order() {
    let msg = ControlMessage::PortCheckResult(PortCheckResult {
        request_id: "portcheck-1".into(),
        results: vec![
            PortCheckEntry { id: "a".into(), online: true },
            PortCheckEntry { id: "b".into(), online: false },
        ],
    });
    assert_eq!(decode_control(&encoded(&msg)).expect("decode"), msg);
}

#[test]
fn rejects_bad_headers() {
    assert!(matches!(decode_control(&[1, 1]), Err(ProtocolError::Truncated)));
    assert!(matches!(
        decode_control(&[1, 9, 0, 0]),
        Err(ProtocolError::VersionMismatch(9))
    ));
    assert!(matches!(
        decode_control(&[200, PROTOCOL_VERSION, 0, 0]),
        Err(ProtocolError::UnknownMessageType(200))
    ));
}

#[test]
fn truncated_body_is_an_error() {
    let msg = ControlMessage::EngineHello(EngineHello {
        version: "0.1.0".into(),
        registration_token: Some("secret".into()),
    });
    let buf = encoded(&msg);
    assert!(matches!(
        decode_control(&buf[..buf.len() - 2]),
        Err(ProtocolError::Truncated)
    ));
}

#[test]
fn huge_vector_count_does_not_allocate() {
    // PortCheckResult with request_id "" and a count of u32::MAX.
    let mut buf = vec![WireControlType::PortCheckResult as u8, PROTOCOL_VERSION, 0, 0];
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(decode_control(&buf), Err(ProtocolError::Truncated)));
}

#[test]
fn invalid_utf8_names_the_field() {
    let mut buf = vec![WireControlType::ConnectionReady as u8, PROTOCOL_VERSION, 0, 0];
    buf.extend_from_slice(&2u32.to_be_bytes());
    buf.extend_from_slice(&[0xff, 0xfe]);
    assert!(matches!(
        decode_control(&buf),
        Err(ProtocolError::InvalidUtf8("session_id"))
    ));
}

#[test]
fn control_frame_is_length_prefixed() {
    let framed = control_frame(&ControlMessage::SessionJoin(cplane_core::SessionJoin {
        session_id: "s1".into(),
    }))
    .expect("frame");

    let mut reader = FrameReader::new();
    reader.push(&framed);
    let payload = reader.next_frame().unwrap().unwrap();
    assert!(matches!(
        decode_control(&payload).unwrap(),
        ControlMessage::SessionJoin(j) if j.session_id == "s1"
    ));
}

#[test]
fn transfer_envelope_carries_request_id() {
    let msg = TransferMessage::new(
        42,
        TransferBody::DirList {
            entries: vec![DirEntry {
                name: "etc".into(),
                is_dir: true,
                is_symlink: false,
                mtime: 1_700_000_000,
                size: 4096,
                mode: 0o40755,
            }],
        },
    );
    let mut buf = Vec::new();
    encode_transfer(&msg, &mut buf).expect("encode");
    assert_eq!(&buf[4..8], &42u32.to_be_bytes());
    assert_eq!(decode_transfer(&buf).expect("decode"), msg);
}

#[test]
fn write_data_frame_matches_body_encoding() {
    let framed = write_data_frame(7, b"chunk").expect("frame");

    let mut reader = FrameReader::new();
    reader.push(&framed);
    let payload = reader.next_frame().unwrap().unwrap();
    assert_eq!(
        decode_transfer(&payload).unwrap(),
        TransferMessage::new(7, TransferBody::WriteData { data: b"chunk".to_vec() })
    );
}
