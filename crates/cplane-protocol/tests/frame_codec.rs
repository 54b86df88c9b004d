// crates/cplane-protocol/tests/frame_codec.rs
use bytes::Bytes;
use cplane_protocol::frame::{encode_frame, FrameError, FrameReader, MAX_FRAME_SIZE};

fn collect(reader: &mut FrameReader, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
    let mut frames = Vec::new();
    reader.feed(chunk, |f| frames.push(f))?;
    Ok(frames)
}

#[test]
fn single_frame_round_trip() {
    let payload = b"hello engine";
    let framed = encode_frame(payload).expect("encode");

    assert_eq!(&framed[..4], &(payload.len() as u32).to_be_bytes());

    let mut reader = FrameReader::new();
    let frames = collect(&mut reader, &framed).expect("feed");
    assert_eq!(frames, vec![Bytes::from_static(payload)]);
    assert!(reader.drain().is_empty());
}

#[test]
fn byte_by_byte_delivery_yields_one_frame() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    let framed = encode_frame(&payload).expect("encode");

    let mut reader = FrameReader::new();
    let mut frames = Vec::new();
    for b in framed.iter() {
        reader.feed(&[*b], |f| frames.push(f)).expect("feed");
    }

    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0][..], &payload[..]);
}

#[test]
fn several_frames_in_one_chunk_and_a_partial_tail() {
    let mut wire = Vec::new();
    wire.extend_from_slice(&encode_frame(b"one").unwrap());
    wire.extend_from_slice(&encode_frame(b"two").unwrap());
    let third = encode_frame(b"three").unwrap();
    wire.extend_from_slice(&third[..5]);

    let mut reader = FrameReader::new();
    let frames = collect(&mut reader, &wire).expect("feed");
    assert_eq!(frames, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);

    let frames = collect(&mut reader, &third[5..]).expect("feed");
    assert_eq!(frames, vec![Bytes::from_static(b"three")]);
}

#[test]
fn largest_frame_is_accepted() {
    let payload = vec![0xAB; MAX_FRAME_SIZE];
    let framed = encode_frame(&payload).expect("encode max");

    let mut reader = FrameReader::new();
    let frames = collect(&mut reader, &framed).expect("feed");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), MAX_FRAME_SIZE);
}

#[test]
fn zero_length_poisons_reader() {
    let mut reader = FrameReader::new();
    let mut wire = vec![0, 0, 0, 0];
    wire.extend_from_slice(&encode_frame(b"after").unwrap());

    let mut frames = Vec::new();
    let err = reader.feed(&wire, |f| frames.push(f)).unwrap_err();
    assert_eq!(err, FrameError::InvalidLength(0));
    assert!(frames.is_empty(), "no frame may be delivered");
    assert!(reader.is_poisoned());

    // Subsequent bytes are ignored and the error is not repeated.
    let frames = collect(&mut reader, &encode_frame(b"more").unwrap()).expect("silent");
    assert!(frames.is_empty());
}

#[test]
fn oversize_length_poisons_reader() {
    let declared = (MAX_FRAME_SIZE as u32) + 1;
    let mut reader = FrameReader::new();

    let mut frames = Vec::new();
    let err = reader
        .feed(&declared.to_be_bytes(), |f| frames.push(f))
        .unwrap_err();
    assert_eq!(err, FrameError::InvalidLength(MAX_FRAME_SIZE + 1));
    assert!(frames.is_empty());
}

#[test]
fn encode_rejects_empty_and_oversize() {
    assert_eq!(encode_frame(&[]).unwrap_err(), FrameError::InvalidLength(0));
    let too_big = vec![0u8; MAX_FRAME_SIZE + 1];
    assert!(encode_frame(&too_big).is_err());
}

#[test]
fn drain_returns_bytes_after_handshake_frame() {
    let mut wire = encode_frame(b"handshake").unwrap().to_vec();
    wire.extend_from_slice(&[7, 8, 9]);

    let mut reader = FrameReader::new();
    reader.push(&wire);

    let first = reader.next_frame().expect("ok").expect("frame");
    assert_eq!(&first[..], b"handshake");

    // Raw session bytes look like a truncated length prefix; they must
    // be handed back untouched.
    assert_eq!(reader.next_frame().expect("ok"), None);
    assert_eq!(&reader.drain()[..], &[7, 8, 9]);
    assert!(reader.drain().is_empty());
}
