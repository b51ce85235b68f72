//! Wire-protocol integration tests: framing, checksums, stream extraction.

use transit_coordinator::proto::{Frame, FrameError, FrameExtractor, MessageType};

fn connect_request(client_id: &str) -> Frame {
    let mut frame = Frame::new(MessageType::ConnectRequest);
    frame.set_str("client_id", client_id);
    frame.compute_checksum();
    frame
}

#[test]
fn encode_decode_identity() {
    let mut frame = Frame::new(MessageType::ConnectRequest);
    frame.set_str("client_id", "client_X");
    frame.set_i64("num", 42);
    frame.set_bool("flag", true);
    frame.compute_checksum();

    let decoded = Frame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded, frame);
    assert!(decoded.verify_checksum());

    let decoded = Frame::decode_stream(&frame.encode_stream()).unwrap();
    assert_eq!(decoded, frame);
}

#[test]
fn framing_under_fragmentation() {
    // ConnectRequest{client_id="client_X", num=42, flag=true}, checksummed,
    // fed to the extractor in slices of 3, 9, and the remainder
    let mut frame = Frame::new(MessageType::ConnectRequest);
    frame.set_str("client_id", "client_X");
    frame.set_i64("num", 42);
    frame.set_bool("flag", true);
    frame.compute_checksum();

    let stream = frame.encode_stream();
    let mut extractor = FrameExtractor::new();

    extractor.push(&stream[..3]);
    assert!(extractor.next_frame().unwrap().is_none());

    extractor.push(&stream[3..12]);
    assert!(extractor.next_frame().unwrap().is_none());

    extractor.push(&stream[12..]);
    let encoded = extractor.next_frame().unwrap().expect("one whole frame");
    assert!(extractor.next_frame().unwrap().is_none());

    let reconstructed = Frame::decode(&encoded).unwrap();
    assert_eq!(reconstructed, frame);
    assert_eq!(reconstructed.get_str("client_id"), "client_X");
    assert_eq!(reconstructed.get_i64("num"), 42);
    assert!(reconstructed.get_bool("flag"));
}

#[test]
fn back_to_back_frames_extract_in_order() {
    let a = connect_request("A");
    let b = connect_request("B");

    let mut stream = a.encode_stream();
    stream.extend_from_slice(&b.encode_stream());

    let mut extractor = FrameExtractor::new();
    extractor.push(&stream);

    let first = extractor.next_frame().unwrap().expect("frame A");
    let second = extractor.next_frame().unwrap().expect("frame B");
    assert_eq!(first, a.encode());
    assert_eq!(second, b.encode());
    assert_eq!(extractor.buffered(), 0);

    assert_eq!(Frame::decode(&first).unwrap().get_str("client_id"), "A");
    assert_eq!(Frame::decode(&second).unwrap().get_str("client_id"), "B");
}

#[test]
fn single_byte_corruption_breaks_the_checksum() {
    let frame = connect_request("client_X");
    let clean = frame.encode();

    // Flip one body byte at a time; every mutation must be detected
    for index in 24..clean.len() {
        let mut corrupted = clean.clone();
        corrupted[index] ^= 0x01;
        if let Ok(decoded) = Frame::decode(&corrupted) {
            assert!(
                !decoded.verify_checksum(),
                "corruption at byte {index} went undetected"
            );
        }
    }
}

#[test]
fn stream_decode_rejects_short_buffers() {
    let stream = connect_request("client_X").encode_stream();
    let err = Frame::decode_stream(&stream[..stream.len() - 1]).unwrap_err();
    assert!(matches!(err, FrameError::Truncated { .. }));
}

#[test]
fn decode_rejects_wrong_magic() {
    let mut bytes = connect_request("client_X").encode();
    bytes[0] = 0x58;
    assert!(matches!(
        Frame::decode(&bytes),
        Err(FrameError::BadMagic(_))
    ));
}
