//! End-to-end protocol tests: messages through the codec, the codec through
//! the frame reader, and chunked transfers through both.

use msp_proto::codes::{field, flags, msg, FILE_CHUNK_SIZE, HEADER_SIZE, MAX_RECV_BUFFER};
use msp_proto::{
    chunk_message, decode, encode, split_chunks, ChunkAssembler, FrameReader, Message,
    ProtocolError,
};

fn login_message(request_id: u32) -> Message {
    let mut message = Message::new(msg::LOGIN, request_id);
    message.set_text(field::LOGIN_NAME, "operator");
    message.set_text(field::PASSWORD, "secret");
    message.set_text(field::DEVICE_ID, "device-0001");
    message.set_int16(field::FLAGS, 0);
    message
}

#[test]
fn test_decode_is_the_inverse_of_encode() {
    let message = login_message(101);
    let decoded = decode(&encode(&message, false)).expect("decode");
    assert_eq!(decoded, message);
}

#[test]
fn test_decode_is_the_inverse_of_encode_with_compression() {
    let mut message = Message::new(msg::PUSH_DATA, 102);
    for i in 0..64u32 {
        message.set_text(field::PUSH_DATA_BASE + i, format!("metric-{i}"));
    }
    let decoded = decode(&encode(&message, true)).expect("decode");
    assert_eq!(decoded, message);
}

#[test]
fn test_frame_at_the_receive_cap_still_passes() {
    // Largest legal frame: header + binary payload filling the cap exactly.
    let payload = vec![0x5Au8; MAX_RECV_BUFFER - HEADER_SIZE];
    let mut message = Message::new(msg::FILE_DATA, 103);
    message.set_binary_data(payload);

    let wire = encode(&message, false);
    assert_eq!(wire.len(), MAX_RECV_BUFFER);

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut stream = wire.as_slice();
        let mut reader = FrameReader::new();
        let frame = reader.next_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
    });
}

#[test]
fn test_stream_of_mixed_frames_decodes_in_order() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    rt.block_on(async {
        let mut wire = Vec::new();
        let mut expected = Vec::new();
        for id in 1..=5u32 {
            let mut message = login_message(id);
            if id % 2 == 0 {
                message = Message::new(msg::FILE_DATA, id);
                message.set_binary_data(vec![id as u8; 1000]);
            }
            wire.extend_from_slice(&encode(&message, false));
            expected.push(message);
        }

        let mut stream = wire.as_slice();
        let mut reader = FrameReader::new();
        for want in &expected {
            let frame = reader.next_frame(&mut stream).await.unwrap().unwrap();
            assert_eq!(&decode(&frame).unwrap(), want);
        }
        assert!(reader.next_frame(&mut stream).await.unwrap().is_none());
    });
}

#[test]
fn test_chunked_transfer_survives_the_wire() {
    let payload: Vec<u8> = (0..300 * 1024).map(|i| (i * 31 % 256) as u8).collect();

    // Encode every chunk as a real frame, then reassemble from decoded frames.
    let mut assembler = ChunkAssembler::new(42);
    let chunks = split_chunks(&payload, FILE_CHUNK_SIZE);
    assert_eq!(chunks.len(), 3);

    for (chunk, is_last) in chunks {
        let wire = encode(&chunk_message(42, chunk, is_last), false);
        let decoded = decode(&wire).unwrap();
        assert!(decoded.has_flag(flags::BINARY));
        assembler.push(&decoded).unwrap();
    }

    assert!(assembler.is_complete());
    assert_eq!(assembler.into_payload(), payload);
}

#[test]
fn test_arbitrary_garbage_never_panics() {
    // Deterministic pseudo-random buffers with plausible length prefixes.
    let mut state = 0x9E3779B9u32;
    let mut rng = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };

    for _ in 0..200 {
        let len = (rng() % 512) as usize;
        let mut buf: Vec<u8> = (0..len).map(|_| (rng() >> 16) as u8).collect();
        if buf.len() >= HEADER_SIZE {
            // Make frame_len consistent so decode exercises the field parser.
            let total = buf.len() as u32;
            buf[4..8].copy_from_slice(&total.to_be_bytes());
        }
        match decode(&buf) {
            Ok(_) => {}
            Err(
                ProtocolError::Truncated { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::Oversized { .. }
                | ProtocolError::UnknownTypeTag(_)
                | ProtocolError::BadUtf8 { .. }
                | ProtocolError::Decompress(_),
            ) => {}
        }
    }
}
