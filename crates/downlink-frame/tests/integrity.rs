//! End-to-end framing behaviour: integrity, resynchronisation and the
//! wire scenarios agreed with the firmware team.

use std::io::Cursor;

use bytes::BytesMut;
use downlink_frame::{
    crc16, encode_frame, DropReason, FrameDecoder, FrameError, FramePoll, RawFrame, HEADER_SIZE,
    MAGIC,
};
use downlink_transport::{ByteSource, MemorySource, ReaderSource, TransportError};
use proptest::prelude::*;

fn frame_bytes(variant: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(variant, payload, &mut buf).expect("payload fits");
    buf.to_vec()
}

fn collect<S: ByteSource>(decoder: &mut FrameDecoder<S>) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    loop {
        match decoder.poll_frame() {
            Ok(FramePoll::Frame(frame)) => frames.push(frame),
            Ok(_) => {}
            Err(FrameError::Source(TransportError::Closed)) => return frames,
            Err(err) => panic!("unexpected decoder error: {err}"),
        }
    }
}

#[test]
fn single_int16_frame_scenario() {
    // One int16 field; the length field carries its two-byte width.
    let payload = (-1234i16).to_le_bytes();
    let crc = crc16(&[b'A', payload[0], payload[1]]).to_le_bytes();

    let mut wire = MAGIC.to_vec();
    wire.extend_from_slice(&2u16.to_le_bytes());
    wire.extend_from_slice(&crc);
    wire.push(b'A');
    wire.extend_from_slice(&payload);
    assert_eq!(wire, frame_bytes(b'A', &payload));

    let mut decoder = FrameDecoder::new(MemorySource::from_bytes(&wire));
    let poll = decoder.poll_frame().expect("source is healthy");
    assert_eq!(poll, FramePoll::Frame(RawFrame::new(b'A', payload.to_vec())));
}

#[test]
fn flipped_payload_byte_yields_no_packet_then_seeks() {
    let payload = 0x0102i16.to_le_bytes();
    let mut wire = frame_bytes(b'A', &payload);
    wire[HEADER_SIZE] ^= 0xFF;

    let mut decoder = FrameDecoder::new(MemorySource::from_bytes(&wire));
    assert!(matches!(
        decoder.poll_frame().expect("source is healthy"),
        FramePoll::Dropped(DropReason::Integrity { .. })
    ));
    assert_eq!(decoder.buffered(), 0);
    // Next call is back in header seek and finds the end of stream.
    assert!(matches!(
        decoder.poll_frame(),
        Err(FrameError::Source(TransportError::Closed))
    ));
}

#[test]
fn corrupted_then_valid_frame_emits_exactly_one() {
    let mut corrupted = frame_bytes(b'B', &[0x55; 12]);
    corrupted[HEADER_SIZE + 5] ^= 0x10;
    let valid = frame_bytes(b'A', &[0x01, 0x02, 0x03, 0x04]);

    let mut stream = corrupted;
    stream.extend_from_slice(&valid);

    let mut decoder = FrameDecoder::new(ReaderSource::new(Cursor::new(stream)));
    let frames = collect(&mut decoder);

    assert_eq!(frames, vec![RawFrame::new(b'A', vec![0x01, 0x02, 0x03, 0x04])]);
    assert_eq!(decoder.stats().integrity_errors, 1);
    assert_eq!(decoder.stats().frames, 1);
}

#[test]
fn noisy_stream_recovers_every_intact_frame() {
    let mut stream = vec![0xFF, 0xDE, 0xAD, 0x00];
    let mut expected = Vec::new();
    for i in 0..20u8 {
        let payload = vec![i; usize::from(i % 7) + 1];
        let mut bytes = frame_bytes(b'A' + (i % 2), &payload);
        if i % 5 == 3 {
            let last = bytes.len() - 1;
            bytes[last] ^= 0x80;
        } else {
            expected.push(RawFrame::new(b'A' + (i % 2), payload));
        }
        stream.extend_from_slice(&bytes);
        if i % 4 == 0 {
            stream.extend_from_slice(&[0x13, 0x37]);
        }
    }

    let mut decoder = FrameDecoder::new(ReaderSource::new(Cursor::new(stream)));
    assert_eq!(collect(&mut decoder), expected);
}

proptest! {
    #[test]
    fn single_bit_flip_changes_crc(
        data in proptest::collection::vec(any::<u8>(), 1..64),
        bit in any::<usize>(),
    ) {
        let bit = bit % (data.len() * 8);
        let mut flipped = data.clone();
        flipped[bit / 8] ^= 1 << (bit % 8);
        prop_assert_ne!(crc16(&data), crc16(&flipped));
    }

    #[test]
    fn crc_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..128)) {
        prop_assert_eq!(crc16(&data), crc16(&data.clone()));
    }

    #[test]
    fn any_encoded_frame_decodes(
        variant in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let wire = frame_bytes(variant, &payload);
        let mut decoder = FrameDecoder::new(MemorySource::from_bytes(&wire));
        prop_assert_eq!(
            decoder.poll_frame().expect("source is healthy"),
            FramePoll::Frame(RawFrame::new(variant, payload))
        );
    }
}
