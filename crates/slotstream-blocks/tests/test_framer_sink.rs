use crossbeam_channel::unbounded;

use slotstream_blocks::framer_sink::{FramerSink, Packet};
use slotstream_blocks::StreamWindow;
use slotstream_core::tags::StreamTag;
use slotstream_core::{ChannelNum, Timestamp};

/// Bits of `value`, MSB first, as framer input bytes (data bit in the LSB)
fn header_bytes(value: u32) -> Vec<u8> {
    (0..32).rev().map(|bit| ((value >> bit) & 1) as u8).collect()
}

/// Payload bytes expanded to one framer input byte per bit, MSB first
fn payload_bytes(payload: &[u8]) -> Vec<u8> {
    payload
        .iter()
        .flat_map(|byte| (0..8).rev().map(move |bit| (byte >> bit) & 1))
        .collect()
}

struct TestQueues {
    packets: crossbeam_channel::Receiver<Packet>,
    times: crossbeam_channel::Receiver<Timestamp>,
    chans: crossbeam_channel::Receiver<ChannelNum>,
}

fn make_sink() -> (FramerSink, TestQueues) {
    let (packet_tx, packets) = unbounded();
    let (time_tx, times) = unbounded();
    let (chan_tx, chans) = unbounded();
    let sink = FramerSink::new(packet_tx, time_tx, chan_tx);
    (sink, TestQueues { packets, times, chans })
}

/// Header encoding: two identical shorts, length in the low 12 bits,
/// whitener offset in the upper 4
fn encode_header(len: u16, whitener: u16) -> u32 {
    let short = ((whitener << 12) | (len & 0x0fff)) as u32;
    (short << 16) | short
}

#[test]
fn test_single_packet() {
    let (mut sink, queues) = make_sink();

    let payload = [0xDEu8, 0xAD, 0xBE, 0xEF];
    let mut stream = vec![0u8; 10]; // idle bits before the sync
    let mut frame = header_bytes(encode_header(4, 0));
    frame[0] |= 0x2; // first-bit-after-sync flag
    stream.extend(frame);
    stream.extend(payload_bytes(&payload));
    stream.extend(vec![0u8; 7]);

    let in_tags = vec![
        StreamTag::rx_time(0, Timestamp::new(50, 0.0), "test"),
        StreamTag::rx_rate(0, 1000.0, "test"),
        StreamTag::dig_chan(0, 7, "test"),
    ];
    let consumed = sink.work(&StreamWindow::new(&stream, 0, &in_tags));
    assert_eq!(consumed, stream.len());

    let packet = queues.packets.try_recv().unwrap();
    assert_eq!(packet.payload, payload);
    assert_eq!(packet.whitener_offset, 0);

    // the triple arrives in lock-step
    let ts = queues.times.try_recv().unwrap();
    let expected = Timestamp::new(50, 0.0) + 10.0 / 1000.0;
    assert!((ts - expected).to_secs().abs() < 1e-9);
    assert_eq!(queues.chans.try_recv().unwrap(), 7);

    assert!(queues.packets.try_recv().is_err());
}

/// A corrupted header copy drops the packet; a clean one is accepted
#[test]
fn test_header_validation() {
    let (mut sink, queues) = make_sink();
    let payload = vec![0x55u8; 16];

    let mut stream = Vec::new();

    // valid: 0x00100010 encodes len=16, whitener offset 0
    let mut good = header_bytes(0x00100010);
    good[0] |= 0x2;
    stream.extend(good);
    stream.extend(payload_bytes(&payload));

    // same header with one bit flipped: the copies no longer match
    let mut bad = header_bytes(0x00100011);
    bad[0] |= 0x2;
    stream.extend(bad);
    stream.extend(payload_bytes(&payload));

    sink.work(&StreamWindow::new(&stream, 0, &[]));

    let packet = queues.packets.try_recv().unwrap();
    assert_eq!(packet.payload.len(), 16);
    assert!(queues.packets.try_recv().is_err(), "corrupted header must not emit");
}

/// Zero-length payloads are valid and still emit the full triple
#[test]
fn test_zero_length_payload() {
    let (mut sink, queues) = make_sink();

    let mut stream = header_bytes(encode_header(0, 3));
    stream[0] |= 0x2;
    sink.work(&StreamWindow::new(&stream, 0, &[]));

    let packet = queues.packets.try_recv().unwrap();
    assert!(packet.payload.is_empty());
    assert_eq!(packet.whitener_offset, 3);
    assert!(queues.times.try_recv().is_ok());
    assert!(queues.chans.try_recv().is_ok());
}

/// A packet split across work calls is reassembled
#[test]
fn test_packet_across_windows() {
    let (mut sink, queues) = make_sink();
    let payload = [0xA5u8, 0x3C];

    let mut stream = vec![0u8; 3];
    let mut frame = header_bytes(encode_header(2, 1));
    frame[0] |= 0x2;
    stream.extend(frame);
    stream.extend(payload_bytes(&payload));

    let (first, second) = stream.split_at(20);
    sink.work(&StreamWindow::new(first, 0, &[]));
    assert!(queues.packets.try_recv().is_err());

    sink.work(&StreamWindow::new(second, 20, &[]));
    let packet = queues.packets.try_recv().unwrap();
    assert_eq!(packet.payload, payload);
    assert_eq!(packet.whitener_offset, 1);
}

/// The channel reported with a packet is the context in force at its
/// sync index
#[test]
fn test_channel_follows_context() {
    let (mut sink, queues) = make_sink();
    let payload = [0xFFu8];

    let mut stream = vec![0u8; 8];
    let mut frame = header_bytes(encode_header(1, 0));
    frame[0] |= 0x2;
    stream.extend(frame);
    stream.extend(payload_bytes(&payload));

    let in_tags = vec![
        StreamTag::rx_time(0, Timestamp::zero(), "test"),
        StreamTag::rx_rate(0, 100.0, "test"),
        StreamTag::dig_chan(2, 1, "test"),
        // channel changes right before the sync at offset 8
        StreamTag::dig_chan(6, 4, "test"),
        // and again after it, which must not affect this packet
        StreamTag::dig_chan(20, 9, "test"),
    ];
    sink.work(&StreamWindow::new(&stream, 0, &in_tags));

    queues.packets.try_recv().unwrap();
    assert_eq!(queues.chans.try_recv().unwrap(), 4);
}
