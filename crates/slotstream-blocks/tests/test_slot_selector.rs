mod common;

use rand::Rng;

use slotstream_blocks::SlotSelector;
use slotstream_core::tags::{self, StreamTag};
use slotstream_core::{TagValue, Timestamp};

use common::{assert_tags_sorted, run_op};

fn start_tags(rate: f64, t0: Timestamp) -> Vec<StreamTag> {
    vec![
        StreamTag::rx_time(0, t0, "test_source"),
        StreamTag::rx_rate(0, rate, "test_source"),
    ]
}

fn ramp(n: usize, start: usize) -> Vec<f32> {
    (start..start + n).map(|i| i as f32).collect()
}

/// One slot of 0.1 s per 1 s frame: 2000 input samples at 1 kHz yield
/// two 100-sample slots, each freshly time-tagged.
#[test]
fn test_tenth_duty_cycle() {
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![0.1],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        1000.0,
    )
    .unwrap();

    let input = ramp(2000, 0);
    let (out, out_tags, result) = run_op(&mut selector, &input, 0, &start_tags(1000.0, Timestamp::zero()), 4000);

    assert_eq!(result.produced, 200);
    assert_eq!(result.consumed, 2000);
    assert_eq!(&out[..100], &input[..100]);
    assert_eq!(&out[100..200], &input[1000..1100]);

    assert_tags_sorted(&out_tags);
    let time_tags: Vec<_> = out_tags.iter().filter(|t| t.key == tags::RX_TIME).collect();
    let rate_tags: Vec<_> = out_tags.iter().filter(|t| t.key == tags::RX_RATE).collect();
    assert_eq!(time_tags.len(), 2);
    assert_eq!(rate_tags.len(), 2);

    assert_eq!(time_tags[0].offset, 0);
    assert_eq!(time_tags[0].value.as_time().unwrap(), Timestamp::zero());
    assert_eq!(time_tags[1].offset, 100);
    assert_eq!(time_tags[1].value.as_time().unwrap(), Timestamp::new(1, 0.0));
    assert_eq!(rate_tags[0].value.as_double(), Some(1000.0));
    assert_eq!(rate_tags[1].value.as_double(), Some(1000.0));
}

/// A slot covering the whole frame passes every sample through
#[test]
fn test_identity_schedule() {
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![1.0],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        100.0,
    )
    .unwrap();

    let mut total_out = Vec::new();
    let mut abs = 0u64;
    for chunk in [100usize, 100, 50] {
        let input = ramp(chunk, abs as usize);
        let window_tags = if abs == 0 { start_tags(100.0, Timestamp::zero()) } else { Vec::new() };
        let (out, out_tags, result) = run_op(&mut selector, &input, abs, &window_tags, chunk);
        assert_eq!(result.consumed, chunk);
        assert_tags_sorted(&out_tags);
        total_out.extend(out);
        abs += chunk as u64;
    }

    assert_eq!(total_out, ramp(250, 0));
}

/// The first half of each second passes; each contiguous run starts
/// with an rx_time tag on the slot boundary.
#[test]
fn test_half_second_cut() {
    let fs = 1000.0;
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![0.5],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let mut run_starts = Vec::new();
    let mut total_produced = 0usize;
    for k in 0..3u64 {
        let input = ramp(1000, (k * 1000) as usize);
        let window_tags = if k == 0 { start_tags(fs, Timestamp::zero()) } else { Vec::new() };
        let (out, out_tags, result) = run_op(&mut selector, &input, k * 1000, &window_tags, 1000);

        assert_eq!(result.produced, 500);
        assert_eq!(out[..500], ramp(500, (k * 1000) as usize)[..]);
        total_produced += result.produced;

        for tag in &out_tags {
            if tag.key == tags::RX_TIME {
                run_starts.push(tag.value.as_time().unwrap());
            }
        }
    }

    assert_eq!(total_produced, 1500);
    assert_eq!(run_starts.len(), 3);
    for (k, ts) in run_starts.iter().enumerate() {
        let expected = Timestamp::new(k as i64, 0.0);
        assert!(((*ts - expected).to_secs()).abs() < 1.0 / fs, "run {} starts at {}", k, ts);
    }
}

/// A schedule queued through the handle becomes active once the stream
/// crosses its frame_t0
#[test]
fn test_schedule_activation() {
    let fs = 1000.0;
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![0.1],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let handle = selector.schedule_handle();
    handle.set_schedule(1.0, vec![0.5], vec![0.0], 2, 0.0);

    let mut per_window = Vec::new();
    for k in 0..4u64 {
        let input = ramp(1000, (k * 1000) as usize);
        let window_tags = if k == 0 { start_tags(fs, Timestamp::zero()) } else { Vec::new() };
        let (_, _, result) = run_op(&mut selector, &input, k * 1000, &window_tags, 1000);
        per_window.push(result.produced);
    }

    // 0.1 s slots before t=2, 0.5 s slots after
    assert_eq!(per_window, vec![100, 100, 500, 500]);
}

/// Context tags ride across the cut: the channel in force at a slot
/// start is re-declared on the slot's first output sample.
#[test]
fn test_context_tags_cross_cut() {
    let fs = 1000.0;
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![0.1],
        vec![0.5],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let mut window_tags = start_tags(fs, Timestamp::zero());
    // channel changes at t = 0.2 s, well before the slot at 0.5 s
    window_tags.push(StreamTag::dig_chan(200, 3, "test_source"));

    let input = ramp(1000, 0);
    let (_, out_tags, result) = run_op(&mut selector, &input, 0, &window_tags, 1000);

    assert_eq!(result.produced, 100);
    let chan_tags: Vec<_> = out_tags.iter().filter(|t| t.key == tags::DIG_CHAN).collect();
    assert_eq!(chan_tags.len(), 1);
    // clamped to the slot's first output sample
    assert_eq!(chan_tags[0].offset, 0);
    assert_eq!(chan_tags[0].value.as_int(), Some(3));
}

/// Tags that are neither time, rate, nor context are translated into
/// the output coordinate system when they land inside a slot.
#[test]
fn test_other_tag_translation() {
    let fs = 1000.0;
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![0.1],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let mut window_tags = start_tags(fs, Timestamp::zero());
    window_tags.push(StreamTag::new(50, "burst_id", TagValue::Int(42), "test_source"));
    window_tags.push(StreamTag::new(400, "burst_id", TagValue::Int(43), "test_source"));
    window_tags.push(StreamTag::new(1020, "burst_id", TagValue::Int(44), "test_source"));

    let input = ramp(2000, 0);
    let (_, out_tags, _) = run_op(&mut selector, &input, 0, &window_tags, 2000);

    let burst_tags: Vec<_> = out_tags.iter().filter(|t| t.key == "burst_id").collect();
    // offset 50 lies in the first slot, 1020 in the second; 400 is cut
    assert_eq!(burst_tags.len(), 2);
    assert_eq!(burst_tags[0].offset, 50);
    assert_eq!(burst_tags[0].value.as_int(), Some(42));
    assert_eq!(burst_tags[1].offset, 120);
    assert_eq!(burst_tags[1].value.as_int(), Some(44));
}

/// Chopping the input into random windows never changes what comes out
#[test]
fn test_random_chunking() {
    let fs = 1000.0;
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        0.5,
        vec![0.25],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let total = 5000usize;
    let input = ramp(total, 0);
    let mut rng = rand::rng();

    let mut produced = 0usize;
    let mut consumed = 0usize;
    while consumed < total {
        let chunk = rng.random_range(1..=700).min(total - consumed);
        let window_tags = if consumed == 0 { start_tags(fs, Timestamp::zero()) } else { Vec::new() };
        let (_, out_tags, result) = run_op(
            &mut selector,
            &input[consumed..consumed + chunk],
            consumed as u64,
            &window_tags,
            chunk,
        );
        assert_eq!(result.consumed, chunk);
        assert_tags_sorted(&out_tags);
        produced += result.produced;
        consumed += chunk;
    }

    // 10 frames of 500 samples, half of each selected
    assert_eq!(produced, 2500);
}

/// With no slot intersecting the window, all input is still consumed
/// (the stream must always make progress)
#[test]
fn test_progress_without_output() {
    let mut selector: SlotSelector<f32> = SlotSelector::new(
        10.0,
        vec![0.1],
        vec![9.0],
        Timestamp::zero(),
        Timestamp::zero(),
        1000.0,
    )
    .unwrap();

    let input = ramp(1000, 0);
    let (_, _, result) = run_op(&mut selector, &input, 0, &start_tags(1000.0, Timestamp::zero()), 1000);
    assert_eq!(result.produced, 0);
    assert_eq!(result.consumed, 1000);
}

#[test]
fn test_rejects_bad_config() {
    assert!(SlotSelector::<f32>::new(0.0, vec![0.1], vec![0.0], Timestamp::zero(), Timestamp::zero(), 1000.0).is_err());
    assert!(SlotSelector::<f32>::new(1.0, vec![0.1, 0.2], vec![0.0], Timestamp::zero(), Timestamp::zero(), 1000.0).is_err());
    assert!(SlotSelector::<f32>::new(1.0, vec![-0.1], vec![0.0], Timestamp::zero(), Timestamp::zero(), 1000.0).is_err());
    assert!(SlotSelector::<f32>::new(1.0, vec![0.1], vec![0.0], Timestamp::zero(), Timestamp::zero(), 0.0).is_err());
}
