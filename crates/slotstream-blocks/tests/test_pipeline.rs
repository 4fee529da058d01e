mod common;

use slotstream_blocks::{Pipeline, SlotSelector, TimeTagShifter};
use slotstream_core::tags::{self, StreamTag};
use slotstream_core::Timestamp;

use common::assert_tags_sorted;

/// Shifter → slot selector chain: the corrected time flows into the
/// selector's re-emitted tags
#[test]
fn test_shift_then_select() {
    let fs = 100.0;

    let shifter: TimeTagShifter<f32> = TimeTagShifter::new(true);
    shifter.control().send(2).unwrap();

    let selector: SlotSelector<f32> = SlotSelector::new(
        1.0,
        vec![1.0],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        fs,
    )
    .unwrap();

    let mut pipeline: Pipeline<f32> = Pipeline::new();
    pipeline.add_stage(Box::new(shifter));
    pipeline.add_stage(Box::new(selector));

    let input: Vec<f32> = (0..100).map(|i| i as f32).collect();
    let in_tags = vec![
        StreamTag::rx_time(0, Timestamp::new(10, 0.0), "receiver"),
        StreamTag::rx_rate(0, fs, "receiver"),
    ];

    let (out, out_tags) = pipeline.run(&input, &in_tags);

    // identity schedule: everything passes
    assert_eq!(out, input);
    assert_tags_sorted(&out_tags);

    // the selector re-emits the shifted time at the slot start
    let time_tag = out_tags.iter().find(|t| t.key == tags::RX_TIME).unwrap();
    assert_eq!(time_tag.offset, 0);
    assert_eq!(time_tag.value.as_time().unwrap(), Timestamp::new(12, 0.0));

    // a second window flows through with contiguous offsets
    let input2: Vec<f32> = (100..200).map(|i| i as f32).collect();
    let (out2, out_tags2) = pipeline.run(&input2, &[]);
    assert_eq!(out2, input2);
    assert_tags_sorted(&out_tags2);
}

/// Concrete blocks stay reachable behind the boxed stages
#[test]
fn test_stage_downcast() {
    let shifter: TimeTagShifter<f32> = TimeTagShifter::new(true);
    let selector: SlotSelector<f32> = SlotSelector::new(
        2.0,
        vec![0.5],
        vec![0.0],
        Timestamp::zero(),
        Timestamp::zero(),
        1000.0,
    )
    .unwrap();

    let mut pipeline: Pipeline<f32> = Pipeline::new();
    pipeline.add_stage(Box::new(shifter));
    pipeline.add_stage(Box::new(selector));

    assert!(pipeline.stage_mut::<TimeTagShifter<f32>>(0).is_some());
    assert!(pipeline.stage_mut::<SlotSelector<f32>>(1).is_some());
    assert!(pipeline.stage_mut::<SlotSelector<f32>>(0).is_none());

    // queue a schedule change through the downcast handle
    let handle = pipeline.stage_mut::<SlotSelector<f32>>(1).unwrap().schedule_handle();
    handle.set_schedule(2.0, vec![1.0], vec![0.0], 100, 0.0);
}
