use slotstream_blocks::{StreamOperator, StreamWindow, WorkResult};
use slotstream_core::StreamTag;

/// Drives one work call on an operator, allocating an output buffer of
/// `n_out` samples. Returns the produced samples and tags.
#[allow(dead_code)]
pub fn run_op<T: Copy + Default, O: StreamOperator<T>>(
    op: &mut O,
    samples: &[T],
    abs_offset: u64,
    tags: &[StreamTag],
    n_out: usize,
) -> (Vec<T>, Vec<StreamTag>, WorkResult) {
    let window = StreamWindow::new(samples, abs_offset, tags);
    let mut out = vec![T::default(); n_out];
    let mut out_tags = Vec::new();
    let result = op.work(&window, &mut out, &mut out_tags);
    out.truncate(result.produced);
    (out, out_tags, result)
}

/// Asserts that tag offsets are sorted; tags on a port are totally
/// ordered by offset
#[allow(dead_code)]
pub fn assert_tags_sorted(tags: &[StreamTag]) {
    for pair in tags.windows(2) {
        assert!(
            pair[0].offset <= pair[1].offset,
            "tags out of order: {:?} before {:?}",
            pair[0],
            pair[1]
        );
    }
}
