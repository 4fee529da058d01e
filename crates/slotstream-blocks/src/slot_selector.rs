use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use slotstream_core::intervals::{Interval, IntervalSet, SeparateIntervalSet};
use slotstream_core::tags::{self, StreamTag};
use slotstream_core::{BlockConfigError, ContextTagManager, Timestamp};

use crate::stream::{StreamOperator, StreamWindow, WorkResult};

const SRCID: &str = "slot_selector";

/// A repeating frame schedule: frame k spans
/// `[frame_t0 + k*frame_len, frame_t0 + (k+1)*frame_len)` and contains
/// one slot `[offset, offset+len)` per entry in the slot lists.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub frame_len: f64,
    pub slot_lens: Vec<f64>,
    pub slot_offsets: Vec<f64>,
    pub frame_t0: Timestamp,
}

/// Thread-safe setter handle for queueing future schedules on a
/// `SlotSelector`. A queued schedule becomes active the first work call
/// in which the sample window crosses its `frame_t0`.
#[derive(Clone)]
pub struct ScheduleHandle(Arc<Mutex<VecDeque<Schedule>>>);

impl ScheduleHandle {
    /// Stores a new schedule to take effect at `frame_t0`. Any queued
    /// schedule with a later-or-equal start is discarded first, so the
    /// queue stays ordered by start time.
    pub fn set_schedule(
        &self,
        frame_len: f64,
        slot_lens: Vec<f64>,
        slot_offsets: Vec<f64>,
        frame_t0_int_s: i64,
        frame_t0_frac_s: f64,
    ) {
        let sched = Schedule {
            frame_len,
            slot_lens,
            slot_offsets,
            frame_t0: Timestamp::new(frame_t0_int_s, frame_t0_frac_s),
        };

        let mut queue = self.0.lock().unwrap();
        while let Some(back) = queue.back() {
            if back.frame_t0 >= sched.frame_t0 {
                queue.pop_back();
            } else {
                break;
            }
        }
        queue.push_back(sched);
    }
}

/// Reference pair extracted from one rx_time/rx_rate tag pair
#[derive(Debug, Clone, Copy)]
struct TagTuple {
    offset: u64,
    time: Timestamp,
    rate: f64,
}

/// Cuts scheduled time intervals out of a timestamped stream.
///
/// Only samples whose timestamps fall inside a slot of the active
/// schedule are passed through. Each emitted slot begins with a fresh
/// `rx_time`/`rx_rate` pair, context tags are carried across the cut,
/// and all other tags are translated into the output coordinate system.
pub struct SlotSelector<T> {
    frame_len: f64,
    slot_lens: Vec<f64>,
    slot_offsets: Vec<f64>,
    frame_t0_gps: Timestamp,

    // reference anchoring the current window: all interval arithmetic
    // in a work call is relative to timestamp_gps
    timestamp_gps: Timestamp,
    timestamp_sample: u64,
    samp_rate: f64,

    last_time_tag_update_gps: Timestamp,

    tag_manager: ContextTagManager,
    pending: Arc<Mutex<VecDeque<Schedule>>>,

    items_read: u64,
    items_written: u64,

    // per-call tag scratch
    tag_tuples: Vec<TagTuple>,
    other_tags: Vec<StreamTag>,

    _samples: std::marker::PhantomData<T>,
}

impl<T: Copy> SlotSelector<T> {
    pub fn new(
        frame_len: f64,
        slot_lens: Vec<f64>,
        slot_offsets: Vec<f64>,
        frame_t0: Timestamp,
        stream_t0: Timestamp,
        sample_rate: f64,
    ) -> Result<SlotSelector<T>, BlockConfigError> {
        if frame_len <= 0.0 {
            return Err(BlockConfigError::OutOfRange { field: "frame_len", reason: "must be positive" });
        }
        if sample_rate <= 0.0 {
            return Err(BlockConfigError::OutOfRange { field: "sample_rate", reason: "must be positive" });
        }
        if slot_lens.len() != slot_offsets.len() {
            return Err(BlockConfigError::InvalidArgument {
                field: "slot_lens",
                reason: "slot_lens and slot_offsets must have the same length",
            });
        }
        if slot_lens.iter().any(|&len| len <= 0.0) {
            return Err(BlockConfigError::OutOfRange { field: "slot_lens", reason: "all slots must have positive length" });
        }

        Ok(SlotSelector {
            frame_len,
            slot_lens,
            slot_offsets,
            frame_t0_gps: frame_t0,
            timestamp_gps: stream_t0,
            timestamp_sample: 0,
            samp_rate: sample_rate,
            last_time_tag_update_gps: Timestamp::zero(),
            tag_manager: ContextTagManager::new(&[tags::DIG_CHAN]),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            items_read: 0,
            items_written: 0,
            tag_tuples: Vec::new(),
            other_tags: Vec::new(),
            _samples: std::marker::PhantomData,
        })
    }

    /// Handle for queueing schedule changes from other threads
    pub fn schedule_handle(&self) -> ScheduleHandle {
        ScheduleHandle(self.pending.clone())
    }

    pub fn items_read(&self) -> u64 {
        self.items_read
    }

    pub fn items_written(&self) -> u64 {
        self.items_written
    }

    /// Sorts incoming stream tags into rx_time/rx_rate reference tuples,
    /// context tags (into the manager), and everything else.
    fn sort_tags(&mut self, window: &StreamWindow<T>) {
        self.other_tags.clear();
        self.tag_tuples.clear();

        let mut time_tags: Vec<&StreamTag> = Vec::new();
        let mut rate_tags: Vec<&StreamTag> = Vec::new();

        for tag in tags::tags_in_range(window.tags, window.abs_offset, window.end_offset()) {
            match tag.key.as_str() {
                tags::RX_TIME => {
                    if time_tags.last().is_some_and(|t| t.offset == tag.offset) {
                        time_tags.pop();
                    }
                    time_tags.push(tag);
                }
                tags::RX_RATE => {
                    if rate_tags.last().is_some_and(|t| t.offset == tag.offset) {
                        rate_tags.pop();
                    }
                    rate_tags.push(tag);
                }
                tags::DIG_CHAN => {
                    self.tag_manager.add(tag.clone());
                }
                _ => {
                    self.other_tags.push(tag.clone());
                }
            }
        }
        time_tags.sort_by_key(|t| t.offset);
        rate_tags.sort_by_key(|t| t.offset);
        self.other_tags.sort_by_key(|t| t.offset);

        // if the first time tag appears later than the saved reference, or
        // there are no tags at all, prepend the saved reference so any
        // sample in the window can be timestamped
        if time_tags.first().is_none_or(|t| t.offset > self.timestamp_sample) {
            self.tag_tuples.push(TagTuple {
                offset: self.timestamp_sample,
                time: self.timestamp_gps,
                rate: self.samp_rate,
            });
        }

        let mut rate = self.samp_rate;
        for (k, time_tag) in time_tags.iter().enumerate() {
            let Some(ts) = time_tag.value.as_time() else {
                tracing::warn!("rx_time tag at offset {} has a non-time value, skipping", time_tag.offset);
                continue;
            };
            match rate_tags.get(k).and_then(|t| t.value.as_double()) {
                Some(r) => rate = r,
                None => {
                    tracing::warn!("rx_time tag at offset {} without matching rx_rate", time_tag.offset);
                }
            }
            // round the timestamp onto the sample grid
            self.tag_tuples.push(TagTuple {
                offset: time_tag.offset,
                time: ts.round_to_rate(self.samp_rate),
                rate,
            });
        }

        if self.tag_tuples.is_empty() {
            // every time tag in the window was malformed
            self.tag_tuples.push(TagTuple {
                offset: self.timestamp_sample,
                time: self.timestamp_gps,
                rate: self.samp_rate,
            });
        }
    }

    /// Builds the set of timestamps present in the input window, as
    /// intervals relative to `timestamp_gps`. Adjacent tag regions merge
    /// into one continuous block.
    fn compute_current_blocks(&mut self, n_in: usize) -> IntervalSet {
        let mut blocks = IntervalSet::new();

        // handle special case of a tag on the first sample of this window
        if self.tag_tuples[0].offset == self.items_read {
            self.timestamp_gps = self.tag_tuples[0].time;
            self.timestamp_sample = self.tag_tuples[0].offset;
            self.samp_rate = self.tag_tuples[0].rate;
        }

        // deltas are signed: after a short consume the saved reference
        // can sit past the start (or even the end) of this window
        let mut samp_rate = self.tag_tuples[0].rate;
        let mut current_offset = self.items_read;
        let mut t_start = self.tag_tuples[0].time
            + (current_offset as i64 - self.tag_tuples[0].offset as i64) as f64 / samp_rate;

        for tup in &self.tag_tuples[1..] {
            let t_end = t_start + (tup.offset as i64 - current_offset as i64) as f64 / samp_rate;
            blocks.insert(Interval::new(
                (t_start - self.timestamp_gps).to_secs(),
                (t_end - self.timestamp_gps).to_secs(),
            ));
            current_offset = tup.offset;
            samp_rate = tup.rate;
            t_start = tup.time;
        }

        let last = self.tag_tuples.last().unwrap();
        let end_offset = self.items_read + n_in as u64;
        let t_end = last.time + (end_offset as i64 - last.offset as i64) as f64 / samp_rate;
        blocks.insert(Interval::new(
            (t_start - self.timestamp_gps).to_secs(),
            (t_end - self.timestamp_gps).to_secs(),
        ));
        blocks
    }

    /// Activates any pending schedule whose start falls before the end of
    /// the current blocks, then expands the active schedule into the
    /// slot intervals that might intersect the window. Adjacent slots
    /// stay distinct, which matters when the schedule covers all of time
    /// with back-to-back slots.
    fn compute_slots_of_interest(&mut self, current_blocks: &IntervalSet) -> SeparateIntervalSet {
        let t_start = current_blocks.lower();
        let t_end = current_blocks.upper();

        {
            let mut queue = self.pending.lock().unwrap();
            let mut activated: Option<Schedule> = None;
            while let Some(front) = queue.front() {
                if (front.frame_t0 - self.timestamp_gps).to_secs() < t_end {
                    activated = queue.pop_front();
                } else {
                    break;
                }
            }
            // latest qualifying schedule wins
            if let Some(sched) = activated {
                tracing::info!("schedule change at {} now active", sched.frame_t0);
                self.frame_len = sched.frame_len;
                self.slot_lens = sched.slot_lens;
                self.slot_offsets = sched.slot_offsets;
                self.frame_t0_gps = sched.frame_t0;
            }
        }

        let gps_offset = (self.timestamp_gps - self.frame_t0_gps).to_secs();
        let first_frame = (((gps_offset + t_start) / self.frame_len).ceil() as i64) - 1;
        let last_frame = (((gps_offset + t_end) / self.frame_len).floor() as i64) + 1;

        let mut slot_ints = SeparateIntervalSet::new();
        for m in first_frame..=last_frame {
            for n in 0..self.slot_lens.len() {
                let slot_start_gps =
                    self.frame_t0_gps + (m as f64 * self.frame_len + self.slot_offsets[n]);
                let slot_end_gps = slot_start_gps + self.slot_lens[n];
                slot_ints.insert(Interval::new(
                    (slot_start_gps - self.timestamp_gps).to_secs(),
                    (slot_end_gps - self.timestamp_gps).to_secs(),
                ));
            }
        }
        slot_ints
    }

    /// Truncates `output_slots` so the implied sample count fits in
    /// `n_out`, and returns how many input samples this call consumes.
    /// An empty output still consumes the whole window so the stream
    /// always makes progress.
    fn limit_output_samples(
        &self,
        n_out: usize,
        n_in: usize,
        current_blocks: &IntervalSet,
        output_slots: &mut SeparateIntervalSet,
    ) -> usize {
        if output_slots.is_empty() {
            return n_in;
        }
        if (output_slots.total_len() * self.samp_rate).round() as usize <= n_out {
            // everything fits: we are starved for input, not output
            return n_in;
        }

        let mut total_samples = 0usize;
        let mut cut_at = None;
        for iv in output_slots.iter() {
            let block_samples = (iv.len() * self.samp_rate).round() as usize;
            if total_samples + block_samples < n_out {
                total_samples += block_samples;
            } else {
                let last_block_samples = (n_out - total_samples) as f64;
                cut_at = Some(last_block_samples / self.samp_rate + iv.lo);
                break;
            }
        }

        if let Some(cut_at) = cut_at {
            output_slots.subtract_tail(cut_at);
            let mut blocks_consumed = current_blocks.clone();
            blocks_consumed.subtract_tail(cut_at);
            ((blocks_consumed.total_len() * self.samp_rate).round() as usize).min(n_in)
        } else {
            n_in
        }
    }

    /// Reference tuple with the largest time <= `ts`
    fn find_ref_by_time(&self, ts: Timestamp) -> Option<&TagTuple> {
        let n = self.tag_tuples.partition_point(|t| t.time <= ts);
        if n == 0 { None } else { Some(&self.tag_tuples[n - 1]) }
    }

    /// Reference tuple with the largest offset <= `offset`
    fn find_ref_by_offset(&self, offset: u64) -> Option<&TagTuple> {
        let n = self.tag_tuples.partition_point(|t| t.offset <= offset);
        if n == 0 { None } else { Some(&self.tag_tuples[n - 1]) }
    }

    /// Copies every output slot to the output buffer, emitting time,
    /// rate, context, and translated pass-through tags as it goes.
    fn produce_outputs(
        &mut self,
        window: &StreamWindow<T>,
        slots_of_interest: &SeparateIntervalSet,
        output_slots: &SeparateIntervalSet,
        out: &mut [T],
        out_tags: &mut Vec<StreamTag>,
    ) -> usize {
        let n_in = window.len();
        let tags_start = out_tags.len();

        // pre-compute the window-relative timestamp of every pass-through
        // tag, keeping only those that land inside an output slot
        let mut fwd_tags: Vec<(StreamTag, f64)> = Vec::new();
        for tag in &self.other_tags {
            let Some(r) = self.find_ref_by_offset(tag.offset) else {
                continue;
            };
            let tag_ts =
                (r.time - self.timestamp_gps).to_secs() + (tag.offset - r.offset) as f64 / r.rate;
            if output_slots.contains_point(tag_ts) {
                fwd_tags.push((tag.clone(), tag_ts));
            }
        }
        let mut fwd_it = fwd_tags.iter().peekable();

        let mut output_offset = 0usize;
        for iv in output_slots.iter() {
            let slot_ts = iv.lo;

            // discard pass-through tags belonging to earlier, skipped slots
            while fwd_it.peek().is_some_and(|(_, ts)| *ts < iv.lo) {
                fwd_it.next();
            }

            // snap the slot start onto the sample grid before the lookup
            let dummy_ts = (self.timestamp_gps + slot_ts).round_to_rate(self.samp_rate);
            let Some(r) = self.find_ref_by_time(dummy_ts).copied() else {
                tracing::warn!("no time reference at or before slot start {}, skipping slot", dummy_ts);
                continue;
            };

            let input_offset = ((slot_ts + (self.timestamp_gps - r.time).to_secs()) * r.rate).round() as i64
                + r.offset as i64
                - self.items_read as i64;
            let slot_len_samps = (iv.len() * r.rate).round() as usize;

            if input_offset < 0 || input_offset as usize + slot_len_samps > n_in {
                // numerical inconsistency between the interval math and the
                // sample grid; drop the slot rather than corrupt indices
                tracing::warn!(
                    "slot at input offset {} (+{} samples) exceeds window of {} samples, skipping",
                    input_offset, slot_len_samps, n_in
                );
                continue;
            }
            let input_offset = input_offset as usize;

            if output_offset + slot_len_samps > out.len() {
                tracing::warn!("output buffer exhausted before slot end, skipping");
                continue;
            }
            out[output_offset..output_offset + slot_len_samps]
                .copy_from_slice(&window.samples[input_offset..input_offset + slot_len_samps]);

            // emit time and rate tags unless this slot already got them
            let current_slot = slots_of_interest.find_containing(slot_ts);
            let needs_tag = current_slot.map(|cs| iv.contains(cs.lo)).unwrap_or(false)
                || (self.timestamp_gps + slot_ts) > self.last_time_tag_update_gps;
            if needs_tag {
                let time_tag_ts_gps = self.timestamp_gps + slot_ts;
                let out_offset = self.items_written + output_offset as u64;
                out_tags.push(StreamTag::rx_time(out_offset, time_tag_ts_gps, SRCID));
                out_tags.push(StreamTag::rx_rate(out_offset, r.rate, SRCID));
                if let Some(cs) = current_slot {
                    self.last_time_tag_update_gps = time_tag_ts_gps + cs.len();
                }

                // carry context tags across the cut
                let tag_start = input_offset as u64 + self.items_read;
                let tag_end = tag_start + slot_len_samps as u64;
                for mut ctx in self.tag_manager.latest_in_range(tag_start, tag_end) {
                    ctx.offset = (ctx.offset - tag_start) + out_offset;
                    out_tags.push(ctx);
                }
            }

            // translate pass-through tags that fall inside this interval
            while let Some((tag, tag_ts)) = fwd_it.peek() {
                if !iv.contains(*tag_ts) {
                    break;
                }
                let mut out_tag = tag.clone();
                // clamp tags rounded just ahead of the slot start onto it
                let rel = (tag.offset as i64 - input_offset as i64 - self.items_read as i64).max(0);
                out_tag.offset = rel as u64 + output_offset as u64 + self.items_written;
                out_tags.push(out_tag);
                fwd_it.next();
            }

            output_offset += slot_len_samps;
        }

        out_tags[tags_start..].sort_by_key(|t| t.offset);
        output_offset
    }
}

impl<T: Copy + Send + 'static> StreamOperator<T> for SlotSelector<T> {
    fn name(&self) -> &'static str {
        "slot_selector"
    }

    fn work(&mut self, input: &StreamWindow<T>, out: &mut [T], out_tags: &mut Vec<StreamTag>) -> WorkResult {
        let n_in = input.len();
        if n_in == 0 {
            return WorkResult { produced: 0, consumed: 0 };
        }

        self.sort_tags(input);

        let current_blocks = self.compute_current_blocks(n_in);
        let slots_of_interest = self.compute_slots_of_interest(&current_blocks);
        let mut output_slots = slots_of_interest.intersect(&current_blocks);

        let consumed = self.limit_output_samples(out.len(), n_in, &current_blocks, &mut output_slots);
        let produced = self.produce_outputs(input, &slots_of_interest, &output_slots, out, out_tags);

        // the last reference pair becomes the anchor for the next window
        if let Some(last) = self.tag_tuples.last() {
            self.timestamp_gps = last.time;
            self.timestamp_sample = last.offset;
            self.samp_rate = last.rate;
        }

        self.items_read += consumed as u64;
        self.items_written += produced as u64;
        WorkResult { produced, consumed }
    }
}
