use std::marker::PhantomData;

use crossbeam_channel::{Receiver, Sender, unbounded};

use slotstream_core::tags::{self, StreamTag, TagValue};
use slotstream_core::Timestamp;

use crate::stream::{StreamOperator, StreamWindow, WorkResult};

const SRCID: &str = "time_tag_shifter";

/// Reference extracted from one rx_time/rx_rate/rx_freq tag triple
#[derive(Debug, Clone)]
struct ShiftRef {
    offset: u64,
    time: Timestamp,
    rate: f64,
    srcid: String,
    freq: TagValue,
}

/// Corrects a per-receiver integer-second offset in the wall-clock time
/// reported by the hardware.
///
/// Samples pass through verbatim; every `rx_time`/`tx_time` tag value is
/// shifted by the current offset (sign by direction). On the receive
/// side a corrected `rx_time`/`rx_rate`/`rx_freq` triple is emitted when
/// the offset changes, and a negative offset first discards one second
/// of samples so no downstream block ever sees time run backwards.
///
/// The offset is updated through the `time_tag_shift` control port, a
/// channel obtained from `control()`. Messages are drained at the top of
/// each `work` call.
pub struct TimeTagShifter<T> {
    is_receive_side: bool,
    integer_time_offset: i64,
    generate_time_tag: bool,
    drop_one_second: bool,
    drop_count: u64,
    /// Cumulative input-to-output offset shift from dropped samples
    offset_shift: u64,

    items_read: u64,
    items_written: u64,

    // reference saved across work calls
    offset_save: u64,
    time_save: Timestamp,
    rate_save: f64,
    srcid_save: String,
    freq_save: TagValue,

    ctrl_tx: Sender<i64>,
    ctrl_rx: Receiver<i64>,

    _samples: PhantomData<T>,
}

impl<T: Copy> TimeTagShifter<T> {
    pub fn new(is_receive_side: bool) -> TimeTagShifter<T> {
        let (ctrl_tx, ctrl_rx) = unbounded();
        TimeTagShifter {
            is_receive_side,
            integer_time_offset: 0, // at startup we assume correct GPS time
            generate_time_tag: false,
            drop_one_second: false,
            drop_count: 0,
            offset_shift: 0,
            items_read: 0,
            items_written: 0,
            offset_save: 0,
            time_save: Timestamp::zero(),
            rate_save: 0.0,
            srcid_save: SRCID.to_string(),
            freq_save: TagValue::Double(0.0),
            ctrl_tx,
            ctrl_rx,
            _samples: PhantomData,
        }
    }

    /// Sender side of the `time_tag_shift` control port. The payload is
    /// a signed integer number of seconds.
    pub fn control(&self) -> Sender<i64> {
        self.ctrl_tx.clone()
    }

    pub fn items_read(&self) -> u64 {
        self.items_read
    }

    pub fn items_written(&self) -> u64 {
        self.items_written
    }

    fn handle_update(&mut self, offset_s: i64) {
        self.integer_time_offset = offset_s;
        self.generate_time_tag = true;

        if self.is_receive_side && offset_s < 0 {
            if self.rate_save > 0.0 {
                tracing::warn!("negative time offset of {} s, dropping 1 second of samples", offset_s);
                self.drop_one_second = true;
                self.drop_count = 0;
            } else {
                // no reference rate seen yet, the drop would never complete
                tracing::warn!("negative time offset of {} s but no rx_rate seen yet, not dropping", offset_s);
            }
        }
    }

    /// Sorts the window's rx_time/rx_rate/rx_freq tags into reference
    /// tuples, prepending the saved reference when no tag coincides
    /// with the start of the window.
    fn build_refs(&mut self, window: &StreamWindow<T>, consumed: usize) -> Vec<ShiftRef> {
        let end = window.abs_offset + consumed as u64;
        let mut time_tags: Vec<&StreamTag> = Vec::new();
        let mut rate_tags: Vec<&StreamTag> = Vec::new();
        let mut freq_tags: Vec<&StreamTag> = Vec::new();

        for tag in tags::tags_in_range(window.tags, window.abs_offset, end) {
            let bucket = match tag.key.as_str() {
                tags::RX_TIME => &mut time_tags,
                tags::RX_RATE => &mut rate_tags,
                tags::RX_FREQ => &mut freq_tags,
                _ => continue,
            };
            // duplicate keys at one offset: the later arrival wins
            if bucket.last().is_some_and(|t| t.offset == tag.offset) {
                bucket.pop();
            }
            bucket.push(tag);
        }
        time_tags.sort_by_key(|t| t.offset);
        rate_tags.sort_by_key(|t| t.offset);
        freq_tags.sort_by_key(|t| t.offset);

        let mut refs = Vec::new();
        if time_tags.first().is_none_or(|t| t.offset > self.offset_save) {
            refs.push(ShiftRef {
                offset: self.offset_save,
                time: self.time_save,
                rate: self.rate_save,
                srcid: self.srcid_save.clone(),
                freq: self.freq_save.clone(),
            });
        }

        for (k, time_tag) in time_tags.iter().enumerate() {
            let Some(time) = time_tag.value.as_time() else {
                tracing::warn!("rx_time tag at offset {} has a non-time value, skipping", time_tag.offset);
                continue;
            };
            // rate and freq tags are expected in lock-step with time tags;
            // a missing partner falls back to the saved value
            let rate = match rate_tags.get(k).and_then(|t| t.value.as_double()) {
                Some(rate) => rate,
                None => {
                    tracing::warn!("rx_time tag at offset {} without matching rx_rate", time_tag.offset);
                    self.rate_save
                }
            };
            let freq = match freq_tags.get(k) {
                Some(t) => t.value.clone(),
                None => self.freq_save.clone(),
            };
            refs.push(ShiftRef { offset: time_tag.offset, time, rate, srcid: time_tag.srcid.clone(), freq });
        }
        refs
    }

    /// Most recent usable reference strictly before `offset`. The
    /// startup placeholder with rate 0 never qualifies.
    fn find_most_recent<'a>(refs: &'a [ShiftRef], offset: u64) -> Option<&'a ShiftRef> {
        refs.iter().rev().find(|r| r.offset < offset && r.rate > 0.0)
    }

    fn save_last(&mut self, refs: &[ShiftRef]) {
        if let Some(last) = refs.last() {
            self.offset_save = last.offset;
            self.time_save = last.time;
            self.rate_save = last.rate;
            self.srcid_save = last.srcid.clone();
            self.freq_save = last.freq.clone();
        }
    }

    /// Forwards every input tag in `[skip, consumed)` to the output,
    /// reducing offsets by the cumulative shift and correcting the
    /// values of time tags by the configured offset.
    fn forward_tags(&self, window: &StreamWindow<T>, skip: usize, consumed: usize, out_tags: &mut Vec<StreamTag>) {
        let start = window.abs_offset + skip as u64;
        let end = window.abs_offset + consumed as u64;
        for tag in tags::tags_in_range(window.tags, start, end) {
            let mut out = tag.clone();
            out.offset = tag.offset - self.offset_shift;
            match tag.key.as_str() {
                tags::RX_TIME => {
                    if let Some(ts) = tag.value.as_time() {
                        out.value = TagValue::Time(ts + self.integer_time_offset as f64);
                    }
                }
                tags::TX_TIME => {
                    if let Some(ts) = tag.value.as_time() {
                        out.value = TagValue::Time(ts - self.integer_time_offset as f64);
                    }
                }
                _ => {}
            }
            out_tags.push(out);
        }
    }
}

impl<T: Copy + Send + 'static> StreamOperator<T> for TimeTagShifter<T> {
    fn name(&self) -> &'static str {
        "time_tag_shifter"
    }

    fn work(&mut self, input: &StreamWindow<T>, out: &mut [T], out_tags: &mut Vec<StreamTag>) -> WorkResult {
        while let Ok(offset_s) = self.ctrl_rx.try_recv() {
            self.handle_update(offset_s);
        }

        let n_in = input.len();
        let n_out = out.len();
        let mut samples_to_skip = 0usize;
        let produced;
        let consumed;

        if self.drop_one_second {
            let drop_total = self.rate_save.round() as u64;
            if self.drop_count + (n_in as u64) < drop_total {
                // still inside the region being dropped
                produced = 0;
                consumed = n_in;
                self.drop_count += n_in as u64;
            } else if self.drop_count + n_in as u64 == drop_total {
                produced = 0;
                consumed = n_in;
                self.drop_count += n_in as u64;
                self.drop_one_second = false;
                self.offset_shift = drop_total;
            } else {
                samples_to_skip = (drop_total - self.drop_count) as usize;
                produced = (n_in - samples_to_skip).min(n_out);
                consumed = samples_to_skip + produced;
                out[..produced].copy_from_slice(&input.samples[samples_to_skip..samples_to_skip + produced]);
                self.drop_one_second = false;
                self.offset_shift = drop_total;
            }
        } else {
            consumed = n_in.min(n_out);
            produced = consumed;
            out[..produced].copy_from_slice(&input.samples[..consumed]);
        }

        // The receive side keeps track of what GPS time we think we are
        // at, so a corrected tag triple can be generated when the offset
        // changes. The saved time is the raw, uncorrected receiver time.
        if self.is_receive_side {
            let refs = self.build_refs(input, consumed);

            if self.generate_time_tag {
                if let Some(r) = Self::find_most_recent(&refs, input.abs_offset) {
                    let gps = r.time
                        + (input.abs_offset - r.offset) as f64 / r.rate
                        + self.integer_time_offset as f64;

                    // hold the tag back while samples are being dropped
                    if !self.drop_one_second {
                        let out_offset = input.abs_offset.saturating_sub(self.offset_shift);
                        out_tags.push(StreamTag::rx_time(out_offset, gps, &r.srcid));
                        out_tags.push(StreamTag::rx_rate(out_offset, r.rate, &r.srcid));
                        out_tags.push(StreamTag::new(out_offset, tags::RX_FREQ, r.freq.clone(), &r.srcid));
                        self.generate_time_tag = false;
                    }
                }
            }

            self.save_last(&refs);
        }

        self.forward_tags(input, samples_to_skip, consumed, out_tags);

        self.items_read += consumed as u64;
        self.items_written += produced as u64;
        WorkResult { produced, consumed }
    }
}
