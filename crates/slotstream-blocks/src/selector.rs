use std::collections::VecDeque;

use slotstream_core::tags::{self, StreamTag};
use slotstream_core::{BlockConfigError, ChannelNum, ComplexSample, Timestamp};

const SRCID: &str = "input_selector";

/// One submitted frame schedule: slot hop times within a repeating frame
#[derive(Debug, Clone)]
struct FrameSched {
    frame_start: Timestamp,
    frame_len: f64,
    slot_times: Vec<f64>,
    slot_channels: Vec<ChannelNum>,
}

/// Reference from one rx_time/rx_rate tag pair
#[derive(Debug, Clone, Copy)]
struct SelRef {
    offset: u64,
    time: Timestamp,
    rate: f64,
}

/// Synchronous N-to-1 input multiplexer that hops between channels on a
/// GPS-time schedule.
///
/// Every output sample's wall-clock time is derived from the most
/// recent `rx_time`/`rx_rate` pair. When that time crosses the next
/// entry of the active frame schedule the selector switches its input
/// index and emits a `dig_chan` context tag. When no schedule applies
/// it falls back to the beacon channel.
pub struct InputSelector {
    num_chans: usize,
    input_index: usize,
    /// Output port the channel tags are attributed to. Single output
    /// here; kept for parity with multi-port hosts.
    #[allow(dead_code)]
    output_index: usize,
    beacon_channel: ChannelNum,

    // reference saved across work calls; rate 0 marks "no pair seen yet"
    have_ref: bool,
    offset_save: u64,
    time_save: Timestamp,
    rate_save: f64,

    /// Submitted schedules, sorted ascending by frame start
    frame_schedules: Vec<FrameSched>,
    /// The materialised (slot time, channel) deque for the current
    /// frame; the final entry is an end-of-frame sentinel on channel 0
    frame_schedule: VecDeque<(Timestamp, ChannelNum)>,

    items_read: u64,
    items_written: u64,
}

impl InputSelector {
    pub fn new(num_chans: usize, input_index: usize, output_index: usize) -> Result<InputSelector, BlockConfigError> {
        if num_chans == 0 {
            return Err(BlockConfigError::OutOfRange { field: "num_chans", reason: "must be at least 1" });
        }
        if input_index >= num_chans {
            return Err(BlockConfigError::OutOfRange { field: "input_index", reason: "must be < num_chans" });
        }
        Ok(InputSelector {
            num_chans,
            input_index,
            output_index,
            beacon_channel: 0,
            have_ref: false,
            offset_save: 0,
            time_save: Timestamp::zero(),
            rate_save: 0.0,
            frame_schedules: Vec::new(),
            frame_schedule: VecDeque::new(),
            items_read: 0,
            items_written: 0,
        })
    }

    pub fn input_index(&self) -> usize {
        self.input_index
    }

    /// Manually switch the selected input
    pub fn set_input_index(&mut self, input_index: usize) {
        if input_index >= self.num_chans {
            tracing::error!(
                "requested channel {} but the selector has only {} inputs",
                input_index, self.num_chans
            );
            return;
        }
        self.input_index = input_index;
    }

    pub fn set_beacon_channel(&mut self, beacon_channel: ChannelNum) {
        self.beacon_channel = beacon_channel;
    }

    /// Clears all receive schedules and moves back to the beacon channel
    pub fn return_to_beacon_channel(&mut self) {
        self.frame_schedules.clear();
        self.frame_schedule.clear();
        self.set_input_index(self.beacon_channel as usize);
    }

    /// Submits a frame schedule. Schedules are kept sorted by their
    /// frame start time; the one in force at any moment is the latest
    /// whose start is not in the future.
    pub fn set_schedule(
        &mut self,
        int_s: i64,
        frac_s: f64,
        frame_length: f64,
        slot_times: Vec<f64>,
        slot_channels: Vec<ChannelNum>,
    ) {
        let frame_start = Timestamp::new(int_s, frac_s);
        let sched = FrameSched { frame_start, frame_len: frame_length, slot_times, slot_channels };
        let pos = self
            .frame_schedules
            .partition_point(|s| s.frame_start <= frame_start);
        self.frame_schedules.insert(pos, sched);
    }

    /// Picks the latest submitted schedule whose start is at or before
    /// `current`, discards older ones, and materialises the slot deque
    /// for the frame containing `current`. The deque ends with an
    /// end-of-frame sentinel so the caller knows when to re-materialise.
    fn get_next_schedule(&mut self, current: Timestamp) -> bool {
        let pos = self
            .frame_schedules
            .partition_point(|s| s.frame_start <= current);
        if pos == 0 {
            return false;
        }
        self.frame_schedules.drain(..pos - 1);
        let sched = self.frame_schedules[0].clone();

        // advance the frame start by whole frames until the frame
        // containing `current` is found
        let mut new_frame_start = sched.frame_start;
        let mut candidate = sched.frame_start + sched.frame_len;
        while candidate < current {
            new_frame_start += sched.frame_len;
            candidate += sched.frame_len;
        }

        self.frame_schedule.clear();
        for (slot_time, chan) in sched.slot_times.iter().zip(sched.slot_channels.iter()) {
            self.frame_schedule.push_back((new_frame_start + *slot_time, *chan));
        }
        self.frame_schedule.push_back((new_frame_start + sched.frame_len, 0));
        true
    }

    /// Builds reference tuples from the window's rx_time/rx_rate tags
    fn build_refs(&self, window_tags: &[StreamTag], start: u64, end: u64) -> Vec<SelRef> {
        let mut time_tags: Vec<&StreamTag> = Vec::new();
        let mut rate_tags: Vec<&StreamTag> = Vec::new();
        for tag in tags::tags_in_range(window_tags, start, end) {
            let bucket = match tag.key.as_str() {
                tags::RX_TIME => &mut time_tags,
                tags::RX_RATE => &mut rate_tags,
                _ => continue,
            };
            if bucket.last().is_some_and(|t| t.offset == tag.offset) {
                bucket.pop();
            }
            bucket.push(tag);
        }
        time_tags.sort_by_key(|t| t.offset);
        rate_tags.sort_by_key(|t| t.offset);

        let mut refs = Vec::new();
        if self.have_ref && time_tags.first().is_none_or(|t| t.offset >= self.offset_save) {
            refs.push(SelRef { offset: self.offset_save, time: self.time_save, rate: self.rate_save });
        }
        for (k, time_tag) in time_tags.iter().enumerate() {
            let Some(time) = time_tag.value.as_time() else {
                continue;
            };
            let Some(rate) = rate_tags.get(k).and_then(|t| t.value.as_double()) else {
                tracing::warn!("rx_time tag at offset {} without matching rx_rate", time_tag.offset);
                continue;
            };
            refs.push(SelRef { offset: time_tag.offset, time, rate });
        }
        refs
    }

    /// Copies `out.len()` samples from the selected input to the output,
    /// hopping channels as schedule entries are crossed. `window_tags`
    /// are the time/rate tags shared by the channelized inputs.
    pub fn work(
        &mut self,
        inputs: &[&[ComplexSample]],
        window_tags: &[StreamTag],
        out: &mut [ComplexSample],
        out_tags: &mut Vec<StreamTag>,
    ) -> usize {
        assert!(inputs.len() == self.num_chans);
        let n = inputs.iter().map(|ch| ch.len()).min().unwrap_or(0).min(out.len());

        let mut offset = self.items_read;
        let refs = self.build_refs(window_tags, offset, offset + n as u64);

        // most recent reference strictly before the window start
        let mut ref_ind = match refs.iter().rposition(|r| r.offset < offset && r.rate > 0.0) {
            Some(ind) => ind as i64,
            None => -1,
        };
        let mut gps_time = if ref_ind >= 0 {
            let r = &refs[ref_ind as usize];
            r.time + (offset - r.offset) as f64 / r.rate
        } else {
            Timestamp::zero()
        };

        // output a channel tag for the very first output sample so
        // downstream blocks always have a channel context
        if self.items_written == 0 && n > 0 {
            out_tags.push(StreamTag::dig_chan(offset, self.input_index as ChannelNum, SRCID));
        }

        for i in 0..n {
            out[i] = inputs[self.input_index][i];

            if ref_ind < 0 {
                // no usable time reference yet: forward samples, defer
                // all schedule handling until a tag pair arrives
                continue;
            }

            offset += 1;
            let next = ref_ind as usize + 1;
            if next < refs.len() && offset >= refs[next].offset && refs[next].rate > 0.0 {
                ref_ind = next as i64;
                let r = &refs[next];
                gps_time = r.time + (offset - r.offset) as f64 / r.rate;
            } else {
                gps_time += 1.0 / refs[ref_ind as usize].rate;
            }

            // if we don't have a materialised frame, search for one
            if self.frame_schedule.is_empty() {
                self.get_next_schedule(gps_time);
            }

            if let Some(&(slot_time, chan)) = self.frame_schedule.front() {
                if gps_time > slot_time {
                    // the last entry is the end-of-frame sentinel; dropping
                    // it makes the next sample re-materialise the frame
                    if self.frame_schedule.len() != 1 {
                        if self.input_index as ChannelNum != chan {
                            out_tags.push(StreamTag::dig_chan(offset, chan, SRCID));
                            tracing::debug!("hopping to channel {} at {}", chan, gps_time);
                        }
                        self.set_input_index(chan as usize);
                    }
                    self.frame_schedule.pop_front();
                }
            } else if self.input_index as ChannelNum != self.beacon_channel {
                // no schedule applies: return to the beacon channel
                self.set_input_index(self.beacon_channel as usize);
                out_tags.push(StreamTag::dig_chan(offset, self.beacon_channel, SRCID));
                tracing::debug!("returning to beacon channel {} at {}", self.beacon_channel, gps_time);
            }
        }

        // save the last reference for the next work call
        if let Some(last) = refs.last() {
            self.have_ref = true;
            self.offset_save = last.offset;
            self.time_save = last.time;
            self.rate_save = last.rate;
        }

        self.items_read += n as u64;
        self.items_written += n as u64;
        n
    }
}
