use slotstream_core::tags::{self, StreamTag};
use slotstream_core::{BlockConfigError, RealSample, Timestamp};

use crate::interp::LinearInterp;
use crate::stream::{StreamOperator, StreamWindow, WorkResult};

const SRCID: &str = "clock_recovery_mm";

fn slice_bit(x: RealSample) -> RealSample {
    if x < 0.0 { -1.0 } else { 1.0 }
}

/// Mueller and Müller discrete-time error-tracking synchronizer.
///
/// Produces one output per symbol period by interpolating at fractional
/// phase `mu` and steering `omega` (samples per symbol) and `mu` with
/// the M&M timing error detector. See "Digital Communication Receivers"
/// by Meyr, Moeneclaey and Fechtel.
///
/// Because the block is a non-integer-rate resampler it reconstructs
/// its own `rx_time`/`rx_rate` tags: the rate between two tag offsets
/// is computed from the samples actually consumed and produced over
/// that segment, and a fractional sample-offset carry keeps tag
/// positions from drifting over long runs.
pub struct ClockRecovery {
    mu: f64,
    omega: f64,
    omega_mid: f64,
    gain_omega: f64,
    gain_mu: f64,
    omega_relative_limit: f64,
    last_sample: RealSample,
    interp: LinearInterp,
    /// Nominal output/input rate, fixed at construction
    relative_rate: f64,
    /// Fractional offset between the output and the rescaled input
    /// sample counters, carried across work calls
    sample_offset: f64,

    // time reference from the most recent rx_time/rx_rate tags
    timestamp: Timestamp,
    timestamp_sample: u64,
    nom_samp_rate: f64,

    items_read: u64,
    items_written: u64,
}

impl ClockRecovery {
    pub fn new(
        omega: f64,
        gain_omega: f64,
        mu: f64,
        gain_mu: f64,
        omega_relative_limit: f64,
    ) -> Result<ClockRecovery, BlockConfigError> {
        if omega < 1.0 {
            return Err(BlockConfigError::OutOfRange { field: "omega", reason: "clock rate must be >= 1" });
        }
        if gain_mu < 0.0 || gain_omega < 0.0 {
            return Err(BlockConfigError::OutOfRange { field: "gain", reason: "gains must be non-negative" });
        }
        if !(0.0..1.0).contains(&mu) {
            return Err(BlockConfigError::OutOfRange { field: "mu", reason: "must be in [0, 1)" });
        }

        Ok(ClockRecovery {
            mu,
            omega,
            omega_mid: omega,
            gain_omega,
            gain_mu,
            omega_relative_limit,
            last_sample: 0.0,
            interp: LinearInterp::new(),
            relative_rate: 1.0 / omega,
            sample_offset: 0.0,
            timestamp: Timestamp::zero(),
            timestamp_sample: 0,
            nom_samp_rate: 1.0,
            items_read: 0,
            items_written: 0,
        })
    }

    pub fn omega(&self) -> f64 {
        self.omega
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn items_read(&self) -> u64 {
        self.items_read
    }

    pub fn items_written(&self) -> u64 {
        self.items_written
    }
}

impl StreamOperator<RealSample> for ClockRecovery {
    fn name(&self) -> &'static str {
        "clock_recovery_mm"
    }

    fn forecast(&self, n_out: usize) -> usize {
        (n_out as f64 * self.omega).ceil() as usize + self.interp.ntaps()
    }

    fn work(
        &mut self,
        input: &StreamWindow<RealSample>,
        out: &mut [RealSample],
        out_tags: &mut Vec<StreamTag>,
    ) -> WorkResult {
        let n_in = input.len();
        // don't use more input than this, the interpolator needs history
        let ni = n_in.saturating_sub(self.interp.ntaps());
        if ni == 0 {
            return WorkResult { produced: 0, consumed: 0 };
        }

        let abs_n = self.items_read;
        let end_n = abs_n + ni as u64;

        let mut in_tags: Vec<&StreamTag> = tags::tags_in_range(input.tags, abs_n, end_n).collect();
        in_tags.sort_by_key(|t| t.offset);
        let mut tag_idx = 0usize;

        let mut time_tags: Vec<&StreamTag> = Vec::new();
        let mut rate_tags: Vec<&StreamTag> = Vec::new();
        let mut other_tags: Vec<&StreamTag> = Vec::new();

        // segment boundaries: input offset plus the output/input indices
        // in force when the boundary was crossed
        let mut offset_vec: Vec<u64> = vec![abs_n];
        let mut oo_vec: Vec<usize> = vec![0];
        let mut ii_vec: Vec<usize> = vec![0];

        self.sample_offset = self.items_written as f64 - self.items_read as f64 * self.relative_rate;

        let mut ii = 0usize;
        let mut oo = 0usize;
        let mut final_ii = 0usize;
        let mut final_oo = 0usize;

        while oo < out.len() && ii < ni {
            out[oo] = self.interp.interpolate(&input.samples[ii..], self.mu as RealSample);
            let mm_val =
                (slice_bit(self.last_sample) * out[oo] - slice_bit(out[oo]) * self.last_sample) as f64;
            self.last_sample = out[oo];

            self.omega += self.gain_omega * mm_val;
            // make sure we don't walk away
            self.omega = self.omega_mid
                + (self.omega - self.omega_mid).clamp(-self.omega_relative_limit, self.omega_relative_limit);
            self.mu += self.omega + self.gain_mu * mm_val;

            while tag_idx < in_tags.len() && (ii as u64 + abs_n) >= in_tags[tag_idx].offset {
                let tag = in_tags[tag_idx];
                if *offset_vec.last().unwrap() != tag.offset {
                    offset_vec.push(tag.offset);
                    oo_vec.push(oo);
                    ii_vec.push(ii);
                }
                match tag.key.as_str() {
                    tags::RX_TIME => time_tags.push(tag),
                    tags::RX_RATE => rate_tags.push(tag),
                    _ => other_tags.push(tag),
                }
                tag_idx += 1;
            }

            final_ii = ii;
            final_oo = oo;

            ii += self.mu.floor() as usize;
            self.mu -= self.mu.floor();
            oo += 1;
        }

        offset_vec.push(abs_n + final_ii as u64);
        oo_vec.push(final_oo);
        ii_vec.push(final_ii);

        if final_oo > 0 {
            let mut time_idx = 0usize;
            let mut rate_idx = 0usize;
            let mut other_idx = 0usize;

            for i in 0..offset_vec.len() - 1 {
                while time_idx < time_tags.len() && offset_vec[i] >= time_tags[time_idx].offset {
                    if let Some(ts) = time_tags[time_idx].value.as_time() {
                        self.timestamp_sample = time_tags[time_idx].offset;
                        self.timestamp = ts;
                    }
                    time_idx += 1;
                }
                while rate_idx < rate_tags.len() && offset_vec[i] >= rate_tags[rate_idx].offset {
                    if let Some(rate) = rate_tags[rate_idx].value.as_double() {
                        self.nom_samp_rate = rate;
                    }
                    rate_idx += 1;
                }

                // instantaneous rate from what was actually consumed and
                // produced over this segment
                let out_rate = if oo_vec[i + 1] == oo_vec[i] || ii_vec[i + 1] == ii_vec[i] {
                    self.nom_samp_rate
                } else {
                    let inst_rel_rate =
                        (oo_vec[i + 1] - oo_vec[i]) as f64 / (ii_vec[i + 1] - ii_vec[i]) as f64;
                    self.nom_samp_rate * inst_rel_rate
                };

                let current_offset = oo_vec[i] as f64 - ii_vec[i] as f64 * self.relative_rate;
                let out_offset =
                    (offset_vec[i] as f64 * self.relative_rate + self.sample_offset + current_offset)
                        .round() as u64;

                let frac_delta =
                    (ii_vec[i] as f64 + abs_n as f64 - self.timestamp_sample as f64) / self.nom_samp_rate;
                let out_ts = self.timestamp + frac_delta;

                while other_idx < other_tags.len() && offset_vec[i] >= other_tags[other_idx].offset {
                    let tag = other_tags[other_idx];
                    let tag_sample =
                        (tag.offset as f64 * self.relative_rate + self.sample_offset + current_offset)
                            .round() as u64;
                    let mut fwd = tag.clone();
                    fwd.offset = tag_sample;
                    out_tags.push(fwd);
                    other_idx += 1;
                }

                out_tags.push(StreamTag::rx_time(out_offset, out_ts, SRCID));
                out_tags.push(StreamTag::rx_rate(out_offset, out_rate, SRCID));
            }

            self.sample_offset = (final_oo as u64 + self.items_written) as f64
                - (final_ii as u64 + self.items_read) as f64 * self.relative_rate;
        }

        // absorb references from tags past the last produced output
        while tag_idx < in_tags.len() {
            let tag = in_tags[tag_idx];
            match tag.key.as_str() {
                tags::RX_TIME => {
                    if let Some(ts) = tag.value.as_time() {
                        self.timestamp_sample = tag.offset;
                        self.timestamp = ts;
                    }
                }
                tags::RX_RATE => {
                    if let Some(rate) = tag.value.as_double() {
                        self.nom_samp_rate = rate;
                    }
                }
                _ => {}
            }
            tag_idx += 1;
        }

        let consumed = ii.min(ni);
        self.items_read += consumed as u64;
        self.items_written += oo as u64;
        WorkResult { produced: oo, consumed }
    }
}
