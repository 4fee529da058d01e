use slotstream_core::RealSample;

/// Fractional-delay interpolator used by the timing recovery loop.
///
/// Evaluates the signal at `index + mu` for `mu` in `[0, 1)`. A richer
/// polyphase MMSE kernel belongs to the host DSP library; two-point
/// linear interpolation is enough for the timing loop to converge and
/// keeps the tap history requirement at two samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearInterp;

impl LinearInterp {
    pub fn new() -> LinearInterp {
        LinearInterp
    }

    /// Number of history samples `interpolate` reads from its input slice
    pub fn ntaps(&self) -> usize {
        2
    }

    /// Interpolated value at fractional position `mu` past `input[0]`.
    /// `input` must hold at least `ntaps()` samples.
    pub fn interpolate(&self, input: &[RealSample], mu: RealSample) -> RealSample {
        input[0] + (input[1] - input[0]) * mu
    }
}
