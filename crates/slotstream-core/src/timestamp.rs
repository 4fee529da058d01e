use core::fmt;
use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Wall-clock (GPS) time as an integer/fractional second pair.
///
/// Stored normalised: `0 <= frac_s < 1`, also for negative composite
/// values (e.g. -0.5 s is stored as `(-1, 0.5)`). Keeping integer and
/// fractional seconds apart makes subtraction of nearby timestamps
/// numerically safe over multi-day GPS epochs, where a plain f64 has
/// already lost sub-sample resolution.
#[derive(Clone, Copy, Default)]
pub struct Timestamp {
    int_s: i64,
    frac_s: f64,
}

impl Timestamp {
    pub fn new(int_s: i64, frac_s: f64) -> Timestamp {
        let mut ts = Timestamp { int_s, frac_s };
        ts.normalize();
        ts
    }

    /// Timestamp from a plain seconds value
    pub fn from_secs(secs: f64) -> Timestamp {
        Timestamp::new(0, secs)
    }

    pub fn zero() -> Timestamp {
        Timestamp { int_s: 0, frac_s: 0.0 }
    }

    // correct for fractional second overflow (positive or negative)
    fn normalize(&mut self) {
        if self.frac_s < 0.0 {
            let borrow = self.frac_s.floor();
            self.int_s += borrow as i64;
            self.frac_s -= borrow;
        }
        if self.frac_s >= 1.0 {
            let carry = self.frac_s.floor();
            self.int_s += carry as i64;
            self.frac_s -= carry;
        }
        // frac_s may round up to exactly 1.0 when borrowing from a value
        // infinitesimally below an integer boundary
        if self.frac_s >= 1.0 {
            self.int_s += 1;
            self.frac_s -= 1.0;
        }
    }

    pub fn int_s(&self) -> i64 {
        self.int_s
    }

    pub fn frac_s(&self) -> f64 {
        self.frac_s
    }

    /// Lossy conversion to seconds. Only meant for interval arithmetic
    /// over bounded windows; absolute GPS times do not survive this.
    pub fn to_secs(&self) -> f64 {
        self.int_s as f64 + self.frac_s
    }

    /// Rounds the fractional part to an integer number of samples at
    /// the given rate. Used to snap tag times onto the sample grid.
    pub fn round_to_rate(&self, rate: f64) -> Timestamp {
        Timestamp::new(self.int_s, (self.frac_s * rate).round() / rate)
    }
}

impl Add for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Timestamp) -> Timestamp {
        Timestamp::new(self.int_s + rhs.int_s, self.frac_s + rhs.frac_s)
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: Timestamp) -> Timestamp {
        Timestamp::new(self.int_s - rhs.int_s, self.frac_s - rhs.frac_s)
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: f64) -> Timestamp {
        Timestamp::new(self.int_s, self.frac_s + rhs)
    }
}

impl Sub<f64> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: f64) -> Timestamp {
        Timestamp::new(self.int_s, self.frac_s - rhs)
    }
}

impl AddAssign for Timestamp {
    fn add_assign(&mut self, rhs: Timestamp) {
        *self = *self + rhs;
    }
}

impl SubAssign for Timestamp {
    fn sub_assign(&mut self, rhs: Timestamp) {
        *self = *self - rhs;
    }
}

impl AddAssign<f64> for Timestamp {
    fn add_assign(&mut self, rhs: f64) {
        *self = *self + rhs;
    }
}

impl SubAssign<f64> for Timestamp {
    fn sub_assign(&mut self, rhs: f64) {
        *self = *self - rhs;
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Timestamp) -> bool {
        self.int_s == other.int_s && self.frac_s == other.frac_s
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Timestamp) -> Option<Ordering> {
        // both sides are normalised, so lexicographic order is numeric order
        match self.int_s.cmp(&other.int_s) {
            Ordering::Equal => self.frac_s.partial_cmp(&other.frac_s),
            ord => Some(ord),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:.9}", self.int_s, self.frac_s)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:.9}", self.int_s, self.frac_s)
    }
}
