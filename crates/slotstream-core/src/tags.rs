use core::fmt;

use crate::timestamp::Timestamp;

/// Well-known tag keys, matching the names used on the wire by the
/// receiver front end.
pub const RX_TIME: &str = "rx_time";
pub const RX_RATE: &str = "rx_rate";
pub const RX_FREQ: &str = "rx_freq";
pub const TX_TIME: &str = "tx_time";
/// Context key labelling which digital channel a stream region came from
pub const DIG_CHAN: &str = "dig_chan";

/// Typed tag payload
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Time(Timestamp),
    Double(f64),
    Int(i64),
    Text(String),
}

impl TagValue {
    pub fn as_time(&self) -> Option<Timestamp> {
        match self {
            TagValue::Time(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Numeric view of the value, accepting either float or integer payloads
    pub fn as_double(&self) -> Option<f64> {
        match self {
            TagValue::Double(v) => Some(*v),
            TagValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Time(ts) => write!(f, "{}", ts),
            TagValue::Double(v) => write!(f, "{}", v),
            TagValue::Int(v) => write!(f, "{}", v),
            TagValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A side-band annotation attached to an absolute sample offset on one
/// stream. Tags travel in a parallel `Vec<StreamTag>` per port, sorted
/// by offset, and are reconstructed (not propagated) by rate-changing
/// operators.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTag {
    /// Absolute sample index on the producing port
    pub offset: u64,
    pub key: String,
    pub value: TagValue,
    /// Identifier of the block that produced the tag
    pub srcid: String,
}

impl StreamTag {
    pub fn new(offset: u64, key: &str, value: TagValue, srcid: &str) -> StreamTag {
        StreamTag { offset, key: key.to_string(), value, srcid: srcid.to_string() }
    }

    pub fn rx_time(offset: u64, ts: Timestamp, srcid: &str) -> StreamTag {
        StreamTag::new(offset, RX_TIME, TagValue::Time(ts), srcid)
    }

    pub fn rx_rate(offset: u64, rate: f64, srcid: &str) -> StreamTag {
        StreamTag::new(offset, RX_RATE, TagValue::Double(rate), srcid)
    }

    pub fn dig_chan(offset: u64, chan: i64, srcid: &str) -> StreamTag {
        StreamTag::new(offset, DIG_CHAN, TagValue::Int(chan), srcid)
    }
}

/// Stable sort by offset, preserving arrival order at equal offsets so
/// that later duplicates win during deduplication.
pub fn sort_tags_by_offset(tags: &mut [StreamTag]) {
    tags.sort_by_key(|t| t.offset);
}

/// Tags from `tags` whose offset lies in `[start, end)`
pub fn tags_in_range<'a>(tags: &'a [StreamTag], start: u64, end: u64) -> impl Iterator<Item = &'a StreamTag> {
    tags.iter().filter(move |t| t.offset >= start && t.offset < end)
}
