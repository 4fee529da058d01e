use std::collections::BTreeMap;
use std::collections::VecDeque;

use crate::assert_warn;
use crate::tags::StreamTag;

/// Per-key ordered log of context tags.
///
/// A context tag labels a region of the stream: its value applies from
/// its offset until the next tag with the same key. The manager keeps
/// one deque per whitelisted key and answers "which context applies at
/// offset N" and "which contexts apply over [start, end]" queries.
/// Lookups prune tags that can no longer be the answer to any future
/// query, so memory stays bounded on long runs.
#[derive(Debug, Clone, Default)]
pub struct ContextTagManager {
    tag_map: BTreeMap<String, VecDeque<StreamTag>>,
}

impl ContextTagManager {
    /// Creates a manager accepting only the given context keys.
    /// Tags with any other key are silently ignored by `add()`.
    pub fn new(context_keys: &[&str]) -> ContextTagManager {
        let mut tag_map = BTreeMap::new();
        for key in context_keys {
            tag_map.insert(key.to_string(), VecDeque::new());
        }
        ContextTagManager { tag_map }
    }

    /// Appends a context tag. Callers must add tags in non-decreasing
    /// offset order per key; a violation is logged and the tag dropped.
    pub fn add(&mut self, tag: StreamTag) {
        let Some(deque) = self.tag_map.get_mut(&tag.key) else {
            return;
        };
        if let Some(back) = deque.back() {
            assert_warn!(back.offset <= tag.offset, "context tag for key {} arrived out of order ({} after {})",
                tag.key, tag.offset, back.offset);
            if back.offset > tag.offset {
                return;
            }
            // duplicate offset: the later arrival wins
            if back.offset == tag.offset {
                deque.pop_back();
            }
        }
        deque.push_back(tag);
    }

    /// For each key, the last tag with offset <= `offset`, if any.
    /// Tags strictly older than the returned one are discarded.
    pub fn latest_at(&mut self, offset: u64) -> Vec<StreamTag> {
        let mut out_tags = Vec::new();
        for deque in self.tag_map.values_mut() {
            if let Some(idx) = find_tag_less_equal(offset, deque) {
                out_tags.push(deque[idx].clone());
                deque.drain(..idx);
            }
        }
        out_tags
    }

    /// For each key: the latest tag at or before `start` (returned with
    /// its offset rewritten to `start`), followed by every tag in
    /// `(start, end]` in ascending order. Prunes like `latest_at`.
    pub fn latest_in_range(&mut self, start: u64, end: u64) -> Vec<StreamTag> {
        let mut out_tags = Vec::new();
        for deque in self.tag_map.values_mut() {
            if let Some(idx) = find_tag_less_equal(start, deque) {
                let mut boundary = deque[idx].clone();
                boundary.offset = start;
                out_tags.push(boundary);
                deque.drain(..idx);
            }
            // tags strictly inside (start, end]
            for tag in deque.iter() {
                if tag.offset > start && tag.offset <= end {
                    out_tags.push(tag.clone());
                }
            }
        }
        out_tags
    }
}

/// Index of the last tag with offset <= `offset`, if one exists.
/// The deque is sorted by offset.
fn find_tag_less_equal(offset: u64, tags: &VecDeque<StreamTag>) -> Option<usize> {
    let n = tags.partition_point(|t| t.offset <= offset);
    if n == 0 { None } else { Some(n - 1) }
}
