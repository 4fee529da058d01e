use crossbeam_channel::Sender;

use slotstream_core::tags::{self, StreamTag};
use slotstream_core::{ChannelNum, ContextTagManager, Timestamp};

use crate::stream::StreamWindow;

pub const MAX_PKT_LEN: usize = 4096;
pub const HEADER_BIT_LEN: usize = 32;

/// Data bit, in the LSB of each input byte
const BIT_DATA: u8 = 0x1;
/// First-bit-after-sync flag, set by the upstream access-code correlator
const BIT_SYNC: u8 = 0x2;

/// An assembled packet with the whitener offset from its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub whitener_offset: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SyncSearch,
    HaveSync,
    HaveHeader,
}

/// Given a stream of bits and access-code flags, assembles packets.
///
/// Input bytes use two bits: bit 0 is the data bit, bit 1 marks the
/// first bit after the access code. The framer expects a fixed header
/// of two identical network-byte-order 16-bit shorts: payload length in
/// the low 12 bits, whitener offset in the upper 4. Non-matching copies
/// drop the candidate packet.
///
/// On sync the wall-clock timestamp and the then-current channel are
/// resolved from the tag history; when a packet completes, payload,
/// timestamp, and channel are pushed in lock-step to three queues.
pub struct FramerSink {
    packet_tx: Sender<Packet>,
    time_tx: Sender<Timestamp>,
    chan_tx: Sender<ChannelNum>,

    state: State,
    header: u32,
    header_bit_cnt: usize,

    packet: Vec<u8>,
    packet_byte: u8,
    packet_byte_index: usize,
    packet_len: usize,
    packet_whitener_offset: u8,

    sync_ind: u64,
    sync_timestamp: Timestamp,
    sync_channel: ChannelNum,

    timestamp: Timestamp,
    timestamp_sample: u64,
    samp_rate: f64,

    tag_manager: ContextTagManager,
    items_read: u64,
}

impl FramerSink {
    pub fn new(
        packet_tx: Sender<Packet>,
        time_tx: Sender<Timestamp>,
        chan_tx: Sender<ChannelNum>,
    ) -> FramerSink {
        FramerSink {
            packet_tx,
            time_tx,
            chan_tx,
            state: State::SyncSearch,
            header: 0,
            header_bit_cnt: 0,
            packet: Vec::with_capacity(MAX_PKT_LEN),
            packet_byte: 0,
            packet_byte_index: 0,
            packet_len: 0,
            packet_whitener_offset: 0,
            sync_ind: 0,
            sync_timestamp: Timestamp::zero(),
            sync_channel: 0,
            timestamp: Timestamp::zero(),
            timestamp_sample: 0,
            samp_rate: 1.0,
            tag_manager: ContextTagManager::new(&[tags::DIG_CHAN]),
            items_read: 0,
        }
    }

    pub fn items_read(&self) -> u64 {
        self.items_read
    }

    fn enter_search(&mut self) {
        self.state = State::SyncSearch;
    }

    /// Resolves the sync timestamp and channel, then sets up for header
    /// decode. `time_tags`/`rate_tags` are this window's reference tags;
    /// the cursors advance past everything at or before the sync index.
    fn enter_have_sync(
        &mut self,
        time_tags: &[&StreamTag],
        rate_tags: &[&StreamTag],
        time_idx: &mut usize,
        rate_idx: &mut usize,
    ) {
        while *time_idx < time_tags.len() && self.sync_ind >= time_tags[*time_idx].offset {
            if let Some(ts) = time_tags[*time_idx].value.as_time() {
                self.timestamp_sample = time_tags[*time_idx].offset;
                self.timestamp = ts;
            }
            *time_idx += 1;
        }
        while *rate_idx < rate_tags.len() && self.sync_ind >= rate_tags[*rate_idx].offset {
            if let Some(rate) = rate_tags[*rate_idx].value.as_double() {
                self.samp_rate = rate;
            }
            *rate_idx += 1;
        }

        // store timestamp associated with sync
        self.sync_timestamp =
            self.timestamp + (self.sync_ind - self.timestamp_sample) as f64 / self.samp_rate;

        let context_tags = self.tag_manager.latest_at(self.sync_ind);
        self.sync_channel = context_tags
            .first()
            .and_then(|t| t.value.as_int())
            .unwrap_or(0);

        tracing::debug!(
            "sync at offset {}, timestamp {}, channel {}",
            self.sync_ind, self.sync_timestamp, self.sync_channel
        );

        self.state = State::HaveSync;
        self.header = 0;
        self.header_bit_cnt = 0;
    }

    fn enter_have_header(&mut self, payload_len: usize, whitener_offset: u8) {
        tracing::debug!("header ok: payload_len {}, whitener offset {}", payload_len, whitener_offset);
        self.state = State::HaveHeader;
        self.packet_len = payload_len;
        self.packet_whitener_offset = whitener_offset;
        self.packet.clear();
        self.packet_byte = 0;
        self.packet_byte_index = 0;
    }

    fn header_ok(&self) -> bool {
        // confirm that the two copies of the header info are identical
        ((self.header >> 16) ^ (self.header & 0xffff)) == 0
    }

    fn header_payload(&self) -> (usize, u8) {
        // two 16-bit shorts in network byte order: payload length in the
        // lower 12 bits, whitener offset in the upper 4
        let len = ((self.header >> 16) & 0x0fff) as usize;
        let offset = ((self.header >> 28) & 0x000f) as u8;
        (len, offset)
    }

    /// Pushes the packet triple to the three queues in lock-step
    fn emit_packet(&mut self) {
        let packet = Packet {
            whitener_offset: self.packet_whitener_offset,
            payload: std::mem::take(&mut self.packet),
        };
        // a receiver hanging up just means nobody wants packets anymore
        let _ = self.packet_tx.send(packet);
        let _ = self.time_tx.send(self.sync_timestamp);
        let _ = self.chan_tx.send(self.sync_channel);
    }

    /// Consumes the whole window, emitting any packets completed in it
    pub fn work(&mut self, window: &StreamWindow<u8>) -> usize {
        let n = window.len();
        let abs_n = self.items_read;
        let end_n = abs_n + n as u64;

        let mut time_tags: Vec<&StreamTag> = Vec::new();
        let mut rate_tags: Vec<&StreamTag> = Vec::new();
        for tag in tags::tags_in_range(window.tags, abs_n, end_n) {
            match tag.key.as_str() {
                tags::RX_TIME => time_tags.push(tag),
                tags::RX_RATE => rate_tags.push(tag),
                tags::DIG_CHAN => self.tag_manager.add(tag.clone()),
                _ => {}
            }
        }
        time_tags.sort_by_key(|t| t.offset);
        rate_tags.sort_by_key(|t| t.offset);
        let mut time_idx = 0usize;
        let mut rate_idx = 0usize;

        let input = window.samples;
        let mut count = 0usize;

        while count < n {
            match self.state {
                State::SyncSearch => {
                    // look for the flag marking the beginning of a packet
                    while count < n {
                        if input[count] & BIT_SYNC != 0 {
                            self.sync_ind = count as u64 + abs_n;
                            self.enter_have_sync(&time_tags, &rate_tags, &mut time_idx, &mut rate_idx);
                            break;
                        }
                        count += 1;
                    }
                }
                State::HaveSync => {
                    // shift bits one at a time into the header
                    while count < n {
                        self.header = (self.header << 1) | (input[count] & BIT_DATA) as u32;
                        count += 1;
                        self.header_bit_cnt += 1;
                        if self.header_bit_cnt == HEADER_BIT_LEN {
                            if self.header_ok() {
                                let (payload_len, whitener_offset) = self.header_payload();
                                self.enter_have_header(payload_len, whitener_offset);
                                if self.packet_len == 0 {
                                    // zero-length payloads still emit the triple
                                    self.emit_packet();
                                    self.enter_search();
                                }
                            } else {
                                tracing::debug!("bad header 0x{:08x}, back to sync search", self.header);
                                self.enter_search();
                            }
                            break;
                        }
                    }
                }
                State::HaveHeader => {
                    // shift bits into bytes of the packet one at a time
                    while count < n {
                        self.packet_byte = (self.packet_byte << 1) | (input[count] & BIT_DATA);
                        count += 1;
                        self.packet_byte_index += 1;
                        if self.packet_byte_index == 8 {
                            self.packet.push(self.packet_byte);
                            self.packet_byte = 0;
                            self.packet_byte_index = 0;
                            if self.packet.len() == self.packet_len {
                                self.emit_packet();
                                self.enter_search();
                                break;
                            }
                        }
                    }
                }
            }
        }

        // store off the latest references whose samples have been consumed
        for tag in &time_tags {
            if end_n > tag.offset {
                if let Some(ts) = tag.value.as_time() {
                    self.timestamp_sample = tag.offset;
                    self.timestamp = ts;
                }
            }
        }
        for tag in &rate_tags {
            if end_n > tag.offset {
                if let Some(rate) = tag.value.as_double() {
                    self.samp_rate = rate;
                }
            }
        }

        self.items_read = end_n;
        n
    }
}
