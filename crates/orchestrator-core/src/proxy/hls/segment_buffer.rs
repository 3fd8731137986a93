//! Per-channel HLS segment buffer (§4.9 "Segment buffer").
//!
//! Same count-capped eviction as `proxy::ts::RingBuffer`, keyed by the
//! proxy's own output sequence number rather than a byte offset — the unit
//! of delivery here is a whole `.ts` segment, not an aligned byte chunk.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

struct Segment {
    seq: u64,
    data: Bytes,
    duration: f32,
}

pub struct SegmentBuffer {
    segments: Mutex<VecDeque<Segment>>,
    max_segments: usize,
}

impl SegmentBuffer {
    pub fn new(max_segments: usize) -> Self {
        Self { segments: Mutex::new(VecDeque::new()), max_segments }
    }

    pub fn push(&self, seq: u64, data: Bytes, duration: f32) {
        let mut segments = self.segments.lock();
        segments.push_back(Segment { seq, data, duration });
        while segments.len() > self.max_segments {
            segments.pop_front();
        }
    }

    pub fn get(&self, seq: u64) -> Option<Bytes> {
        self.segments.lock().iter().find(|s| s.seq == seq).map(|s| s.data.clone())
    }

    /// The most recent `window_size` segments, oldest first, as
    /// `(seq, duration)` pairs — the window advertised in the manifest.
    pub fn window(&self, window_size: usize) -> Vec<(u64, f32)> {
        let segments = self.segments.lock();
        let skip = segments.len().saturating_sub(window_size);
        segments.iter().skip(skip).map(|s| (s.seq, s.duration)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_returns_the_most_recent_entries_oldest_first() {
        let buf = SegmentBuffer::new(20);
        for i in 0..10u64 {
            buf.push(i, Bytes::from_static(b"x"), 6.0);
        }
        let window = buf.window(6);
        assert_eq!(window.iter().map(|(seq, _)| *seq).collect::<Vec<_>>(), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn evicts_beyond_max_segments() {
        let buf = SegmentBuffer::new(3);
        for i in 0..5u64 {
            buf.push(i, Bytes::from_static(b"x"), 6.0);
        }
        assert!(buf.get(0).is_none());
        assert!(buf.get(1).is_none());
        assert!(buf.get(4).is_some());
    }

    #[test]
    fn get_returns_none_for_unknown_sequence() {
        let buf = SegmentBuffer::new(20);
        buf.push(0, Bytes::from_static(b"x"), 6.0);
        assert!(buf.get(99).is_none());
    }
}
