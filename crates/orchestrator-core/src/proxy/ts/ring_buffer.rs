//! MPEG-TS ring buffer (§4.8 "Ring buffer").
//!
//! Chunks are appended at a monotonically increasing index and evicted by
//! either count (`MAX_CHUNKS`) or age (60 s TTL), whichever comes first —
//! the same two-sided eviction the teacher's `SignatureCache` applies to
//! its tool/family maps (`is_expired()` plus a size cap checked on insert),
//! generalized here from a `HashMap` to an index-addressable ring since
//! readers need "give me chunk N", not "give me this key".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

/// MPEG-TS packets are fixed at 188 bytes; splitting mid-packet corrupts
/// the stream for every client reading past the split.
const TS_PACKET_SIZE: usize = 188;
const CHUNK_TARGET_BYTES: usize = 1024 * 1024;
const CHUNK_ALIGNED_BYTES: usize = (CHUNK_TARGET_BYTES / TS_PACKET_SIZE) * TS_PACKET_SIZE;

struct Chunk {
    index: u64,
    data: Bytes,
    inserted_at: Instant,
}

pub struct RingBuffer {
    chunks: parking_lot::Mutex<VecDeque<Chunk>>,
    partial: parking_lot::Mutex<BytesMut>,
    head_index: AtomicU64,
    max_chunks: usize,
    ttl: Duration,
    notify: Notify,
}

impl RingBuffer {
    pub fn new(max_chunks: usize, ttl: Duration) -> Self {
        Self {
            chunks: parking_lot::Mutex::new(VecDeque::new()),
            partial: parking_lot::Mutex::new(BytesMut::new()),
            head_index: AtomicU64::new(0),
            max_chunks,
            ttl,
            notify: Notify::new(),
        }
    }

    /// Index of the most recently completed chunk; `0` before anything has
    /// been written.
    pub fn head_index(&self) -> u64 {
        self.head_index.load(Ordering::Acquire)
    }

    /// Appends raw upstream bytes, splitting off 188-byte-aligned chunks of
    /// ~1 MB as enough data accumulates. Bytes that don't yet fill a full
    /// chunk stay buffered until the next call.
    pub fn push(&self, data: &[u8]) {
        let mut partial = self.partial.lock();
        partial.extend_from_slice(data);
        while partial.len() >= CHUNK_ALIGNED_BYTES {
            let chunk_bytes = partial.split_to(CHUNK_ALIGNED_BYTES).freeze();
            self.insert_chunk(chunk_bytes);
        }
        drop(partial);
        self.notify.notify_waiters();
    }

    fn insert_chunk(&self, data: Bytes) {
        let index = self.head_index.fetch_add(1, Ordering::AcqRel) + 1;
        let mut chunks = self.chunks.lock();
        chunks.push_back(Chunk { index, data, inserted_at: Instant::now() });
        self.evict(&mut chunks);
    }

    fn evict(&self, chunks: &mut VecDeque<Chunk>) {
        while chunks.len() > self.max_chunks {
            chunks.pop_front();
        }
        let cutoff = Instant::now() - self.ttl;
        while chunks.front().is_some_and(|c| c.inserted_at < cutoff) {
            chunks.pop_front();
        }
    }

    /// Looks up a chunk by absolute index; `None` if it was never written
    /// or has since been evicted (the caller should treat this as "client
    /// fell too far behind" and jump forward).
    pub fn get(&self, index: u64) -> Option<Bytes> {
        let chunks = self.chunks.lock();
        let oldest = chunks.front()?.index;
        if index < oldest {
            return None;
        }
        let offset = usize::try_from(index - oldest).ok()?;
        chunks.get(offset).map(|c| c.data.clone())
    }

    pub fn oldest_index(&self) -> Option<u64> {
        self.chunks.lock().front().map(|c| c.index)
    }

    pub async fn wait_for_new(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(n: usize) -> Vec<u8> {
        vec![0xFFu8; n * TS_PACKET_SIZE]
    }

    #[test]
    fn push_emits_aligned_chunks() {
        let buf = RingBuffer::new(100, Duration::from_secs(60));
        let packets_per_chunk = CHUNK_ALIGNED_BYTES / TS_PACKET_SIZE;
        buf.push(&packets(packets_per_chunk));
        assert_eq!(buf.head_index(), 1);
        assert!(buf.get(1).is_some());
    }

    #[test]
    fn partial_data_does_not_emit_a_chunk() {
        let buf = RingBuffer::new(100, Duration::from_secs(60));
        buf.push(&packets(10));
        assert_eq!(buf.head_index(), 0);
    }

    #[test]
    fn evicts_oldest_beyond_max_chunks() {
        let buf = RingBuffer::new(2, Duration::from_secs(60));
        let packets_per_chunk = CHUNK_ALIGNED_BYTES / TS_PACKET_SIZE;
        for _ in 0..3 {
            buf.push(&packets(packets_per_chunk));
        }
        assert_eq!(buf.head_index(), 3);
        assert!(buf.get(1).is_none(), "chunk 1 should have been evicted by the max_chunks cap");
        assert!(buf.get(2).is_some());
        assert!(buf.get(3).is_some());
    }

    #[test]
    fn evicts_expired_chunks_by_ttl() {
        let buf = RingBuffer::new(100, Duration::from_millis(1));
        let packets_per_chunk = CHUNK_ALIGNED_BYTES / TS_PACKET_SIZE;
        buf.push(&packets(packets_per_chunk));
        std::thread::sleep(Duration::from_millis(5));
        buf.push(&packets(packets_per_chunk));
        assert!(buf.get(1).is_none());
    }
}
