//! The lock-free SPSC ring (§6 `RingBuffer`), realized as a thin,
//! frame-aware wrapper over this workspace's existing `ringbuf` dependency
//! rather than a hand-rolled circular buffer.
//!
//! The recorder thread is the sole writer, `capture_samples`/`available_samples`
//! the sole reader (§5: "The ring buffer is SPSC ... No additional
//! synchronization"), which is exactly the `Producer`/`Consumer` split
//! `ringbuf::RingBuffer` already gives us.

use ringbuf::{Consumer, Producer, RingBuffer as RawRing};

/// Creates a ring sized for `capacity_frames` frames of `frame_bytes` bytes
/// each (§6 `create(capacity_frames, frame_bytes, writable_in_place=false)`).
///
/// `writable_in_place` from the original contract described a zero-copy
/// write-vector API; this backend writes through a scratch buffer instead
/// (see `wasapi::capture::record_proc`), so only the byte-copying `write`/`read`
/// half of that contract is implemented here.
pub fn create(capacity_frames: usize, frame_bytes: usize) -> (RingWriter, RingReader) {
    let (producer, consumer) = RawRing::<u8>::new(capacity_frames * frame_bytes).split();
    (RingWriter { producer, frame_bytes }, RingReader { consumer, frame_bytes })
}

pub struct RingWriter {
    producer: Producer<u8>,
    frame_bytes: usize,
}

impl RingWriter {
    /// Frames of free space currently available to write.
    pub fn free(&self) -> usize {
        self.producer.remaining() / self.frame_bytes
    }

    /// Writes as many whole frames from `bytes` as fit, returning the number
    /// of frames actually written. `bytes.len()` must be a multiple of the
    /// frame size.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        debug_assert_eq!(bytes.len() % self.frame_bytes, 0);
        let written_bytes = self.producer.push_slice(bytes);
        let whole_frames = written_bytes / self.frame_bytes;
        whole_frames
    }
}

pub struct RingReader {
    consumer: Consumer<u8>,
    frame_bytes: usize,
}

impl RingReader {
    /// Frames of readable data currently buffered (§4.5 `available_samples`).
    pub fn read_space(&self) -> usize {
        self.consumer.len() / self.frame_bytes
    }

    /// Reads exactly `n` frames into `out`, or nothing at all if fewer than
    /// `n` are available (§4.5 `capture_samples`: "error if insufficient data").
    pub fn read(&mut self, out: &mut [u8], n: usize) -> bool {
        let needed_bytes = n * self.frame_bytes;
        if self.consumer.len() < needed_bytes || out.len() < needed_bytes {
            return false;
        }
        let popped = self.consumer.pop_slice(&mut out[..needed_bytes]);
        debug_assert_eq!(popped, needed_bytes);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let (mut w, mut r) = create(16, 4);
        let frames: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(w.write(&frames), 2);
        assert_eq!(r.read_space(), 2);
        let mut out = [0u8; 8];
        assert!(r.read(&mut out, 2));
        assert_eq!(out, frames);
    }

    #[test]
    fn read_fails_when_insufficient_data() {
        let (mut w, mut r) = create(16, 4);
        let frames: [u8; 4] = [9, 9, 9, 9];
        w.write(&frames);
        let mut out = [0u8; 8];
        assert!(!r.read(&mut out, 2));
    }

    #[test]
    fn free_shrinks_as_data_is_written() {
        let (mut w, _r) = create(4, 4);
        assert_eq!(w.free(), 4);
        w.write(&[0u8; 8]);
        assert_eq!(w.free(), 2);
    }
}
