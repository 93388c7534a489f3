//! Byte-granular single-producer/single-consumer ring buffer.
//!
//! Thin facade over `ringbuf::HeapRb<u8>` (the same crate the teacher uses
//! for its frame-level ring in `realtime_audio.rs`), narrowed to exactly the
//! contract the engine needs: `read_space`/`write_space`/`read`/`write`, all
//! in bytes, all wait-free, none of them allocating. `SampleRing` owns
//! neither end exclusively — `split()` hands out a `RingProducer` and a
//! `RingConsumer`, and the caller's own lifetime discipline (one producer
//! thread, one consumer thread) is what makes it safe, exactly as `spec.md`
//! requires.

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

/// Producer half of a [`SampleRing`]. Safe to use from exactly one thread.
pub struct RingProducer {
    inner: HeapProd<u8>,
}

/// Consumer half of a [`SampleRing`]. Safe to use from exactly one thread.
pub struct RingConsumer {
    inner: HeapCons<u8>,
}

impl RingProducer {
    /// Bytes that can be written right now without blocking.
    pub fn write_space(&self) -> usize {
        self.inner.vacant_len()
    }

    /// Writes as many bytes of `src` as fit; returns the number written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        self.inner.push_slice(src)
    }
}

/// Bytes that can be read right now without blocking.
impl RingConsumer {
    pub fn read_space(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Reads as many bytes into `dst` as are available; returns the number read.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        self.inner.pop_slice(dst)
    }
}

/// Allocates a ring sized for `capacity_frames` frames of `frame_size` bytes
/// each, rounded up to a power of two (`spec.md` §3 explicitly allows this,
/// provided callers never address more than `capacity_frames` frames worth
/// of staging buffer — `Reader`/`Writer` enforce that separately).
///
/// The buffer is pre-faulted (every byte touched once) before the halves are
/// handed out, so the worker/RT threads never take a first-touch page fault
/// on it (`spec.md` §5).
pub fn new_ring(capacity_frames: usize, frame_size: usize) -> (RingProducer, RingConsumer) {
    let bytes = (capacity_frames * frame_size).next_power_of_two();
    let rb = HeapRb::<u8>::new(bytes);
    let (mut prod, cons) = rb.split();
    // Touch every slot once so the kernel backs it before the RT thread does.
    let zeros = vec![0u8; bytes];
    prod.push_slice(&zeros);
    let mut drain = vec![0u8; bytes];
    let mut cons = cons;
    cons.pop_slice(&mut drain);
    (RingProducer { inner: prod }, RingConsumer { inner: cons })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_capacity_up_to_power_of_two() {
        let (prod, _cons) = new_ring(100, 4);
        // 100 * 4 = 400, rounds up to 512.
        assert_eq!(prod.write_space(), 512);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut prod, mut cons) = new_ring(16, 1);
        let written = prod.write(&[1, 2, 3, 4]);
        assert_eq!(written, 4);
        assert_eq!(cons.read_space(), 4);

        let mut out = [0u8; 4];
        let read = cons.read(&mut out);
        assert_eq!(read, 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(cons.read_space(), 0);
    }

    #[test]
    fn write_past_capacity_returns_partial_count() {
        let (mut prod, _cons) = new_ring(4, 1);
        // Capacity rounds up to 4 bytes; all of it is free after construction.
        let written = prod.write(&[0; 100]);
        assert_eq!(written, prod_capacity(&prod));
    }

    fn prod_capacity(prod: &RingProducer) -> usize {
        // write_space() right after construction equals total capacity.
        prod.inner.vacant_len() + prod.inner.occupied_len()
    }
}
