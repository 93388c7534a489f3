//! Disk-facing workers: `Reader` (file → ring, feeding playback) and
//! `Writer` (ring → file, draining capture). Both share the cooperative
//! pump loop described in `spec.md` §4.6 through [`IoWorkerShared`] and
//! [`spawn_pump`]; `work_cycle` itself stays distinct per role, matching the
//! original's `Reader::work_cycle`/`Writer::work_cycle` split in
//! `examples/original_source/src/io.cpp`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::error::EngineError;
use crate::ring::{new_ring, RingConsumer, RingProducer};
use crate::sound_file::{SoundFileReader, SoundFileWriter};

/// State shared between a worker's owning handle (`Reader`/`Writer`) and its
/// pump thread. `break_flag` is read lock-free from the RT thread (via
/// `finished()`); `pump_mutex`/`pump_cv` are touched only by the worker
/// thread itself plus `wake()`'s uncontended `notify_one`.
struct IoWorkerShared {
    break_flag: AtomicBool,
    pump_mutex: Mutex<()>,
    pump_cv: Condvar,
    done: AtomicU64,
    needed: u64,
    ex: Mutex<Option<EngineError>>,
}

impl IoWorkerShared {
    fn new(needed: u64) -> Self {
        Self {
            break_flag: AtomicBool::new(false),
            pump_mutex: Mutex::new(()),
            pump_cv: Condvar::new(),
            done: AtomicU64::new(0),
            needed,
            ex: Mutex::new(None),
        }
    }

    fn wake(&self) {
        // No lock taken here: `notify_one` is safe and non-blocking to call
        // from the RT thread regardless of whether the worker currently
        // holds `pump_mutex`.
        self.pump_cv.notify_one();
    }

    fn finished(&self) -> bool {
        self.break_flag.load(Ordering::Acquire)
    }
}

/// Runs the cooperative pump loop on the calling thread: wait for a wakeup,
/// run one `work_cycle`, repeat until `break_flag` is set. A `work_cycle`
/// returning `Ok(true)` means "reached `needed`, stop"; `Err` is captured
/// into `shared.ex` and also stops the loop.
fn pump_loop(shared: &IoWorkerShared, mut work_cycle: impl FnMut() -> Result<bool, EngineError>) {
    loop {
        {
            let guard = shared.pump_mutex.lock().unwrap();
            if shared.finished() {
                break;
            }
            // Spurious wakeups are fine: work_cycle() re-checks ring space.
            let _guard = shared.pump_cv.wait(guard).unwrap();
            if shared.finished() {
                break;
            }
        }
        match work_cycle() {
            Ok(done) => {
                if done {
                    shared.break_flag.store(true, Ordering::Release);
                }
            }
            Err(e) => {
                error!("worker pump: exception in work_cycle, will surface on stop()/join(): {e}");
                *shared.ex.lock().unwrap() = Some(e);
                shared.break_flag.store(true, Ordering::Release);
            }
        }
        if shared.finished() {
            break;
        }
    }
}

/// Sets `break_flag`, wakes the worker once, and joins it, returning any
/// `EngineError` the worker's `work_cycle` captured. Idempotent: a second
/// call after the thread has already been joined is a no-op returning `Ok(())`.
fn stop_worker(
    shared: &IoWorkerShared,
    thread: &mut Option<JoinHandle<()>>,
) -> Result<(), EngineError> {
    shared.break_flag.store(true, Ordering::Release);
    shared.wake();
    if let Some(handle) = thread.take() {
        debug!("worker: waiting for pump thread to join");
        let _ = handle.join();
    }
    if let Some(e) = shared.ex.lock().unwrap().take() {
        return Err(e);
    }
    Ok(())
}

/// Frame counts, rounded the same way the original computes them:
/// `(secs * rate + 0.5) as u64`.
fn secs_to_frames(secs: f64, sample_rate: u32) -> u64 {
    (secs * sample_rate as f64 + 0.5) as u64
}

/// Disk → ring worker. Prefills the ring synchronously at construction time
/// (minimizing startup underrun probability, per `spec.md` §4.4); if that
/// prefill alone satisfies `needed` no worker thread is spawned at all.
pub struct Reader {
    shared: Arc<IoWorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    sample_rate: u32,
    channel_count: usize,
}

struct ReaderState {
    file: SoundFileReader,
    ring: RingProducer,
    staging: Vec<f32>,
    channel_count: usize,
    frame_size: usize,
    buffer_size: usize,
}

impl Reader {
    /// Opens `path`, validates it against `sample_rate`/`channel_count`, and
    /// returns the `Reader` handle plus the ring's consumer half (handed to
    /// the `Reactor` for RT-thread playback reads).
    pub fn new(
        path: &Path,
        sample_rate: u32,
        channel_count: usize,
        buffer_size: usize,
        duration_secs: f64,
        start_offset_secs: f64,
    ) -> Result<(Self, RingConsumer), EngineError> {
        let mut file = SoundFileReader::open(path)?;
        let info = file.info();
        if info.sample_rate != sample_rate {
            return Err(EngineError::SampleRateMismatch {
                file_rate: info.sample_rate,
                engine_rate: sample_rate,
            });
        }
        if info.channels != channel_count {
            return Err(EngineError::ChannelMismatch {
                file_channels: info.channels,
                expected_channels: channel_count,
            });
        }

        let frame_size = channel_count * std::mem::size_of::<f32>();
        let (ring_producer, ring_consumer) = new_ring(buffer_size, frame_size);

        let start_frame = info.frames.min(secs_to_frames(start_offset_secs, sample_rate));
        file.seek(start_frame).map_err(|e| EngineError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut frames_avail = info.frames - start_frame;
        if duration_secs != 0.0 {
            let duration_frames = secs_to_frames(duration_secs, sample_rate);
            frames_avail = frames_avail.min(duration_frames);
            debug!("Reader: limiting duration to {frames_avail} frames");
        }
        let needed = frames_avail;

        let shared = Arc::new(IoWorkerShared::new(needed));
        let mut state = ReaderState {
            file,
            ring: ring_producer,
            staging: vec![0.0; buffer_size * channel_count],
            channel_count,
            frame_size,
            buffer_size,
        };

        debug!(
            "Reader: reading {path:?} at {sample_rate} Hz, {channel_count} channel(s), needed={needed} frames"
        );

        // Prefill synchronously on the control thread before any worker
        // thread exists, to minimize startup underrun.
        let path_owned = path.to_path_buf();
        let prefilled_done = reader_work_cycle(&mut state, &shared, &path_owned)?;

        let thread = if prefilled_done {
            debug!("Reader: entire needed range fit in the prefill, not starting worker thread");
            shared.break_flag.store(true, Ordering::Release);
            None
        } else {
            let shared_thread = Arc::clone(&shared);
            Some(
                thread::Builder::new()
                    .name("jackbridge-reader".into())
                    .spawn(move || {
                        pump_loop(&shared_thread, || {
                            reader_work_cycle(&mut state, &shared_thread, &path_owned)
                        });
                    })
                    .expect("failed spawning reader thread"),
            )
        };

        Ok((
            Self {
                shared,
                thread: Mutex::new(thread),
                sample_rate,
                channel_count,
            },
            ring_consumer,
        ))
    }

    pub fn wake(&self) {
        self.shared.wake();
    }

    pub fn finished(&self) -> bool {
        self.shared.finished()
    }

    pub fn needed(&self) -> u64 {
        self.shared.needed
    }

    pub fn frames_done(&self) -> u64 {
        self.shared.done.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Idempotent: stops the worker (if running), joins it, and surfaces
    /// any captured error exactly once.
    pub fn stop(&self) -> Result<(), EngineError> {
        let mut thread = self.thread.lock().unwrap();
        stop_worker(&self.shared, &mut thread)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Reader dropped with unreported error: {e}");
        }
    }
}

/// One `work_cycle`: fills as much of the ring as will fit from the file,
/// bounded by remaining `needed` frames and the staging buffer's capacity.
fn reader_work_cycle(
    state: &mut ReaderState,
    shared: &IoWorkerShared,
    path: &Path,
) -> Result<bool, EngineError> {
    let done = shared.done.load(Ordering::Acquire);
    let remaining = shared.needed - done;
    // `ring.write_space()` may exceed `buffer_size` frames because the ring
    // rounds its byte capacity up to a power of two; capping at
    // `buffer_size` keeps us from overflowing `staging`.
    let writable_frames = (state.ring.write_space() / state.frame_size)
        .min(state.buffer_size)
        .min(remaining as usize);
    if writable_frames == 0 {
        return Ok(remaining == 0);
    }

    let read = state.file.read_float(&mut state.staging, writable_frames)?;
    if read != writable_frames {
        return Err(EngineError::PrematureEof {
            path: path.to_path_buf(),
            requested: writable_frames,
            actual: read,
        });
    }

    let bytes = read * state.frame_size;
    let written = state
        .ring
        .write(f32_as_bytes(&state.staging[..read * state.channel_count]));
    debug_assert_eq!(written, bytes, "sole producer, space was just measured");

    let done = shared.done.fetch_add(read as u64, Ordering::AcqRel) + read as u64;
    Ok(done == shared.needed)
}

/// Ring → disk worker. Drains the ring on demand; `needed == 0` means
/// "unbounded", matching `spec.md` §4.5.
pub struct Writer {
    shared: Arc<IoWorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    sample_rate: u32,
    channel_count: usize,
}

struct WriterState {
    file: SoundFileWriter,
    ring: RingConsumer,
    staging: Vec<f32>,
    channel_count: usize,
    frame_size: usize,
    buffer_size: usize,
}

impl Writer {
    pub fn new(
        path: &Path,
        sample_rate: u32,
        channel_count: usize,
        buffer_size: usize,
        duration_secs: f64,
    ) -> Result<(Self, RingProducer), EngineError> {
        let file = SoundFileWriter::create(path, channel_count, sample_rate)?;
        let frame_size = channel_count * std::mem::size_of::<f32>();
        let (ring_producer, ring_consumer) = new_ring(buffer_size, frame_size);

        let needed = secs_to_frames(duration_secs, sample_rate);
        debug!(
            "Writer: writing {path:?} at {sample_rate} Hz, {channel_count} channel(s), needed={needed} ({})",
            if needed == 0 { "unbounded" } else { "bounded" }
        );

        let shared = Arc::new(IoWorkerShared::new(needed));
        let state = WriterState {
            file,
            ring: ring_consumer,
            staging: vec![0.0; buffer_size * channel_count],
            channel_count,
            frame_size,
            buffer_size,
        };

        let path_owned = path.to_path_buf();
        let shared_thread = Arc::clone(&shared);
        let mut state = state;
        let thread = thread::Builder::new()
            .name("jackbridge-writer".into())
            .spawn(move || {
                pump_loop(&shared_thread, || writer_work_cycle(&mut state, &shared_thread, &path_owned));
                // Finalize explicitly rather than leaning on hound's
                // drop-time finalization, so a failure at close (e.g. disk
                // full while flushing the header) is captured and surfaced
                // on `stop()`/`join()` like any other worker error, instead
                // of being silently swallowed by `Drop`.
                if let Err(e) = state.file.finalize() {
                    error!("Writer: failed finalizing {path_owned:?}: {e}");
                    let mut ex = shared_thread.ex.lock().unwrap();
                    if ex.is_none() {
                        *ex = Some(e);
                    }
                }
            })
            .expect("failed spawning writer thread");

        Ok((
            Self {
                shared,
                thread: Mutex::new(Some(thread)),
                sample_rate,
                channel_count,
            },
            ring_producer,
        ))
    }

    pub fn wake(&self) {
        self.shared.wake();
    }

    pub fn finished(&self) -> bool {
        self.shared.finished()
    }

    pub fn needed(&self) -> u64 {
        self.shared.needed
    }

    pub fn frames_done(&self) -> u64 {
        self.shared.done.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        let mut thread = self.thread.lock().unwrap();
        stop_worker(&self.shared, &mut thread)
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Writer dropped with unreported error: {e}");
        }
    }
}

fn writer_work_cycle(
    state: &mut WriterState,
    shared: &IoWorkerShared,
    path: &Path,
) -> Result<bool, EngineError> {
    let mut readable_frames = (state.ring.read_space() / state.frame_size).min(state.buffer_size);
    if shared.needed != 0 {
        let done = shared.done.load(Ordering::Acquire);
        readable_frames = readable_frames.min((shared.needed - done) as usize);
    }
    if readable_frames == 0 {
        return Ok(false);
    }

    let bytes_wanted = readable_frames * state.frame_size;
    let read = state.ring.read(f32_as_bytes_mut(
        &mut state.staging[..readable_frames * state.channel_count],
    ));
    debug_assert_eq!(read, bytes_wanted, "sole consumer, space was just measured");

    let written = state.file.write_float(&state.staging, readable_frames)?;
    if written != readable_frames {
        return Err(EngineError::ShortWrite {
            path: path.to_path_buf(),
            requested: readable_frames,
            actual: written,
        });
    }

    let done = shared.done.fetch_add(written as u64, Ordering::AcqRel) + written as u64;
    Ok(shared.needed != 0 && done == shared.needed)
}

/// Reinterprets an `f32` slice as its raw little/native-endian byte
/// representation for the byte-granular `SampleRing`. Sound because `f32`
/// has no padding and any bit pattern is a valid (if possibly NaN) `f32`.
fn f32_as_bytes(samples: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples))
    }
}

fn f32_as_bytes_mut(samples: &mut [f32]) -> &mut [u8] {
    unsafe {
        std::slice::from_raw_parts_mut(samples.as_mut_ptr() as *mut u8, std::mem::size_of_val(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_test_wav(path: &Path, channels: u16, sample_rate: u32, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..(frames * channels as usize) {
            writer.write_sample((i as f32) * 0.001).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reader_prefill_can_satisfy_small_file_without_a_thread() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 1, 48_000, 100);

        let (reader, _consumer) = Reader::new(&path, 48_000, 1, 8192, 0.0, 0.0).unwrap();
        assert!(reader.finished());
        assert_eq!(reader.needed(), 100);
        assert_eq!(reader.frames_done(), 100);
        reader.stop().unwrap();
    }

    #[test]
    fn reader_rejects_sample_rate_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 1, 44_100, 100);

        let err = Reader::new(&path, 48_000, 1, 8192, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::SampleRateMismatch { .. }));
    }

    #[test]
    fn reader_rejects_channel_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 2, 48_000, 100);

        let err = Reader::new(&path, 48_000, 1, 8192, 0.0, 0.0).unwrap_err();
        assert!(matches!(err, EngineError::ChannelMismatch { .. }));
    }

    #[test]
    fn reader_start_offset_and_duration_bound_needed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.wav");
        write_test_wav(&path, 1, 48_000, 48_000 * 10);

        // 2s in, 3s duration out of a 10s file.
        let (reader, _consumer) = Reader::new(&path, 48_000, 1, 65536, 3.0, 2.0).unwrap();
        assert_eq!(reader.needed(), 144_000);
        reader.stop().unwrap();
    }

    #[test]
    fn writer_unbounded_needed_is_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (writer, _producer) = Writer::new(&path, 48_000, 1, 8192, 0.0).unwrap();
        assert_eq!(writer.needed(), 0);
        writer.stop().unwrap();
    }

    #[test]
    fn writer_stop_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (writer, _producer) = Writer::new(&path, 48_000, 1, 8192, 1.0).unwrap();
        writer.stop().unwrap();
        writer.stop().unwrap();
    }

    #[test]
    fn writer_drains_what_the_ring_holds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let (writer, mut producer) = Writer::new(&path, 48_000, 1, 8192, 0.05).unwrap();
        // 0.05s @ 48kHz = 2400 frames needed.
        let samples = vec![0.25_f32; 2400];
        producer.write(f32_as_bytes(&samples));
        writer.wake();

        for _ in 0..200 {
            if writer.finished() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(writer.finished());
        writer.stop().unwrap();
        assert_eq!(writer.frames_done(), 2400);
    }
}
