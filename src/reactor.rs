//! The real-time callback: demultiplexes the `Reader`'s ring into output
//! port buffers, multiplexes input port buffers into the `Writer`'s ring,
//! does frame accounting, and fires the one-shot `Finished` signal.
//!
//! The demux/mux algorithms are free functions (`demux_into_outputs`,
//! `mux_from_inputs`) over `RawOut`/`RawIn` raw-pointer buffer handles,
//! matching `spec.md` §9's "no dynamic dispatch in the RT callback" note
//! and — as a side effect — letting them be unit-tested without any
//! `jack::ProcessScope` at all. `ProcessAdapter` keeps one fixed-length
//! `Vec` of these per direction so the callback only ever overwrites
//! existing slots, never allocates one (`spec.md` §4.7 step 3 / §5).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, error, warn};

use crate::audio_client::{AudioClient, PortClient, PortOwner};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ring::{RingConsumer, RingProducer};
use crate::worker::{Reader, Writer};

/// At most one `Reactor` may exist at a time: the audio server hands the RT
/// callback a raw context pointer, and there is exactly one process-wide
/// slot for it. Enforced with this atomic rather than a real global
/// pointer, per `spec.md` §9 ("the design does not depend on the exact
/// mechanism").
static REACTOR_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Thread-safe one-shot completion signal, standing in for the original's
/// `std::promise<void>`. Set at most once; later attempts are no-ops.
/// The error is `Arc`-wrapped so the slot can be cloned out to the waiter
/// without requiring `EngineError: Clone` (it wraps a non-`Clone`
/// `std::io::Error` in one variant).
struct Finished {
    mutex: Mutex<Option<Result<(), Arc<EngineError>>>>,
    cv: Condvar,
}

impl Finished {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn fire_ok(&self) {
        let mut slot = self.mutex.lock().unwrap();
        if slot.is_none() {
            *slot = Some(Ok(()));
            self.cv.notify_all();
        }
    }

    fn fire_err(&self, err: EngineError) {
        let mut slot = self.mutex.lock().unwrap();
        if slot.is_none() {
            *slot = Some(Err(Arc::new(err)));
            self.cv.notify_all();
        }
    }

    fn wait(&self) -> Result<(), Arc<EngineError>> {
        let mut slot = self.mutex.lock().unwrap();
        while slot.is_none() {
            slot = self.cv.wait(slot).unwrap();
        }
        slot.clone().unwrap()
    }
}

/// RT-thread counters, read after the session completes (`spec.md` §4.7 /
/// §7: overrun/underrun never fail the session, only counted and logged).
#[derive(Default)]
pub struct ReactorStats {
    done: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
}

impl ReactorStats {
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Acquire)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Acquire)
    }
}

/// A port's sample buffer reduced to a raw pointer + length, reconstructed
/// into a slice only for the instant a cycle needs it. `ProcessAdapter`
/// keeps one fixed-length `Vec` of these per direction and overwrites each
/// entry in place every cycle (`spec.md` §4.7 step 3: "pre-allocate two
/// vectors of raw buffer pointers ... to avoid any allocation in the
/// callback") rather than building a fresh `Vec<&mut [f32]>` per call.
#[derive(Clone, Copy)]
pub struct RawOut {
    ptr: *mut f32,
    len: usize,
}

impl RawOut {
    pub fn from_slice(buf: &mut [f32]) -> Self {
        Self { ptr: buf.as_mut_ptr(), len: buf.len() }
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Safety: the caller guarantees `ptr` is still valid for `len`
    /// elements and exclusively borrowed for the duration of this call —
    /// true for one RT cycle, since `from_slice` is always re-run against
    /// the current cycle's port buffer before this is used.
    unsafe fn as_mut_slice(&mut self) -> &mut [f32] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }
}

#[derive(Clone, Copy)]
pub struct RawIn {
    ptr: *const f32,
    len: usize,
}

impl RawIn {
    pub fn from_slice(buf: &[f32]) -> Self {
        Self { ptr: buf.as_ptr(), len: buf.len() }
    }

    fn len(&self) -> usize {
        self.len
    }

    /// Safety: see `RawOut::as_mut_slice`.
    unsafe fn as_slice(&self) -> &[f32] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

/// Outcome of one `demux_into_outputs` call: how many frames were actually
/// demultiplexed before the ring ran dry, and whether that counts as an
/// underrun (it doesn't, once the reader itself is finished).
pub struct DemuxOutcome {
    pub frames_moved: usize,
    pub underrun: bool,
}

/// Demultiplexes interleaved samples from `ring` into `outputs` (one raw
/// buffer per channel, each of length `frame_count`), channel-minor/frame-
/// major: sample `(frame=i, channel=c)` is the `i*C + c`-th sample read
/// from the ring. Stops at the first short read; the caller is responsible
/// for muting the tail.
pub fn demux_into_outputs(ring: &mut RingConsumer, outputs: &mut [RawOut], reader_finished: bool) -> DemuxOutcome {
    let frame_count = outputs.first().map(RawOut::len).unwrap_or(0);
    let mut sample = [0u8; 4];
    let mut n = 0;
    'frames: while n != frame_count {
        for out in outputs.iter_mut() {
            let read = ring.read(&mut sample);
            if read != 4 {
                break 'frames;
            }
            unsafe { out.as_mut_slice() }[n] = f32::from_ne_bytes(sample);
        }
        n += 1;
    }
    DemuxOutcome {
        frames_moved: n,
        underrun: n != frame_count && !reader_finished,
    }
}

/// Zeroes every channel's output buffer from frame `from` (inclusive) to the
/// end. Critical per `spec.md` §4.7: the audio server will otherwise loop
/// whatever stale data remains in the buffer.
pub fn mute_tail(outputs: &mut [RawOut], from: usize) {
    for out in outputs.iter_mut() {
        let len = out.len();
        for sample in unsafe { out.as_mut_slice() }[from..len].iter_mut() {
            *sample = 0.0;
        }
    }
}

pub struct MuxOutcome {
    pub frames_moved: usize,
    pub overrun: bool,
}

/// Multiplexes `inputs` (one raw buffer per channel, each of length
/// `frame_count`) into `ring`, channel-minor/frame-major, matching
/// `demux_into_outputs`'s layout. Stops at the first short write.
pub fn mux_from_inputs(ring: &mut RingProducer, inputs: &[RawIn], writer_finished: bool) -> MuxOutcome {
    let frame_count = inputs.first().map(RawIn::len).unwrap_or(0);
    let mut n = 0;
    'frames: while n != frame_count {
        for inp in inputs.iter() {
            let sample = unsafe { inp.as_slice() }[n];
            let written = ring.write(&sample.to_ne_bytes());
            if written != 4 {
                break 'frames;
            }
        }
        n += 1;
    }
    MuxOutcome {
        frames_moved: n,
        overrun: n != frame_count && !writer_finished,
    }
}

/// The real `jack::ProcessHandler` installed on the active client. Owns
/// every port it registered plus the ring halves needed to move samples,
/// so the RT thread never touches anything through a shared reference.
struct ProcessAdapter {
    input_ports: Vec<jack::Port<jack::AudioIn>>,
    output_ports: Vec<jack::Port<jack::AudioOut>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    reader: Option<Arc<Reader>>,
    writer: Option<Arc<Writer>>,
    reader_ring: Option<RingConsumer>,
    writer_ring: Option<RingProducer>,
    /// One slot per port, pre-sized in `Reactor::build` and overwritten by
    /// index every cycle — never pushed/cleared, so no allocation happens
    /// after construction (`spec.md` §4.7 step 3 / §5).
    output_bufs: Vec<RawOut>,
    input_bufs: Vec<RawIn>,
    stats: Arc<ReactorStats>,
    finished: Arc<Finished>,
    needed: u64,
}

impl ProcessAdapter {
    fn playback(&mut self, ps: &jack::ProcessScope) -> Result<(), EngineError> {
        let Some(reader) = &self.reader else { return Ok(()) };
        let ring = self.reader_ring.as_mut().expect("reader implies reader_ring");
        let frame_count = ps.n_frames() as usize;

        for (i, (port, name)) in self.output_ports.iter_mut().zip(self.output_names.iter()).enumerate() {
            let buf = port.as_mut_slice(ps);
            if buf.len() < frame_count {
                return Err(EngineError::BufferAcquire { port: name.clone() });
            }
            self.output_bufs[i] = RawOut::from_slice(&mut buf[..frame_count]);
        }

        let outcome = demux_into_outputs(ring, &mut self.output_bufs, reader.finished());
        if outcome.underrun {
            error!("Reactor::playback(): ring buffer underrun");
            self.stats.underruns.fetch_add(1, Ordering::AcqRel);
        }
        if !reader.finished() {
            reader.wake();
        }
        if outcome.frames_moved != frame_count {
            mute_tail(&mut self.output_bufs, outcome.frames_moved);
        }
        Ok(())
    }

    fn capture(&mut self, ps: &jack::ProcessScope) -> Result<(), EngineError> {
        let Some(writer) = &self.writer else { return Ok(()) };
        if writer.finished() {
            return Ok(());
        }
        let ring = self.writer_ring.as_mut().expect("writer implies writer_ring");
        let frame_count = ps.n_frames() as usize;

        for (i, (port, name)) in self.input_ports.iter().zip(self.input_names.iter()).enumerate() {
            let buf = port.as_slice(ps);
            if buf.len() < frame_count {
                return Err(EngineError::BufferAcquire { port: name.clone() });
            }
            self.input_bufs[i] = RawIn::from_slice(&buf[..frame_count]);
        }

        let outcome = mux_from_inputs(ring, &self.input_bufs, writer.finished());
        if outcome.overrun {
            error!("Reactor::capture(): ring buffer overrun");
            self.stats.overruns.fetch_add(1, Ordering::AcqRel);
        }
        if !writer.finished() {
            writer.wake();
        }
        Ok(())
    }
}

impl jack::ProcessHandler for ProcessAdapter {
    fn process(&mut self, _client: &jack::Client, ps: &jack::ProcessScope) -> jack::Control {
        let frame_count = ps.n_frames() as u64;
        let result = self.playback(ps).and_then(|_| self.capture(ps));

        if let Err(e) = result {
            self.finished.fire_err(e);
            return jack::Control::Quit;
        }

        let done = self.stats.done.fetch_add(frame_count, Ordering::AcqRel) + frame_count;
        if self.needed != 0 && done >= self.needed {
            debug!("Reactor::process(): signalling done after {done} frames");
            self.finished.fire_ok();
        }
        jack::Control::Continue
    }
}

impl PortOwner for ProcessAdapter {
    fn unregister_all(self, client: &jack::Client) {
        for port in self.input_ports {
            if let Err(e) = client.unregister_port(port) {
                warn!("failed unregistering input port: {e}");
            }
        }
        for port in self.output_ports {
            if let Err(e) = client.unregister_port(port) {
                warn!("failed unregistering output port: {e}");
            }
        }
    }
}

/// Owns the reactor's port registrations and drives the client through
/// activate → connect → (run) → deactivate. Construction is the
/// irreversible step that arms the RT callback.
pub struct Reactor<'a> {
    client: &'a mut AudioClient,
    stats: Arc<ReactorStats>,
    finished: Arc<Finished>,
    interrupted: Arc<AtomicBool>,
}

impl<'a> Reactor<'a> {
    /// `reader`/`reader_ring` must both be `Some` or both `None`; likewise
    /// for `writer`/`writer_ring`. `reader_ring`/`writer_ring` are the ring
    /// halves produced alongside the `Reader`/`Writer` construction.
    pub fn new(
        client: &'a mut AudioClient,
        config: &EngineConfig,
        reader: Option<Arc<Reader>>,
        reader_ring: Option<RingConsumer>,
        writer: Option<Arc<Writer>>,
        writer_ring: Option<RingProducer>,
    ) -> Result<Self, EngineError> {
        if REACTOR_INSTALLED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::SingletonViolation);
        }

        // Plain max() already gives the rule spec.md §4.7 describes: a
        // missing peer contributes 0, which a `max` treats as "no
        // contribution"; if both are 0 (writer-only, unbounded) the
        // combined `needed` is 0, which `process()` reads as "unbounded".
        let needed = reader
            .as_ref()
            .map(|r| r.needed())
            .unwrap_or(0)
            .max(writer.as_ref().map(|w| w.needed()).unwrap_or(0));

        let result = Self::build(client, config, reader, reader_ring, writer, writer_ring, needed);
        if result.is_err() {
            REACTOR_INSTALLED.store(false, Ordering::Release);
        }
        result
    }

    fn build(
        client: &'a mut AudioClient,
        config: &EngineConfig,
        reader: Option<Arc<Reader>>,
        reader_ring: Option<RingConsumer>,
        writer: Option<Arc<Writer>>,
        writer_ring: Option<RingProducer>,
        needed: u64,
    ) -> Result<Self, EngineError> {
        let mut input_ports = Vec::new();
        let mut input_names = Vec::new();
        if writer.is_some() {
            for (i, _) in config.input_ports.iter().enumerate() {
                let short_name = format!("input_{i}");
                let (full_name, port) = client.register_audio_in(&short_name)?;
                input_names.push(full_name);
                input_ports.push(port);
            }
        }

        let mut output_ports = Vec::new();
        let mut output_names = Vec::new();
        if reader.is_some() {
            for (i, _) in config.output_ports.iter().enumerate() {
                let short_name = format!("output_{i}");
                let (full_name, port) = client.register_audio_out(&short_name)?;
                output_names.push(full_name);
                output_ports.push(port);
            }
        }

        let stats = Arc::new(ReactorStats::default());
        let finished = Arc::new(Finished::new());

        // Slots are overwritten by index every cycle; the initial pointers
        // are never dereferenced before the first `playback`/`capture` call
        // fills them in.
        let output_bufs = vec![RawOut { ptr: std::ptr::null_mut(), len: 0 }; output_ports.len()];
        let input_bufs = vec![RawIn { ptr: std::ptr::null(), len: 0 }; input_ports.len()];

        let adapter = ProcessAdapter {
            input_ports,
            output_ports,
            input_names: input_names.clone(),
            output_names: output_names.clone(),
            reader,
            writer,
            reader_ring,
            writer_ring,
            output_bufs,
            input_bufs,
            stats: Arc::clone(&stats),
            finished: Arc::clone(&finished),
            needed,
        };

        client.activate(adapter)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        let reactor = Self { client, stats, finished, interrupted };

        if let Err(e) = reactor.connect_ports(config, &input_names, &output_names) {
            reactor.client.deactivate();
            return Err(e);
        }

        Ok(reactor)
    }

    fn connect_ports(
        &self,
        config: &EngineConfig,
        input_names: &[String],
        output_names: &[String],
    ) -> Result<(), EngineError> {
        for (server_port, client_port) in config.input_ports.iter().zip(input_names) {
            self.client.connect(server_port, client_port)?;
        }
        for (client_port, server_port) in output_names.iter().zip(config.output_ports.iter()) {
            self.client.connect(client_port, server_port)?;
        }
        Ok(())
    }

    /// Blocks the calling (control) thread until the session completes,
    /// then deactivates the client. Returns the underlying error if the RT
    /// callback raised one (`BufferAcquire`, the only fatal in-callback
    /// error). `ReactorTotals::interrupted` is set when completion was
    /// forced by `CancelHandle::cancel` (an external signal) rather than by
    /// the RT callback reaching `needed` frames on its own, so `Driver`/
    /// `main` can still report accurate counts (`spec.md` §8 scenario S5)
    /// while choosing a non-zero exit code.
    pub fn wait_finished(self) -> Result<ReactorTotals, Arc<EngineError>> {
        let result = self.finished.wait();
        self.client.deactivate();
        debug!(
            "Reactor::wait_finished(): done processing {} frames, {} underruns, {} overruns",
            self.stats.done(),
            self.stats.underruns(),
            self.stats.overruns()
        );
        let interrupted = self.interrupted.load(Ordering::Acquire);
        result.map(|()| ReactorTotals {
            done: self.stats.done(),
            underruns: self.stats.underruns(),
            overruns: self.stats.overruns(),
            interrupted,
        })
    }
}

pub struct ReactorTotals {
    pub done: u64,
    pub underruns: u64,
    pub overruns: u64,
    pub interrupted: bool,
}

/// A detached handle that can fire the `Reactor`'s completion signal from
/// outside the RT callback, letting `Driver::run`'s signal-monitor thread
/// unblock `wait_finished` on SIGINT/SIGTERM/SIGHUP (`spec.md` §5). Records
/// that the session ended this way so `wait_finished` can report it
/// alongside the usual totals, rather than reporting a signal-driven stop
/// identically to a clean, self-timed completion.
#[derive(Clone)]
pub struct CancelHandle {
    finished: Arc<Finished>,
    interrupted: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.finished.fire_ok();
    }
}

impl Reactor<'_> {
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            finished: Arc::clone(&self.finished),
            interrupted: Arc::clone(&self.interrupted),
        }
    }
}

impl Drop for Reactor<'_> {
    fn drop(&mut self) {
        self.client.deactivate();
        REACTOR_INSTALLED.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::new_ring;

    #[test]
    fn demux_copies_channel_minor_frame_major() {
        let (mut prod, mut cons) = new_ring(4, 8);
        // Two channels, two frames: (f0,c0)=1.0 (f0,c1)=2.0 (f1,c0)=3.0 (f1,c1)=4.0
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            prod.write(&v.to_ne_bytes());
        }

        let mut ch0 = [0.0f32; 2];
        let mut ch1 = [0.0f32; 2];
        let mut outputs = vec![RawOut::from_slice(&mut ch0), RawOut::from_slice(&mut ch1)];
        let outcome = demux_into_outputs(&mut cons, &mut outputs, false);

        assert_eq!(outcome.frames_moved, 2);
        assert!(!outcome.underrun);
        assert_eq!(ch0, [1.0, 3.0]);
        assert_eq!(ch1, [2.0, 4.0]);
    }

    #[test]
    fn demux_underrun_mutes_tail() {
        let (mut prod, mut cons) = new_ring(4, 8);
        // Only one full frame (2 channels) available out of a requested 2.
        for v in [1.0f32, 2.0] {
            prod.write(&v.to_ne_bytes());
        }

        let mut ch0 = [9.0f32; 2];
        let mut ch1 = [9.0f32; 2];
        let mut outputs = vec![RawOut::from_slice(&mut ch0), RawOut::from_slice(&mut ch1)];
        let outcome = demux_into_outputs(&mut cons, &mut outputs, false);

        assert_eq!(outcome.frames_moved, 1);
        assert!(outcome.underrun);
        mute_tail(&mut outputs, outcome.frames_moved);
        assert_eq!(ch0, [1.0, 0.0]);
        assert_eq!(ch1, [2.0, 0.0]);
    }

    #[test]
    fn demux_short_read_is_not_underrun_once_reader_finished() {
        let (_prod, mut cons) = new_ring(4, 8);
        let mut ch0 = [0.0f32; 2];
        let mut outputs = vec![RawOut::from_slice(&mut ch0)];
        let outcome = demux_into_outputs(&mut cons, &mut outputs, true);
        assert!(!outcome.underrun);
    }

    #[test]
    fn mux_copies_channel_minor_frame_major() {
        let (mut prod, mut cons) = new_ring(4, 8);
        let ch0 = [1.0f32, 3.0];
        let ch1 = [2.0f32, 4.0];
        let inputs = vec![RawIn::from_slice(&ch0), RawIn::from_slice(&ch1)];
        let outcome = mux_from_inputs(&mut prod, &inputs, false);
        assert_eq!(outcome.frames_moved, 2);
        assert!(!outcome.overrun);

        let mut out = [0u8; 16];
        cons.read(&mut out);
        let got: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes(b.try_into().unwrap()))
            .collect();
        assert_eq!(got, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn mux_overrun_when_ring_is_full() {
        let (mut prod, _cons) = new_ring(1, 4);
        // Capacity rounds up to 4 bytes = one f32; a 2-frame, 1-channel
        // write can only fit the first frame.
        let ch0 = [1.0f32, 2.0];
        let inputs = vec![RawIn::from_slice(&ch0)];
        let outcome = mux_from_inputs(&mut prod, &inputs, false);
        assert_eq!(outcome.frames_moved, 1);
        assert!(outcome.overrun);
    }
}
