//! Wires the pieces together: open the audio client, resolve port lists,
//! construct `Reader`/`Writer`, build the `Reactor`, and run the session to
//! completion. Mirrors the nine-step sequence in
//! `examples/original_source/src/main.cpp`'s `main()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::audio_client::{AudioClient, PortClient, PortKind};
use crate::config::{EngineConfig, CLIENT_NAME};
use crate::error::EngineError;
use crate::reactor::{CancelHandle, Reactor, ReactorTotals};
use crate::sound_file::query_channels;
use crate::worker::{Reader, Writer};

/// Port-resolution logic factored out of [`Driver::resolve_ports`] so it can
/// be exercised against a `FakePortClient` in tests without a running
/// server. `input_channel_count` truncates a default *input* (capture) list
/// and comes only from `--input-channel-count`; `output_channel_count`
/// truncates a default *output* (playback) list and comes from the playback
/// file's own channel count (`spec.md` §4.8 step 3) — the two are unrelated
/// truncations over unrelated port lists, despite the similar names.
pub fn resolve_ports_with<C: PortClient>(
    client: &C,
    config: &mut EngineConfig,
    input_channel_count: Option<usize>,
    output_channel_count: Option<usize>,
) {
    if config.uses_default_inputs() {
        let mut ports = client.enumerate_ports(PortKind::PhysicalInput);
        if let Some(n) = input_channel_count {
            ports.truncate(n);
        }
        config.input_ports = ports;
    }
    if config.uses_default_outputs() {
        let mut ports = client.enumerate_ports(PortKind::PhysicalOutput);
        if let Some(n) = output_channel_count {
            ports.truncate(n);
        }
        config.output_ports = ports;
    }
}

/// Process-wide request to end the current session early. Set from a
/// `libc::signal` handler (installed by [`install_signal_handlers`]); polled
/// by the monitor thread `Driver::run` spawns for the session's duration.
/// A plain `AtomicBool` rather than a real signal-safe mechanism, matching
/// `spec.md` §9's "the design does not depend on the exact mechanism" note
/// for the analogous Reactor-singleton flag.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Installs handlers for SIGINT/SIGTERM/SIGHUP that flip `SHUTDOWN_REQUESTED`.
/// Call once, before `Driver::run`.
pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGHUP, request_shutdown as libc::sighandler_t);
    }
}

/// Drives one playback/record session end to end. Not reusable: a fresh
/// `Driver` (and `AudioClient`) is needed per invocation, matching the
/// single-shot nature of the CLI tool.
pub struct Driver {
    client: AudioClient,
}

impl Driver {
    pub fn open() -> Result<Self, EngineError> {
        let client = AudioClient::open(CLIENT_NAME)?;
        Ok(Self { client })
    }

    pub fn dump_ports(&self) {
        self.client.dump_ports();
    }

    /// Substitutes the server's default physical port names for the
    /// `PORTS_DEFAULT` sentinel. Default inputs are truncated to
    /// `--input-channel-count` when given; default outputs are truncated to
    /// the playback file's channel count when one is present. Leaves
    /// explicit `--in`/`--out` lists untouched.
    pub fn resolve_ports(
        &self,
        config: &mut EngineConfig,
        input_channel_count: Option<usize>,
        output_channel_count: Option<usize>,
    ) {
        resolve_ports_with(&self.client, config, input_channel_count, output_channel_count);
    }

    pub fn sample_rate(&self) -> u32 {
        self.client.sample_rate()
    }

    /// Runs one session to completion per `spec.md` §4.8:
    /// 1. (config already resolved by the caller via `resolve_ports`)
    /// 2. open `Reader` if `input_file` is set
    /// 3. open `Writer` if `output_file` is set
    /// 4. build the `Reactor`, wiring ports and activating the client
    /// 5. block until the session signals completion
    /// 6. stop both workers and surface their own captured errors
    /// 7. report totals
    pub fn run(mut self, config: &EngineConfig) -> Result<SessionReport, EngineError> {
        let (reader, reader_ring) = match &config.input_file {
            Some(path) => {
                let (reader, ring) = Reader::new(
                    path,
                    config.sample_rate,
                    config.output_ports.len(),
                    config.buffer_size,
                    config.duration_secs,
                    config.start_offset_secs,
                )?;
                (Some(Arc::new(reader)), Some(ring))
            }
            None => (None, None),
        };

        let (writer, writer_ring) = match &config.output_file {
            Some(path) => {
                let (writer, ring) = Writer::new(
                    path,
                    config.sample_rate,
                    config.input_ports.len(),
                    config.buffer_size,
                    config.duration_secs,
                )?;
                (Some(Arc::new(writer)), Some(ring))
            }
            None => (None, None),
        };

        info!(
            "starting session: {} input port(s), {} output port(s)",
            config.input_ports.len(),
            config.output_ports.len()
        );

        let reactor = Reactor::new(
            &mut self.client,
            config,
            reader.as_ref().map(Arc::clone),
            reader_ring,
            writer.as_ref().map(Arc::clone),
            writer_ring,
        )?;

        let monitor_stop = Arc::new(AtomicBool::new(false));
        let monitor = spawn_shutdown_monitor(
            Arc::clone(&monitor_stop),
            reactor.cancel_handle(),
            reader.as_ref().map(Arc::clone),
            writer.as_ref().map(Arc::clone),
        );

        let run_result = reactor.wait_finished();
        monitor_stop.store(true, Ordering::Release);
        let _ = monitor.join();

        let reader_result = reader.as_ref().map(|r| r.stop()).transpose();
        let writer_result = writer.as_ref().map(|w| w.stop()).transpose();

        let totals = run_result.map_err(|e| match Arc::try_unwrap(e) {
            Ok(e) => e,
            Err(e) => EngineError::InvalidArgs(e.to_string()),
        })?;
        reader_result?;
        writer_result?;

        Ok(SessionReport {
            totals,
            reader_frames: reader.as_ref().map(|r| r.frames_done()),
            writer_frames: writer.as_ref().map(|w| w.frames_done()),
        })
    }
}

/// Polls `SHUTDOWN_REQUESTED` for the session's duration; on a signal (or
/// `stop_flag` being set by a clean completion, so the thread doesn't
/// outlive `wait_finished`) it stops the workers and fires `cancel_handle`
/// so the control thread's wait returns even with an unbounded Writer and
/// no Reader (`spec.md` §5: "the only stop is external").
fn spawn_shutdown_monitor(
    stop_flag: Arc<AtomicBool>,
    cancel_handle: CancelHandle,
    reader: Option<Arc<Reader>>,
    writer: Option<Arc<Writer>>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("jackbridge-signals".into())
        .spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                if SHUTDOWN_REQUESTED.load(Ordering::Acquire) {
                    debug!("shutdown requested, stopping session");
                    if let Some(r) = &reader {
                        r.stop().ok();
                    }
                    if let Some(w) = &writer {
                        w.stop().ok();
                    }
                    cancel_handle.cancel();
                    return;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        })
        .expect("failed spawning signal monitor thread")
}

/// Looks up an input file's channel count without opening a full `Reader`,
/// used by `main.rs` to size the default port list before any `Reader`
/// exists (`spec.md` §6: "channel count, when not given explicitly, is
/// taken from the playback file").
pub fn infer_channel_count(config: &EngineConfig) -> Result<Option<usize>, EngineError> {
    match &config.input_file {
        Some(path) => Ok(Some(query_channels(path)?)),
        None => Ok(None),
    }
}

pub struct SessionReport {
    pub totals: ReactorTotals,
    pub reader_frames: Option<u64>,
    pub writer_frames: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_channel_count_is_none_without_input_file() {
        let config = EngineConfig {
            sample_rate: 48_000,
            buffer_size: crate::config::BUFFER_SIZE_DEFAULT,
            input_ports: vec!["system:capture_1".to_string()],
            output_ports: vec!["system:playback_1".to_string()],
            input_file: None,
            output_file: None,
            duration_secs: 0.0,
            start_offset_secs: 0.0,
        };
        assert_eq!(infer_channel_count(&config).unwrap(), None);
    }
}
