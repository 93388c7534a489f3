//! Handle to the audio server: port registration, connection, activation.
//!
//! Thin wrapper over `jack::Client`. Before activation the wrapper holds the
//! plain `Client` directly; `activate()` hands the caller's process handler
//! to `jack::Client::activate_async`, which consumes the `Client` and hands
//! back an `AsyncClient` that owns it for the session's duration. The
//! `ActivatedClient` trait type-erases over the concrete `ProcessHandler`
//! type so `AudioClient` itself doesn't need to be generic — `reactor.rs` is
//! the only module that names the concrete handler type.
//!
//! Control-thread operations (enumerate/register/connect) are additionally
//! exposed through the `PortClient` trait so `reactor.rs`'s port bookkeeping
//! can be exercised in tests against an in-memory fake, without a running
//! JACK server. The real, typed `jack::Port<AudioIn>`/`jack::Port<AudioOut>`
//! handles needed by the RT callback are obtained through `register_audio_in`/
//! `register_audio_out`, which sit outside that trait.

use log::{debug, info, warn};

use crate::error::EngineError;

/// Physical port categories a server exposes, from the client's point of
/// view: `PhysicalInput` is hardware capture (audio flowing *into* this
/// program), `PhysicalOutput` is hardware playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    PhysicalInput,
    PhysicalOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Control-thread port/connection operations. Never used from the RT
/// callback — `reactor.rs`'s `process()` talks to real `jack::Port` buffers
/// directly.
pub trait PortClient {
    fn client_name(&self) -> &str;
    fn sample_rate(&self) -> u32;
    fn enumerate_ports(&self, kind: PortKind) -> Vec<String>;
    fn register_port(&mut self, short_name: &str, direction: Direction) -> Result<String, EngineError>;
    fn connect(&mut self, from: &str, to: &str) -> Result<(), EngineError>;
}

/// Erases the concrete `P: jack::ProcessHandler` type stored inside a
/// `jack::AsyncClient<(), P>` so `AudioClient` can hold "some activated
/// client" without itself being generic over `P`.
trait ActivatedClient: Send {
    fn live_client(&self) -> &jack::Client;
    /// Deactivates, unregisters every port the handler owns, and hands back
    /// the underlying `jack::Client` for reuse (e.g. re-enumeration) or drop.
    fn deactivate_and_unregister(self: Box<Self>) -> jack::Client;
}

/// Implemented by the concrete process-handler struct in `reactor.rs` so
/// `ActivatedClient::deactivate_and_unregister` can hand ports back for
/// cleanup without `audio_client.rs` knowing their types.
pub trait PortOwner {
    fn unregister_all(self, client: &jack::Client);
}

impl<P> ActivatedClient for jack::AsyncClient<(), P>
where
    P: jack::ProcessHandler + PortOwner + Send + 'static,
{
    fn live_client(&self) -> &jack::Client {
        jack::AsyncClient::as_client(self)
    }

    fn deactivate_and_unregister(self: Box<Self>) -> jack::Client {
        match (*self).deactivate() {
            Ok((client, (), handler)) => {
                handler.unregister_all(&client);
                client
            }
            Err(e) => {
                // No JACK client left to operate on; this only happens if the
                // server itself died mid-session. Nothing further to clean up.
                warn!("failed deactivating client: {e}");
                panic!("audio server connection lost during deactivation: {e}");
            }
        }
    }
}

enum ClientState {
    Idle(jack::Client),
    Active(Box<dyn ActivatedClient>),
    /// Transient state used only inside methods that need to move the
    /// current state out and back in (e.g. during `activate`/`deactivate`).
    Moving,
}

pub struct AudioClient {
    state: ClientState,
    name: String,
    sample_rate: u32,
}

impl AudioClient {
    /// Opens a client named `name`. The server may rename it to keep client
    /// names unique; the effective name is read back and cached.
    pub fn open(name: &str) -> Result<Self, EngineError> {
        let (client, _status) = jack::Client::new(name, jack::ClientOptions::NO_START_SERVER)
            .map_err(|_| EngineError::ServerUnavailable)?;
        let effective_name = client.name().to_string();
        let sample_rate = client.sample_rate() as u32;
        info!(
            "connected to audio server as '{effective_name}' (sample rate {sample_rate} Hz)"
        );
        Ok(Self {
            state: ClientState::Idle(client),
            name: effective_name,
            sample_rate,
        })
    }

    fn live_client(&self) -> Option<&jack::Client> {
        match &self.state {
            ClientState::Idle(c) => Some(c),
            ClientState::Active(a) => Some(a.live_client()),
            ClientState::Moving => None,
        }
    }

    pub fn dump_ports(&self) {
        let playback = self.enumerate_ports(PortKind::PhysicalOutput);
        println!("{} Output (playback) channels:", playback.len());
        for (i, p) in playback.iter().enumerate() {
            println!("  {:2}: {}", i + 1, p);
        }
        let capture = self.enumerate_ports(PortKind::PhysicalInput);
        println!("{} Input (record) channels:", capture.len());
        for (i, p) in capture.iter().enumerate() {
            println!("  {:2}: {}", i + 1, p);
        }
    }

    /// Registers a client-side input audio port, returning its full name
    /// (`"<client>:<short_name>"`) and the typed `jack::Port` handle the RT
    /// callback reads buffers through.
    pub fn register_audio_in(
        &mut self,
        short_name: &str,
    ) -> Result<(String, jack::Port<jack::AudioIn>), EngineError> {
        let client = match &self.state {
            ClientState::Idle(c) => c,
            _ => {
                return Err(EngineError::PortRegistration {
                    name: short_name.to_string(),
                    reason: "client already activated".to_string(),
                })
            }
        };
        let port = client
            .register_port(short_name, jack::AudioIn::default())
            .map_err(|e| EngineError::PortRegistration {
                name: short_name.to_string(),
                reason: e.to_string(),
            })?;
        debug!("registered input port {}:{short_name}", self.name);
        Ok((format!("{}:{}", self.name, short_name), port))
    }

    pub fn register_audio_out(
        &mut self,
        short_name: &str,
    ) -> Result<(String, jack::Port<jack::AudioOut>), EngineError> {
        let client = match &self.state {
            ClientState::Idle(c) => c,
            _ => {
                return Err(EngineError::PortRegistration {
                    name: short_name.to_string(),
                    reason: "client already activated".to_string(),
                })
            }
        };
        let port = client
            .register_port(short_name, jack::AudioOut::default())
            .map_err(|e| EngineError::PortRegistration {
                name: short_name.to_string(),
                reason: e.to_string(),
            })?;
        debug!("registered output port {}:{short_name}", self.name);
        Ok((format!("{}:{}", self.name, short_name), port))
    }

    /// Installs `process_handler` as the RT callback and activates the
    /// client. `process_handler` must own every port it will touch in
    /// `process()` — ownership transfers into the audio server's thread for
    /// the client's active lifetime.
    pub fn activate<P>(&mut self, process_handler: P) -> Result<(), EngineError>
    where
        P: jack::ProcessHandler + PortOwner + Send + 'static,
    {
        let state = std::mem::replace(&mut self.state, ClientState::Moving);
        let client = match state {
            ClientState::Idle(c) => c,
            other => {
                self.state = other;
                return Err(EngineError::PortRegistration {
                    name: "<process callback>".to_string(),
                    reason: "client already activated".to_string(),
                });
            }
        };
        match client.activate_async((), process_handler) {
            Ok(async_client) => {
                self.state = ClientState::Active(Box::new(async_client));
                info!("audio client '{}' activated", self.name);
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Moving;
                Err(EngineError::PortRegistration {
                    name: "<process callback>".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Deactivates the client (no-op if not active), unregistering every
    /// port the process handler owned.
    pub fn deactivate(&mut self) {
        let state = std::mem::replace(&mut self.state, ClientState::Moving);
        self.state = match state {
            ClientState::Active(active) => ClientState::Idle(active.deactivate_and_unregister()),
            other => other,
        };
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ClientState::Active(_))
    }
}

impl PortClient for AudioClient {
    fn client_name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn enumerate_ports(&self, kind: PortKind) -> Vec<String> {
        let Some(client) = self.live_client() else {
            return Vec::new();
        };
        let flags = match kind {
            // Hardware capture ports present themselves as physical+output.
            PortKind::PhysicalInput => jack::PortFlags::IS_PHYSICAL | jack::PortFlags::IS_OUTPUT,
            PortKind::PhysicalOutput => jack::PortFlags::IS_PHYSICAL | jack::PortFlags::IS_INPUT,
        };
        client.ports(None, None, flags)
    }

    fn register_port(&mut self, short_name: &str, direction: Direction) -> Result<String, EngineError> {
        match direction {
            Direction::Input => self.register_audio_in(short_name).map(|(name, _)| name),
            Direction::Output => self.register_audio_out(short_name).map(|(name, _)| name),
        }
    }

    fn connect(&mut self, from: &str, to: &str) -> Result<(), EngineError> {
        let Some(client) = self.live_client() else {
            return Err(EngineError::Connect {
                from: from.to_string(),
                to: to.to_string(),
                reason: "client not open".to_string(),
            });
        };
        client
            .connect_ports_by_name(from, to)
            .map_err(|e| EngineError::Connect {
                from: from.to_string(),
                to: to.to_string(),
                reason: e.to_string(),
            })
    }
}
