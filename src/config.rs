//! Immutable engine configuration.
//!
//! `EngineConfig` is assembled once, in `cli.rs`/`driver.rs`, from parsed
//! command-line arguments plus a handful of values only the audio server can
//! supply (the effective sample rate, the default port lists). Nothing in
//! the engine mutates it afterward; it derives `Clone` only so `Driver` can
//! hand independent copies to `Reader`/`Writer` construction.

use std::path::PathBuf;

/// Default client name registered with the audio server.
pub const CLIENT_NAME: &str = "jackbridge";

pub const ABOUT: &str = concat!(
    "jackbridge v",
    env!("CARGO_PKG_VERSION"),
    ": play and/or record multichannel audio through a JACK server\n",
);

/// Default ring capacity, in frames, when `--buffer` is not given.
pub const BUFFER_SIZE_DEFAULT: usize = 65536 / 8;

/// Sentinel marker meaning "use the server's default physical ports",
/// resolved by `Driver::resolve_ports` once the client is open.
pub const PORTS_DEFAULT: &str = "__default";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub input_ports: Vec<String>,
    pub output_ports: Vec<String>,
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub duration_secs: f64,
    pub start_offset_secs: f64,
}

impl EngineConfig {
    /// True when `input_ports`/`output_ports` is still the unresolved
    /// `PORTS_DEFAULT` sentinel rather than a real list of port names.
    pub fn uses_default_inputs(&self) -> bool {
        self.input_ports.len() == 1 && self.input_ports[0] == PORTS_DEFAULT
    }

    pub fn uses_default_outputs(&self) -> bool {
        self.output_ports.len() == 1 && self.output_ports[0] == PORTS_DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> EngineConfig {
        EngineConfig {
            sample_rate: 48_000,
            buffer_size: BUFFER_SIZE_DEFAULT,
            input_ports: vec![PORTS_DEFAULT.to_string()],
            output_ports: vec![PORTS_DEFAULT.to_string()],
            input_file: None,
            output_file: None,
            duration_secs: 0.0,
            start_offset_secs: 0.0,
        }
    }

    #[test]
    fn detects_default_port_sentinel() {
        let cfg = base_config();
        assert!(cfg.uses_default_inputs());
        assert!(cfg.uses_default_outputs());
    }

    #[test]
    fn resolved_ports_are_not_default() {
        let mut cfg = base_config();
        cfg.input_ports = vec!["system:capture_1".to_string()];
        assert!(!cfg.uses_default_inputs());
    }
}
