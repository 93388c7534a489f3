//! `clap`-derived argument parsing, producing an [`EngineConfig`].
//!
//! Field-for-field mirror of `spec.md` §6's CLI table; validation rules
//! (a)-(d) are checked in [`Cli::validate`]. Per `spec.md` §6, "acceptance
//! is by effect, not flag spelling" — the short/long names below follow the
//! original (`examples/original_source/src/cli.cpp`) where convenient but
//! are not a contract callers should depend on exactly.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ABOUT, BUFFER_SIZE_DEFAULT, PORTS_DEFAULT};
use crate::error::EngineError;

#[derive(Parser, Debug)]
#[command(name = "jackbridge", about = ABOUT, disable_version_flag = true)]
pub struct Cli {
    /// Print version and copyright info & exit.
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Print available server channels & exit.
    #[arg(short = 'c', long = "channels")]
    pub show_ports: bool,

    /// Raise log level to debug.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Ring size, in frames.
    #[arg(short = 'b', long = "buffer", default_value_t = BUFFER_SIZE_DEFAULT)]
    pub buffer_size: usize,

    /// Comma-separated (or repeated) input (capture-side) server ports.
    #[arg(short = 'i', long = "in", value_delimiter = ',')]
    pub input_ports: Vec<String>,

    /// Truncates the default input port list; mutually exclusive with `--in`.
    #[arg(short = 'I', long = "input-channel-count")]
    pub input_channel_count: Option<usize>,

    /// Comma-separated (or repeated) output (playback-side) server ports.
    #[arg(short = 'o', long = "out", value_delimiter = ',')]
    pub output_ports: Vec<String>,

    /// Seconds; 0 = unbounded capture / file length for playback.
    #[arg(short = 'D', long = "duration", default_value_t = 0.0)]
    pub duration_secs: f64,

    /// Seconds into the playback file to start at.
    #[arg(short = 's', long = "start", default_value_t = 0.0)]
    pub start_offset_secs: f64,

    /// Playback file, in any format the sound-file backend supports.
    #[arg(short = 'r', long = "read-file")]
    pub input_file: Option<PathBuf>,

    /// Record file; always written as WAV PCM32.
    #[arg(short = 'w', long = "write-file")]
    pub output_file: Option<PathBuf>,
}

impl Cli {
    /// Validation rules (a)-(d) from `spec.md` §6. `--channels`/`--version`
    /// short-circuit validation entirely: they print and exit before any
    /// file or port handling happens.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.show_ports || self.version {
            return Ok(());
        }
        if self.input_file.is_none() && self.output_file.is_none() {
            return Err(EngineError::InvalidArgs(
                "no playback or record file specified, nothing to do".to_string(),
            ));
        }
        if self.output_file.is_some() && self.input_file.is_none() && self.duration_secs == 0.0 {
            return Err(EngineError::InvalidArgs(
                "recording without a playback file requires an explicit --duration".to_string(),
            ));
        }
        if self.input_channel_count.is_some() && !self.input_ports.is_empty() {
            return Err(EngineError::InvalidArgs(
                "--input-channel-count and --in cannot be set at the same time".to_string(),
            ));
        }
        if self.duration_secs < 0.0 {
            return Err(EngineError::InvalidArgs(
                "duration must not be negative".to_string(),
            ));
        }
        if self.start_offset_secs < 0.0 {
            return Err(EngineError::InvalidArgs(
                "start offset must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Input/output port lists with the `PORTS_DEFAULT` sentinel substituted
    /// for an empty CLI list, resolved later by `Driver::resolve_ports`.
    pub fn input_ports_or_default(&self) -> Vec<String> {
        if self.input_ports.is_empty() {
            vec![PORTS_DEFAULT.to_string()]
        } else {
            self.input_ports.clone()
        }
    }

    pub fn output_ports_or_default(&self) -> Vec<String> {
        if self.output_ports.is_empty() {
            vec![PORTS_DEFAULT.to_string()]
        } else {
            self.output_ports.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Cli {
        Cli {
            version: false,
            show_ports: false,
            debug: false,
            buffer_size: BUFFER_SIZE_DEFAULT,
            input_ports: vec![],
            input_channel_count: None,
            output_ports: vec![],
            duration_secs: 0.0,
            start_offset_secs: 0.0,
            input_file: None,
            output_file: None,
        }
    }

    #[test]
    fn rejects_no_files() {
        let cli = base();
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_recording_without_duration_or_playback() {
        let mut cli = base();
        cli.output_file = Some("out.wav".into());
        assert!(cli.validate().is_err());
    }

    #[test]
    fn accepts_recording_with_explicit_duration() {
        let mut cli = base();
        cli.output_file = Some("out.wav".into());
        cli.duration_secs = 5.0;
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn rejects_input_channel_count_with_in() {
        let mut cli = base();
        cli.input_file = Some("in.wav".into());
        cli.input_channel_count = Some(2);
        cli.input_ports = vec!["system:capture_1".to_string()];
        assert!(cli.validate().is_err());
    }

    #[test]
    fn rejects_negative_duration_and_start() {
        let mut cli = base();
        cli.input_file = Some("in.wav".into());
        cli.duration_secs = -1.0;
        assert!(cli.validate().is_err());

        let mut cli = base();
        cli.input_file = Some("in.wav".into());
        cli.start_offset_secs = -1.0;
        assert!(cli.validate().is_err());
    }

    #[test]
    fn show_ports_bypasses_validation() {
        let mut cli = base();
        cli.show_ports = true;
        assert!(cli.validate().is_ok());
    }
}
