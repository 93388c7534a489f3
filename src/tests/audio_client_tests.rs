//! Exercises `driver::resolve_ports_with` against an in-memory fake, since
//! the real `AudioClient` needs a running JACK server to even open.

use std::cell::RefCell;

use crate::audio_client::{Direction, PortClient, PortKind};
use crate::config::{EngineConfig, BUFFER_SIZE_DEFAULT, PORTS_DEFAULT};
use crate::driver::resolve_ports_with;
use crate::error::EngineError;

#[derive(Default)]
struct FakePortClient {
    physical_in: Vec<String>,
    physical_out: Vec<String>,
    registered: RefCell<Vec<(String, Direction)>>,
    connections: RefCell<Vec<(String, String)>>,
}

impl PortClient for FakePortClient {
    fn client_name(&self) -> &str {
        "fake"
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn enumerate_ports(&self, kind: PortKind) -> Vec<String> {
        match kind {
            PortKind::PhysicalInput => self.physical_in.clone(),
            PortKind::PhysicalOutput => self.physical_out.clone(),
        }
    }

    fn register_port(&mut self, short_name: &str, direction: Direction) -> Result<String, EngineError> {
        self.registered
            .borrow_mut()
            .push((short_name.to_string(), direction));
        Ok(format!("fake:{short_name}"))
    }

    fn connect(&mut self, from: &str, to: &str) -> Result<(), EngineError> {
        self.connections
            .borrow_mut()
            .push((from.to_string(), to.to_string()));
        Ok(())
    }
}

fn default_config() -> EngineConfig {
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
fn resolves_default_inputs_from_server_enumeration() {
    let client = FakePortClient {
        physical_in: vec!["system:capture_1".into(), "system:capture_2".into()],
        physical_out: vec!["system:playback_1".into(), "system:playback_2".into()],
        ..Default::default()
    };
    let mut config = default_config();
    resolve_ports_with(&client, &mut config, None, None);
    assert_eq!(
        config.input_ports,
        vec!["system:capture_1".to_string(), "system:capture_2".to_string()]
    );
    assert_eq!(
        config.output_ports,
        vec!["system:playback_1".to_string(), "system:playback_2".to_string()]
    );
}

#[test]
fn input_channel_count_truncates_default_input_list() {
    let client = FakePortClient {
        physical_in: vec![
            "system:capture_1".into(),
            "system:capture_2".into(),
            "system:capture_3".into(),
            "system:capture_4".into(),
        ],
        ..Default::default()
    };
    let mut config = default_config();
    resolve_ports_with(&client, &mut config, Some(2), None);
    assert_eq!(
        config.input_ports,
        vec!["system:capture_1".to_string(), "system:capture_2".to_string()]
    );
}

#[test]
fn output_channel_count_truncates_default_output_list_to_playback_file_channels() {
    let client = FakePortClient {
        physical_out: vec![
            "system:playback_1".into(),
            "system:playback_2".into(),
            "system:playback_3".into(),
        ],
        ..Default::default()
    };
    let mut config = default_config();
    resolve_ports_with(&client, &mut config, None, Some(1));
    assert_eq!(config.output_ports, vec!["system:playback_1".to_string()]);
}

#[test]
fn explicit_port_lists_are_left_untouched() {
    let client = FakePortClient {
        physical_in: vec!["system:capture_1".into()],
        ..Default::default()
    };
    let mut config = default_config();
    config.input_ports = vec!["other:in_1".to_string()];
    resolve_ports_with(&client, &mut config, None, None);
    assert_eq!(config.input_ports, vec!["other:in_1".to_string()]);
}
