//! Switch node: a button that toggles a remote lamp and mirrors its state.

use log::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::radio::{NodeAddress, Radio, MAX_PAYLOAD_SIZE};

use super::payload::{peek_tag, LampCommand, LightStatus, Toggle, TAG_LIGHT_STATUS};
use super::{describe, NodeError, RunState};

/// The lamp address comes from [`NodeConfig::sink_address`]; in a
/// switch/light pairing that field names the peer being controlled.
pub struct SwitchNode<R> {
    radio: R,
    config: NodeConfig,
    state: RunState,
    last_status: Option<bool>,
    last_error: Option<NodeError>,
}

impl<R: Radio> SwitchNode<R> {
    pub fn new(radio: R, config: NodeConfig) -> Self {
        Self {
            radio,
            config,
            state: RunState::Init,
            last_status: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn last_error(&self) -> Option<&NodeError> {
        self.last_error.as_ref()
    }

    /// Last lamp state heard over the air, if any.
    pub fn light_status(&self) -> Option<bool> {
        self.last_status
    }

    pub fn tick(&mut self) {
        if self.state != RunState::Init && self.state != RunState::Error {
            self.pump_radio();
        }

        match self.state {
            RunState::Init => self.run_init(),
            RunState::Standby => self.set_state(RunState::Network),
            RunState::Network => {
                if self.radio.is_up() {
                    self.set_state(RunState::Operate);
                }
            }
            RunState::Operate | RunState::Error => {}
        }
    }

    /// Send one toggle command to the configured lamp. Pressing before the
    /// node operates is refused without changing state.
    pub fn press_button(&mut self) -> Result<(), NodeError> {
        if self.state != RunState::Operate {
            debug!("Button press ignored in {:?}", self.state);
            return Err(NodeError::NotOperational);
        }

        let toggle = Toggle {
            command: LampCommand::Toggle,
        };
        match self.radio.send(self.config.sink_address, &toggle.to_bytes()) {
            Ok(()) => {
                info!("Toggle sent to {:#06x}", self.config.sink_address);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send toggle: {e:?}");
                let error = NodeError::Send(describe(&e));
                self.last_error = Some(error.clone());
                self.set_state(RunState::Error);
                Err(error)
            }
        }
    }

    pub fn recover(&mut self) {
        if self.state != RunState::Error {
            return;
        }
        info!("Recovering switch {:#06x}", self.config.node_id);
        self.last_error = None;
        self.set_state(RunState::Standby);
    }

    fn run_init(&mut self) {
        if let Err(e) = self.config.validate() {
            error!("Configuration rejected: {e}");
            self.last_error = Some(NodeError::Config(describe(&e)));
            self.set_state(RunState::Error);
            return;
        }
        self.set_state(RunState::Standby);
    }

    fn pump_radio(&mut self) {
        let mut buffer = [0u8; MAX_PAYLOAD_SIZE];
        loop {
            match self.radio.poll_receive(&mut buffer) {
                Ok(Some(frame)) => self.handle_frame(frame.source, &buffer[..frame.length]),
                Ok(None) => break,
                Err(e) => {
                    error!("Radio receive failed: {e:?}");
                    self.last_error = Some(NodeError::Receive(describe(&e)));
                    self.set_state(RunState::Error);
                    break;
                }
            }
            if self.state == RunState::Error {
                break;
            }
        }
    }

    fn handle_frame(&mut self, source: NodeAddress, payload: &[u8]) {
        match peek_tag(payload) {
            Some(TAG_LIGHT_STATUS) => {
                let status = match LightStatus::from_bytes(payload) {
                    Ok(status) => status,
                    Err(e) => {
                        warn!("Malformed light status from {source:#06x}: {e}");
                        return;
                    }
                };
                info!(
                    "Light {source:#06x} is {}",
                    if status.on { "on" } else { "off" }
                );
                self.last_status = Some(status.on);
            }
            Some(tag) => debug!("Ignoring frame with tag {tag:#06x} from {source:#06x}"),
            None => debug!("Ignoring runt frame from {source:#06x}"),
        }
    }

    fn set_state(&mut self, next: RunState) {
        if self.state != next {
            info!(
                "Switch {:#06x} state: {:?} -> {:?}",
                self.config.node_id, self.state, next
            );
            self.state = next;
        }
    }
}
