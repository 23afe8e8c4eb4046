//! Light node: a lamp that obeys switch commands and announces its state.

use log::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::radio::{NodeAddress, Radio, BROADCAST_ADDRESS, MAX_PAYLOAD_SIZE};

use super::payload::{peek_tag, LampCommand, LightStatus, Toggle, TAG_TOGGLE};
use super::{describe, NodeError, RunState};

/// Joins an already keyed network, so its lifecycle has no commissioning
/// step. Every lamp state change is announced with a broadcast status frame.
pub struct LightNode<R> {
    radio: R,
    config: NodeConfig,
    state: RunState,
    lamp_on: bool,
    last_error: Option<NodeError>,
}

impl<R: Radio> LightNode<R> {
    pub fn new(radio: R, config: NodeConfig) -> Self {
        Self {
            radio,
            config,
            state: RunState::Init,
            lamp_on: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn last_error(&self) -> Option<&NodeError> {
        self.last_error.as_ref()
    }

    /// Current lamp state.
    pub fn is_on(&self) -> bool {
        self.lamp_on
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

    pub fn recover(&mut self) {
        if self.state != RunState::Error {
            return;
        }
        info!("Recovering light {:#06x}", self.config.node_id);
        self.last_error = None;
        self.set_state(RunState::Standby);
    }

    fn run_init(&mut self) {
        if let Err(e) = self.config.validate() {
            error!("Configuration rejected: {e}");
            self.fail(NodeError::Config(describe(&e)));
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
                    self.fail(NodeError::Receive(describe(&e)));
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
            Some(TAG_TOGGLE) if self.state == RunState::Operate => {
                self.handle_toggle(source, payload)
            }
            Some(tag) => debug!("Ignoring frame with tag {tag:#06x} from {source:#06x}"),
            None => debug!("Ignoring runt frame from {source:#06x}"),
        }
    }

    fn handle_toggle(&mut self, source: NodeAddress, payload: &[u8]) {
        let toggle = match Toggle::from_bytes(payload) {
            Ok(toggle) => toggle,
            Err(e) => {
                warn!("Malformed toggle from {source:#06x}: {e}");
                return;
            }
        };

        let next = match toggle.command {
            LampCommand::Off => false,
            LampCommand::On => true,
            LampCommand::Toggle => !self.lamp_on,
        };
        if next == self.lamp_on {
            debug!("Lamp already {}", if next { "on" } else { "off" });
            return;
        }

        self.lamp_on = next;
        info!(
            "Lamp switched {} by {source:#06x}",
            if next { "on" } else { "off" }
        );

        let status = LightStatus { on: next };
        if let Err(e) = self.radio.send(BROADCAST_ADDRESS, &status.to_bytes()) {
            error!("Failed to announce lamp state: {e:?}");
            self.fail(NodeError::Send(describe(&e)));
        }
    }

    fn fail(&mut self, error: NodeError) {
        error!(
            "Light {:#06x} entering error state: {error}",
            self.config.node_id
        );
        self.last_error = Some(error);
        self.set_state(RunState::Error);
    }

    fn set_state(&mut self, next: RunState) {
        if self.state != next {
            info!(
                "Light {:#06x} state: {:?} -> {:?}",
                self.config.node_id, self.state, next
            );
            self.state = next;
        }
    }
}
