//! Sensor node: acquires the network key, then reports environment samples
//! to the sink on a fixed cadence.

use log::{debug, error, info, warn};
use rand_core::CryptoRngCore;

use crate::config::NodeConfig;
use crate::radio::{NodeAddress, Radio, MAX_PAYLOAD_SIZE};
use crate::security::message::{ExchangeMessage, MAX_MESSAGE_SIZE, STATE_SEND_KEY};
use crate::security::Requester;
use crate::sensors::EnvironmentSensor;

use super::payload::{peek_tag, Report};
use super::{describe, NodeError, RunState};

/// A reporting node built from a radio, an environment sensor and an
/// entropy source.
///
/// Commissioning is one-shot: in `Standby` an unprovisioned node sends a
/// single key request to the sink and waits. A lost request leaves the node
/// waiting in `Standby` until someone power-cycles or [`recover`]s it; it
/// never retries on its own.
///
/// [`recover`]: SensorNode::recover
pub struct SensorNode<R, S, G> {
    radio: R,
    sensor: S,
    rng: G,
    config: NodeConfig,
    state: RunState,
    exchange: Option<Requester>,
    key_requested: bool,
    next_report_at: Option<u64>,
    last_error: Option<NodeError>,
}

impl<R, S, G> SensorNode<R, S, G>
where
    R: Radio,
    S: EnvironmentSensor,
    G: CryptoRngCore,
{
    pub fn new(radio: R, sensor: S, rng: G, config: NodeConfig) -> Self {
        Self {
            radio,
            sensor,
            rng,
            config,
            state: RunState::Init,
            exchange: None,
            key_requested: false,
            next_report_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn last_error(&self) -> Option<&NodeError> {
        self.last_error.as_ref()
    }

    pub fn has_network_key(&self) -> bool {
        self.config.network_key.is_some()
    }

    /// Current configuration, including any key obtained since start-up.
    /// Callers persist this after commissioning succeeds.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Advance the node. `now_ms` is any monotonic millisecond clock.
    pub fn tick(&mut self, now_ms: u64) {
        if self.state != RunState::Init && self.state != RunState::Error {
            self.pump_radio();
        }

        match self.state {
            RunState::Init => self.run_init(),
            RunState::Standby => self.run_standby(),
            RunState::Network => self.run_network(now_ms),
            RunState::Operate => self.run_operate(now_ms),
            RunState::Error => {}
        }
    }

    /// Leave the error state and restart commissioning.
    pub fn recover(&mut self) {
        if self.state != RunState::Error {
            return;
        }
        info!("Recovering node {:#06x}", self.config.node_id);
        self.last_error = None;
        self.exchange = None;
        self.key_requested = false;
        self.next_report_at = None;
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

    fn run_standby(&mut self) {
        if self.config.network_key.is_some() {
            self.set_state(RunState::Network);
            return;
        }
        if self.key_requested {
            // One request per commissioning attempt; keep waiting.
            return;
        }

        let (requester, request) = Requester::start(&mut self.rng);
        let mut frame = [0u8; MAX_MESSAGE_SIZE];
        let written = match request.to_bytes(&mut frame) {
            Ok(written) => written,
            Err(e) => {
                self.fail(NodeError::Exchange(describe(&e)));
                return;
            }
        };

        self.key_requested = true;
        match self.radio.send(self.config.sink_address, &frame[..written]) {
            Ok(()) => {
                self.exchange = Some(requester);
                info!(
                    "Requested network key from sink {:#06x}",
                    self.config.sink_address
                );
            }
            Err(e) => {
                error!("Failed to send key request: {e:?}");
                self.fail(NodeError::Send(describe(&e)));
            }
        }
    }

    fn run_network(&mut self, now_ms: u64) {
        if self.radio.is_up() {
            // First report one full period after joining.
            self.next_report_at = Some(now_ms + u64::from(self.config.report_period_ms));
            self.set_state(RunState::Operate);
        }
    }

    fn run_operate(&mut self, now_ms: u64) {
        let Some(due) = self.next_report_at else {
            return;
        };
        if now_ms < due {
            return;
        }
        let period = u64::from(self.config.report_period_ms);
        let mut next = due + period;
        if next <= now_ms {
            next = now_ms + period;
        }
        self.next_report_at = Some(next);

        // A failed sample costs one report, nothing more.
        let sample = match self.sensor.sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Skipping report, sampling failed: {e}");
                return;
            }
        };

        let report = Report {
            temperature_milli_celsius: sample.temperature_milli_celsius,
            humidity_milli_percent: sample.humidity_milli_percent,
        };
        match self.radio.send(self.config.sink_address, &report.to_bytes()) {
            Ok(()) => debug!(
                "Report sent: {} mdegC, {} m%RH",
                report.temperature_milli_celsius, report.humidity_milli_percent
            ),
            Err(e) => {
                error!("Failed to send report: {e:?}");
                self.fail(NodeError::Send(describe(&e)));
            }
        }
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
            Some(STATE_SEND_KEY) => self.handle_key_delivery(payload),
            Some(tag) => debug!("Ignoring frame with tag {tag:#06x} from {source:#06x}"),
            None => debug!("Ignoring runt frame from {source:#06x}"),
        }
    }

    fn handle_key_delivery(&mut self, payload: &[u8]) {
        let Some(mut exchange) = self.exchange.take() else {
            warn!("Unsolicited key delivery ignored");
            return;
        };

        let message = match ExchangeMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("Malformed key delivery: {e}");
                self.fail(NodeError::Exchange(describe(&e)));
                return;
            }
        };

        match exchange.complete(&message) {
            Ok(key) => {
                info!("Network key provisioned");
                self.config.network_key = Some(key);
            }
            Err(e) => {
                error!("Key exchange failed: {e}");
                self.fail(NodeError::Exchange(describe(&e)));
            }
        }
    }

    fn fail(&mut self, error: NodeError) {
        error!(
            "Node {:#06x} entering error state: {error}",
            self.config.node_id
        );
        self.last_error = Some(error);
        self.set_state(RunState::Error);
    }

    fn set_state(&mut self, next: RunState) {
        if self.state != next {
            info!(
                "Node {:#06x} state: {:?} -> {:?}",
                self.config.node_id, self.state, next
            );
            self.state = next;
        }
    }
}
