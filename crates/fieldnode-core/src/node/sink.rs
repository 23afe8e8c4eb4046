//! Sink node: hands the network key to requesting nodes and collects their
//! reports.

use heapless::LinearMap;
use log::{debug, error, info, warn};
use rand_core::CryptoRngCore;

use crate::config::NodeConfig;
use crate::radio::{NodeAddress, Radio, MAX_PAYLOAD_SIZE};
use crate::security::message::{ExchangeMessage, MAX_MESSAGE_SIZE, STATE_REQUEST_KEY};
use crate::security::Responder;

use super::payload::{peek_tag, Report, TAG_REPORT};
use super::{describe, NodeError, RunState};

/// How many distinct reporting nodes the sink tracks. Further nodes still
/// get provisioned, their reports are just not retained.
pub const MAX_TRACKED_NODES: usize = 8;

/// Latest report from one node, stamped with the sink's receive time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedReport {
    pub report: Report,
    pub received_at_ms: u64,
}

/// The data collector of a network. Holds the network key from the start
/// and answers key requests from any node, in any state past `Init`.
pub struct SinkNode<R, G> {
    radio: R,
    rng: G,
    config: NodeConfig,
    state: RunState,
    reports: LinearMap<NodeAddress, ReceivedReport, MAX_TRACKED_NODES>,
    last_error: Option<NodeError>,
}

impl<R, G> SinkNode<R, G>
where
    R: Radio,
    G: CryptoRngCore,
{
    /// A sink cannot come up without the key it is supposed to distribute.
    pub fn new(radio: R, rng: G, config: NodeConfig) -> Result<Self, NodeError> {
        if config.network_key.is_none() {
            return Err(NodeError::NotProvisioned);
        }
        Ok(Self {
            radio,
            rng,
            config,
            state: RunState::Init,
            reports: LinearMap::new(),
            last_error: None,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn last_error(&self) -> Option<&NodeError> {
        self.last_error.as_ref()
    }

    /// Latest report per node.
    pub fn reports(&self) -> &LinearMap<NodeAddress, ReceivedReport, MAX_TRACKED_NODES> {
        &self.reports
    }

    pub fn tick(&mut self, now_ms: u64) {
        if self.state != RunState::Init && self.state != RunState::Error {
            self.pump_radio(now_ms);
        }

        match self.state {
            RunState::Init => self.run_init(),
            // The sink owns the key, so there is nothing to wait for.
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
        info!("Recovering sink {:#06x}", self.config.node_id);
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

    fn pump_radio(&mut self, now_ms: u64) {
        let mut buffer = [0u8; MAX_PAYLOAD_SIZE];
        loop {
            match self.radio.poll_receive(&mut buffer) {
                Ok(Some(frame)) => {
                    self.handle_frame(now_ms, frame.source, &buffer[..frame.length])
                }
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

    fn handle_frame(&mut self, now_ms: u64, source: NodeAddress, payload: &[u8]) {
        match peek_tag(payload) {
            Some(STATE_REQUEST_KEY) => self.handle_key_request(source, payload),
            Some(TAG_REPORT) if self.state == RunState::Operate => {
                self.handle_report(now_ms, source, payload)
            }
            Some(tag) => debug!("Ignoring frame with tag {tag:#06x} from {source:#06x}"),
            None => debug!("Ignoring runt frame from {source:#06x}"),
        }
    }

    /// One bad requester must not take the sink down, so everything up to
    /// the radio send is log-and-drop.
    fn handle_key_request(&mut self, source: NodeAddress, payload: &[u8]) {
        let request = match ExchangeMessage::from_bytes(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed key request from {source:#06x}: {e}");
                return;
            }
        };
        let Some(network_key) = self.config.network_key.as_ref() else {
            // new() refuses keyless configs.
            return;
        };

        let answer = match Responder::answer(&mut self.rng, network_key, &request) {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Rejected key request from {source:#06x}: {e}");
                return;
            }
        };

        let mut frame = [0u8; MAX_MESSAGE_SIZE];
        let written = match answer.to_bytes(&mut frame) {
            Ok(written) => written,
            Err(e) => {
                self.fail(NodeError::Exchange(describe(&e)));
                return;
            }
        };
        match self.radio.send(source, &frame[..written]) {
            Ok(()) => info!("Provisioned node {source:#06x}"),
            Err(e) => {
                error!("Failed to send key to {source:#06x}: {e:?}");
                self.fail(NodeError::Send(describe(&e)));
            }
        }
    }

    fn handle_report(&mut self, now_ms: u64, source: NodeAddress, payload: &[u8]) {
        let report = match Report::from_bytes(payload) {
            Ok(report) => report,
            Err(e) => {
                warn!("Malformed report from {source:#06x}: {e}");
                return;
            }
        };
        info!(
            "Report from {source:#06x}: {} mdegC, {} m%RH",
            report.temperature_milli_celsius, report.humidity_milli_percent
        );
        let entry = ReceivedReport {
            report,
            received_at_ms: now_ms,
        };
        if self.reports.insert(source, entry).is_err() {
            warn!("Report table full, dropping report from {source:#06x}");
        }
    }

    fn fail(&mut self, error: NodeError) {
        error!(
            "Sink {:#06x} entering error state: {error}",
            self.config.node_id
        );
        self.last_error = Some(error);
        self.set_state(RunState::Error);
    }

    fn set_state(&mut self, next: RunState) {
        if self.state != next {
            info!(
                "Sink {:#06x} state: {:?} -> {:?}",
                self.config.node_id, self.state, next
            );
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SensorNode;
    use crate::radio::loopback::LinkPair;
    use crate::security::NetworkKey;
    use crate::sensors::{EnvironmentSample, EnvironmentSensor, SensorError};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    const DEMO_KEY: NetworkKey = NetworkKey::from_bytes([0xA5; NetworkKey::SIZE]);

    struct SteadySensor;

    impl EnvironmentSensor for SteadySensor {
        fn sample(&mut self) -> Result<EnvironmentSample, SensorError> {
            Ok(EnvironmentSample {
                temperature_milli_celsius: 21_500,
                humidity_milli_percent: 40_000,
            })
        }
    }

    fn sink_config() -> NodeConfig {
        NodeConfig {
            node_id: 0x0000,
            network_key: Some(DEMO_KEY),
            ..NodeConfig::default()
        }
    }

    fn sensor_config() -> NodeConfig {
        NodeConfig {
            node_id: 0x0042,
            ..NodeConfig::default()
        }
    }

    #[test]
    fn refuses_to_start_without_a_key() {
        let pair = LinkPair::new();
        let (radio, _peer) = pair.endpoints(0x0000, 0x0042);
        let config = NodeConfig {
            network_key: None,
            ..sink_config()
        };
        let result = SinkNode::new(radio, ChaCha20Rng::seed_from_u64(1), config);
        assert!(matches!(result, Err(NodeError::NotProvisioned)));
    }

    #[test]
    fn commissions_a_sensor_and_collects_its_reports() {
        let pair = LinkPair::new();
        let (sink_radio, node_radio) = pair.endpoints(0x0000, 0x0042);

        let mut sink = SinkNode::new(
            sink_radio,
            ChaCha20Rng::seed_from_u64(7),
            sink_config(),
        )
        .unwrap();
        let mut node = SensorNode::new(
            node_radio,
            SteadySensor,
            ChaCha20Rng::seed_from_u64(9),
            sensor_config(),
        );

        // Commissioning runs before the network is formed.
        for t in 0..5u64 {
            sink.tick(t);
            node.tick(t);
        }
        assert!(node.has_network_key());
        assert_eq!(node.config().network_key.as_ref(), Some(&DEMO_KEY));

        pair.set_up(true);
        for t in 5..8u64 {
            sink.tick(t);
            node.tick(t);
        }
        assert_eq!(sink.state(), RunState::Operate);
        assert_eq!(node.state(), RunState::Operate);

        // One report period later the sink holds the node's sample.
        for t in (100..1_300u64).step_by(100) {
            node.tick(t);
            sink.tick(t);
        }
        let entry = sink.reports().get(&0x0042).expect("report recorded");
        assert_eq!(entry.report.temperature_milli_celsius, 21_500);
        assert_eq!(entry.report.humidity_milli_percent, 40_000);

        // A later report replaces the earlier one.
        let first_stamp = entry.received_at_ms;
        for t in (1_300..2_300u64).step_by(100) {
            node.tick(t);
            sink.tick(t);
        }
        let entry = sink.reports().get(&0x0042).unwrap();
        assert!(entry.received_at_ms > first_stamp);
        assert_eq!(sink.reports().len(), 1);
    }

    #[test]
    fn malformed_key_requests_are_dropped_not_fatal() {
        let pair = LinkPair::new();
        let (sink_radio, mut peer) = pair.endpoints(0x0000, 0x0042);

        let mut sink = SinkNode::new(
            sink_radio,
            ChaCha20Rng::seed_from_u64(7),
            sink_config(),
        )
        .unwrap();
        sink.tick(0);
        sink.tick(1);

        // Correct tag, truncated body.
        let bytes = STATE_REQUEST_KEY.to_ne_bytes();
        peer.send(0x0000, &bytes).unwrap();
        sink.tick(2);

        assert_ne!(sink.state(), RunState::Error);
        let mut buffer = [0u8; MAX_PAYLOAD_SIZE];
        assert_eq!(peer.poll_receive(&mut buffer).unwrap(), None);
    }

    #[test]
    fn reports_before_operate_are_not_recorded() {
        let pair = LinkPair::new();
        let (sink_radio, mut peer) = pair.endpoints(0x0000, 0x0042);

        let mut sink = SinkNode::new(
            sink_radio,
            ChaCha20Rng::seed_from_u64(7),
            sink_config(),
        )
        .unwrap();
        sink.tick(0);
        sink.tick(1);
        assert_eq!(sink.state(), RunState::Network);

        let report = Report {
            temperature_milli_celsius: 1,
            humidity_milli_percent: 2,
        };
        peer.send(0x0000, &report.to_bytes()).unwrap();
        sink.tick(2);
        assert!(sink.reports().is_empty());

        // Once operating, the same report is recorded.
        pair.set_up(true);
        sink.tick(3);
        assert_eq!(sink.state(), RunState::Operate);
        peer.send(0x0000, &report.to_bytes()).unwrap();
        sink.tick(4);
        assert_eq!(sink.reports().len(), 1);
    }
}
