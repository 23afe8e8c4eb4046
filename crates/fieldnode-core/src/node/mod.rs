//! Demo node state machines.
//!
//! Every node walks the same lifecycle: `Init` (self checks) to `Standby`
//! (commissioning) to `Network` (waiting for the network to form) to
//! `Operate` (application traffic). Any unrecoverable failure parks the node
//! in `Error` with the cause retained; [`recover`] is the only way out and
//! restarts commissioning from `Standby`.
//!
//! Nodes are polled: the owner calls `tick` with a monotonic millisecond
//! clock and the node advances as far as it can without blocking.
//!
//! [`recover`]: SensorNode::recover

pub mod light;
pub mod payload;
pub mod sensor;
pub mod sink;
pub mod switch;

pub use light::LightNode;
pub use payload::{LampCommand, LightStatus, Report, Toggle};
pub use sensor::SensorNode;
pub use sink::{ReceivedReport, SinkNode};
pub use switch::SwitchNode;

use thiserror_no_std::Error;

/// Lifecycle state shared by all demo nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Powering up, configuration not yet checked.
    #[default]
    Init,
    /// Checked and idle; commissioning runs here.
    Standby,
    /// Commissioned, waiting for the network to form.
    Network,
    /// On the air and doing application work.
    Operate,
    /// Parked after a failure. See the node's `last_error`.
    Error,
}

/// Failures that park a node in [`RunState::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A frame could not be handed to the radio.
    #[error("radio send failed: {0}")]
    Send(heapless::String<64>),
    /// The radio failed while polling for frames.
    #[error("radio receive failed: {0}")]
    Receive(heapless::String<64>),
    /// The key exchange could not complete.
    #[error("key exchange failed: {0}")]
    Exchange(heapless::String<64>),
    /// The configuration lacks a network key the role requires.
    #[error("not provisioned with a network key")]
    NotProvisioned,
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(heapless::String<64>),
    /// The requested action needs [`RunState::Operate`].
    #[error("node is not operational")]
    NotOperational,
}

/// Render a diagnostic into the bounded detail string carried by
/// [`NodeError`]. Output past the capacity is dropped.
pub(crate) fn describe<E: core::fmt::Debug>(error: &E) -> heapless::String<64> {
    let mut text = heapless::String::new();
    let _ = core::fmt::write(&mut text, format_args!("{error:?}"));
    text
}
