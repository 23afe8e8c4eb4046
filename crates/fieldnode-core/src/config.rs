//! Node configuration: identity, network parameters and the provisioned
//! network key.
//!
//! Configuration is persisted with [`postcard`], which keeps the encoding
//! compact enough for a single flash page or EEPROM block. Anything loaded
//! from storage is validated before use; a corrupted block must never put a
//! node on the air with a broadcast address or an illegal channel.

use log::error;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::radio::{NodeAddress, BROADCAST_ADDRESS};
use crate::security::NetworkKey;

/// Upper bound on the encoded size; sized for one EEPROM block.
pub const STORAGE_SIZE: usize = 64;

/// 802.15.4 channel numbers in the 2.4 GHz band.
const CHANNEL_RANGE: core::ops::RangeInclusive<u8> = 11..=26;

/// Errors from validating or persisting a configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The node address collides with the broadcast address.
    #[error("node id {0:#06x} is reserved")]
    ReservedNodeId(NodeAddress),
    /// The channel is outside the 2.4 GHz band plan.
    #[error("channel {0} outside 11..=26")]
    InvalidChannel(u8),
    /// A zero report period would spin the node flat out.
    #[error("report period must be non-zero")]
    ZeroReportPeriod,
    /// Encoding failed, typically an undersized buffer.
    #[error("config encoding failed")]
    Encode,
    /// The stored bytes do not decode to a configuration.
    #[error("config decoding failed")]
    Decode,
}

/// Everything a node needs to know about itself and its network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's radio address.
    pub node_id: NodeAddress,
    /// Network identifier shared by all nodes of one deployment.
    pub pan_id: u16,
    /// 802.15.4 channel, 11..=26.
    pub channel: u8,
    /// Where outgoing traffic goes: sensor reports, key requests, switch
    /// commands.
    pub sink_address: NodeAddress,
    /// Milliseconds between sensor reports.
    pub report_period_ms: u32,
    /// Provisioned network key, [`None`] until commissioning completes.
    pub network_key: Option<NetworkKey>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0x0001,
            pan_id: 0x01FF,
            channel: 15,
            sink_address: 0x0000,
            report_period_ms: 1_000,
            network_key: None,
        }
    }
}

impl NodeConfig {
    /// Check the invariants a node relies on at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == BROADCAST_ADDRESS {
            return Err(ConfigError::ReservedNodeId(self.node_id));
        }
        if !CHANNEL_RANGE.contains(&self.channel) {
            return Err(ConfigError::InvalidChannel(self.channel));
        }
        if self.report_period_ms == 0 {
            return Err(ConfigError::ZeroReportPeriod);
        }
        Ok(())
    }

    /// Encode for persistent storage. Returns the number of bytes used.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, ConfigError> {
        let used = postcard::to_slice(self, buffer).map_err(|e| {
            error!("Failed to encode node config: {e:?}");
            ConfigError::Encode
        })?;
        Ok(used.len())
    }

    /// Decode and validate a stored configuration.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| {
            error!("Failed to decode node config: {e:?}");
            ConfigError::Decode
        })?;
        config.validate()?;
        Ok(config)
    }
}
