//! Network key provisioning between two radio nodes.
//!
//! A node joining the network holds no secrets. It runs an ephemeral ECDH
//! key agreement with the sink over the open radio channel, and the sink
//! sends the symmetric network key back encrypted under the agreed wrap key.
//! [`message`] defines the two wire frames involved; [`exchange`] drives the
//! handshake on both ends.

pub mod exchange;
pub mod message;

pub use exchange::{ExchangeError, Requester, Responder};
pub use message::{ExchangeMessage, MessageError};

use core::fmt;

use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};

/// 128-bit symmetric key shared by every node on a network.
///
/// The key material is wiped when the value drops. Debug output is redacted
/// so a key never leaks through logging.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkKey([u8; NetworkKey::SIZE]);

impl NetworkKey {
    pub const SIZE: usize = 16;

    pub const fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh random key. Run once when a network is first formed.
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::SIZE] {
        &self.0
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

impl Drop for NetworkKey {
    fn drop(&mut self) {
        clear(&mut self.0);
    }
}

/// Zero a buffer of key material. The fence keeps the stores from being
/// elided as dead writes.
pub(crate) fn clear(bytes: &mut [u8]) {
    bytes.fill(0);
    core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
}
