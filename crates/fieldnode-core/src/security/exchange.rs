//! The two ends of the network key handshake.
//!
//! A [`Requester`] (joining node) opens with an ephemeral P-256 public key.
//! The [`Responder`] (sink) answers with its own ephemeral public key and
//! the network key encrypted under a wrap key both sides derive from the
//! shared ECDH secret via HKDF-SHA256. Every ephemeral secret lives for one
//! handshake only; completing or abandoning the exchange destroys it.
//!
//! The wrap is AES-128-CTR with a random IV. The exchange carries no
//! integrity check, so a corrupted frame decrypts to a wrong key and the
//! nodes simply fail to talk; the join is retried by the application.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use log::{debug, error};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh::EphemeralSecret, PublicKey};
use rand_core::CryptoRngCore;
use sha2::Sha256;
use thiserror_no_std::Error;

use super::message::{ExchangeMessage, ENCRYPTED_KEY_SIZE, IV_SIZE, PUBLIC_KEY_SIZE};
use super::{clear, NetworkKey};

/// Domain separation label for the HKDF expand step.
const WRAP_KEY_INFO: &[u8] = b"fieldnode network key wrap v1";

const WRAP_KEY_SIZE: usize = 16;

type WrapCipher = Ctr128BE<Aes128>;

/// Errors raised while driving the handshake.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    /// No exchange is running; either none was started or it already
    /// finished.
    #[error("no exchange in progress")]
    NotInProgress,
    /// The peer sent a frame that does not fit the current state.
    #[error("unexpected message for this state")]
    UnexpectedMessage,
    /// The peer's public key is not a valid curve point.
    #[error("invalid peer public key")]
    InvalidPeerKey,
    /// Wrap key derivation failed.
    #[error("key derivation failed")]
    Derivation,
}

/// Joining side of the handshake. Holds the ephemeral secret between the
/// request and the sink's answer.
pub struct Requester {
    secret: Option<EphemeralSecret>,
}

impl Requester {
    /// Open an exchange: generate an ephemeral key pair and the request
    /// frame announcing its public half.
    pub fn start(rng: &mut impl CryptoRngCore) -> (Self, ExchangeMessage) {
        let secret = EphemeralSecret::random(rng);
        let public_key = encode_public_key(secret.public_key());
        debug!("key exchange opened");
        (
            Self {
                secret: Some(secret),
            },
            ExchangeMessage::RequestKey { public_key },
        )
    }

    /// Unwrap the network key from the sink's answer.
    ///
    /// Consumes the ephemeral secret whether or not unwrapping succeeds, so
    /// a second call reports [`ExchangeError::NotInProgress`].
    pub fn complete(&mut self, message: &ExchangeMessage) -> Result<NetworkKey, ExchangeError> {
        let ExchangeMessage::SendKey {
            public_key,
            iv,
            encrypted_key,
        } = message
        else {
            error!("key exchange answer had the wrong frame type");
            return Err(ExchangeError::UnexpectedMessage);
        };

        let secret = self.secret.take().ok_or(ExchangeError::NotInProgress)?;
        let peer = PublicKey::from_sec1_bytes(public_key).map_err(|_| {
            error!("sink presented an invalid public key");
            ExchangeError::InvalidPeerKey
        })?;

        let mut wrap_key = derive_wrap_key(&secret, &peer)?;
        drop(secret);

        let mut key = *encrypted_key;
        apply_keystream(&wrap_key, iv, &mut key);
        clear(&mut wrap_key);

        debug!("key exchange completed");
        Ok(NetworkKey::from_bytes(key))
    }

    /// Whether a started exchange is still waiting for the answer.
    pub fn in_progress(&self) -> bool {
        self.secret.is_some()
    }
}

/// Sink side of the handshake. Stateless: each request is answered from
/// scratch with a fresh ephemeral key pair.
pub struct Responder;

impl Responder {
    /// Answer a key request by wrapping `network_key` for the requester.
    pub fn answer(
        rng: &mut impl CryptoRngCore,
        network_key: &NetworkKey,
        request: &ExchangeMessage,
    ) -> Result<ExchangeMessage, ExchangeError> {
        let ExchangeMessage::RequestKey { public_key } = request else {
            error!("key request had the wrong frame type");
            return Err(ExchangeError::UnexpectedMessage);
        };

        let peer = PublicKey::from_sec1_bytes(public_key).map_err(|_| {
            error!("requester presented an invalid public key");
            ExchangeError::InvalidPeerKey
        })?;

        let secret = EphemeralSecret::random(rng);
        let our_public = encode_public_key(secret.public_key());

        let mut wrap_key = derive_wrap_key(&secret, &peer)?;
        drop(secret);

        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);

        let mut encrypted_key = [0u8; ENCRYPTED_KEY_SIZE];
        encrypted_key.copy_from_slice(network_key.as_bytes());
        apply_keystream(&wrap_key, &iv, &mut encrypted_key);
        clear(&mut wrap_key);

        debug!("answered key request");
        Ok(ExchangeMessage::SendKey {
            public_key: our_public,
            iv,
            encrypted_key,
        })
    }
}

/// ECDH, then HKDF-SHA256 down to an AES-128 wrap key.
fn derive_wrap_key(
    secret: &EphemeralSecret,
    peer: &PublicKey,
) -> Result<[u8; WRAP_KEY_SIZE], ExchangeError> {
    let shared = secret.diffie_hellman(peer);
    let kdf = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());

    let mut wrap_key = [0u8; WRAP_KEY_SIZE];
    kdf.expand(WRAP_KEY_INFO, &mut wrap_key)
        .map_err(|_| ExchangeError::Derivation)?;
    Ok(wrap_key)
}

/// CTR keystream application; the same call encrypts and decrypts.
fn apply_keystream(key: &[u8; WRAP_KEY_SIZE], iv: &[u8; IV_SIZE], data: &mut [u8]) {
    let mut cipher = WrapCipher::new(key.into(), iv.into());
    cipher.apply_keystream(data);
}

/// SEC1 uncompressed encoding, 65 bytes.
fn encode_public_key(key: PublicKey) -> [u8; PUBLIC_KEY_SIZE] {
    let point = key.to_encoded_point(false);
    let mut bytes = [0u8; PUBLIC_KEY_SIZE];
    bytes.copy_from_slice(point.as_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::message::MAX_MESSAGE_SIZE;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    #[test]
    fn both_ends_agree_on_the_network_key() {
        let mut node_rng = rng(1);
        let mut sink_rng = rng(2);
        let network_key = NetworkKey::generate(&mut sink_rng);

        let (mut requester, request) = Requester::start(&mut node_rng);
        let answer = Responder::answer(&mut sink_rng, &network_key, &request).unwrap();
        let received = requester.complete(&answer).unwrap();

        assert_eq!(received, network_key);
        assert!(!requester.in_progress());
    }

    #[test]
    fn handshake_survives_the_wire_format() {
        let mut node_rng = rng(3);
        let mut sink_rng = rng(4);
        let network_key = NetworkKey::generate(&mut sink_rng);
        let mut wire = [0u8; MAX_MESSAGE_SIZE];

        let (mut requester, request) = Requester::start(&mut node_rng);
        let written = request.to_bytes(&mut wire).unwrap();
        let request = ExchangeMessage::from_bytes(&wire[..written]).unwrap();

        let answer = Responder::answer(&mut sink_rng, &network_key, &request).unwrap();
        let written = answer.to_bytes(&mut wire).unwrap();
        let answer = ExchangeMessage::from_bytes(&wire[..written]).unwrap();

        assert_eq!(requester.complete(&answer).unwrap(), network_key);
    }

    #[test]
    fn completing_twice_reports_no_exchange() {
        let mut node_rng = rng(5);
        let mut sink_rng = rng(6);
        let network_key = NetworkKey::generate(&mut sink_rng);

        let (mut requester, request) = Requester::start(&mut node_rng);
        let answer = Responder::answer(&mut sink_rng, &network_key, &request).unwrap();

        requester.complete(&answer).unwrap();
        assert_eq!(
            requester.complete(&answer),
            Err(ExchangeError::NotInProgress)
        );
    }

    #[test]
    fn wrong_frame_types_are_rejected_without_burning_the_secret() {
        let mut node_rng = rng(7);
        let (mut requester, request) = Requester::start(&mut node_rng);

        assert_eq!(
            requester.complete(&request),
            Err(ExchangeError::UnexpectedMessage)
        );
        // The exchange is still alive after the bogus frame.
        assert!(requester.in_progress());

        let mut sink_rng = rng(8);
        let network_key = NetworkKey::generate(&mut sink_rng);
        let answer = Responder::answer(&mut sink_rng, &network_key, &request).unwrap();
        assert_eq!(
            Responder::answer(&mut sink_rng, &network_key, &answer),
            Err(ExchangeError::UnexpectedMessage)
        );
    }

    #[test]
    fn invalid_curve_points_are_rejected() {
        let mut sink_rng = rng(9);
        let network_key = NetworkKey::generate(&mut sink_rng);
        let request = ExchangeMessage::RequestKey {
            public_key: [0xFF; PUBLIC_KEY_SIZE],
        };

        assert_eq!(
            Responder::answer(&mut sink_rng, &network_key, &request),
            Err(ExchangeError::InvalidPeerKey)
        );
    }

    #[test]
    fn tampered_ciphertext_yields_a_different_key() {
        // CTR carries no integrity check: flipped bits decrypt silently to
        // the wrong key.
        let mut node_rng = rng(10);
        let mut sink_rng = rng(11);
        let network_key = NetworkKey::generate(&mut sink_rng);

        let (mut requester, request) = Requester::start(&mut node_rng);
        let answer = Responder::answer(&mut sink_rng, &network_key, &request).unwrap();

        let tampered = match answer {
            ExchangeMessage::SendKey {
                public_key,
                iv,
                mut encrypted_key,
            } => {
                encrypted_key[0] ^= 0x01;
                ExchangeMessage::SendKey {
                    public_key,
                    iv,
                    encrypted_key,
                }
            }
            ExchangeMessage::RequestKey { .. } => unreachable!(),
        };

        let received = requester.complete(&tampered).unwrap();
        assert_ne!(received, network_key);
    }
}
