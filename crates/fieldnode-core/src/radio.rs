//! Radio link abstraction for node-to-node frames.
//!
//! Nodes talk through the [`Radio`] trait: fire-and-forget datagrams with a
//! 16-bit address, polled reception, no acknowledgements and no retries. A
//! real transport implements it over an 802.15.4-class PHY; [`loopback`]
//! implements it over in-process queues for the simulator and tests.

use crate::security::message::MAX_MESSAGE_SIZE;

/// Node address on the local network.
pub type NodeAddress = u16;

/// Frames to this address reach every listening node.
pub const BROADCAST_ADDRESS: NodeAddress = 0xFFFF;

/// Largest payload a single frame carries.
pub const MAX_PAYLOAD_SIZE: usize = 125;

// Key exchange frames must fit a single radio frame.
const _: () = assert!(MAX_MESSAGE_SIZE <= MAX_PAYLOAD_SIZE);

/// Metadata of one received frame. The payload lands in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub source: NodeAddress,
    pub length: usize,
}

/// A connectionless datagram radio.
pub trait Radio {
    type Error: core::fmt::Debug;

    /// This node's own address.
    fn address(&self) -> NodeAddress;

    /// Whether the network is formed and this node has joined it. Frames
    /// may still flow during commissioning while this reports `false`.
    fn is_up(&self) -> bool;

    /// Queue one frame for `destination`. No delivery confirmation.
    fn send(&mut self, destination: NodeAddress, payload: &[u8]) -> Result<(), Self::Error>;

    /// Take the next pending frame, if any, copying its payload into
    /// `buffer`.
    fn poll_receive(&mut self, buffer: &mut [u8]) -> Result<Option<ReceivedFrame>, Self::Error>;
}

/// An in-process two-node link.
pub mod loopback {
    use core::cell::{Cell, RefCell};

    use heapless::Deque;
    use thiserror_no_std::Error;

    use super::{NodeAddress, Radio, ReceivedFrame, BROADCAST_ADDRESS, MAX_PAYLOAD_SIZE};

    /// Frames buffered per direction before sends start failing.
    const QUEUE_DEPTH: usize = 8;

    /// Errors the loopback link can raise.
    #[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LoopbackError {
        /// The payload exceeds [`MAX_PAYLOAD_SIZE`].
        #[error("payload too large ({0} bytes)")]
        PayloadTooLarge(usize),
        /// The receiving queue is full; the frame was not delivered.
        #[error("receive queue full")]
        QueueFull,
        /// The caller's receive buffer cannot hold the pending frame.
        #[error("receive buffer too small (frame is {0} bytes)")]
        BufferTooSmall(usize),
    }

    #[derive(Debug, Clone)]
    struct Frame {
        source: NodeAddress,
        payload: heapless::Vec<u8, MAX_PAYLOAD_SIZE>,
    }

    /// The shared medium between two [`LoopbackRadio`] endpoints.
    ///
    /// Single-threaded by construction; endpoints borrow the pair and hand
    /// frames over through interior mutability.
    pub struct LinkPair {
        inboxes: [RefCell<Deque<Frame, QUEUE_DEPTH>>; 2],
        up: Cell<bool>,
    }

    impl LinkPair {
        /// A link that is not yet up.
        pub const fn new() -> Self {
            Self {
                inboxes: [RefCell::new(Deque::new()), RefCell::new(Deque::new())],
                up: Cell::new(false),
            }
        }

        /// The two endpoints of this link.
        pub fn endpoints(
            &self,
            first: NodeAddress,
            second: NodeAddress,
        ) -> (LoopbackRadio<'_>, LoopbackRadio<'_>) {
            (
                LoopbackRadio {
                    pair: self,
                    address: first,
                    peer: second,
                    inbox: 0,
                },
                LoopbackRadio {
                    pair: self,
                    address: second,
                    peer: first,
                    inbox: 1,
                },
            )
        }

        /// Mark the network as formed (or torn down) for both endpoints.
        pub fn set_up(&self, up: bool) {
            self.up.set(up);
        }
    }

    impl Default for LinkPair {
        fn default() -> Self {
            Self::new()
        }
    }

    /// One endpoint of a [`LinkPair`].
    pub struct LoopbackRadio<'a> {
        pair: &'a LinkPair,
        address: NodeAddress,
        peer: NodeAddress,
        /// Index of this endpoint's inbox in the pair.
        inbox: usize,
    }

    impl Radio for LoopbackRadio<'_> {
        type Error = LoopbackError;

        fn address(&self) -> NodeAddress {
            self.address
        }

        fn is_up(&self) -> bool {
            self.pair.up.get()
        }

        fn send(&mut self, destination: NodeAddress, payload: &[u8]) -> Result<(), Self::Error> {
            let payload = heapless::Vec::from_slice(payload)
                .map_err(|_| LoopbackError::PayloadTooLarge(payload.len()))?;

            // Frames for anyone other than the peer vanish into the air.
            if destination != self.peer && destination != BROADCAST_ADDRESS {
                return Ok(());
            }

            let frame = Frame {
                source: self.address,
                payload,
            };
            self.pair.inboxes[1 - self.inbox]
                .borrow_mut()
                .push_back(frame)
                .map_err(|_| LoopbackError::QueueFull)
        }

        fn poll_receive(
            &mut self,
            buffer: &mut [u8],
        ) -> Result<Option<ReceivedFrame>, Self::Error> {
            let mut inbox = self.pair.inboxes[self.inbox].borrow_mut();
            let Some(frame) = inbox.front() else {
                return Ok(None);
            };

            let length = frame.payload.len();
            if buffer.len() < length {
                return Err(LoopbackError::BufferTooSmall(length));
            }
            buffer[..length].copy_from_slice(&frame.payload);
            let source = frame.source;
            inbox.pop_front();

            Ok(Some(ReceivedFrame { source, length }))
        }
    }
}
