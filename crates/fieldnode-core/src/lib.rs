//! Hardware-independent core library for fieldnode
//!
//! This crate contains all platform-agnostic logic for the fieldnode wireless
//! sensor kit: I2C sensor drivers, the shared-bus wrapper they sit on, the
//! network-key provisioning exchange, the radio seam, and the demo node state
//! machines (sensor, sink, light, switch).
//!
//! It is `#![no_std]` so it compiles on both embedded targets and desktop
//! hosts (for the simulator and tests). A board crate supplies the concrete
//! I2C bus, delay, radio, and RNG; the simulator supplies in-memory stand-ins
//! for the same seams.

#![no_std]

pub mod bus;
pub mod config;
pub mod node;
pub mod radio;
pub mod security;
pub mod sensors;
