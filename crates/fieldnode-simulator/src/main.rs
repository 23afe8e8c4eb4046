//! Desktop simulator for the fieldnode wireless sensor network demos.
//!
//! Runs two scripted scenarios back to back, entirely in process:
//!
//! | Scenario       | What it shows                                          |
//! |----------------|--------------------------------------------------------|
//! | sensor network | Key provisioning over the air, then periodic reporting |
//! | light & switch | A switch toggling a lamp and mirroring its state       |
//!
//! The sensor scenario drives the real `Si70xx` driver against simulated
//! silicon behind the shared I2C bus, so the whole stack from register
//! protocol to radio frame is exercised. Set `RUST_LOG=debug` to watch the
//! individual frames.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, Operation};
use log::{info, warn};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use fieldnode_core::bus::SharedI2cBus;
use fieldnode_core::config::NodeConfig;
use fieldnode_core::node::{LightNode, SensorNode, SinkNode, SwitchNode};
use fieldnode_core::radio::loopback::LinkPair;
use fieldnode_core::radio::NodeAddress;
use fieldnode_core::security::NetworkKey;
use fieldnode_core::sensors::si70xx::{self, Resolution, Si70xx};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Virtual milliseconds per loop iteration.
const VIRTUAL_TICK_MS: u64 = 100;

/// Wall-clock pause per iteration, so the log reads in order.
const TICK_PACING: Duration = Duration::from_millis(10);

/// Tick at which the simulated network finishes forming.
const NETWORK_UP_AT_TICK: u64 = 5;

const SINK_ADDRESS: NodeAddress = 0x0000;
const SENSOR_ADDRESS: NodeAddress = 0x0042;
const SWITCH_ADDRESS: NodeAddress = 0x0101;
const LIGHT_ADDRESS: NodeAddress = 0x0202;

// ---------------------------------------------------------------------------
// Simulated Si70xx silicon
// ---------------------------------------------------------------------------

/// Serial number bytes served by the two electronic ID readouts.
const SERIAL_SNA: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
const SERIAL_SNB: [u8; 4] = [0x15, 0xFF, 0xB5, 0x07]; // first byte: Si7021

/// User register 1 reset value.
const USER_REGISTER_DEFAULT: u8 = 0x3A;

/// Firmware revision 2.0.
const FIRMWARE_REVISION: u8 = 0x20;

#[derive(Debug)]
struct SimBusError(&'static str);

impl embedded_hal::i2c::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Synthetic climate that drifts over time.
struct SyntheticClimate {
    elapsed_secs: f64,
}

impl SyntheticClimate {
    fn new() -> Self {
        Self { elapsed_secs: 0.0 }
    }

    /// Advance the climate and return the current (humidity %, temperature °C).
    fn advance(&mut self, dt_secs: f64) -> (f64, f64) {
        self.elapsed_secs += dt_secs;
        let t = self.elapsed_secs;

        // Temperature: 20–26 °C sinusoidal with slow drift
        let temperature = 23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos();

        // Humidity: 40–60 % with a different period
        let humidity = 50.0 + 10.0 * (t / 180.0).sin() + 2.0 * (t / 23.0).cos();

        (humidity, temperature)
    }
}

/// What the next plain read will serve.
enum Readout {
    Identity1,
    Identity2,
    Firmware,
    UserRegister,
    Temperature,
}

/// In-memory Si70xx that answers the driver's exact register protocol,
/// complete with CRCs, so the real driver runs unmodified on the desktop.
struct SimulatedSi70xx {
    climate: SyntheticClimate,
    user_register: u8,
    /// RH and temperature codes of the last started conversion.
    conversion: Option<(u16, u16)>,
    pending: Option<Readout>,
}

impl SimulatedSi70xx {
    fn new() -> Self {
        Self {
            climate: SyntheticClimate::new(),
            user_register: USER_REGISTER_DEFAULT,
            conversion: None,
            pending: None,
        }
    }

    fn handle_write(&mut self, bytes: &[u8]) -> Result<(), SimBusError> {
        match bytes {
            [0xFE] => {
                self.user_register = USER_REGISTER_DEFAULT;
                self.conversion = None;
                self.pending = None;
            }
            [0xF5] => {
                // One conversion per report period of virtual time.
                let (humidity, temperature) = self.climate.advance(1.0);
                self.conversion = Some((rh_code(humidity), temp_code(temperature)));
            }
            [0xE6, value] => self.user_register = *value,
            [0xE7] => self.pending = Some(Readout::UserRegister),
            [0xE0] => self.pending = Some(Readout::Temperature),
            [0xFA, 0x0F] => self.pending = Some(Readout::Identity1),
            [0xFC, 0xC9] => self.pending = Some(Readout::Identity2),
            [0x84, 0xB8] => self.pending = Some(Readout::Firmware),
            _ => return Err(SimBusError("unsupported command")),
        }
        Ok(())
    }

    fn handle_read(&mut self, buffer: &mut [u8]) -> Result<(), SimBusError> {
        match self.pending.take() {
            Some(Readout::Identity1) => fill(buffer, &identity1_readout()),
            Some(Readout::Identity2) => fill(buffer, &identity2_readout()),
            Some(Readout::Firmware) => fill(buffer, &[FIRMWARE_REVISION]),
            Some(Readout::UserRegister) => fill(buffer, &[self.user_register]),
            Some(Readout::Temperature) => {
                let Some((_, temperature)) = self.conversion else {
                    return Err(SimBusError("no conversion to read back"));
                };
                fill(buffer, &temperature.to_be_bytes())
            }
            None => {
                // A bare read fetches the no-hold conversion result.
                let Some((humidity, _)) = self.conversion else {
                    return Err(SimBusError("no conversion in progress"));
                };
                let [high, low] = humidity.to_be_bytes();
                fill(buffer, &[high, low, crc8(&[high, low])])
            }
        }
    }
}

impl ErrorType for SimulatedSi70xx {
    type Error = SimBusError;
}

impl I2c for SimulatedSi70xx {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != si70xx::ADDRESS {
            return Err(SimBusError("address not acknowledged"));
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => self.handle_write(bytes)?,
                Operation::Read(buffer) => self.handle_read(buffer)?,
            }
        }
        Ok(())
    }
}

fn fill(buffer: &mut [u8], bytes: &[u8]) -> Result<(), SimBusError> {
    if buffer.len() != bytes.len() {
        return Err(SimBusError("readout length mismatch"));
    }
    buffer.copy_from_slice(bytes);
    Ok(())
}

/// First ID access: each serial byte followed by the running CRC.
fn identity1_readout() -> [u8; 8] {
    let mut out = [0u8; 8];
    let mut crc = 0;
    for (i, &byte) in SERIAL_SNA.iter().enumerate() {
        crc = crc8_update(crc, byte);
        out[i * 2] = byte;
        out[i * 2 + 1] = crc;
    }
    out
}

/// Second ID access: serial bytes in pairs, running CRC after each pair.
fn identity2_readout() -> [u8; 6] {
    let mut out = [0u8; 6];
    let mut crc = 0;
    for (i, pair) in SERIAL_SNB.chunks_exact(2).enumerate() {
        crc = crc8_update(crc, pair[0]);
        crc = crc8_update(crc, pair[1]);
        out[i * 3] = pair[0];
        out[i * 3 + 1] = pair[1];
        out[i * 3 + 2] = crc;
    }
    out
}

/// Inverse of the driver's RH conversion. The two status bits read 0b10 on
/// real parts.
fn rh_code(percent: f64) -> u16 {
    let code = ((percent * 1000.0 + 6000.0) * 8192.0 / 15625.0) as u16;
    (code & !0b11) | 0b10
}

/// Inverse of the driver's temperature conversion.
fn temp_code(celsius: f64) -> u16 {
    let code = ((celsius * 1000.0 + 46850.0) * 8192.0 / 21965.0) as u16;
    code & !0b11
}

fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &byte| crc8_update(crc, byte))
}

fn crc8_update(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ 0x31
        } else {
            crc << 1
        };
    }
    crc
}

/// Conversion delays shrink to nothing on the desktop.
struct SimDelay;

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

// ---------------------------------------------------------------------------
// Scenario 1: sensor network
// ---------------------------------------------------------------------------

fn run_sensor_network(seed: u64) {
    info!("--- Scenario: sensor and sink ---");

    // Simulated board: one Si70xx behind the shared bus.
    let bus = SharedI2cBus::new(SimulatedSi70xx::new());
    let mut driver = Si70xx::new(bus.device(), SimDelay);

    let part = driver.init().expect("simulated part answers the ID readout");
    let serial = driver.serial_number().expect("serial readout");
    info!("Detected {part:?}, serial {serial:#018x}");
    driver
        .configure(Resolution::default(), false)
        .expect("user register write");

    let pair = LinkPair::new();
    let (sink_radio, sensor_radio) = pair.endpoints(SINK_ADDRESS, SENSOR_ADDRESS);

    let network_key = NetworkKey::generate(&mut ChaCha20Rng::seed_from_u64(seed));
    let sink_config = NodeConfig {
        node_id: SINK_ADDRESS,
        network_key: Some(network_key.clone()),
        ..NodeConfig::default()
    };
    let mut sink = SinkNode::new(
        sink_radio,
        ChaCha20Rng::seed_from_u64(seed.rotate_left(17)),
        sink_config,
    )
    .expect("sink holds the network key");

    let sensor_config = NodeConfig {
        node_id: SENSOR_ADDRESS,
        ..NodeConfig::default()
    };
    let mut sensor = SensorNode::new(
        sensor_radio,
        driver,
        ChaCha20Rng::seed_from_u64(seed.rotate_left(31)),
        sensor_config,
    );

    // Six virtual seconds: commissioning, then a handful of reports.
    for tick in 0..60u64 {
        let now_ms = tick * VIRTUAL_TICK_MS;
        if tick == NETWORK_UP_AT_TICK {
            info!("Network formed");
            pair.set_up(true);
        }

        sink.tick(now_ms);
        sensor.tick(now_ms);
        thread::sleep(TICK_PACING);
    }

    if sensor.config().network_key.as_ref() == Some(&network_key) {
        info!("Sensor obtained the sink's network key over the air");
    } else {
        warn!("Sensor never obtained the network key");
    }
    for (address, entry) in sink.reports() {
        info!(
            "Last report from {address:#06x}: {} mdegC / {} m%RH at t={} ms",
            entry.report.temperature_milli_celsius,
            entry.report.humidity_milli_percent,
            entry.received_at_ms
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario 2: light and switch
// ---------------------------------------------------------------------------

fn run_light_switch() {
    info!("--- Scenario: light and switch ---");

    let pair = LinkPair::new();
    let (switch_radio, light_radio) = pair.endpoints(SWITCH_ADDRESS, LIGHT_ADDRESS);
    pair.set_up(true);

    let switch_config = NodeConfig {
        node_id: SWITCH_ADDRESS,
        sink_address: LIGHT_ADDRESS,
        ..NodeConfig::default()
    };
    let mut switch = SwitchNode::new(switch_radio, switch_config);

    let light_config = NodeConfig {
        node_id: LIGHT_ADDRESS,
        ..NodeConfig::default()
    };
    let mut light = LightNode::new(light_radio, light_config);

    // Press three times: on, off, on.
    const PRESS_AT_TICKS: [u64; 3] = [10, 20, 30];

    for tick in 0..40u64 {
        if PRESS_AT_TICKS.contains(&tick) {
            info!("Button pressed");
            if let Err(e) = switch.press_button() {
                warn!("Press failed: {e}");
            }
        }

        switch.tick();
        light.tick();
        thread::sleep(TICK_PACING);
    }

    info!("Lamp ended {}", if light.is_on() { "on" } else { "off" });
    match switch.light_status() {
        Some(on) => info!("Switch last heard the lamp {}", if on { "on" } else { "off" }),
        None => warn!("Switch never heard a status broadcast"),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting fieldnode simulator");

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    run_sensor_network(seed);
    run_light_switch();

    info!("Simulator exiting");
}
