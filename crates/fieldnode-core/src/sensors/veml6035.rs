//! VEML6035 ambient light sensor driver.
//!
//! Every register is 16 bits, transferred least significant byte first. The
//! part free-runs once out of shutdown; reads return whatever the last
//! integration window produced. Lux scaling depends on the configured
//! integration time and the three gain bits, so the driver keeps the active
//! [`Config`] and folds its resolution into every readout.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// Fixed bus address.
pub const ADDRESS: u8 = 0x29;

const REG_ALS_CONF: u8 = 0x00;
const REG_THRESHOLD_HIGH: u8 = 0x01;
const REG_THRESHOLD_LOW: u8 = 0x02;
const REG_POWER_SAVING: u8 = 0x03;
const REG_ALS_DATA: u8 = 0x04;
const REG_WHITE_DATA: u8 = 0x05;
const REG_ALS_INT: u8 = 0x06;

const CONF_SHUTDOWN: u16 = 0x0001;
const CONF_INT_EN: u16 = 0x0002;
const CONF_GAIN: u16 = 0x0400;
const CONF_DIGITAL_GAIN: u16 = 0x0800;
const CONF_LOW_SENSITIVITY: u16 = 0x1000;

const INT_CROSSED_LOW: u16 = 0x8000;
const INT_CROSSED_HIGH: u16 = 0x4000;

const PSM_ENABLE: u16 = 0x0001;

/// First valid reading is available one integration window plus wakeup time
/// after leaving shutdown; 4 ms covers the wakeup part.
const WAKEUP_MS: u32 = 4;

/// ALS integration window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationTime {
    Ms25,
    Ms50,
    #[default]
    Ms100,
    Ms200,
    Ms400,
    Ms800,
}

impl IntegrationTime {
    /// ALS_CONF bits 9:6.
    fn bits(self) -> u16 {
        match self {
            IntegrationTime::Ms25 => 0b1100 << 6,
            IntegrationTime::Ms50 => 0b1000 << 6,
            IntegrationTime::Ms100 => 0b0000 << 6,
            IntegrationTime::Ms200 => 0b0001 << 6,
            IntegrationTime::Ms400 => 0b0010 << 6,
            IntegrationTime::Ms800 => 0b0011 << 6,
        }
    }

    fn milliseconds(self) -> u32 {
        match self {
            IntegrationTime::Ms25 => 25,
            IntegrationTime::Ms50 => 50,
            IntegrationTime::Ms100 => 100,
            IntegrationTime::Ms200 => 200,
            IntegrationTime::Ms400 => 400,
            IntegrationTime::Ms800 => 800,
        }
    }
}

/// Readings required beyond a threshold before the interrupt asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    #[default]
    One,
    Two,
    Four,
    Eight,
}

impl Persistence {
    /// ALS_CONF bits 5:4.
    fn bits(self) -> u16 {
        match self {
            Persistence::One => 0b00 << 4,
            Persistence::Two => 0b01 << 4,
            Persistence::Four => 0b10 << 4,
            Persistence::Eight => 0b11 << 4,
        }
    }
}

/// Sensitivity configuration applied by [`Veml6035::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub integration_time: IntegrationTime,
    /// Analog gain x2.
    pub gain_x2: bool,
    /// Digital gain x2.
    pub digital_gain_x2: bool,
    /// Divide sensitivity by eight (bright-light ranges).
    pub low_sensitivity: bool,
    pub persistence: Persistence,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            integration_time: IntegrationTime::Ms100,
            gain_x2: true,
            digital_gain_x2: false,
            low_sensitivity: false,
            persistence: Persistence::One,
        }
    }
}

impl Config {
    fn bits(self) -> u16 {
        let mut conf = self.integration_time.bits() | self.persistence.bits();
        if self.gain_x2 {
            conf |= CONF_GAIN;
        }
        if self.digital_gain_x2 {
            conf |= CONF_DIGITAL_GAIN;
        }
        if self.low_sensitivity {
            conf |= CONF_LOW_SENSITIVITY;
        }
        conf
    }

    /// Micro-lux per count. 400 ulx at full sensitivity and the longest
    /// window, doubling as the window shortens or a gain drops, x8 in the
    /// low sensitivity ranges.
    fn resolution_microlux(self) -> u32 {
        let mut resolution = 400 * (800 / self.integration_time.milliseconds());
        if !self.gain_x2 {
            resolution *= 2;
        }
        if !self.digital_gain_x2 {
            resolution *= 2;
        }
        if self.low_sensitivity {
            resolution *= 8;
        }
        resolution
    }
}

/// Power saving mode, trading refresh rate for supply current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSaving {
    Off,
    /// PSM 1..=4; higher modes poll less often.
    Mode(u8),
}

/// Threshold crossings latched since the last readout. Reading clears them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptStatus {
    pub crossed_low: bool,
    pub crossed_high: bool,
}

/// Errors returned by the VEML6035 driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
}

/// VEML6035 driver over a blocking I2C bus.
pub struct Veml6035<I2C, D> {
    i2c: I2C,
    delay: D,
    config: Config,
}

impl<I2C, D, E> Veml6035<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            config: Config {
                integration_time: IntegrationTime::Ms100,
                gain_x2: true,
                digital_gain_x2: false,
                low_sensitivity: false,
                persistence: Persistence::One,
            },
        }
    }

    /// Program the sensitivity configuration and start measuring.
    ///
    /// The configuration is written in shutdown first; changing gain bits
    /// mid-integration corrupts the running window.
    pub fn init(&mut self, config: Config) -> Result<(), Error<E>> {
        self.config = config;
        self.write_register(REG_ALS_CONF, config.bits() | CONF_SHUTDOWN)?;
        self.write_register(REG_ALS_CONF, config.bits())?;
        self.delay.delay_ms(WAKEUP_MS);
        Ok(())
    }

    /// Ambient light from the last integration window, in milli-lux.
    pub fn read_millilux(&mut self) -> Result<u32, Error<E>> {
        let raw = self.read_register(REG_ALS_DATA)?;
        let millilux =
            u64::from(raw) * u64::from(self.config.resolution_microlux()) / 1_000;
        Ok(millilux as u32)
    }

    /// Raw counts from the unfiltered white channel.
    pub fn read_white_raw(&mut self) -> Result<u16, Error<E>> {
        self.read_register(REG_WHITE_DATA)
    }

    /// Program the window comparator and enable the interrupt.
    ///
    /// Thresholds are raw ALS counts; scale from lux with the configured
    /// resolution.
    pub fn set_interrupt_thresholds(&mut self, low: u16, high: u16) -> Result<(), Error<E>> {
        self.write_register(REG_THRESHOLD_HIGH, high)?;
        self.write_register(REG_THRESHOLD_LOW, low)?;
        self.write_register(REG_ALS_CONF, self.config.bits() | CONF_INT_EN)
    }

    /// Read and clear the latched threshold crossings.
    pub fn interrupt_status(&mut self) -> Result<InterruptStatus, Error<E>> {
        let status = self.read_register(REG_ALS_INT)?;
        Ok(InterruptStatus {
            crossed_low: status & INT_CROSSED_LOW != 0,
            crossed_high: status & INT_CROSSED_HIGH != 0,
        })
    }

    /// Configure the refresh/current trade-off.
    pub fn set_power_saving(&mut self, mode: PowerSaving) -> Result<(), Error<E>> {
        let word = match mode {
            PowerSaving::Off => 0,
            PowerSaving::Mode(mode) => {
                let mode = u16::from(mode.clamp(1, 4) - 1);
                (mode << 1) | PSM_ENABLE
            }
        };
        self.write_register(REG_POWER_SAVING, word)
    }

    /// Stop measuring. The register file keeps its contents.
    pub fn shutdown(&mut self) -> Result<(), Error<E>> {
        self.write_register(REG_ALS_CONF, self.config.bits() | CONF_SHUTDOWN)
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn write_register(&mut self, register: u8, value: u16) -> Result<(), Error<E>> {
        let bytes = value.to_le_bytes();
        self.i2c
            .write(ADDRESS, &[register, bytes[0], bytes[1]])
            .map_err(Error::Bus)
    }

    fn read_register(&mut self, register: u8) -> Result<u16, Error<E>> {
        let mut bytes = [0u8; 2];
        self.i2c
            .write_read(ADDRESS, &[register], &mut bytes)
            .map_err(Error::Bus)?;
        Ok(u16::from_le_bytes(bytes))
    }
}
