//! Si7210 Hall-effect magnetic field sensor driver.
//!
//! The part powers up into an idle loop and measures on demand (one-burst
//! mode). Output thresholds and hysteresis are stored in a compressed
//! mantissa/exponent code; the encoders here pick the smallest code whose
//! decoded value covers the requested field strength.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// Lowest strap option of the four-address family.
pub const BASE_ADDRESS: u8 = 0x30;

const REG_HREVID: u8 = 0xC0;
const REG_DSPSIGM: u8 = 0xC1;
const REG_DSPSIGSEL: u8 = 0xC3;
const REG_POWER_CTRL: u8 = 0xC4;
const REG_CTRL1: u8 = 0xC6;
const REG_CTRL2: u8 = 0xC7;
const REG_CTRL3: u8 = 0xC8;
const REG_OTP_ADDR: u8 = 0xE1;
const REG_OTP_DATA: u8 = 0xE2;
const REG_OTP_CTRL: u8 = 0xE3;

const CHIP_ID: u8 = 0x01;

const DSPSIG_FRESH: u8 = 0x80;
const DSPSIGSEL_FIELD: u8 = 0x00;
const DSPSIGSEL_TEMPERATURE: u8 = 0x01;

const POWER_CTRL_USESTORE: u8 = 0x08;
const POWER_CTRL_ONEBURST: u8 = 0x04;
const POWER_CTRL_STOP: u8 = 0x02;
const POWER_CTRL_SLEEP: u8 = 0x01;

const CTRL1_LOW4FIELD: u8 = 0x80;
const CTRL3_SLTIMEENA: u8 = 0x01;

const OTP_CTRL_READ_EN: u8 = 0x02;

/// Threshold/hysteresis codes count in steps of 5 uT (0.005 mT).
const CODE_UNIT_MICROTESLA: i32 = 5;
/// Code 127 disables the threshold comparison (omnipolar latch mode).
const SW_OP_LATCH: u8 = 0x7F;
/// Code 63 disables hysteresis.
const SW_HYST_NONE: u8 = 0x3F;

/// Conversion polls before giving up on the fresh-data flag.
const POLL_ATTEMPTS: usize = 10;

/// Full-scale range selection. Determines the uT per LSB of the DSP output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    /// +/-20.47 mT, 1.25 uT/LSB.
    #[default]
    TwentyMillitesla,
    /// +/-204.7 mT, 12.5 uT/LSB.
    TwoHundredMillitesla,
}

/// Output pin polarity with respect to the field direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Respond to either pole.
    #[default]
    Omnipolar,
    North,
    South,
}

impl Polarity {
    fn bits(self) -> u8 {
        match self {
            Polarity::Omnipolar => 0b00 << 6,
            Polarity::North => 0b01 << 6,
            Polarity::South => 0b10 << 6,
        }
    }
}

/// Switch behaviour programmed by [`Si7210::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Output asserts when the field exceeds this strength, in uT.
    /// Zero selects latch mode (no threshold).
    pub threshold_microtesla: i32,
    /// Release hysteresis below the threshold, in uT. Zero disables it.
    pub hysteresis_microtesla: i32,
    pub polarity: Polarity,
    /// Drive the output pin low while the field is present.
    pub output_low_on_field: bool,
    /// Let the on-chip sleep timer wake the part periodically instead of
    /// staying in the idle measurement loop.
    pub sleep_timer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold_microtesla: 2_000,
            hysteresis_microtesla: 200,
            polarity: Polarity::Omnipolar,
            output_low_on_field: true,
            sleep_timer: false,
        }
    }
}

/// Errors returned by the Si7210 driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// Chip ID readback did not identify an Si7210.
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    /// The fresh-data flag never set during a one-burst conversion.
    #[error("timed out waiting for conversion")]
    Timeout,
}

/// Si7210 driver over a blocking I2C bus.
pub struct Si7210<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C, D, E> Si7210<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    /// Driver at the default strap address.
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self::with_address(i2c, delay, BASE_ADDRESS)
    }

    /// Driver at one of the 0x30..=0x33 strap addresses.
    pub const fn with_address(i2c: I2C, delay: D, address: u8) -> Self {
        Self { i2c, delay, address }
    }

    /// Wake the part, verify its chip ID and park it in the stopped state.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        self.wake()?;

        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_HREVID], &mut id)
            .map_err(Error::Bus)?;
        if id[0] >> 4 != CHIP_ID {
            return Err(Error::UnknownDevice(id[0]));
        }

        self.write_register(REG_POWER_CTRL, POWER_CTRL_STOP)
    }

    /// Program the switch registers from `config`.
    ///
    /// Threshold and hysteresis are rounded up to the nearest representable
    /// code, so the programmed trip point is never below the requested one.
    pub fn configure(&mut self, config: &Config) -> Result<(), Error<E>> {
        let mut ctrl1 = encode_threshold(config.threshold_microtesla);
        if config.output_low_on_field {
            ctrl1 |= CTRL1_LOW4FIELD;
        }
        self.write_register(REG_CTRL1, ctrl1)?;

        let ctrl2 = config.polarity.bits() | encode_hysteresis(config.hysteresis_microtesla);
        self.write_register(REG_CTRL2, ctrl2)?;

        let mut ctrl3 = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_CTRL3], &mut ctrl3)
            .map_err(Error::Bus)?;
        let ctrl3 = if config.sleep_timer {
            ctrl3[0] | CTRL3_SLTIMEENA
        } else {
            ctrl3[0] & !CTRL3_SLTIMEENA
        };
        self.write_register(REG_CTRL3, ctrl3)
    }

    /// Run one field conversion and return the strength in uT.
    pub fn measure_field(&mut self, scale: Scale) -> Result<i32, Error<E>> {
        let raw = self.one_burst(DSPSIGSEL_FIELD)?;
        Ok(convert_field(raw, scale))
    }

    /// Run one conversion on the internal temperature channel.
    ///
    /// Returns the uncompensated die temperature in milli-degrees Celsius.
    pub fn measure_temperature(&mut self) -> Result<i32, Error<E>> {
        let raw = self.one_burst(DSPSIGSEL_TEMPERATURE)?;
        Ok(convert_temperature(raw))
    }

    /// Put the part to sleep, keeping the programmed configuration.
    pub fn sleep(&mut self) -> Result<(), Error<E>> {
        self.write_register(REG_POWER_CTRL, POWER_CTRL_USESTORE | POWER_CTRL_SLEEP)
    }

    /// Wake the part from sleep. Any bus transaction wakes it; the address
    /// byte alone is enough.
    pub fn wake(&mut self) -> Result<(), Error<E>> {
        self.i2c.write(self.address, &[]).map_err(Error::Bus)?;
        self.delay.delay_us(10);
        Ok(())
    }

    /// Read one byte of OTP memory (trim coefficients, serial, variant).
    pub fn read_otp(&mut self, otp_address: u8) -> Result<u8, Error<E>> {
        self.write_register(REG_OTP_ADDR, otp_address)?;
        self.write_register(REG_OTP_CTRL, OTP_CTRL_READ_EN)?;

        let mut data = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_OTP_DATA], &mut data)
            .map_err(Error::Bus)?;
        Ok(data[0])
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Select a DSP channel, trigger a one-burst conversion and poll the
    /// fresh-data flag. Returns the sign-corrected 15-bit DSP output.
    fn one_burst(&mut self, channel: u8) -> Result<i32, Error<E>> {
        self.write_register(REG_DSPSIGSEL, channel)?;
        self.write_register(REG_POWER_CTRL, POWER_CTRL_ONEBURST)?;

        for _ in 0..POLL_ATTEMPTS {
            let mut sig = [0u8; 2];
            self.i2c
                .write_read(self.address, &[REG_DSPSIGM], &mut sig)
                .map_err(Error::Bus)?;
            if sig[0] & DSPSIG_FRESH != 0 {
                let raw = (u16::from(sig[0] & 0x7F) << 8) | u16::from(sig[1]);
                return Ok(i32::from(raw) - 16_384);
            }
            self.delay.delay_us(100);
        }
        Err(Error::Timeout)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(Error::Bus)
    }
}

/// DSP output to uT: 1.25 uT/LSB on the 20 mT scale, 12.5 uT/LSB on 200 mT.
fn convert_field(raw: i32, scale: Scale) -> i32 {
    match scale {
        Scale::TwentyMillitesla => raw * 5 / 4,
        Scale::TwoHundredMillitesla => raw * 25 / 2,
    }
}

/// DSP output to milli-degrees Celsius.
///
/// `T = -3.83e-6 * v^2 + 0.16094 * v - 279.80` where `v` is the 12-bit
/// temperature code (the DSP output with the offset restored, shifted right
/// by three).
fn convert_temperature(raw: i32) -> i32 {
    let v = i64::from((raw + 16_384) >> 3);
    (16_094 * v / 100 - 383 * v * v / 100_000 - 279_800) as i32
}

/// Threshold code: decoded value is `(16 + code[3:0]) << code[6:4]` in 5 uT
/// units. Returns the smallest code covering `microtesla`.
fn encode_threshold(microtesla: i32) -> u8 {
    if microtesla == 0 {
        return SW_OP_LATCH;
    }
    let units = (microtesla / CODE_UNIT_MICROTESLA).clamp(16, 3_840);
    for exponent in 0u8..=7 {
        for mantissa in 0u8..=15 {
            if (16 + i32::from(mantissa)) << exponent >= units {
                return (exponent << 4) | mantissa;
            }
        }
    }
    // Unreached: the clamp keeps units within (16 + 14) << 7.
    (7 << 4) | 14
}

fn decode_threshold(code: u8) -> i32 {
    let mantissa = i32::from(code & 0x0F);
    let exponent = (code >> 4) & 0x07;
    ((16 + mantissa) << exponent) * CODE_UNIT_MICROTESLA
}

/// Hysteresis code: decoded value is `(8 + code[2:0]) << code[5:3]` in 5 uT
/// units. Returns the smallest code covering `microtesla`.
fn encode_hysteresis(microtesla: i32) -> u8 {
    if microtesla == 0 {
        return SW_HYST_NONE;
    }
    let units = (microtesla / CODE_UNIT_MICROTESLA).clamp(8, 1_792);
    for exponent in 0u8..=7 {
        for mantissa in 0u8..=7 {
            if (8 + i32::from(mantissa)) << exponent >= units {
                return (exponent << 3) | mantissa;
            }
        }
    }
    // Unreached: the clamp keeps units within (8 + 6) << 7.
    (7 << 3) | 6
}

fn decode_hysteresis(code: u8) -> i32 {
    let mantissa = i32::from(code & 0x07);
    let exponent = (code >> 3) & 0x07;
    ((8 + mantissa) << exponent) * CODE_UNIT_MICROTESLA
}
