//! Si70xx (Si7006/13/20/21) relative humidity and temperature driver.
//!
//! All measurements use the no-hold command flow: issue the command, wait the
//! worst-case conversion time, then read the result. Readings carry a CRC-8
//! which is checked before decoding. Conversions use the vendor fixed-point
//! math so results are exact milli-units with no floating point.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::error;
use thiserror_no_std::Error;

use super::{EnvironmentSample, EnvironmentSensor, SensorError};

/// Fixed bus address of the whole family.
pub const ADDRESS: u8 = 0x40;

const CMD_MEASURE_RH_NO_HOLD: u8 = 0xF5;
const CMD_READ_TEMP_FROM_RH: u8 = 0xE0;
const CMD_RESET: u8 = 0xFE;
const CMD_WRITE_USER_REG1: u8 = 0xE6;
const CMD_READ_USER_REG1: u8 = 0xE7;
const CMD_READ_ID_FIRST: [u8; 2] = [0xFA, 0x0F];
const CMD_READ_ID_SECOND: [u8; 2] = [0xFC, 0xC9];
const CMD_READ_FIRMWARE_REV: [u8; 2] = [0x84, 0xB8];

/// Soft reset settle time.
const RESET_SETTLE_MS: u32 = 15;
/// Worst-case RH + temperature conversion time at maximum resolution.
const CONVERSION_DELAY_MS: u32 = 23;

const USER_REG_RES1: u8 = 0x80;
const USER_REG_HEATER: u8 = 0x04;
const USER_REG_RES0: u8 = 0x01;

/// CRC-8 polynomial x^8 + x^5 + x^4 + 1, initial value 0.
const CRC_POLYNOMIAL: u8 = 0x31;

/// Part number reported in the electronic ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Si7006,
    Si7013,
    Si7020,
    Si7021,
}

impl Part {
    fn from_id(id: u8) -> Option<Self> {
        match id {
            0x06 => Some(Part::Si7006),
            0x0D => Some(Part::Si7013),
            0x14 => Some(Part::Si7020),
            0x15 => Some(Part::Si7021),
            _ => None,
        }
    }
}

/// Measurement resolution selection (RH bits / temperature bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Rh12Temp14,
    Rh8Temp12,
    Rh10Temp13,
    Rh11Temp11,
}

impl Resolution {
    /// Split encoding: RES1 lives in user register bit 7, RES0 in bit 0.
    fn bits(self) -> u8 {
        match self {
            Resolution::Rh12Temp14 => 0,
            Resolution::Rh8Temp12 => USER_REG_RES0,
            Resolution::Rh10Temp13 => USER_REG_RES1,
            Resolution::Rh11Temp11 => USER_REG_RES1 | USER_REG_RES0,
        }
    }
}

/// Firmware revision readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareRevision {
    V1_0,
    V2_0,
    Unknown(u8),
}

/// Errors returned by the Si70xx driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// Electronic ID did not match any supported part.
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    /// A CRC-protected read failed its checksum.
    #[error("checksum mismatch (expected {expected:#04x}, found {found:#04x})")]
    ChecksumMismatch { expected: u8, found: u8 },
}

/// One combined reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub humidity_milli_percent: i32,
    pub temperature_milli_celsius: i32,
}

/// Si70xx driver over a blocking I2C bus.
pub struct Si70xx<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D, E> Si70xx<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Reset the sensor and verify its electronic ID.
    ///
    /// Returns the detected part on success.
    pub fn init(&mut self) -> Result<Part, Error<E>> {
        self.i2c.write(ADDRESS, &[CMD_RESET]).map_err(Error::Bus)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        let id = self.read_id_second()?;
        Part::from_id(id[0]).ok_or(Error::UnknownDevice(id[0]))
    }

    /// Program measurement resolution and the on-chip heater bit.
    pub fn configure(&mut self, resolution: Resolution, heater: bool) -> Result<(), Error<E>> {
        let mut reg = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[CMD_READ_USER_REG1], &mut reg)
            .map_err(Error::Bus)?;

        let mut value = reg[0] & !(USER_REG_RES1 | USER_REG_RES0 | USER_REG_HEATER);
        value |= resolution.bits();
        if heater {
            value |= USER_REG_HEATER;
        }

        self.i2c
            .write(ADDRESS, &[CMD_WRITE_USER_REG1, value])
            .map_err(Error::Bus)
    }

    /// Measure relative humidity and temperature.
    ///
    /// Issues a no-hold RH conversion, then fetches the temperature measured
    /// as part of the same conversion (no second conversion is started).
    pub fn measure(&mut self) -> Result<Measurement, Error<E>> {
        self.i2c
            .write(ADDRESS, &[CMD_MEASURE_RH_NO_HOLD])
            .map_err(Error::Bus)?;
        self.delay.delay_ms(CONVERSION_DELAY_MS);

        let mut rh = [0u8; 3];
        self.i2c.read(ADDRESS, &mut rh).map_err(Error::Bus)?;
        let expected = crc8(&rh[..2]);
        if expected != rh[2] {
            return Err(Error::ChecksumMismatch {
                expected,
                found: rh[2],
            });
        }
        let rh_code = u16::from_be_bytes([rh[0], rh[1]]);

        // The temperature readout of the previous conversion has no CRC.
        let mut temp = [0u8; 2];
        self.i2c
            .write_read(ADDRESS, &[CMD_READ_TEMP_FROM_RH], &mut temp)
            .map_err(Error::Bus)?;
        let temp_code = u16::from_be_bytes([temp[0], temp[1]]);

        Ok(Measurement {
            humidity_milli_percent: convert_humidity(rh_code),
            temperature_milli_celsius: convert_temperature(temp_code),
        })
    }

    /// Read the full 64-bit electronic serial number.
    pub fn serial_number(&mut self) -> Result<u64, Error<E>> {
        let first = self.read_id_first()?;
        let second = self.read_id_second()?;
        Ok(u64::from_be_bytes([
            first[0], first[1], first[2], first[3], second[0], second[1], second[2], second[3],
        ]))
    }

    /// Read the firmware revision.
    pub fn firmware_revision(&mut self) -> Result<FirmwareRevision, Error<E>> {
        let mut rev = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &CMD_READ_FIRMWARE_REV, &mut rev)
            .map_err(Error::Bus)?;
        Ok(match rev[0] {
            0xFF => FirmwareRevision::V1_0,
            0x20 => FirmwareRevision::V2_0,
            other => FirmwareRevision::Unknown(other),
        })
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// First ID access: four serial bytes, each followed by a running CRC.
    fn read_id_first(&mut self) -> Result<[u8; 4], Error<E>> {
        let mut raw = [0u8; 8];
        self.i2c
            .write_read(ADDRESS, &CMD_READ_ID_FIRST, &mut raw)
            .map_err(Error::Bus)?;

        let mut crc = 0;
        let mut bytes = [0u8; 4];
        for (i, chunk) in raw.chunks_exact(2).enumerate() {
            crc = crc8_update(crc, chunk[0]);
            if crc != chunk[1] {
                return Err(Error::ChecksumMismatch {
                    expected: crc,
                    found: chunk[1],
                });
            }
            bytes[i] = chunk[0];
        }
        Ok(bytes)
    }

    /// Second ID access: serial bytes in pairs, CRC after each pair. The
    /// first byte is the part number.
    fn read_id_second(&mut self) -> Result<[u8; 4], Error<E>> {
        let mut raw = [0u8; 6];
        self.i2c
            .write_read(ADDRESS, &CMD_READ_ID_SECOND, &mut raw)
            .map_err(Error::Bus)?;

        let mut crc = 0;
        let mut bytes = [0u8; 4];
        for (i, chunk) in raw.chunks_exact(3).enumerate() {
            crc = crc8_update(crc, chunk[0]);
            crc = crc8_update(crc, chunk[1]);
            if crc != chunk[2] {
                return Err(Error::ChecksumMismatch {
                    expected: crc,
                    found: chunk[2],
                });
            }
            bytes[i * 2] = chunk[0];
            bytes[i * 2 + 1] = chunk[1];
        }
        Ok(bytes)
    }
}

impl<I2C, D, E> EnvironmentSensor for Si70xx<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
    E: core::fmt::Debug,
{
    fn sample(&mut self) -> Result<EnvironmentSample, SensorError> {
        let measurement = self.measure().map_err(|e| {
            error!("Si70xx measurement failed: {:?}", e);
            SensorError::ReadFailed {
                sensor: "Si70xx",
                operation: "measure temperature/humidity",
                details: "I2C communication error or checksum failure",
            }
        })?;

        Ok(EnvironmentSample {
            temperature_milli_celsius: measurement.temperature_milli_celsius,
            humidity_milli_percent: measurement.humidity_milli_percent,
        })
    }
}

/// `%RH * 1000 = (code * 125000 / 65536) - 6000`, as integer math.
///
/// Clamped to the physical 0..=100 % range; codes near the rails can decode
/// slightly outside it.
fn convert_humidity(code: u16) -> i32 {
    // Status bits live in the two least significant bits of the code.
    let code = i64::from(code & 0xFFFC);
    let milli = ((code * 15625) >> 13) - 6000;
    milli.clamp(0, 100_000) as i32
}

/// `°C * 1000 = (code * 175720 / 65536) - 46850`, as integer math.
fn convert_temperature(code: u16) -> i32 {
    let code = i64::from(code & 0xFFFC);
    (((code * 21965) >> 13) - 46850) as i32
}

fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &byte| crc8_update(crc, byte))
}

fn crc8_update(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 {
            (crc << 1) ^ CRC_POLYNOMIAL
        } else {
            crc << 1
        };
    }
    crc
}
