//! CCS811 indoor air quality (eCO2 / TVOC) sensor driver.
//!
//! The part boots into a bootloader; [`Ccs811::init`] validates the stored
//! application image and starts it before any measurement can run. Readings
//! are picked up by polling [`Ccs811::read_measurement`], which reports
//! [`Error::NoData`] until the next conversion interval elapses.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// Bus address with ADDR strapped low. Strapping it high gives 0x5B.
pub const ADDRESS: u8 = 0x5A;

const REG_STATUS: u8 = 0x00;
const REG_MEAS_MODE: u8 = 0x01;
const REG_ALG_RESULT_DATA: u8 = 0x02;
const REG_ENV_DATA: u8 = 0x05;
const REG_BASELINE: u8 = 0x11;
const REG_HW_ID: u8 = 0x20;
const REG_APP_START: u8 = 0xF4;
const REG_SW_RESET: u8 = 0xFF;

const HW_ID: u8 = 0x81;
const RESET_KEY: [u8; 4] = [0x11, 0xE5, 0x72, 0x8A];

const STATUS_FW_MODE: u8 = 0x80;
const STATUS_APP_VALID: u8 = 0x10;
const STATUS_DATA_READY: u8 = 0x08;
const STATUS_ERROR: u8 = 0x01;

const RESET_SETTLE_MS: u32 = 2;
const APP_START_SETTLE_MS: u32 = 1;

/// Measurement interval, written to MEAS_MODE bits 6:4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    Idle,
    #[default]
    EverySecond,
    EveryTenSeconds,
    EveryMinute,
    EveryQuarterSecond,
}

impl DriveMode {
    fn bits(self) -> u8 {
        match self {
            DriveMode::Idle => 0,
            DriveMode::EverySecond => 1,
            DriveMode::EveryTenSeconds => 2,
            DriveMode::EveryMinute => 3,
            DriveMode::EveryQuarterSecond => 4,
        }
    }
}

/// Errors returned by the CCS811 driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// HW_ID readback did not identify a CCS811.
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    /// The part carries no valid application firmware image.
    #[error("no valid application firmware")]
    InvalidApplication,
    /// The application image did not start.
    #[error("application failed to start")]
    BootFailed,
    /// No new conversion since the last readout.
    #[error("measurement not ready")]
    NoData,
    /// The device raised its ERROR flag; the payload is its ERROR_ID code.
    #[error("device error (id {0:#04x})")]
    Controller(u8),
}

/// One air quality reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Equivalent CO2 in ppm, 400..=8192.
    pub eco2_ppm: u16,
    /// Total volatile organic compounds in ppb, 0..=1187.
    pub tvoc_ppb: u16,
    /// Sense resistor current in uA.
    pub raw_current_microamp: u8,
    /// Raw 10-bit ADC reading across the sense resistor.
    pub raw_adc: u16,
}

/// CCS811 driver over a blocking I2C bus.
pub struct Ccs811<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D, E> Ccs811<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Reset the part, verify its ID and boot the measurement application.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        let mut reset = [0u8; 5];
        reset[0] = REG_SW_RESET;
        reset[1..].copy_from_slice(&RESET_KEY);
        self.i2c.write(ADDRESS, &reset).map_err(Error::Bus)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        let mut id = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[REG_HW_ID], &mut id)
            .map_err(Error::Bus)?;
        if id[0] != HW_ID {
            return Err(Error::UnknownDevice(id[0]));
        }

        if self.read_status()? & STATUS_APP_VALID == 0 {
            return Err(Error::InvalidApplication);
        }

        // APP_START is a mailbox, not a register: the write carries no data.
        self.i2c
            .write(ADDRESS, &[REG_APP_START])
            .map_err(Error::Bus)?;
        self.delay.delay_ms(APP_START_SETTLE_MS);

        if self.read_status()? & STATUS_FW_MODE == 0 {
            return Err(Error::BootFailed);
        }
        Ok(())
    }

    /// Select how often the application runs a conversion.
    pub fn configure(&mut self, mode: DriveMode) -> Result<(), Error<E>> {
        self.i2c
            .write(ADDRESS, &[REG_MEAS_MODE, mode.bits() << 4])
            .map_err(Error::Bus)
    }

    /// Check for a fresh conversion without consuming it.
    pub fn data_ready(&mut self) -> Result<bool, Error<E>> {
        Ok(self.read_status()? & STATUS_DATA_READY != 0)
    }

    /// Fetch the latest conversion, if one is ready.
    pub fn read_measurement(&mut self) -> Result<Measurement, Error<E>> {
        let mut data = [0u8; 8];
        self.i2c
            .write_read(ADDRESS, &[REG_ALG_RESULT_DATA], &mut data)
            .map_err(Error::Bus)?;

        let status = data[4];
        if status & STATUS_ERROR != 0 {
            return Err(Error::Controller(data[5]));
        }
        if status & STATUS_DATA_READY == 0 {
            return Err(Error::NoData);
        }

        Ok(Measurement {
            eco2_ppm: u16::from_be_bytes([data[0], data[1]]),
            tvoc_ppb: u16::from_be_bytes([data[2], data[3]]),
            raw_current_microamp: data[6] >> 2,
            raw_adc: (u16::from(data[6] & 0x03) << 8) | u16::from(data[7]),
        })
    }

    /// Feed the compensation algorithm the ambient conditions measured by
    /// another sensor.
    pub fn set_environment(
        &mut self,
        humidity_milli_percent: i32,
        temperature_milli_celsius: i32,
    ) -> Result<(), Error<E>> {
        let humidity = encode_humidity(humidity_milli_percent).to_be_bytes();
        let temperature = encode_temperature(temperature_milli_celsius).to_be_bytes();
        self.i2c
            .write(
                ADDRESS,
                &[
                    REG_ENV_DATA,
                    humidity[0],
                    humidity[1],
                    temperature[0],
                    temperature[1],
                ],
            )
            .map_err(Error::Bus)
    }

    /// Read the opaque baseline word for persisting across power cycles.
    pub fn baseline(&mut self) -> Result<u16, Error<E>> {
        let mut baseline = [0u8; 2];
        self.i2c
            .write_read(ADDRESS, &[REG_BASELINE], &mut baseline)
            .map_err(Error::Bus)?;
        Ok(u16::from_be_bytes(baseline))
    }

    /// Restore a previously saved baseline word.
    pub fn restore_baseline(&mut self, baseline: u16) -> Result<(), Error<E>> {
        let bytes = baseline.to_be_bytes();
        self.i2c
            .write(ADDRESS, &[REG_BASELINE, bytes[0], bytes[1]])
            .map_err(Error::Bus)
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn read_status(&mut self) -> Result<u8, Error<E>> {
        let mut status = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[REG_STATUS], &mut status)
            .map_err(Error::Bus)?;
        Ok(status[0])
    }
}

/// ENV_DATA humidity code, 1/512 %RH steps.
fn encode_humidity(milli_percent: i32) -> u16 {
    let clamped = milli_percent.clamp(0, 100_000) as i64;
    (clamped * 512 / 1_000) as u16
}

/// ENV_DATA temperature code, 1/512 degC steps with a +25 degC offset.
fn encode_temperature(milli_celsius: i32) -> u16 {
    let offset = i64::from(milli_celsius.clamp(-25_000, 100_000)) + 25_000;
    (offset * 512 / 1_000) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{Bus, Delay, Transaction};

    #[test]
    fn environment_codes_use_one_512th_steps() {
        assert_eq!(encode_humidity(48_500), 0x6100);
        assert_eq!(encode_humidity(0), 0x0000);
        assert_eq!(encode_humidity(200_000), 100 * 512);

        assert_eq!(encode_temperature(25_000), 0x6400);
        assert_eq!(encode_temperature(-25_000), 0x0000);
        assert_eq!(encode_temperature(0), 25 * 512);
    }

    #[test]
    fn init_boots_the_application() {
        let script = [
            Transaction::write(ADDRESS, &[0xFF, 0x11, 0xE5, 0x72, 0x8A]),
            Transaction::write_read(ADDRESS, &[REG_HW_ID], &[HW_ID]),
            Transaction::write_read(ADDRESS, &[REG_STATUS], &[STATUS_APP_VALID]),
            Transaction::write(ADDRESS, &[REG_APP_START]),
            Transaction::write_read(
                ADDRESS,
                &[REG_STATUS],
                &[STATUS_FW_MODE | STATUS_APP_VALID],
            ),
        ];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Ok(()));
        sensor.release().0.done();
    }

    #[test]
    fn init_fails_without_valid_application_firmware() {
        let script = [
            Transaction::write(ADDRESS, &[0xFF, 0x11, 0xE5, 0x72, 0x8A]),
            Transaction::write_read(ADDRESS, &[REG_HW_ID], &[HW_ID]),
            Transaction::write_read(ADDRESS, &[REG_STATUS], &[0x00]),
        ];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Err(Error::InvalidApplication));
        sensor.release().0.done();
    }

    #[test]
    fn data_ready_tracks_the_status_flag() {
        let script = [
            Transaction::write_read(
                ADDRESS,
                &[REG_STATUS],
                &[STATUS_FW_MODE | STATUS_APP_VALID],
            ),
            Transaction::write_read(
                ADDRESS,
                &[REG_STATUS],
                &[STATUS_FW_MODE | STATUS_APP_VALID | STATUS_DATA_READY],
            ),
        ];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.data_ready(), Ok(false));
        assert_eq!(sensor.data_ready(), Ok(true));
        sensor.release().0.done();
    }

    #[test]
    fn measurements_decode_all_result_fields() {
        let status = STATUS_FW_MODE | STATUS_APP_VALID | STATUS_DATA_READY;
        let script = [Transaction::write_read(
            ADDRESS,
            &[REG_ALG_RESULT_DATA],
            // eCO2 400 ppm, TVOC 25 ppb, current 22 uA, ADC 100.
            &[0x01, 0x90, 0x00, 0x19, status, 0x00, 0x58, 0x64],
        )];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(
            sensor.read_measurement(),
            Ok(Measurement {
                eco2_ppm: 400,
                tvoc_ppb: 25,
                raw_current_microamp: 22,
                raw_adc: 100,
            })
        );
        sensor.release().0.done();
    }

    #[test]
    fn stale_data_reports_no_data() {
        let status = STATUS_FW_MODE | STATUS_APP_VALID;
        let script = [Transaction::write_read(
            ADDRESS,
            &[REG_ALG_RESULT_DATA],
            &[0x01, 0x90, 0x00, 0x19, status, 0x00, 0x00, 0x00],
        )];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.read_measurement(), Err(Error::NoData));
        sensor.release().0.done();
    }

    #[test]
    fn device_errors_carry_the_error_id() {
        let status = STATUS_FW_MODE | STATUS_APP_VALID | STATUS_DATA_READY | STATUS_ERROR;
        let script = [Transaction::write_read(
            ADDRESS,
            &[REG_ALG_RESULT_DATA],
            &[0x01, 0x90, 0x00, 0x19, status, 0x02, 0x00, 0x00],
        )];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.read_measurement(), Err(Error::Controller(0x02)));
        sensor.release().0.done();
    }

    #[test]
    fn environment_updates_write_both_codes() {
        let script = [Transaction::write(
            ADDRESS,
            &[REG_ENV_DATA, 0x61, 0x00, 0x64, 0x00],
        )];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        sensor.set_environment(48_500, 25_000).unwrap();
        sensor.release().0.done();
    }

    #[test]
    fn baseline_round_trips() {
        let script = [
            Transaction::write_read(ADDRESS, &[REG_BASELINE], &[0x84, 0x73]),
            Transaction::write(ADDRESS, &[REG_BASELINE, 0x84, 0x73]),
        ];
        let mut sensor = Ccs811::new(Bus::new(&script), Delay::new());

        let baseline = sensor.baseline().unwrap();
        assert_eq!(baseline, 0x8473);
        sensor.restore_baseline(baseline).unwrap();
        sensor.release().0.done();
    }
}
