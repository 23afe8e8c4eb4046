//! Si72xx Hall-effect kit driver: one-shot reads that wake the part,
//! convert once and put it straight back to sleep.
//!
//! This is the low-power counterpart to the resident [`si7210`] driver. The
//! eval kit straps up to four parts on one bus (0x30..=0x33); each call here
//! is a complete wake/measure/sleep cycle so parts spend almost all of their
//! time asleep or on the sleep timer.
//!
//! [`si7210`]: super::si7210

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// The four strap addresses populated on the eval kit.
pub const KIT_ADDRESSES: [u8; 4] = [0x30, 0x31, 0x32, 0x33];

const REG_HREVID: u8 = 0xC0;
const REG_DSPSIGM: u8 = 0xC1;
const REG_DSPSIGSEL: u8 = 0xC3;
const REG_POWER_CTRL: u8 = 0xC4;
const REG_CTRL3: u8 = 0xC8;
const REG_OTP_ADDR: u8 = 0xE1;
const REG_OTP_DATA: u8 = 0xE2;
const REG_OTP_CTRL: u8 = 0xE3;

const DSPSIG_FRESH: u8 = 0x80;
const DSPSIGSEL_FIELD: u8 = 0x00;
const DSPSIGSEL_TEMPERATURE: u8 = 0x01;

const POWER_CTRL_USESTORE: u8 = 0x08;
const POWER_CTRL_ONEBURST: u8 = 0x04;
const POWER_CTRL_SLEEP: u8 = 0x01;

const CTRL3_SLTIMEENA: u8 = 0x01;

const OTP_CTRL_READ_EN: u8 = 0x02;
const OTP_TEMP_OFFSET: u8 = 0x1D;
const OTP_TEMP_GAIN: u8 = 0x1E;

const POLL_ATTEMPTS: usize = 10;

/// Full-scale range of the part variant being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scale {
    /// +/-20.47 mT, 1.25 uT/LSB.
    #[default]
    TwentyMillitesla,
    /// +/-204.7 mT, 12.5 uT/LSB.
    TwoHundredMillitesla,
}

/// How the part sleeps between one-shot reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepMode {
    /// Deep sleep. Only an I2C transaction wakes the part.
    #[default]
    Deep,
    /// Sleep-timer mode. The part wakes itself periodically to compare the
    /// field against the programmed thresholds.
    Timed,
}

/// Part and die revision, from the hardware revision register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub chip_id: u8,
    pub revision: u8,
}

/// Errors returned by the Si72xx kit driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// The fresh-data flag never set during a one-burst conversion.
    #[error("timed out waiting for conversion")]
    Timeout,
}

/// One-shot driver for a single kit position.
pub struct Si72xx<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C, D, E> Si72xx<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self { i2c, delay, address }
    }

    /// Wake the part from sleep. The address byte alone is enough.
    pub fn wake(&mut self) -> Result<(), Error<E>> {
        self.i2c.write(self.address, &[]).map_err(Error::Bus)?;
        self.delay.delay_us(10);
        Ok(())
    }

    /// Wake, run one field conversion, sleep again.
    ///
    /// Returns the field strength in uT.
    pub fn read_field_and_sleep(
        &mut self,
        scale: Scale,
        sleep: SleepMode,
    ) -> Result<i32, Error<E>> {
        self.wake()?;
        let raw = self.one_burst(DSPSIGSEL_FIELD)?;
        self.sleep(sleep)?;

        let field = i32::from(raw) - 16_384;
        Ok(match scale {
            Scale::TwentyMillitesla => field * 5 / 4,
            Scale::TwoHundredMillitesla => field * 25 / 2,
        })
    }

    /// Wake, read the die temperature, sleep again.
    ///
    /// Returns milli-degrees Celsius straight off the base curve, without
    /// the per-part trim. Good enough for plausibility checks.
    pub fn read_temperature_and_sleep(&mut self, sleep: SleepMode) -> Result<i32, Error<E>> {
        self.wake()?;
        let raw = self.one_burst(DSPSIGSEL_TEMPERATURE)?;
        self.sleep(sleep)?;

        Ok(convert_temperature(raw >> 3, 0, 0))
    }

    /// Wake, read the die temperature, sleep again.
    ///
    /// Applies the per-part gain and offset trim from OTP and returns
    /// milli-degrees Celsius.
    pub fn read_corrected_temperature_and_sleep(
        &mut self,
        sleep: SleepMode,
    ) -> Result<i32, Error<E>> {
        self.wake()?;
        let offset = self.read_otp(OTP_TEMP_OFFSET)? as i8;
        let gain = self.read_otp(OTP_TEMP_GAIN)? as i8;

        let raw = self.one_burst(DSPSIGSEL_TEMPERATURE)?;
        self.sleep(sleep)?;

        Ok(convert_temperature(raw >> 3, offset, gain))
    }

    /// Wake, read the part id and revision, sleep again.
    pub fn identify_and_sleep(&mut self, sleep: SleepMode) -> Result<Identity, Error<E>> {
        self.wake()?;

        let mut hrevid = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_HREVID], &mut hrevid)
            .map_err(Error::Bus)?;
        self.sleep(sleep)?;

        Ok(Identity {
            chip_id: hrevid[0] >> 4,
            revision: hrevid[0] & 0x0F,
        })
    }

    /// Put the part to sleep without measuring.
    pub fn sleep(&mut self, mode: SleepMode) -> Result<(), Error<E>> {
        let mut ctrl3 = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_CTRL3], &mut ctrl3)
            .map_err(Error::Bus)?;

        match mode {
            SleepMode::Timed => {
                self.write_register(REG_CTRL3, ctrl3[0] | CTRL3_SLTIMEENA)?;
                // Stop bit cleared: the sleep timer restarts the idle loop.
                self.write_register(REG_POWER_CTRL, POWER_CTRL_USESTORE)
            }
            SleepMode::Deep => {
                self.write_register(REG_CTRL3, ctrl3[0] & !CTRL3_SLTIMEENA)?;
                self.write_register(REG_POWER_CTRL, POWER_CTRL_USESTORE | POWER_CTRL_SLEEP)
            }
        }
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Select a DSP channel, trigger one conversion, poll the fresh flag.
    /// Returns the raw 15-bit DSP output.
    fn one_burst(&mut self, channel: u8) -> Result<u16, Error<E>> {
        self.write_register(REG_DSPSIGSEL, channel)?;
        self.write_register(REG_POWER_CTRL, POWER_CTRL_ONEBURST)?;

        for _ in 0..POLL_ATTEMPTS {
            let mut sig = [0u8; 2];
            self.i2c
                .write_read(self.address, &[REG_DSPSIGM], &mut sig)
                .map_err(Error::Bus)?;
            if sig[0] & DSPSIG_FRESH != 0 {
                return Ok((u16::from(sig[0] & 0x7F) << 8) | u16::from(sig[1]));
            }
            self.delay.delay_us(100);
        }
        Err(Error::Timeout)
    }

    fn read_otp(&mut self, otp_address: u8) -> Result<u8, Error<E>> {
        self.write_register(REG_OTP_ADDR, otp_address)?;
        self.write_register(REG_OTP_CTRL, OTP_CTRL_READ_EN)?;

        let mut data = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_OTP_DATA], &mut data)
            .map_err(Error::Bus)?;
        Ok(data[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), Error<E>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(Error::Bus)
    }
}

/// Trimmed die temperature in milli-degrees Celsius.
///
/// Base curve `T = -3.83e-6 * v^2 + 0.16094 * v - 279.80` over the 12-bit
/// code `v`, then the OTP trim: `T' = T * (1 + gain / 2048) + offset / 16`.
fn convert_temperature(code: u16, offset: i8, gain: i8) -> i32 {
    let v = i64::from(code);
    let base = 16_094 * v / 100 - 383 * v * v / 100_000 - 279_800;
    let trimmed = base * (2_048 + i64::from(gain)) / 2_048 + i64::from(offset) * 1_000 / 16;
    trimmed as i32
}
