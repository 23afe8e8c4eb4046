//! Si1133 UV index and ambient light sensor driver.
//!
//! The part is driven through a small mailbox protocol: parameters live in an
//! internal parameter table written via the HOSTIN0/COMMAND registers, and
//! every command is acknowledged by a 4-bit counter in RESPONSE0. The driver
//! configures two channels, a 24-bit large-white photodiode channel and a
//! 16-bit UV channel, and reads both with forced (on-demand) conversions.
//!
//! Readings are raw ADC counts. Converting counts to lux or UV index depends
//! on the optics above the package, so that mapping stays with the caller.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// Fixed bus address.
pub const ADDRESS: u8 = 0x55;

const REG_PART_ID: u8 = 0x00;
const REG_HOSTIN0: u8 = 0x0A;
const REG_COMMAND: u8 = 0x0B;
const REG_RESPONSE0: u8 = 0x11;
const REG_IRQ_STATUS: u8 = 0x12;
const REG_HOSTOUT0: u8 = 0x13;

const PART_ID: u8 = 0x33;

const RESPONSE_CMD_ERR: u8 = 0x10;
const RESPONSE_CTR_MASK: u8 = 0x0F;

const CMD_RESET_SW: u8 = 0x01;
const CMD_FORCE: u8 = 0x11;
const CMD_PAUSE: u8 = 0x12;
const CMD_START: u8 = 0x13;
const CMD_PARAM_SET: u8 = 0x80;

const PARAM_CH_LIST: u8 = 0x01;
const PARAM_ADCCONFIG0: u8 = 0x02;
const PARAM_ADCSENS0: u8 = 0x03;
const PARAM_ADCPOST0: u8 = 0x04;
const PARAM_MEASCONFIG0: u8 = 0x05;
const PARAM_ADCCONFIG1: u8 = 0x06;
const PARAM_ADCSENS1: u8 = 0x07;
const PARAM_ADCPOST1: u8 = 0x08;
const PARAM_MEASCONFIG1: u8 = 0x09;

const ADCMUX_LARGE_WHITE: u8 = 0x0D;
const ADCMUX_UV: u8 = 0x18;
const ADCPOST_24BIT_OUT: u8 = 0x40;

/// Channels 0 and 1.
const CHANNEL_MASK: u8 = 0b0000_0011;

const RESET_SETTLE_MS: u32 = 10;
const POLL_ATTEMPTS: usize = 10;

/// Errors returned by the Si1133 driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// PART_ID readback did not identify an Si1133.
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    /// The device flagged a command error; the payload is its error code.
    #[error("device rejected command (code {0:#03x})")]
    Command(u8),
    /// Command acknowledge or conversion never arrived.
    #[error("timed out waiting for the device")]
    Timeout,
}

/// Raw counts from one forced conversion of both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Large white photodiode, 24-bit signed.
    pub white_counts: i32,
    /// UV photodiode, 16-bit signed.
    pub uv_counts: i32,
}

/// Si1133 driver over a blocking I2C bus.
pub struct Si1133<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C, D, E> Si1133<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    /// Reset the part, verify its ID and program the two demo channels.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        // A raw reset command, not [`send_command`]: the counter resets too.
        self.i2c
            .write(ADDRESS, &[REG_COMMAND, CMD_RESET_SW])
            .map_err(Error::Bus)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        let mut id = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[REG_PART_ID], &mut id)
            .map_err(Error::Bus)?;
        if id[0] != PART_ID {
            return Err(Error::UnknownDevice(id[0]));
        }

        self.set_parameter(PARAM_CH_LIST, CHANNEL_MASK)?;
        // Channel 0: large white photodiode, 24-bit output, forced only.
        self.set_parameter(PARAM_ADCCONFIG0, ADCMUX_LARGE_WHITE)?;
        self.set_parameter(PARAM_ADCSENS0, 0x00)?;
        self.set_parameter(PARAM_ADCPOST0, ADCPOST_24BIT_OUT)?;
        self.set_parameter(PARAM_MEASCONFIG0, 0x00)?;
        // Channel 1: UV photodiode, 16-bit output, forced only.
        self.set_parameter(PARAM_ADCCONFIG1, ADCMUX_UV)?;
        self.set_parameter(PARAM_ADCSENS1, 0x00)?;
        self.set_parameter(PARAM_ADCPOST1, 0x00)?;
        self.set_parameter(PARAM_MEASCONFIG1, 0x00)
    }

    /// Force one conversion of both channels and read the results.
    pub fn measure(&mut self) -> Result<Measurement, Error<E>> {
        self.send_command(CMD_FORCE)?;

        // Both channel-done flags must set before the outputs are valid.
        let mut ready = false;
        for _ in 0..POLL_ATTEMPTS {
            let mut irq = [0u8; 1];
            self.i2c
                .write_read(ADDRESS, &[REG_IRQ_STATUS], &mut irq)
                .map_err(Error::Bus)?;
            if irq[0] & CHANNEL_MASK == CHANNEL_MASK {
                ready = true;
                break;
            }
            self.delay.delay_us(500);
        }
        if !ready {
            return Err(Error::Timeout);
        }

        let mut out = [0u8; 5];
        self.i2c
            .write_read(ADDRESS, &[REG_HOSTOUT0], &mut out)
            .map_err(Error::Bus)?;
        Ok(Measurement {
            white_counts: decode_white([out[0], out[1], out[2]]),
            uv_counts: i32::from(i16::from_be_bytes([out[3], out[4]])),
        })
    }

    /// Begin autonomous measurements of the configured channels.
    pub fn start(&mut self) -> Result<(), Error<E>> {
        self.send_command(CMD_START)
    }

    /// Halt autonomous measurements. Forced conversions still work.
    pub fn pause(&mut self) -> Result<(), Error<E>> {
        self.send_command(CMD_PAUSE)
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn send_command(&mut self, command: u8) -> Result<(), Error<E>> {
        let before = self.read_response()? & RESPONSE_CTR_MASK;
        self.i2c
            .write(ADDRESS, &[REG_COMMAND, command])
            .map_err(Error::Bus)?;
        self.wait_for_acknowledge(before)
    }

    /// HOSTIN0 and COMMAND are adjacent, so one burst carries the parameter
    /// value and the PARAM_SET command together.
    fn set_parameter(&mut self, parameter: u8, value: u8) -> Result<(), Error<E>> {
        let before = self.read_response()? & RESPONSE_CTR_MASK;
        self.i2c
            .write(ADDRESS, &[REG_HOSTIN0, value, CMD_PARAM_SET | parameter])
            .map_err(Error::Bus)?;
        self.wait_for_acknowledge(before)
    }

    /// The device acknowledges a command by bumping the 4-bit counter in
    /// RESPONSE0, or flags CMD_ERR with an error code in the counter field.
    fn wait_for_acknowledge(&mut self, before: u8) -> Result<(), Error<E>> {
        for _ in 0..POLL_ATTEMPTS {
            let response = self.read_response()?;
            if response & RESPONSE_CMD_ERR != 0 {
                return Err(Error::Command(response & RESPONSE_CTR_MASK));
            }
            if response & RESPONSE_CTR_MASK != before {
                return Ok(());
            }
            self.delay.delay_us(100);
        }
        Err(Error::Timeout)
    }

    fn read_response(&mut self) -> Result<u8, Error<E>> {
        let mut response = [0u8; 1];
        self.i2c
            .write_read(ADDRESS, &[REG_RESPONSE0], &mut response)
            .map_err(Error::Bus)?;
        Ok(response[0])
    }
}

/// Sign-extend the 24-bit big-endian channel 0 output.
fn decode_white(bytes: [u8; 3]) -> i32 {
    (i32::from(bytes[0]) << 24 | i32::from(bytes[1]) << 16 | i32::from(bytes[2]) << 8) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{Bus, Delay, Transaction};

    type Script = heapless::Vec<Transaction, 64>;

    /// One parameter write: response counter read, burst write, counter
    /// readback showing the increment.
    fn push_param_set(script: &mut Script, counter: &mut u8, parameter: u8, value: u8) {
        script
            .push(Transaction::write_read(
                ADDRESS,
                &[REG_RESPONSE0],
                &[*counter],
            ))
            .unwrap();
        script
            .push(Transaction::write(
                ADDRESS,
                &[REG_HOSTIN0, value, CMD_PARAM_SET | parameter],
            ))
            .unwrap();
        *counter = (*counter + 1) & RESPONSE_CTR_MASK;
        script
            .push(Transaction::write_read(
                ADDRESS,
                &[REG_RESPONSE0],
                &[*counter],
            ))
            .unwrap();
    }

    #[test]
    fn white_channel_output_is_sign_extended() {
        assert_eq!(decode_white([0x01, 0x86, 0xA0]), 100_000);
        assert_eq!(decode_white([0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(decode_white([0x7F, 0xFF, 0xFF]), 8_388_607);
    }

    #[test]
    fn init_verifies_the_part_and_programs_both_channels() {
        let mut script = Script::new();
        script
            .push(Transaction::write(ADDRESS, &[REG_COMMAND, CMD_RESET_SW]))
            .unwrap();
        script
            .push(Transaction::write_read(ADDRESS, &[REG_PART_ID], &[PART_ID]))
            .unwrap();
        let mut counter = 0;
        push_param_set(&mut script, &mut counter, PARAM_CH_LIST, CHANNEL_MASK);
        push_param_set(&mut script, &mut counter, PARAM_ADCCONFIG0, ADCMUX_LARGE_WHITE);
        push_param_set(&mut script, &mut counter, PARAM_ADCSENS0, 0x00);
        push_param_set(&mut script, &mut counter, PARAM_ADCPOST0, ADCPOST_24BIT_OUT);
        push_param_set(&mut script, &mut counter, PARAM_MEASCONFIG0, 0x00);
        push_param_set(&mut script, &mut counter, PARAM_ADCCONFIG1, ADCMUX_UV);
        push_param_set(&mut script, &mut counter, PARAM_ADCSENS1, 0x00);
        push_param_set(&mut script, &mut counter, PARAM_ADCPOST1, 0x00);
        push_param_set(&mut script, &mut counter, PARAM_MEASCONFIG1, 0x00);
        let mut sensor = Si1133::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Ok(()));
        sensor.release().0.done();
    }

    #[test]
    fn init_rejects_unknown_parts() {
        let script = [
            Transaction::write(ADDRESS, &[REG_COMMAND, CMD_RESET_SW]),
            Transaction::write_read(ADDRESS, &[REG_PART_ID], &[0x32]),
        ];
        let mut sensor = Si1133::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Err(Error::UnknownDevice(0x32)));
        sensor.release().0.done();
    }

    #[test]
    fn measure_forces_a_conversion_and_reads_both_channels() {
        let script = [
            Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[0x05]),
            Transaction::write(ADDRESS, &[REG_COMMAND, CMD_FORCE]),
            Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[0x06]),
            // First poll: only channel 0 done. Second: both.
            Transaction::write_read(ADDRESS, &[REG_IRQ_STATUS], &[0x01]),
            Transaction::write_read(ADDRESS, &[REG_IRQ_STATUS], &[0x03]),
            Transaction::write_read(
                ADDRESS,
                &[REG_HOSTOUT0],
                &[0x01, 0x86, 0xA0, 0x00, 0x7B],
            ),
        ];
        let mut sensor = Si1133::new(Bus::new(&script), Delay::new());

        assert_eq!(
            sensor.measure(),
            Ok(Measurement {
                white_counts: 100_000,
                uv_counts: 123,
            })
        );
        sensor.release().0.done();
    }

    #[test]
    fn command_errors_carry_the_device_error_code() {
        let script = [
            Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[0x05]),
            Transaction::write(ADDRESS, &[REG_COMMAND, CMD_FORCE]),
            // CMD_ERR set, code 0x2 (ADC saturation).
            Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[RESPONSE_CMD_ERR | 0x02]),
        ];
        let mut sensor = Si1133::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.measure(), Err(Error::Command(0x02)));
        sensor.release().0.done();
    }

    #[test]
    fn missing_acknowledge_times_out() {
        let mut script = Script::new();
        script
            .push(Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[0x05]))
            .unwrap();
        script
            .push(Transaction::write(ADDRESS, &[REG_COMMAND, CMD_PAUSE]))
            .unwrap();
        for _ in 0..POLL_ATTEMPTS {
            script
                .push(Transaction::write_read(ADDRESS, &[REG_RESPONSE0], &[0x05]))
                .unwrap();
        }
        let mut sensor = Si1133::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.pause(), Err(Error::Timeout));
        sensor.release().0.done();
    }
}
