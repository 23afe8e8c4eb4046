//! BMP280 barometric pressure and temperature sensor driver.
//!
//! Measurements run in forced mode: each call triggers one conversion, waits
//! out the oversampling-dependent conversion time and reads both channels.
//! Raw readings pass through the vendor's integer compensation arithmetic
//! using the per-part trim values read from NVM during [`Bmp280::init`].

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use thiserror_no_std::Error;

/// Bus address with SDO strapped low. Strapping it high gives 0x77.
pub const ADDRESS: u8 = 0x76;

const REG_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS_MSB: u8 = 0xF7;
const REG_CALIBRATION: u8 = 0x88;

/// The only ID this driver accepts. BMP280 samples shipped 0x56..=0x58; the
/// production value is 0x58.
const CHIP_ID: u8 = 0x58;
const RESET_WORD: u8 = 0xB6;

const STATUS_MEASURING: u8 = 0x08;
const MODE_FORCED: u8 = 0b01;

const RESET_SETTLE_MS: u32 = 2;
const POLL_ATTEMPTS: usize = 10;

/// Oversampling setting for either channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Oversampling {
    Skip,
    #[default]
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    fn bits(self) -> u8 {
        match self {
            Oversampling::Skip => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 3,
            Oversampling::X8 => 4,
            Oversampling::X16 => 5,
        }
    }

    fn factor(self) -> u32 {
        match self {
            Oversampling::Skip => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }
}

/// IIR filter coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Off,
    X2,
    X4,
    X8,
    X16,
}

impl Filter {
    fn bits(self) -> u8 {
        match self {
            Filter::Off => 0,
            Filter::X2 => 1,
            Filter::X4 => 2,
            Filter::X8 => 3,
            Filter::X16 => 4,
        }
    }
}

/// Measurement settings applied by [`Bmp280::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Config {
    pub temperature_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub filter: Filter,
}

/// Errors returned by the BMP280 driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// Bus transfer failed.
    #[error("i2c bus error")]
    Bus(E),
    /// Chip ID readback did not identify a BMP280.
    #[error("unknown device id {0:#04x}")]
    UnknownDevice(u8),
    /// [`Bmp280::measure`] was called before [`Bmp280::init`].
    #[error("calibration not loaded")]
    NotInitialized,
    /// The stored trim values cannot compensate a reading (dig_p1 is zero).
    #[error("invalid calibration data")]
    InvalidCalibration,
    /// The conversion never finished.
    #[error("timed out waiting for conversion")]
    Timeout,
}

/// One compensated reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub temperature_milli_celsius: i32,
    pub pressure_pascal: u32,
}

/// Per-part trim values from NVM, 0x88..=0x9F little-endian.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
    dig_p1: u16,
    dig_p2: i16,
    dig_p3: i16,
    dig_p4: i16,
    dig_p5: i16,
    dig_p6: i16,
    dig_p7: i16,
    dig_p8: i16,
    dig_p9: i16,
}

impl Calibration {
    fn from_bytes(bytes: &[u8; 24]) -> Self {
        fn unsigned(bytes: &[u8; 24], at: usize) -> u16 {
            u16::from_le_bytes([bytes[at], bytes[at + 1]])
        }
        fn signed(bytes: &[u8; 24], at: usize) -> i16 {
            i16::from_le_bytes([bytes[at], bytes[at + 1]])
        }
        Self {
            dig_t1: unsigned(bytes, 0),
            dig_t2: signed(bytes, 2),
            dig_t3: signed(bytes, 4),
            dig_p1: unsigned(bytes, 6),
            dig_p2: signed(bytes, 8),
            dig_p3: signed(bytes, 10),
            dig_p4: signed(bytes, 12),
            dig_p5: signed(bytes, 14),
            dig_p6: signed(bytes, 16),
            dig_p7: signed(bytes, 18),
            dig_p8: signed(bytes, 20),
            dig_p9: signed(bytes, 22),
        }
    }
}

/// BMP280 driver over a blocking I2C bus.
pub struct Bmp280<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    config: Config,
    calibration: Option<Calibration>,
}

impl<I2C, D, E> Bmp280<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
{
    pub const fn new(i2c: I2C, delay: D) -> Self {
        Self::with_address(i2c, delay, ADDRESS)
    }

    pub const fn with_address(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            config: Config {
                temperature_oversampling: Oversampling::X1,
                pressure_oversampling: Oversampling::X1,
                filter: Filter::Off,
            },
            calibration: None,
        }
    }

    /// Verify the chip ID, soft-reset the part and load its trim values.
    pub fn init(&mut self) -> Result<(), Error<E>> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_ID], &mut id)
            .map_err(Error::Bus)?;
        if id[0] != CHIP_ID {
            return Err(Error::UnknownDevice(id[0]));
        }

        self.i2c
            .write(self.address, &[REG_RESET, RESET_WORD])
            .map_err(Error::Bus)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        let mut trim = [0u8; 24];
        self.i2c
            .write_read(self.address, &[REG_CALIBRATION], &mut trim)
            .map_err(Error::Bus)?;
        self.calibration = Some(Calibration::from_bytes(&trim));
        Ok(())
    }

    /// Program oversampling and filtering for subsequent measurements.
    pub fn configure(&mut self, config: Config) -> Result<(), Error<E>> {
        // Standby bits stay zero; forced mode never uses them.
        self.i2c
            .write(self.address, &[REG_CONFIG, config.filter.bits() << 2])
            .map_err(Error::Bus)?;
        self.config = config;
        Ok(())
    }

    /// Run one forced conversion and return the compensated reading.
    pub fn measure(&mut self) -> Result<Measurement, Error<E>> {
        let calibration = self.calibration.ok_or(Error::NotInitialized)?;

        let ctrl = (self.config.temperature_oversampling.bits() << 5)
            | (self.config.pressure_oversampling.bits() << 2)
            | MODE_FORCED;
        self.i2c
            .write(self.address, &[REG_CTRL_MEAS, ctrl])
            .map_err(Error::Bus)?;
        self.delay.delay_ms(measurement_delay_ms(self.config));

        let mut busy = true;
        for _ in 0..POLL_ATTEMPTS {
            let mut status = [0u8; 1];
            self.i2c
                .write_read(self.address, &[REG_STATUS], &mut status)
                .map_err(Error::Bus)?;
            if status[0] & STATUS_MEASURING == 0 {
                busy = false;
                break;
            }
            self.delay.delay_ms(1);
        }
        if busy {
            return Err(Error::Timeout);
        }

        let mut data = [0u8; 6];
        self.i2c
            .write_read(self.address, &[REG_PRESS_MSB], &mut data)
            .map_err(Error::Bus)?;

        let adc_pressure = unpack_reading(&data[0..3]);
        let adc_temperature = unpack_reading(&data[3..6]);

        let (centi_celsius, t_fine) = compensate_temperature(adc_temperature, &calibration);
        let pressure_q8 = compensate_pressure(adc_pressure, t_fine, &calibration)
            .ok_or(Error::InvalidCalibration)?;

        Ok(Measurement {
            temperature_milli_celsius: centi_celsius * 10,
            pressure_pascal: (pressure_q8 >> 8) as u32,
        })
    }

    /// Release the bus handle and delay.
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }
}

/// Typical conversion time for one forced measurement, rounded up to ms.
fn measurement_delay_ms(config: Config) -> u32 {
    let temperature = config.temperature_oversampling.factor();
    let pressure = config.pressure_oversampling.factor();
    let mut micros = 1_250 + 2_300 * temperature;
    if pressure > 0 {
        micros += 2_300 * pressure + 575;
    }
    micros.div_ceil(1_000)
}

/// 20-bit reading from the three raw register bytes.
fn unpack_reading(bytes: &[u8]) -> i32 {
    (i32::from(bytes[0]) << 12) | (i32::from(bytes[1]) << 4) | (i32::from(bytes[2]) >> 4)
}

/// Vendor temperature compensation. Returns hundredths of a degree Celsius
/// plus the `t_fine` carrier for the pressure arithmetic.
fn compensate_temperature(adc: i32, calibration: &Calibration) -> (i32, i32) {
    let t1 = i32::from(calibration.dig_t1);
    let t2 = i32::from(calibration.dig_t2);
    let t3 = i32::from(calibration.dig_t3);

    let var1 = (((adc >> 3) - (t1 << 1)) * t2) >> 11;
    let var2 = ((((adc >> 4) - t1) * ((adc >> 4) - t1)) >> 12) * t3 >> 14;
    let t_fine = var1 + var2;
    ((t_fine * 5 + 128) >> 8, t_fine)
}

/// Vendor pressure compensation in Q24.8 pascal. `None` when the trim data
/// would divide by zero.
fn compensate_pressure(adc: i32, t_fine: i32, calibration: &Calibration) -> Option<i64> {
    let p1 = i64::from(calibration.dig_p1);
    let p2 = i64::from(calibration.dig_p2);
    let p3 = i64::from(calibration.dig_p3);
    let p4 = i64::from(calibration.dig_p4);
    let p5 = i64::from(calibration.dig_p5);
    let p6 = i64::from(calibration.dig_p6);
    let p7 = i64::from(calibration.dig_p7);
    let p8 = i64::from(calibration.dig_p8);
    let p9 = i64::from(calibration.dig_p9);

    let mut var1 = i64::from(t_fine) - 128_000;
    let mut var2 = var1 * var1 * p6;
    var2 += (var1 * p5) << 17;
    var2 += p4 << 35;
    var1 = ((var1 * var1 * p3) >> 8) + ((var1 * p2) << 12);
    var1 = (((1i64 << 47) + var1) * p1) >> 33;
    if var1 == 0 {
        return None;
    }

    let mut pressure = 1_048_576 - i64::from(adc);
    pressure = (((pressure << 31) - var2) * 3_125) / var1;
    var1 = (p9 * (pressure >> 13) * (pressure >> 13)) >> 25;
    var2 = (p8 * pressure) >> 19;
    Some(((pressure + var1 + var2) >> 8) + (p7 << 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{Bus, Delay, Transaction};

    /// Trim values from the datasheet's worked compensation example.
    const TRIM: [u8; 24] = [
        0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C,
        0x00, 0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
    ];

    fn datasheet_calibration() -> Calibration {
        let calibration = Calibration::from_bytes(&TRIM);
        assert_eq!(calibration.dig_t1, 27_504);
        assert_eq!(calibration.dig_t2, 26_435);
        assert_eq!(calibration.dig_t3, -1_000);
        assert_eq!(calibration.dig_p1, 36_477);
        assert_eq!(calibration.dig_p9, 6_000);
        calibration
    }

    #[test]
    fn compensation_reproduces_the_datasheet_example() {
        let calibration = datasheet_calibration();

        let (centi, t_fine) = compensate_temperature(519_888, &calibration);
        assert_eq!(centi, 2_508);

        let pressure_q8 = compensate_pressure(415_148, t_fine, &calibration).unwrap();
        assert_eq!(pressure_q8, 25_767_236);
        assert_eq!(pressure_q8 >> 8, 100_653);
    }

    #[test]
    fn pressure_compensation_fails_cleanly_on_zeroed_trim() {
        let calibration = Calibration::from_bytes(&[0u8; 24]);
        assert_eq!(compensate_pressure(415_148, 100_000, &calibration), None);
    }

    #[test]
    fn conversion_time_tracks_oversampling() {
        let fast = Config {
            temperature_oversampling: Oversampling::X1,
            pressure_oversampling: Oversampling::X1,
            filter: Filter::Off,
        };
        assert_eq!(measurement_delay_ms(fast), 7);

        let slow = Config {
            temperature_oversampling: Oversampling::X2,
            pressure_oversampling: Oversampling::X16,
            filter: Filter::X4,
        };
        assert_eq!(measurement_delay_ms(slow), 44);
    }

    #[test]
    fn init_loads_the_trim_table() {
        let script = [
            Transaction::write_read(ADDRESS, &[REG_ID], &[CHIP_ID]),
            Transaction::write(ADDRESS, &[REG_RESET, RESET_WORD]),
            Transaction::write_read(ADDRESS, &[REG_CALIBRATION], &TRIM),
        ];
        let mut sensor = Bmp280::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Ok(()));
        assert_eq!(sensor.calibration.unwrap().dig_p1, 36_477);
        sensor.release().0.done();
    }

    #[test]
    fn init_rejects_bme280_and_friends() {
        let script = [Transaction::write_read(ADDRESS, &[REG_ID], &[0x60])];
        let mut sensor = Bmp280::new(Bus::new(&script), Delay::new());

        assert_eq!(sensor.init(), Err(Error::UnknownDevice(0x60)));
        sensor.release().0.done();
    }

    #[test]
    fn measure_runs_a_forced_conversion() {
        let script = [
            Transaction::write_read(ADDRESS, &[REG_ID], &[CHIP_ID]),
            Transaction::write(ADDRESS, &[REG_RESET, RESET_WORD]),
            Transaction::write_read(ADDRESS, &[REG_CALIBRATION], &TRIM),
            Transaction::write(ADDRESS, &[REG_CONFIG, Filter::X4.bits() << 2]),
            // osrs_t x2, osrs_p x16, forced.
            Transaction::write(ADDRESS, &[REG_CTRL_MEAS, 0x55]),
            Transaction::write_read(ADDRESS, &[REG_STATUS], &[0x00]),
            // adc_P = 415148, adc_T = 519888.
            Transaction::write_read(
                ADDRESS,
                &[REG_PRESS_MSB],
                &[0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00],
            ),
        ];
        let mut sensor = Bmp280::new(Bus::new(&script), Delay::new());

        sensor.init().unwrap();
        sensor
            .configure(Config {
                temperature_oversampling: Oversampling::X2,
                pressure_oversampling: Oversampling::X16,
                filter: Filter::X4,
            })
            .unwrap();
        assert_eq!(
            sensor.measure(),
            Ok(Measurement {
                temperature_milli_celsius: 25_080,
                pressure_pascal: 100_653,
            })
        );
        sensor.release().0.done();
    }

    #[test]
    fn measure_without_init_reports_missing_calibration() {
        let mut sensor = Bmp280::new(Bus::new(&[]), Delay::new());
        assert_eq!(sensor.measure(), Err(Error::NotInitialized));
    }

    #[test]
    fn stuck_conversions_time_out() {
        let mut script: heapless::Vec<Transaction, 32> = heapless::Vec::new();
        script
            .push(Transaction::write_read(ADDRESS, &[REG_ID], &[CHIP_ID]))
            .unwrap();
        script
            .push(Transaction::write(ADDRESS, &[REG_RESET, RESET_WORD]))
            .unwrap();
        script
            .push(Transaction::write_read(ADDRESS, &[REG_CALIBRATION], &TRIM))
            .unwrap();
        script
            .push(Transaction::write(
                ADDRESS,
                &[REG_CTRL_MEAS, (1 << 5) | (1 << 2) | MODE_FORCED],
            ))
            .unwrap();
        for _ in 0..POLL_ATTEMPTS {
            script
                .push(Transaction::write_read(
                    ADDRESS,
                    &[REG_STATUS],
                    &[STATUS_MEASURING],
                ))
                .unwrap();
        }
        let mut sensor = Bmp280::new(Bus::new(&script), Delay::new());

        sensor.init().unwrap();
        assert_eq!(sensor.measure(), Err(Error::Timeout));
        sensor.release().0.done();
    }
}
