//! Blocking I2C bus sharing
//!
//! A single polled I2C master serves every sensor on the board. This module
//! wraps the concrete bus in a critical-section mutex and hands out
//! lightweight device handles so each driver can own "its" bus endpoint.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::i2c::{ErrorType, I2c, Operation};

/// Shared blocking I2C bus.
///
/// Owns the concrete bus implementation behind a `critical_section::Mutex`,
/// allowing several drivers to hold [`SharedI2cDevice`] handles on the same
/// physical bus. Every transfer locks the bus for its whole duration, so
/// transactions from different drivers never interleave mid-transfer.
///
/// # Example
///
/// ```no_run
/// # fn demo<B: embedded_hal::i2c::I2c>(i2c: B) {
/// use fieldnode_core::bus::SharedI2cBus;
///
/// let bus = SharedI2cBus::new(i2c);
/// let for_humidity_sensor = bus.device();
/// let for_pressure_sensor = bus.device();
/// # }
/// ```
pub struct SharedI2cBus<T> {
    bus: Mutex<RefCell<T>>,
}

impl<T> SharedI2cBus<T> {
    /// Wrap a concrete I2C bus for sharing.
    #[inline]
    pub const fn new(bus: T) -> Self {
        Self {
            bus: Mutex::new(RefCell::new(bus)),
        }
    }

    /// Create a new device handle on this bus.
    #[inline]
    pub const fn device(&self) -> SharedI2cDevice<'_, T> {
        SharedI2cDevice { bus: &self.bus }
    }

    /// Unwrap the shared bus, returning the concrete implementation.
    pub fn release(self) -> T {
        self.bus.into_inner().into_inner()
    }
}

/// Device handle on a [`SharedI2cBus`].
///
/// Implements [`embedded_hal::i2c::I2c`] by locking the underlying bus for
/// each transfer. Handles are cheap to create and carry no device state of
/// their own.
pub struct SharedI2cDevice<'a, T> {
    bus: &'a Mutex<RefCell<T>>,
}

impl<T> ErrorType for SharedI2cDevice<'_, T>
where
    T: ErrorType,
{
    type Error = T::Error;
}

impl<T> I2c for SharedI2cDevice<'_, T>
where
    T: I2c,
{
    /// Reads bytes from the bus while holding the lock.
    #[inline]
    fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).read(address, read))
    }

    /// Writes bytes to the bus while holding the lock.
    #[inline]
    fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).write(address, write))
    }

    /// Performs a write-then-read transfer while holding the lock.
    #[inline]
    fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).write_read(address, write, read))
    }

    /// Executes multiple operations as a single transaction while holding
    /// the lock.
    #[inline]
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        critical_section::with(|cs| self.bus.borrow_ref_mut(cs).transaction(address, operations))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted I2C bus for driver tests.
    //!
    //! A test builds the exact transcript of transfers a driver call is
    //! expected to issue; the mock panics on any divergence and `done()`
    //! asserts the transcript was fully consumed. Individual entries can be
    //! marked failing to exercise bus-error paths.

    use embedded_hal::i2c::{Error, ErrorKind, ErrorType, I2c, Operation};

    const DATA_CAPACITY: usize = 40;
    const SCRIPT_CAPACITY: usize = 64;

    /// Injected bus failure (stands in for a NACK or arbitration loss).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Fault;

    impl Error for Fault {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Write,
        Read,
        WriteRead,
    }

    /// One expected bus transaction.
    #[derive(Debug, Clone)]
    pub(crate) struct Transaction {
        kind: Kind,
        address: u8,
        write: heapless::Vec<u8, DATA_CAPACITY>,
        read: heapless::Vec<u8, DATA_CAPACITY>,
        fail: bool,
    }

    impl Transaction {
        pub(crate) fn write(address: u8, bytes: &[u8]) -> Self {
            Self {
                kind: Kind::Write,
                address,
                write: heapless::Vec::from_slice(bytes).expect("transcript entry too long"),
                read: heapless::Vec::new(),
                fail: false,
            }
        }

        pub(crate) fn read(address: u8, bytes: &[u8]) -> Self {
            Self {
                kind: Kind::Read,
                address,
                write: heapless::Vec::new(),
                read: heapless::Vec::from_slice(bytes).expect("transcript entry too long"),
                fail: false,
            }
        }

        pub(crate) fn write_read(address: u8, write: &[u8], read: &[u8]) -> Self {
            Self {
                kind: Kind::WriteRead,
                address,
                write: heapless::Vec::from_slice(write).expect("transcript entry too long"),
                read: heapless::Vec::from_slice(read).expect("transcript entry too long"),
                fail: false,
            }
        }

        /// Mark this transaction as failing with a bus fault.
        pub(crate) fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    /// Scripted bus: replays a fixed transcript of [`Transaction`]s.
    pub(crate) struct Bus {
        script: heapless::Vec<Transaction, SCRIPT_CAPACITY>,
        cursor: usize,
    }

    impl Bus {
        pub(crate) fn new(script: &[Transaction]) -> Self {
            Self {
                script: heapless::Vec::from_slice(script).expect("transcript too long"),
                cursor: 0,
            }
        }

        /// Assert that the driver consumed the whole transcript.
        pub(crate) fn done(&self) {
            assert_eq!(
                self.cursor,
                self.script.len(),
                "driver left expected bus transactions unconsumed"
            );
        }

        fn next(&mut self) -> Transaction {
            let transaction = self
                .script
                .get(self.cursor)
                .expect("driver issued more bus transactions than scripted")
                .clone();
            self.cursor += 1;
            transaction
        }
    }

    impl ErrorType for Bus {
        type Error = Fault;
    }

    impl I2c for Bus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            let expected = self.next();
            assert_eq!(
                address, expected.address,
                "transaction {} addressed the wrong device",
                self.cursor
            );
            if expected.fail {
                return Err(Fault);
            }

            match operations {
                [Operation::Write(bytes)] => {
                    assert_eq!(expected.kind, Kind::Write, "expected a plain write");
                    assert_eq!(*bytes, &expected.write[..], "write payload mismatch");
                }
                [Operation::Read(buffer)] => {
                    assert_eq!(expected.kind, Kind::Read, "expected a plain read");
                    assert_eq!(buffer.len(), expected.read.len(), "read length mismatch");
                    buffer.copy_from_slice(&expected.read);
                }
                [Operation::Write(bytes), Operation::Read(buffer)] => {
                    assert_eq!(expected.kind, Kind::WriteRead, "expected a write-read");
                    assert_eq!(*bytes, &expected.write[..], "write payload mismatch");
                    assert_eq!(buffer.len(), expected.read.len(), "read length mismatch");
                    buffer.copy_from_slice(&expected.read);
                }
                _ => panic!("unsupported operation sequence"),
            }

            Ok(())
        }
    }

    /// Delay that records total requested time instead of sleeping.
    #[derive(Debug, Default)]
    pub(crate) struct Delay {
        pub(crate) elapsed_ns: u64,
    }

    impl Delay {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    impl embedded_hal::delay::DelayNs for Delay {
        fn delay_ns(&mut self, ns: u32) {
            self.elapsed_ns += u64::from(ns);
        }
    }
}
