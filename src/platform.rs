//! Bus, pin, and timing capabilities the DS1302 driver needs from the host.

use core::fmt;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

/// Everything the driver needs from the host in order to talk to the chip.
/// All calls are synchronous; a transaction is complete when the call returns.
pub trait Platform {
  /// Error reported by the underlying bus transport
  type Error;

  /// Drive the chip enable (CE / nRST) line. Assumed infallible.
  fn set_chip_select(&mut self, high: bool);

  /// Clock out `bytes` on the shared data line
  fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

  /// Clock out `out`, then clock in enough bytes to fill `incoming`
  fn send_receive(&mut self, out: &[u8], incoming: &mut [u8]) -> Result<(), Self::Error>;

  fn delay_us(&mut self, us: u32);

  fn delay_ms(&mut self, ms: u32);

  /// Best-effort diagnostic sink. Must not panic.
  fn debug_log(&mut self, args: fmt::Arguments<'_>) {
    log::warn!("{}", args);
  }
}

/// `Platform` built from embedded-hal blocking traits.
/// The SPI bus must be configured LSB-first, no faster than 2 MHz
/// (500 kHz when the chip runs at 2 V).
/// The DS1302 uses a single bidirectional I/O line, so MOSI and MISO
/// are typically joined through a series resistor.
pub struct HalPlatform<SPI, CS, D> {
  spi: SPI,
  cs: CS,
  delay: D,
}

impl<SPI, CS, D> HalPlatform<SPI, CS, D> {
  pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
    HalPlatform { spi, cs, delay }
  }

  /// Give back the bus, chip enable pin, and delay provider
  pub fn release(self) -> (SPI, CS, D) {
    (self.spi, self.cs, self.delay)
  }
}

impl<SPI, CS, D, E> Platform for HalPlatform<SPI, CS, D>
  where
    SPI: Write<u8, Error = E> + Transfer<u8, Error = E>,
    CS: OutputPin,
    D: DelayUs<u32> + DelayMs<u32>,
{
  type Error = E;

  fn set_chip_select(&mut self, high: bool) {
    // pin control is treated as infallible; GPIO errors are dropped
    let _ = if high { self.cs.set_high() } else { self.cs.set_low() };
  }

  fn send(&mut self, bytes: &[u8]) -> Result<(), E> {
    self.spi.write(bytes)
  }

  fn send_receive(&mut self, out: &[u8], incoming: &mut [u8]) -> Result<(), E> {
    self.spi.write(out)?;
    incoming.fill(0);
    self.spi.transfer(incoming)?;
    Ok(())
  }

  fn delay_us(&mut self, us: u32) {
    self.delay.delay_us(us);
  }

  fn delay_ms(&mut self, ms: u32) {
    self.delay.delay_ms(ms);
  }
}
