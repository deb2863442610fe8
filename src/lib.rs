#![cfg_attr(not(test), no_std)]

//! DS1302 trickle-charge timekeeping chip, platform agnostic no_std driver.
//!
//! The chip is addressed over a synchronous 2-wire serial bus (shared clock/data
//! line plus a CE / nRST chip enable line). Every transaction starts with a
//! single address/control byte:
//!
//! ```text
//!   bit  7   6   5   4   3   2   1   0
//!        1   R  A4  A3  A2  A1  A0   D
//! ```
//! where `R` selects the RAM bank (1) or the clock bank (0), `A4..A0` is the
//! register address (0x1F selects burst mode) and `D` is 1 for a read.
//!
//! Raw transport is delegated to a [`Platform`]; [`HalPlatform`] provides one on
//! top of embedded-hal blocking SPI, an output pin and a delay.

pub use rtcc::{
  DateTimeAccess, NaiveDate, NaiveDateTime, Datelike, Timelike,
};

mod platform;
pub use platform::{HalPlatform, Platform};

// Clock bank register addresses.
// The clock burst transfers these in address order, so they double as
// byte offsets within the burst payload.
const REG_SECONDS: u8 = 0x00;
const REG_MINUTES: u8 = 0x01;
const REG_HOURS: u8 = 0x02;
const REG_DATE: u8 = 0x03;
const REG_MONTH: u8 = 0x04;
const REG_WEEKDAY: u8 = 0x05;
const REG_YEAR: u8 = 0x06;

// Control register: bit 7 is write protect, bits 6..0 must be zero
const REG_CONTROL: u8 = 0x07;

// Trickle charge select register (TCS / DS / RS fields)
const REG_TRICKLE_CHARGER: u8 = 0x08;

// First RAM register, RAM bank
const REG_RAM_0: u8 = 0x00;

// Selects burst mode in either bank
const REG_BURST: u8 = 0x1F;

// Address/control byte fields
const HEADER_FIXED_BIT: u8 = 1 << 7;
const HEADER_BANK_SHIFT: u8 = 6;
const HEADER_ADDRESS_SHIFT: u8 = 1;
const READ_BIT: u8 = 1;
const WRITE_BIT: u8 = 0;

// Seconds register bit 7
const CLOCK_HALT_BIT: u8 = 1 << 7;
// Control register bit 7
const WRITE_PROTECT_BIT: u8 = 1 << 7;
// Hours register: bit 7 selects 12-hour mode, bit 5 is PM in 12-hour mode
const HOUR_12_BIT: u8 = 1 << 7;
const HOUR_PM_BIT: u8 = 1 << 5;

// Meaningful bits of each clock register
const SECONDS_MASK: u8 = 0x7F;
const MINUTES_MASK: u8 = 0x7F;
const HOURS_12_MASK: u8 = 0x1F;
const HOURS_24_MASK: u8 = 0x3F;
const DATE_MASK: u8 = 0x3F;
const MONTH_MASK: u8 = 0x1F;
const WEEKDAY_MASK: u8 = 0x07;
const YEAR_MASK: u8 = 0xFF;

// TCS field value that enables trickle charging
const TRICKLE_ENABLE_PATTERN: u8 = 0b1010 << 4;
const TRICKLE_TCS_MASK: u8 = 0xF0;
// Power-on value of the trickle charger register (charger off)
const TRICKLE_DISABLED_VALUE: u8 = 0x5C;

/// Largest frame on the wire: one address/control byte plus 31 RAM burst bytes
pub const MAX_FRAME_LEN: usize = 32;

/// Largest payload that fits in one frame
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - 1;

/// Number of general purpose RAM registers (slots 0..=30)
pub const RAM_SLOTS: usize = 31;

const CLOCK_BURST_LEN: usize = 8;

/// Calendar years are stored as two BCD digits relative to this year
const BASE_YEAR: u16 = 2000;

/// Register bank selected by bit 6 of the address/control byte
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bank {
  Clock = 0,
  Ram = 1,
}

/// Timing and address profile of a chip revision
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChipRevision {
  /// Waits 4 µs after raising CE, before dropping it, and after dropping it
  A,
  /// No explicit settle delays; relies on the latency of the bus calls
  B,
}

impl ChipRevision {
  /// Delay applied around each chip enable transition, if any
  pub fn settle_delay_us(self) -> Option<u32> {
    match self {
      ChipRevision::A => Some(4),
      ChipRevision::B => None,
    }
  }

  /// Address of RAM slot 0 within the RAM bank.
  /// Both known revisions place slot 0 at 0x00.
  pub fn ram_base(self) -> u8 {
    match self {
      ChipRevision::A => REG_RAM_0,
      ChipRevision::B => REG_RAM_0,
    }
  }

  /// Number of general purpose RAM registers.
  /// Both known revisions have 31.
  pub fn ram_slots(self) -> usize {
    match self {
      ChipRevision::A => RAM_SLOTS,
      ChipRevision::B => RAM_SLOTS,
    }
  }
}

/// Errors reported by the driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error<E> {
  /// The platform transport reported a failure
  Bus(E),
  /// The clock halt flag is set, so the time registers are not trustworthy
  ClockHalted,
  /// The chip holds a calendar value that is not a real date/time
  InvalidDateTime,
}

/// Decoded hours register
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Hours {
  Hour24(u8),
  Hour12am(u8),
  Hour12pm(u8),
}

impl Hours {
  /// Hour in 24-hour form.
  /// PM adds 12 without special casing, so 12 AM yields 12 and 12 PM yields 24.
  pub fn to_24h(self) -> u8 {
    match self {
      Hours::Hour24(h) => h,
      Hours::Hour12am(h) => h,
      Hours::Hour12pm(h) => h + 12,
    }
  }
}

impl From<u8> for Hours {
  fn from(byte: u8) -> Self {
    if byte & HOUR_12_BIT != 0 {
      let hour = bcd_to_bin(byte & HOURS_12_MASK);
      if byte & HOUR_PM_BIT != 0 {
        Hours::Hour12pm(hour)
      }
      else {
        Hours::Hour12am(hour)
      }
    }
    else {
      Hours::Hour24(bcd_to_bin(byte & HOURS_24_MASK))
    }
  }
}

/// One reading of the seven calendar registers, in plain binary
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ClockSnapshot {
  /// 0..59
  pub second: u8,
  /// 0..59
  pub minute: u8,
  /// 0..23
  pub hour: u8,
  /// Day of month, 1..31
  pub date: u8,
  /// 1..12
  pub month: u8,
  /// 1..7, meaning assigned by the user
  pub weekday: u8,
  /// 2000..2099
  pub year: u16,
}

impl ClockSnapshot {
  pub fn new(second: u8, minute: u8, hour: u8, date: u8, month: u8, year: u16, weekday: u8) -> Self {
    ClockSnapshot { second, minute, hour, date, month, weekday, year }
  }

  // Decode a clock burst payload; the halt and mode bits are not part of the values
  fn from_burst(data: &[u8; CLOCK_BURST_LEN]) -> Self {
    let field = |reg: u8, mask: u8| bcd_to_bin(data[reg as usize] & mask);
    ClockSnapshot {
      second: field(REG_SECONDS, SECONDS_MASK),
      minute: field(REG_MINUTES, MINUTES_MASK),
      hour: Hours::from(data[REG_HOURS as usize]).to_24h(),
      date: field(REG_DATE, DATE_MASK),
      month: field(REG_MONTH, MONTH_MASK),
      weekday: field(REG_WEEKDAY, WEEKDAY_MASK),
      year: BASE_YEAR + field(REG_YEAR, YEAR_MASK) as u16,
    }
  }

  // Build a clock burst payload: clock running, 24-hour mode, write protect shadow clear
  fn to_burst(&self) -> [u8; CLOCK_BURST_LEN] {
    let year = (self.year.saturating_sub(BASE_YEAR) % 100) as u8;
    let mut data = [0u8; CLOCK_BURST_LEN];
    data[REG_SECONDS as usize] = bin_to_bcd(self.second) & SECONDS_MASK;
    data[REG_MINUTES as usize] = bin_to_bcd(self.minute) & MINUTES_MASK;
    data[REG_HOURS as usize] = bin_to_bcd(self.hour) & HOURS_24_MASK;
    data[REG_DATE as usize] = bin_to_bcd(self.date) & DATE_MASK;
    data[REG_MONTH as usize] = bin_to_bcd(self.month) & MONTH_MASK;
    data[REG_WEEKDAY as usize] = bin_to_bcd(self.weekday) & WEEKDAY_MASK;
    data[REG_YEAR as usize] = bin_to_bcd(year) & YEAR_MASK;
    data[REG_CONTROL as usize] = 0;
    data
  }
}

/// Number of diodes in the trickle charge path
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Diodes {
  One = 0b01,
  Two = 0b10,
}

/// Trickle charge current limiting resistor
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Resistor {
  Ohms2k = 0b01,
  Ohms4k = 0b10,
  Ohms8k = 0b11,
}

/// Trickle charger configuration.
/// Maximum charge current is (Vcc - diode drop) / resistor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrickleCharger {
  Disabled,
  Enabled { diodes: Diodes, resistor: Resistor },
}

impl From<u8> for TrickleCharger {
  fn from(byte: u8) -> Self {
    if byte & TRICKLE_TCS_MASK != TRICKLE_ENABLE_PATTERN {
      return TrickleCharger::Disabled;
    }
    let diodes = match (byte >> 2) & 0b11 {
      0b01 => Diodes::One,
      0b10 => Diodes::Two,
      _ => return TrickleCharger::Disabled,
    };
    let resistor = match byte & 0b11 {
      0b01 => Resistor::Ohms2k,
      0b10 => Resistor::Ohms4k,
      0b11 => Resistor::Ohms8k,
      _ => return TrickleCharger::Disabled,
    };
    TrickleCharger::Enabled { diodes, resistor }
  }
}

impl From<TrickleCharger> for u8 {
  fn from(config: TrickleCharger) -> Self {
    match config {
      TrickleCharger::Disabled => TRICKLE_DISABLED_VALUE,
      TrickleCharger::Enabled { diodes, resistor } =>
        TRICKLE_ENABLE_PATTERN | ((diodes as u8) << 2) | resistor as u8,
    }
  }
}

// Converts a binary value to BCD format
fn bin_to_bcd(value: u8) -> u8 {
  ((value / 10) << 4) | (value % 10)
}

// Converts a BCD value to binary format
fn bcd_to_bin(value: u8) -> u8 {
  ((value & 0xF0) >> 4) * 10 + (value & 0x0F)
}

// Build the address/control byte. The address is not masked: out of range
// values spill into the upper bits exactly as the chip would see them.
fn header(address: u8, bank: Bank, direction: u8) -> u8 {
  HEADER_FIXED_BIT
    | ((bank as u8) << HEADER_BANK_SHIFT)
    | (address << HEADER_ADDRESS_SHIFT)
    | direction
}

/// DS1302 trickle-charge timekeeping chip
/// rust no_std driver (talks to the chip through a `Platform`)
///
/// The driver keeps no copy of clock or RAM contents between calls.
/// Multi-step operations (write protect bracketing, read-modify-write of the
/// seconds register) are not atomic at the chip, so an instance shared between
/// callers must be guarded as a whole.
pub struct DS1302<P> {
  platform: P,
  revision: ChipRevision,
  frame: [u8; MAX_FRAME_LEN],
}

impl<P, E> DS1302<P>
  where
    P: Platform<Error = E>,
{

  /// New driver instance for a revision A chip
  pub fn new(platform: P) -> Self {
    Self::new_with_revision(platform, ChipRevision::A)
  }

  /// New driver instance using the timing and address profile of `revision`
  pub fn new_with_revision(platform: P, revision: ChipRevision) -> Self {
    DS1302 {
      platform,
      revision,
      frame: [0u8; MAX_FRAME_LEN],
    }
  }

  pub fn revision(&self) -> ChipRevision {
    self.revision
  }

  /// Destroy the driver and give back the platform
  pub fn release(self) -> P {
    self.platform
  }

  /// CE must be held low until Vcc has risen above 2.0 V.
  /// Drives CE low, then waits `settle_ms` milliseconds.
  pub fn power_up(&mut self, settle_ms: u32) {
    self.platform.set_chip_select(false);
    self.platform.delay_ms(settle_ms);
  }

  fn settle(&mut self) {
    if let Some(us) = self.revision.settle_delay_us() {
      self.platform.delay_us(us);
    }
  }

  /// Read `buf.len()` consecutive bytes starting at `address` in `bank`
  pub fn read_register(&mut self, address: u8, bank: Bank, buf: &mut [u8]) -> Result<(), Error<E>> {
    let ac = header(address, bank, READ_BIT);

    self.platform.set_chip_select(true);
    self.settle();
    let res = self.platform.send_receive(&[ac], buf);
    if res.is_err() {
      self.platform.debug_log(
        format_args!("read of reg {:#04x} len {} failed", address, buf.len()));
    }
    // tCCH before dropping CE, tCWH after
    self.settle();
    self.platform.set_chip_select(false);
    self.settle();

    res.map_err(Error::Bus)?;
    log::trace!("read reg {:#04x} ({:?}): {:02x?}", address, bank, buf);
    Ok(())
  }

  /// Write `data` starting at `address` in `bank`.
  /// Payloads longer than `MAX_PAYLOAD_LEN` are truncated to fit one frame.
  pub fn write_register(&mut self, address: u8, bank: Bank, data: &[u8]) -> Result<(), Error<E>> {
    let len = data.len().min(MAX_PAYLOAD_LEN);
    self.frame[0] = header(address, bank, WRITE_BIT);
    self.frame[1..=len].copy_from_slice(&data[..len]);

    self.platform.set_chip_select(true);
    self.settle();
    let res = self.platform.send(&self.frame[..=len]);
    if res.is_err() {
      self.platform.debug_log(
        format_args!("write of reg {:#04x} len {} failed", address, data.len()));
    }
    // tCCH before dropping CE, tCWH after
    self.settle();
    self.platform.set_chip_select(false);
    self.settle();

    res.map_err(Error::Bus)?;
    log::trace!("wrote reg {:#04x} ({:?}): {:02x?}", address, bank, &data[..len]);
    Ok(())
  }

  fn read_clock_register(&mut self, reg: u8) -> Result<u8, Error<E>> {
    let mut buf = [0u8];
    self.read_register(reg, Bank::Clock, &mut buf)?;
    Ok(buf[0])
  }

  /// Enable or disable the chip's write protection.
  /// Power-on state is undefined; every register write must be preceded by
  /// `set_write_protect(false)`.
  pub fn set_write_protect(&mut self, enable: bool) -> Result<(), Error<E>> {
    let control = if enable { WRITE_PROTECT_BIT } else { 0 };
    self.write_register(REG_CONTROL, Bank::Clock, &[control])
  }

  /// Read back the write protect bit
  pub fn get_write_protect(&mut self) -> Result<bool, Error<E>> {
    let control = self.read_clock_register(REG_CONTROL)?;
    Ok(control & WRITE_PROTECT_BIT != 0)
  }

  /// Stop (`true`) or start (`false`) the oscillator, keeping the seconds value.
  /// Every step is attempted even if an earlier one failed, so on error the
  /// write protect state is unknown and should be re-verified.
  /// Returns the first error encountered.
  pub fn set_clock_halt(&mut self, halt: bool) -> Result<(), Error<E>> {
    let mut seconds = [0u8];
    let read = self.read_register(REG_SECONDS, Bank::Clock, &mut seconds);
    let unprotect = self.set_write_protect(false);

    seconds[0] &= !CLOCK_HALT_BIT;
    if halt {
      seconds[0] |= CLOCK_HALT_BIT;
    }
    let write = self.write_register(REG_SECONDS, Bank::Clock, &seconds);
    let protect = self.set_write_protect(true);

    read.and(unprotect).and(write).and(protect)
  }

  /// Whether the oscillator is stopped
  pub fn get_clock_halt(&mut self) -> Result<bool, Error<E>> {
    let seconds = self.read_clock_register(REG_SECONDS)?;
    Ok(seconds & CLOCK_HALT_BIT != 0)
  }

  /// Read all calendar registers in one burst.
  /// Fails with `Error::ClockHalted` while the oscillator is stopped.
  pub fn get_clock(&mut self) -> Result<ClockSnapshot, Error<E>> {
    let mut data = [0u8; CLOCK_BURST_LEN];
    self.read_register(REG_BURST, Bank::Clock, &mut data)?;

    if data[REG_SECONDS as usize] & CLOCK_HALT_BIT != 0 {
      self.platform.debug_log(format_args!("clock halted"));
      return Err(Error::ClockHalted);
    }
    Ok(ClockSnapshot::from_burst(&data))
  }

  /// Write all calendar registers in one burst, always in 24-hour mode.
  /// This also clears the halt flag. Stops at the first failing step.
  pub fn set_clock(&mut self, snapshot: &ClockSnapshot) -> Result<(), Error<E>> {
    self.set_write_protect(false)?;
    let data = snapshot.to_burst();
    self.write_register(REG_BURST, Bank::Clock, &data)?;
    self.set_write_protect(true)
  }

  /// Read one RAM register. `slot` is not range checked.
  pub fn read_ram_register(&mut self, slot: u8) -> Result<u8, Error<E>> {
    let mut buf = [0u8];
    let address = self.revision.ram_base().wrapping_add(slot);
    self.read_register(address, Bank::Ram, &mut buf)?;
    Ok(buf[0])
  }

  /// Write one RAM register. `slot` is not range checked.
  pub fn write_ram_register(&mut self, slot: u8, value: u8) -> Result<(), Error<E>> {
    self.set_write_protect(false)?;
    let address = self.revision.ram_base().wrapping_add(slot);
    self.write_register(address, Bank::Ram, &[value])?;
    self.set_write_protect(true)
  }

  /// Burst read RAM starting at slot 0, filling at most `ram_slots()` bytes of `buf`.
  /// Returns the number of bytes read.
  pub fn read_ram_burst(&mut self, buf: &mut [u8]) -> Result<usize, Error<E>> {
    let len = buf.len().min(self.revision.ram_slots());
    self.read_register(REG_BURST, Bank::Ram, &mut buf[..len])?;
    Ok(len)
  }

  /// Burst write RAM starting at slot 0, at most `ram_slots()` bytes.
  /// Returns the number of bytes written.
  pub fn write_ram_burst(&mut self, data: &[u8]) -> Result<usize, Error<E>> {
    let len = data.len().min(self.revision.ram_slots());
    self.set_write_protect(false)?;
    self.write_register(REG_BURST, Bank::Ram, &data[..len])?;
    self.set_write_protect(true)?;
    Ok(len)
  }

  /// Configure the backup supply trickle charger
  pub fn set_trickle_charger(&mut self, config: TrickleCharger) -> Result<(), Error<E>> {
    self.set_write_protect(false)?;
    self.write_register(REG_TRICKLE_CHARGER, Bank::Clock, &[config.into()])?;
    self.set_write_protect(true)
  }

  /// Read the trickle charger configuration
  pub fn get_trickle_charger(&mut self) -> Result<TrickleCharger, Error<E>> {
    let raw = self.read_clock_register(REG_TRICKLE_CHARGER)?;
    Ok(TrickleCharger::from(raw))
  }

}

// Weekday number using the 1..7 convention, Sunday first
fn weekday_number(day: chrono::Weekday) -> u8 {
  day.number_from_sunday() as u8
}

impl<P, E> DateTimeAccess for DS1302<P>
  where
    P: Platform<Error = E>,
{
  type Error = Error<E>;

  /// Fails with `Error::ClockHalted` while the oscillator is stopped,
  /// and with `Error::InvalidDateTime` if the registers do not hold a real date.
  fn datetime(&mut self) -> Result<NaiveDateTime, Self::Error> {
    let now = self.get_clock()?;
    NaiveDate::from_ymd_opt(now.year.into(), now.month.into(), now.date.into())
      .and_then(|date| date.and_hms_opt(now.hour.into(), now.minute.into(), now.second.into()))
      .ok_or(Error::InvalidDateTime)
  }

  /// Only years 2000 through 2099 can be stored.
  /// The weekday register is set from the date, Sunday = 1.
  fn set_datetime(&mut self, datetime: &NaiveDateTime) -> Result<(), Self::Error> {
    let year = datetime.year();
    if !(2000..=2099).contains(&year) {
      return Err(Error::InvalidDateTime);
    }
    let snapshot = ClockSnapshot {
      second: datetime.second() as u8,
      minute: datetime.minute() as u8,
      hour: datetime.hour() as u8,
      date: datetime.day() as u8,
      month: datetime.month() as u8,
      weekday: weekday_number(datetime.weekday()),
      year: year as u16,
    };
    self.set_clock(&snapshot)
  }

}
