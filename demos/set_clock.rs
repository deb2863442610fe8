extern crate ds1302_rtc;

use chrono::Utc;
use ds1302_rtc::{ChipRevision, Diodes, HalPlatform, Resistor, TrickleCharger, DS1302};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{Delay, Spidev, SysfsPin};
use rtcc::DateTimeAccess;

/// Example setting the RTC from the host clock and reading it back,
/// assuming linux environment (such as Raspberry Pi 3+)
/// with the DS1302 attached to spi0.
/// The following was tested by enabling spi0 using `sudo raspi-config`
/// and connecting:
/// - SCLK to the DS1302 SCLK pin
/// - MOSI to the DS1302 I/O pin through a 1k resistor, MISO directly to I/O
/// - GPIO 25 (physical pin 22) to the DS1302 CE pin
/// - GND and 3.3V

const CE_GPIO: u64 = 25;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // The DS1302 shifts LSB first and its CE line is active high,
    // so the kernel's own chip select is not used.
    let mut spi = Spidev::open("/dev/spidev0.0")?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(500_000)
        .lsb_first(true)
        .mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_NO_CS)
        .build();
    spi.configure(&options)?;

    let ce = SysfsPin::new(CE_GPIO);
    ce.export()?;
    ce.set_direction(Direction::Low)?;

    let platform = HalPlatform::new(spi, ce, Delay);
    let mut rtc = DS1302::new_with_revision(platform, ChipRevision::A);
    rtc.power_up(10);

    let halted = rtc.get_clock_halt().map_err(|e| anyhow::anyhow!("{:?}", e))?;
    println!("clock halted at start: {}", halted);

    let sys_dt = Utc::now().naive_utc();
    rtc.set_datetime(&sys_dt).map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let rtc_dt = rtc.datetime().map_err(|e| anyhow::anyhow!("{:?}", e))?;
    println!("sys {}\r\nrtc {}\r\n", sys_dt, rtc_dt);

    // keep a marker in battery backed RAM
    rtc.write_ram_register(0, 0xA5).map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let marker = rtc.read_ram_register(0).map_err(|e| anyhow::anyhow!("{:?}", e))?;
    println!("ram[0] = {:#04x}", marker);

    // one diode, 8k: roughly (3.3V - 0.7V) / 8k = 325 uA
    let charger = TrickleCharger::Enabled { diodes: Diodes::One, resistor: Resistor::Ohms8k };
    rtc.set_trickle_charger(charger).map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let readback = rtc.get_trickle_charger().map_err(|e| anyhow::anyhow!("{:?}", e))?;
    println!("trickle charger: {:?}", readback);

    Ok(())
}
