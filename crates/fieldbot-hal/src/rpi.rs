//! Raspberry Pi drivers built on `rppal`.
//!
//! | Driver              | Bus  | Pins / address                                  |
//! |---------------------|------|-------------------------------------------------|
//! | [`PwmMotorDriver`]  | GPIO | A: RPWM 12, LPWM 13, R_EN 16, L_EN 19           |
//! |                     |      | B: RPWM 20, LPWM 21, R_EN 26, L_EN 6            |
//! | [`PulseServoDriver`]| GPIO | pan 23, tilt 18 (50 Hz servo pulses)            |
//! | [`Vl53l1xDriver`]   | I2C1 | `0x29`                                          |
//!
//! Only compiled with the `raspberry-pi` feature.

use std::time::Duration;

use fieldbot_types::{DriveMode, DutyCycle, FieldError, ServoAxis};
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use tracing::{debug, info, warn};

use crate::drive::MotorDriver;
use crate::range::RangeDriver;
use crate::servo::{ServoDriver, angle_to_pulse_us, pulse_ramp};

fn gpio_fault(component: &str, e: rppal::gpio::Error) -> FieldError {
    FieldError::hardware(component, e.to_string())
}

fn i2c_fault(component: &str, e: rppal::i2c::Error) -> FieldError {
    FieldError::hardware(component, e.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Drive base
// ────────────────────────────────────────────────────────────────────────────

const MOTOR_PWM_HZ: f64 = 500.0;

/// One BTS7960-style H-bridge: two PWM inputs plus two enable lines.
struct HBridge {
    forward: OutputPin,
    reverse: OutputPin,
    _enables: [OutputPin; 2],
}

impl HBridge {
    fn open(gpio: &Gpio, rpwm: u8, lpwm: u8, r_en: u8, l_en: u8) -> Result<Self, rppal::gpio::Error> {
        let mut r_en = gpio.get(r_en)?.into_output();
        let mut l_en = gpio.get(l_en)?.into_output();
        r_en.set_high();
        l_en.set_high();
        Ok(Self {
            forward: gpio.get(rpwm)?.into_output_low(),
            reverse: gpio.get(lpwm)?.into_output_low(),
            _enables: [r_en, l_en],
        })
    }

    /// `signed` is a duty fraction in `[-1, 1]`; negative drives in reverse.
    fn set(&mut self, signed: f32) -> Result<(), rppal::gpio::Error> {
        let duty = f64::from(signed.abs().min(1.0));
        if signed >= 0.0 {
            self.reverse.set_pwm_frequency(MOTOR_PWM_HZ, 0.0)?;
            self.forward.set_pwm_frequency(MOTOR_PWM_HZ, duty)
        } else {
            self.forward.set_pwm_frequency(MOTOR_PWM_HZ, 0.0)?;
            self.reverse.set_pwm_frequency(MOTOR_PWM_HZ, duty)
        }
    }
}

/// Differential drive on two H-bridges with software PWM.
pub struct PwmMotorDriver {
    left: HBridge,
    right: HBridge,
}

impl PwmMotorDriver {
    /// Claim the eight drive pins and enable both bridges.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if GPIO is unavailable or a pin
    /// is already in use.
    pub fn open() -> Result<Self, FieldError> {
        let gpio = Gpio::new().map_err(|e| gpio_fault("drive_base", e))?;
        let left = HBridge::open(&gpio, 12, 13, 16, 19).map_err(|e| gpio_fault("drive_base", e))?;
        let right = HBridge::open(&gpio, 20, 21, 26, 6).map_err(|e| gpio_fault("drive_base", e))?;
        info!("drive base GPIO ready");
        Ok(Self { left, right })
    }
}

impl MotorDriver for PwmMotorDriver {
    fn id(&self) -> &str {
        "drive_base"
    }

    fn apply(&mut self, mode: DriveMode, duty: DutyCycle) -> Result<(), FieldError> {
        let (left, right) = mode.wheel_duty(duty);
        self.left.set(left).map_err(|e| gpio_fault("drive_base", e))?;
        self.right.set(right).map_err(|e| gpio_fault("drive_base", e))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pan/tilt servos
// ────────────────────────────────────────────────────────────────────────────

const SERVO_PERIOD: Duration = Duration::from_millis(20);
const RAMP_STEP_US: u32 = 20;
const RAMP_SETTLE: Duration = Duration::from_micros(1_667);

/// Hobby servos driven with 500–2500 µs pulses at 50 Hz.
///
/// A new angle is approached in 20 µs pulse steps with a short settle after
/// each one, so `set_angle` blocks for up to a few hundred milliseconds on a
/// large move.
pub struct PulseServoDriver {
    pan: OutputPin,
    tilt: OutputPin,
    /// Last pulse written per axis, `[pan, tilt]`.
    pulses: [u32; 2],
}

impl PulseServoDriver {
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if either pin cannot be claimed.
    pub fn open() -> Result<Self, FieldError> {
        let gpio = Gpio::new().map_err(|e| gpio_fault("servo", e))?;
        let pan = gpio.get(23).map_err(|e| gpio_fault("servo", e))?.into_output_low();
        let tilt = gpio.get(18).map_err(|e| gpio_fault("servo", e))?.into_output_low();
        let rest = angle_to_pulse_us(0);
        Ok(Self { pan, tilt, pulses: [rest, rest] })
    }
}

impl ServoDriver for PulseServoDriver {
    fn set_angle(&mut self, axis: ServoAxis, degrees: u8) -> Result<(), FieldError> {
        let (pin, current) = match axis {
            ServoAxis::Horizontal => (&mut self.pan, &mut self.pulses[0]),
            ServoAxis::Vertical => (&mut self.tilt, &mut self.pulses[1]),
        };
        for pulse in pulse_ramp(*current, angle_to_pulse_us(degrees), RAMP_STEP_US) {
            pin.set_pwm(SERVO_PERIOD, Duration::from_micros(u64::from(pulse)))
                .map_err(|e| gpio_fault("servo", e))?;
            *current = pulse;
            std::thread::sleep(RAMP_SETTLE);
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), FieldError> {
        self.pan.clear_pwm().map_err(|e| gpio_fault("servo", e))?;
        self.tilt.clear_pwm().map_err(|e| gpio_fault("servo", e))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// VL53L1X time-of-flight sensor
// ────────────────────────────────────────────────────────────────────────────

const VL53L1X_ADDR: u16 = 0x29;
const REG_SOFT_RESET: u16 = 0x0000;
const REG_VHV_TIMEOUT_LOOP_BOUND: u16 = 0x0008;
const REG_VHV_START: u16 = 0x000B;
const REG_GPIO_HV_MUX_CTRL: u16 = 0x0030;
const REG_GPIO_TIO_HV_STATUS: u16 = 0x0031;
const REG_PHASECAL_TIMEOUT: u16 = 0x004B;
const REG_TIMEOUT_MACROP_A: u16 = 0x005E;
const REG_VCSEL_PERIOD_A: u16 = 0x0060;
const REG_TIMEOUT_MACROP_B: u16 = 0x0061;
const REG_VCSEL_PERIOD_B: u16 = 0x0063;
const REG_VALID_PHASE_HIGH: u16 = 0x0069;
const REG_WOI_SD0: u16 = 0x0078;
const REG_INITIAL_PHASE_SD0: u16 = 0x007A;
const REG_SYSTEM_INTERRUPT_CLEAR: u16 = 0x0086;
const REG_SYSTEM_MODE_START: u16 = 0x0087;
const REG_RESULT_RANGE_MM: u16 = 0x0096;
const REG_FIRMWARE_SYSTEM_STATUS: u16 = 0x00E5;
const MODE_START_CONTINUOUS: u8 = 0x40;
const MODE_STOP: u8 = 0x00;

const BOOT_POLL: Duration = Duration::from_millis(2);
const BOOT_ATTEMPTS: u32 = 100;
const FIRST_RANGE_ATTEMPTS: u32 = 150;

/// Register block written from `0x2D` up to and including `0x87` at start-up.
const DEFAULT_CONFIG_START: u16 = 0x002D;
#[rustfmt::skip]
const DEFAULT_CONFIG: [u8; 91] = [
    0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x02, 0x08, // 0x2D
    0x00, 0x08, 0x10, 0x01, 0x01, 0x00, 0x00, 0x00, // 0x35
    0x00, 0xFF, 0x00, 0x0F, 0x00, 0x00, 0x00, 0x00, // 0x3D
    0x00, 0x20, 0x0B, 0x00, 0x00, 0x02, 0x0A, 0x21, // 0x45
    0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0xC8, // 0x4D
    0x00, 0x00, 0x38, 0xFF, 0x01, 0x00, 0x08, 0x00, // 0x55
    0x00, 0x01, 0xCC, 0x0F, 0x01, 0xF1, 0x0D, 0x01, // 0x5D
    0x68, 0x00, 0x80, 0x08, 0xB8, 0x00, 0x00, 0x00, // 0x65
    0x00, 0x0F, 0x89, 0x00, 0x00, 0x00, 0x00, 0x00, // 0x6D
    0x00, 0x00, 0x01, 0x0F, 0x0D, 0x0E, 0x0E, 0x00, // 0x75
    0x00, 0x02, 0xC7, 0xFF, 0x9B, 0x00, 0x00, 0x00, // 0x7D
    0x01, 0x00, 0x00,                               // 0x85
];

/// VL53L1X on I2C bus 1 in short distance mode with a 100 ms timing budget,
/// read in continuous ranging mode.
pub struct Vl53l1xDriver {
    bus: u8,
    i2c: I2c,
    /// Level of the data-ready line when a measurement is available.
    ready_level: u8,
}

impl Vl53l1xDriver {
    /// Open I2C bus 1, configure the sensor and start continuous ranging.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the bus or sensor does not
    /// respond, or the sensor never finishes booting.
    pub fn open() -> Result<Self, FieldError> {
        Self::open_on_bus(1)
    }

    pub fn open_on_bus(bus: u8) -> Result<Self, FieldError> {
        let i2c = Self::connect(bus)?;
        let mut driver = Self { bus, i2c, ready_level: 1 };
        driver.init()?;
        driver.start()?;
        Ok(driver)
    }

    fn connect(bus: u8) -> Result<I2c, FieldError> {
        let mut i2c = I2c::with_bus(bus).map_err(|e| i2c_fault("vl53l1x", e))?;
        i2c.set_slave_address(VL53L1X_ADDR).map_err(|e| i2c_fault("vl53l1x", e))?;
        Ok(i2c)
    }

    /// Boot wait, default configuration, one VHV calibration measurement,
    /// then short distance mode at a 100 ms timing budget.
    fn init(&mut self) -> Result<(), FieldError> {
        self.wait_for_boot()?;
        self.write_block(DEFAULT_CONFIG_START, &DEFAULT_CONFIG)?;

        let mux = self.read_u8(REG_GPIO_HV_MUX_CTRL)?;
        // Bit 4 set means the interrupt line is active low.
        self.ready_level = if mux & 0x10 != 0 { 0 } else { 1 };

        self.write_u8(REG_SYSTEM_MODE_START, MODE_START_CONTINUOUS)?;
        self.wait_for_data(FIRST_RANGE_ATTEMPTS)?;
        self.write_u8(REG_SYSTEM_INTERRUPT_CLEAR, 0x01)?;
        self.write_u8(REG_SYSTEM_MODE_START, MODE_STOP)?;
        self.write_u8(REG_VHV_TIMEOUT_LOOP_BOUND, 0x09)?;
        self.write_u8(REG_VHV_START, 0x00)?;

        // Short distance mode.
        self.write_u8(REG_PHASECAL_TIMEOUT, 0x14)?;
        self.write_u8(REG_VCSEL_PERIOD_A, 0x07)?;
        self.write_u8(REG_VCSEL_PERIOD_B, 0x05)?;
        self.write_u8(REG_VALID_PHASE_HIGH, 0x38)?;
        self.write_u16(REG_WOI_SD0, 0x0705)?;
        self.write_u16(REG_INITIAL_PHASE_SD0, 0x0606)?;

        // 100 ms timing budget for short mode.
        self.write_u16(REG_TIMEOUT_MACROP_A, 0x01DB)?;
        self.write_u16(REG_TIMEOUT_MACROP_B, 0x01E4)?;
        debug!(bus = self.bus, "vl53l1x configured");
        Ok(())
    }

    fn wait_for_boot(&mut self) -> Result<(), FieldError> {
        for _ in 0..BOOT_ATTEMPTS {
            // The sensor NACKs while it is still booting.
            if matches!(self.read_u8(REG_FIRMWARE_SYSTEM_STATUS), Ok(state) if state & 0x01 != 0) {
                return Ok(());
            }
            std::thread::sleep(BOOT_POLL);
        }
        Err(FieldError::hardware("vl53l1x", "sensor did not boot"))
    }

    fn wait_for_data(&mut self, attempts: u32) -> Result<(), FieldError> {
        for _ in 0..attempts {
            if self.data_ready()? {
                return Ok(());
            }
            std::thread::sleep(BOOT_POLL);
        }
        Err(FieldError::hardware("vl53l1x", "no calibration measurement"))
    }

    fn data_ready(&mut self) -> Result<bool, FieldError> {
        Ok(self.read_u8(REG_GPIO_TIO_HV_STATUS)? & 0x01 == self.ready_level)
    }

    fn start(&mut self) -> Result<(), FieldError> {
        self.write_u8(REG_SYSTEM_INTERRUPT_CLEAR, 0x01)?;
        self.write_u8(REG_SYSTEM_MODE_START, MODE_START_CONTINUOUS)?;
        debug!(bus = self.bus, "vl53l1x ranging started");
        Ok(())
    }

    fn write_block(&mut self, reg: u16, values: &[u8]) -> Result<(), FieldError> {
        let mut frame = Vec::with_capacity(values.len() + 2);
        frame.extend_from_slice(&reg.to_be_bytes());
        frame.extend_from_slice(values);
        self.i2c
            .write(&frame)
            .map(|_| ())
            .map_err(|e| i2c_fault("vl53l1x", e))
    }

    fn write_u8(&mut self, reg: u16, value: u8) -> Result<(), FieldError> {
        self.write_block(reg, &[value])
    }

    fn write_u16(&mut self, reg: u16, value: u16) -> Result<(), FieldError> {
        self.write_block(reg, &value.to_be_bytes())
    }

    fn read_u8(&mut self, reg: u16) -> Result<u8, FieldError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(&reg.to_be_bytes(), &mut buf)
            .map_err(|e| i2c_fault("vl53l1x", e))?;
        Ok(buf[0])
    }

    fn read_u16(&mut self, reg: u16) -> Result<u16, FieldError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&reg.to_be_bytes(), &mut buf)
            .map_err(|e| i2c_fault("vl53l1x", e))?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl RangeDriver for Vl53l1xDriver {
    fn id(&self) -> &str {
        "vl53l1x"
    }

    fn read_mm(&mut self) -> Result<Option<f32>, FieldError> {
        if !self.data_ready()? {
            return Ok(None);
        }
        let mm = self.read_u16(REG_RESULT_RANGE_MM)?;
        self.write_u8(REG_SYSTEM_INTERRUPT_CLEAR, 0x01)?;
        Ok(Some(f32::from(mm)))
    }

    fn reinitialize(&mut self) -> Result<(), FieldError> {
        if let Err(e) = self.write_u8(REG_SYSTEM_MODE_START, MODE_STOP) {
            warn!(error = %e, "vl53l1x did not acknowledge stop before reinit");
        }
        self.i2c = Self::connect(self.bus)?;
        // Soft reset pulse so the boot wait starts from a known state.
        self.write_u8(REG_SOFT_RESET, 0x00)?;
        std::thread::sleep(BOOT_POLL);
        self.write_u8(REG_SOFT_RESET, 0x01)?;
        self.init()?;
        self.start()
    }

    fn close(&mut self) -> Result<(), FieldError> {
        self.write_u8(REG_SYSTEM_MODE_START, MODE_STOP)
    }
}
