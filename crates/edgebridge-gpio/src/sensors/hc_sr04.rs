//! HC-SR04 ultrasonic range finder.
//!
//! A 10 µs high pulse on the trigger pin makes the module emit a burst; the
//! echo pin then stays high for as long as the sound took to travel out and
//! back. No echo within 50 ms means nothing is in range.

use std::sync::Arc;

use tracing::debug;

use crate::error::{GpioError, Result};
use crate::gpio::Gpio;
use crate::pin::{Pin, PinMode};
use crate::ranging::{RangingRequest, RangingResult};

/// Speed of sound used for conversions, in m/s.
pub const SPEED_OF_SOUND_M_S: f64 = 340.39;

const METERS_TO_INCHES: f64 = 39.3701;
const ECHO_WAIT_US: i64 = 50_000;
const TRIGGER_PULSE_US: i64 = 10;

/// An HC-SR04 wired to two GPIO pins.
pub struct HcSr04 {
    gpio: Arc<Gpio>,
    request: RangingRequest,
}

impl HcSr04 {
    /// Bind the sensor to `trigger` and `echo`.
    ///
    /// # Errors
    ///
    /// `GpioError::WrongMode` unless `trigger` is an output and `echo` is an
    /// input. Pin modes are left as found.
    pub fn new(gpio: Arc<Gpio>, trigger: u32, echo: u32) -> Result<Self> {
        let trigger = Pin::new(trigger)?;
        let echo = Pin::new(echo)?;
        expect_mode(&gpio, trigger, PinMode::Output)?;
        expect_mode(&gpio, echo, PinMode::Input)?;

        let request = RangingRequest::new(trigger, echo, ECHO_WAIT_US, TRIGGER_PULSE_US, false)?;
        debug!(%trigger, %echo, "HC-SR04 bound");
        Ok(HcSr04 { gpio, request })
    }

    /// Round-trip echo time in microseconds, `None` if nothing answered.
    pub fn echo_micros(&self) -> Result<Option<u32>> {
        Ok(self.gpio.measure(&self.request)?.micros())
    }

    /// Distance to the target in meters.
    pub fn distance_m(&self) -> Result<Option<f64>> {
        Ok(self.echo_micros()?.map(micros_to_meters))
    }

    /// Distance to the target in inches.
    pub fn distance_in(&self) -> Result<Option<f64>> {
        Ok(self.distance_m()?.map(|m| m * METERS_TO_INCHES))
    }

    /// Raw measurement outcome.
    pub fn measure(&self) -> Result<RangingResult> {
        self.gpio.measure(&self.request)
    }
}

fn expect_mode(gpio: &Gpio, pin: Pin, expected: PinMode) -> Result<()> {
    let actual = gpio.mode(pin.number())?;
    if actual == expected {
        Ok(())
    } else {
        Err(GpioError::WrongMode { pin, expected, actual })
    }
}

/// Convert a round-trip echo time to a one-way distance in meters.
pub fn micros_to_meters(micros: u32) -> f64 {
    f64::from(micros) / 1_000_000.0 * SPEED_OF_SOUND_M_S / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::Level;
    use crate::settings::GpioSettings;
    use crate::sim::SimEngine;

    const TRIG: u32 = 23;
    const ECHO: u32 = 24;

    fn setup() -> (Arc<SimEngine>, Arc<Gpio>) {
        let engine = Arc::new(SimEngine::new());
        let gpio = Arc::new(Gpio::new(engine.clone(), &GpioSettings::default()).unwrap());
        gpio.set_mode(TRIG, PinMode::Output).unwrap();
        gpio.set_mode(ECHO, PinMode::Input).unwrap();
        (engine, gpio)
    }

    #[test]
    fn test_rejects_wrong_modes() {
        let (_engine, gpio) = setup();
        let err = HcSr04::new(Arc::clone(&gpio), ECHO, TRIG).err().unwrap();
        assert_eq!(
            err,
            GpioError::WrongMode {
                pin: Pin::new(ECHO).unwrap(),
                expected: PinMode::Output,
                actual: PinMode::Input,
            }
        );
    }

    #[test]
    fn test_conversion() {
        // 5882 µs round trip is about one meter.
        let m = micros_to_meters(5_882);
        assert!((m - 1.0).abs() < 0.01, "{m}");
        assert!((m * METERS_TO_INCHES - 39.37).abs() < 0.5);
    }

    #[test]
    fn test_distance_from_simulated_echo() {
        let (engine, gpio) = setup();
        engine.attach_echo(Pin::new(TRIG).unwrap(), Pin::new(ECHO).unwrap(), 100, 5_882);
        let sensor = HcSr04::new(gpio, TRIG, ECHO).unwrap();
        let meters = sensor.distance_m().unwrap().unwrap();
        assert!((0.85..=1.15).contains(&meters), "{meters}");
        assert!(sensor.distance_in().unwrap().unwrap() > 30.0);
    }

    #[test]
    fn test_no_echo_is_none() {
        let (engine, gpio) = setup();
        let sensor = HcSr04::new(gpio, TRIG, ECHO).unwrap();
        engine.set_input(Pin::new(ECHO).unwrap(), Level::Low);
        assert_eq!(sensor.echo_micros().unwrap(), None);
        assert_eq!(sensor.distance_in().unwrap(), None);
    }
}
