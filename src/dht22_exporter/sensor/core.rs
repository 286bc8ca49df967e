// dht22_exporter - Temperature and humidity metrics exporter for Prometheus
//
// Copyright 2021 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::gpio::{Gpio, IoPin, Mode};

/// Smallest value, for either temperature or humidity, accepted from the sensor.
pub const MIN_PLAUSIBLE_VALUE: f64 = 0.0;

/// Largest value, for either temperature or humidity, accepted from the sensor. The
/// hardware never legitimately reports anything above this, larger values are bus glitches.
pub const MAX_PLAUSIBLE_VALUE: f64 = 200.0;

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Temperature, in degrees fahrenheit
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureFahrenheit(f64);

impl From<TemperatureCelsius> for TemperatureFahrenheit {
    fn from(c: TemperatureCelsius) -> Self {
        Self(c.0 * 9.0 / 5.0 + 32.0)
    }
}

impl From<TemperatureFahrenheit> for f64 {
    fn from(v: TemperatureFahrenheit) -> Self {
        v.0
    }
}

impl fmt::Display for TemperatureFahrenheit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}f", self.0)
    }
}

/// Relative humidity, in percent
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Values exactly as reported by a driver, before any validation.
///
/// Either field may be missing when the driver only managed to decode part of a reading.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RawSample {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl RawSample {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
        }
    }
}

/// Measured quantity a `SensorError` refers to.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum Field {
    Temperature,
    Humidity,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Field::Temperature => f.write_str("temperature"),
            Field::Humidity => f.write_str("humidity"),
        }
    }
}

/// A single validated temperature and humidity pair.
///
/// Instances can only be created from a `RawSample` that has both fields present and
/// within `MIN_PLAUSIBLE_VALUE..=MAX_PLAUSIBLE_VALUE`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SensorReading {
    temperature: TemperatureCelsius,
    humidity: Humidity,
}

impl SensorReading {
    pub fn temperature(&self) -> TemperatureCelsius {
        self.temperature
    }

    pub fn humidity(&self) -> Humidity {
        self.humidity
    }

    fn validate(field: Field, value: Option<f64>) -> Result<f64, SensorError> {
        match value {
            None => Err(SensorError::MissingField(field)),
            Some(v) if v.is_nan() => Err(SensorError::MissingField(field)),
            Some(v) if !(MIN_PLAUSIBLE_VALUE..=MAX_PLAUSIBLE_VALUE).contains(&v) => {
                Err(SensorError::OutOfRange(field, v))
            }
            Some(v) => Ok(v),
        }
    }
}

impl TryFrom<RawSample> for SensorReading {
    type Error = SensorError;

    fn try_from(raw: RawSample) -> Result<Self, Self::Error> {
        let temperature = Self::validate(Field::Temperature, raw.temperature)?;
        let humidity = Self::validate(Field::Humidity, raw.humidity)?;

        Ok(Self {
            temperature: TemperatureCelsius::from(temperature),
            humidity: Humidity::from(humidity),
        })
    }
}

/// Potential kinds of errors a driver can encounter talking to the sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum DriverErrorKind {
    Initialization,
    ReadTimeout,
    Checksum,
}

impl DriverErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::ReadTimeout => "timeout",
            DriverErrorKind::Checksum => "checksum",
        }
    }
}

/// Error initializing or reading the sensor over its data pin
#[derive(Debug)]
pub enum DriverError {
    CheckSum(u8, u8),
    KindMsg(DriverErrorKind, &'static str),
    KindMsgCause(DriverErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl DriverError {
    pub fn kind(&self) -> DriverErrorKind {
        match self {
            DriverError::CheckSum(_, _) => DriverErrorKind::Checksum,
            DriverError::KindMsg(kind, _) => *kind,
            DriverError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::CheckSum(expected, got) => {
                write!(f, "checksum error: expected {}, got {}", expected, got)
            }
            DriverError::KindMsg(_, msg) => msg.fmt(f),
            DriverError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for DriverError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DriverError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Coarse classification of a failed sample, used for logging and metric labels.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Driver,
    MissingField,
    OutOfRange,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Driver => "driver",
            SensorErrorKind::MissingField => "missing_field",
            SensorErrorKind::OutOfRange => "out_of_range",
        }
    }
}

/// Reason a sample from the sensor could not be published.
///
/// All of these are expected during normal operation. The single-wire protocol used
/// by the sensor has no retry or error correction so failed reads are routine.
#[derive(Debug)]
pub enum SensorError {
    /// The driver reported a timing or checksum failure on the bus.
    ChecksumOrTimingFailure(DriverError),
    /// The driver returned a reading without a usable value for this field.
    MissingField(Field),
    /// The value for this field is outside of what the hardware can report.
    OutOfRange(Field, f64),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::ChecksumOrTimingFailure(_) => SensorErrorKind::Driver,
            SensorError::MissingField(_) => SensorErrorKind::MissingField,
            SensorError::OutOfRange(_, _) => SensorErrorKind::OutOfRange,
        }
    }

    /// Return true if the failure happened on the bus itself and the next attempt
    /// should wait for the backoff delay instead of the regular interval.
    pub fn requires_backoff(&self) -> bool {
        matches!(self, SensorError::ChecksumOrTimingFailure(_))
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::ChecksumOrTimingFailure(ref e) => write!(f, "unable to read sensor: {}", e),
            SensorError::MissingField(field) => write!(f, "reading missing {} value", field),
            SensorError::OutOfRange(field, v) => write!(
                f,
                "{} value {} outside of plausible range {}-{}",
                field, v, MIN_PLAUSIBLE_VALUE, MAX_PLAUSIBLE_VALUE
            ),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::ChecksumOrTimingFailure(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Create a new `IoPin` based on the BCM GPIO pin number of the data wire of a
/// sensor.
///
/// Note that the BCM GPIO pin number is NOT the same as the physical pin number.
/// See [pinout] for more information.
///
/// [pinout]: https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header
pub fn open_pin(bcm_gpio_pin: u8) -> Result<IoPin, DriverError> {
    let controller = Gpio::new().map_err(|e| {
        DriverError::KindMsgCause(
            DriverErrorKind::Initialization,
            "unable to create GPIO controller",
            Box::new(e),
        )
    })?;

    let pin = controller.get(bcm_gpio_pin).map_err(|e| {
        DriverError::KindMsgCause(
            DriverErrorKind::Initialization,
            "unable to acquire pin from controller",
            Box::new(e),
        )
    })?;

    Ok(pin.into_io(Mode::Input))
}

/// Abstraction around an `rppal::gpio::IoPin` to allow for easier testing.
pub trait DataPin {
    fn is_low(&self) -> bool;
    fn is_high(&self) -> bool;
    fn pin(&self) -> u8;
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn set_mode(&mut self, mode: Mode);
}

impl DataPin for IoPin {
    fn is_low(&self) -> bool {
        IoPin::is_low(self)
    }

    fn is_high(&self) -> bool {
        IoPin::is_high(self)
    }

    fn pin(&self) -> u8 {
        IoPin::pin(self)
    }

    fn set_high(&mut self) {
        IoPin::set_high(self);
    }

    fn set_low(&mut self) {
        IoPin::set_low(self);
    }

    fn set_mode(&mut self, mode: Mode) {
        IoPin::set_mode(self, mode);
    }
}

#[cfg(test)]
mod test {
    use super::{
        DriverError, DriverErrorKind, Field, RawSample, SensorError, SensorErrorKind, SensorReading,
        TemperatureCelsius, TemperatureFahrenheit,
    };

    #[test]
    fn test_reading_valid() {
        let reading = SensorReading::try_from(RawSample::new(22.5, 45.3)).unwrap();

        assert_eq!(22.5, f64::from(reading.temperature()));
        assert_eq!(45.3, f64::from(reading.humidity()));
    }

    #[test]
    fn test_reading_range_is_inclusive() {
        assert!(SensorReading::try_from(RawSample::new(0.0, 200.0)).is_ok());
        assert!(SensorReading::try_from(RawSample::new(200.0, 0.0)).is_ok());
    }

    #[test]
    fn test_reading_missing_temperature() {
        let raw = RawSample {
            temperature: None,
            humidity: Some(45.0),
        };

        match SensorReading::try_from(raw) {
            Err(SensorError::MissingField(field)) => assert_eq!(Field::Temperature, field),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reading_nan_humidity() {
        let raw = RawSample::new(21.0, f64::NAN);

        match SensorReading::try_from(raw) {
            Err(SensorError::MissingField(field)) => assert_eq!(Field::Humidity, field),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reading_temperature_too_high() {
        match SensorReading::try_from(RawSample::new(250.0, 40.0)) {
            Err(SensorError::OutOfRange(field, v)) => {
                assert_eq!(Field::Temperature, field);
                assert_eq!(250.0, v);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reading_humidity_too_high() {
        let res = SensorReading::try_from(RawSample::new(20.0, 200.1));
        assert_eq!(SensorErrorKind::OutOfRange, res.unwrap_err().kind());
    }

    #[test]
    fn test_reading_below_range() {
        let res = SensorReading::try_from(RawSample::new(-0.5, 50.0));
        assert_eq!(SensorErrorKind::OutOfRange, res.unwrap_err().kind());
    }

    #[test]
    fn test_error_backoff() {
        let driver = SensorError::ChecksumOrTimingFailure(DriverError::KindMsg(DriverErrorKind::ReadTimeout, "timeout"));
        let missing = SensorError::MissingField(Field::Humidity);
        let range = SensorError::OutOfRange(Field::Temperature, 201.0);

        assert!(driver.requires_backoff());
        assert!(!missing.requires_backoff());
        assert!(!range.requires_backoff());
        assert_eq!("driver", driver.kind().as_label());
        assert_eq!("missing_field", missing.kind().as_label());
        assert_eq!("out_of_range", range.kind().as_label());
    }

    #[test]
    fn test_fahrenheit_from_celsius() {
        let f = TemperatureFahrenheit::from(TemperatureCelsius::from(100.0));
        assert_eq!(212.0, f64::from(f));
    }
}
