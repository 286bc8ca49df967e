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

use crate::sensor::core::{DriverError, RawSample, SensorError, SensorReading};
use std::fmt::{self, Debug, Formatter};

/// Something that can take one sample from a temperature and humidity sensor.
///
/// Implementations are not expected to be reentrant: callers must not request
/// samples from the same driver concurrently.
pub trait Driver {
    fn sample(&mut self) -> Result<RawSample, DriverError>;
}

/// Source of validated readings, classifying every way a sample can fail.
pub struct SensorSource {
    driver: Box<dyn Driver + Send + 'static>,
}

impl SensorSource {
    pub fn new<D>(driver: D) -> Self
    where
        D: Driver + Send + 'static,
    {
        Self {
            driver: Box::new(driver),
        }
    }

    /// Take one sample from the driver and validate it.
    pub fn read(&mut self) -> Result<SensorReading, SensorError> {
        let raw = self
            .driver
            .sample()
            .map_err(SensorError::ChecksumOrTimingFailure)?;

        SensorReading::try_from(raw)
    }
}

impl Debug for SensorSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSource").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::SensorSource;
    use crate::sensor::core::{DriverErrorKind, Field, RawSample, SensorError, SensorErrorKind};
    use crate::sensor::test::ScriptedDriver;

    #[test]
    fn test_read_success() {
        let mut source = SensorSource::new(ScriptedDriver::new(vec![Ok(RawSample::new(22.5, 45.3))]));
        let reading = source.read().unwrap();

        assert_eq!(22.5, f64::from(reading.temperature()));
        assert_eq!(45.3, f64::from(reading.humidity()));
    }

    #[test]
    fn test_read_driver_failure() {
        let mut source = SensorSource::new(ScriptedDriver::new(vec![Err(DriverErrorKind::Checksum)]));

        match source.read().unwrap_err() {
            SensorError::ChecksumOrTimingFailure(e) => assert_eq!(DriverErrorKind::Checksum, e.kind()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_read_missing_humidity() {
        let raw = RawSample {
            temperature: Some(20.0),
            humidity: None,
        };
        let mut source = SensorSource::new(ScriptedDriver::new(vec![Ok(raw)]));

        match source.read().unwrap_err() {
            SensorError::MissingField(field) => assert_eq!(Field::Humidity, field),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_read_out_of_range() {
        let mut source = SensorSource::new(ScriptedDriver::new(vec![Ok(RawSample::new(250.0, 40.0))]));
        assert_eq!(SensorErrorKind::OutOfRange, source.read().unwrap_err().kind());
    }

    #[test]
    fn test_read_each_call_samples_again() {
        let mut source = SensorSource::new(ScriptedDriver::new(vec![
            Err(DriverErrorKind::ReadTimeout),
            Ok(RawSample::new(21.0, 50.0)),
        ]));

        assert!(source.read().is_err());
        assert!(source.read().is_ok());
    }
}
