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

mod core;
mod dht22;
mod source;

pub use crate::sensor::core::{
    open_pin, DataPin, DriverError, DriverErrorKind, Field, Humidity, RawSample, SensorError, SensorErrorKind,
    SensorReading, TemperatureCelsius, TemperatureFahrenheit, MAX_PLAUSIBLE_VALUE, MIN_PLAUSIBLE_VALUE,
};
pub use crate::sensor::dht22::DHT22Driver;
pub use crate::sensor::source::{Driver, SensorSource};

#[cfg(test)]
pub(crate) use crate::sensor::test::{PanicDriver, ScriptedDriver};
