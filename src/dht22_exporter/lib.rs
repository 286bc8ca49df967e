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

//! Export DHT22 temperature and humidity sensor readings as Prometheus metrics.
//!
//! ## Features
//!
//! `dht22_exporter` periodically reads temperature and humidity from a
//! [DHT22 sensor](https://learn.adafruit.com/dht) wired to a GPIO pin of a Raspberry PI
//! and exposes the last valid reading as Prometheus gauges.
//!
//! The following metrics are exported:
//!
//! * `dht22_temperature_celsius` - Temperature in celsius provided by dht sensor.
//! * `dht22_temperature_fahrenheit` - Temperature in fahrenheit provided by dht sensor.
//! * `dht22_humidity` - Humidity in percents provided by dht sensor.
//! * `dht22_last_read_timestamp` - UNIX timestamp of the last time the sensor was correctly read.
//! * `dht22_collections_total` - Total number of attempts to read the sensor.
//! * `dht22_errors_total` - Total errors by type while trying to read the sensor.
//!
//! The three sensor gauges are absent until the sensor has been read successfully
//! once. After that they always hold the most recent valid reading: failed reads
//! never reset or zero them.
//!
//! ## Reading the sensor
//!
//! The sensor speaks a software-timed single-wire protocol without any error
//! correction, so a good share of reads fail with timeouts or checksum mismatches.
//! These failures are expected. When the bus itself fails, the next read is attempted
//! after a two second backoff. Readings that decode but are missing a value or
//! report a value outside of `0-200` are discarded and the next read happens after
//! the regular interval.
//!
//! ## Build
//!
//! Since it's meant to be run on a Raspberry PI, you will likely need to cross-compile
//! it. Make sure you have a Rust toolchain for ARMv7, assuming you are using `rustup`.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Run
//!
//! In order to read and write the device `/dev/gpiomem`, `dht22_exporter` must run as
//! `root`. The GPIO pin is given using its BCM number, not its physical pin number.
//!
//! ```text
//! dht22_exporter --gpio 4 --interval 30
//! ```
//!
//! Metrics are exposed on port `8001` at `/metrics` on all interfaces by default, this
//! can be changed with `--address` and `--port`.
//!
//! ```yaml
//! scrape_configs:
//!   - job_name: dht22
//!     static_configs:
//!       - targets: ['example:8001']
//! ```
//!

pub mod http;
pub mod metrics;
pub mod sampling;
pub mod sensor;
