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

use crate::sensor::{Humidity, SensorReading, TemperatureCelsius, TemperatureFahrenheit};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task;
use tracing::Instrument;

/// Round to one decimal place, the display precision of the sensor.
fn round_tenths(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Current values of the sensor gauges. A field is `None` until the first
/// successful reading that sets it.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub temperature_celsius: Option<f64>,
    pub temperature_fahrenheit: Option<f64>,
    pub humidity_percent: Option<f64>,
}

impl Snapshot {
    fn set_temperature(&mut self, celsius: TemperatureCelsius) {
        self.temperature_celsius = Some(round_tenths(celsius.into()));
        self.temperature_fahrenheit = Some(round_tenths(TemperatureFahrenheit::from(celsius).into()));
    }

    fn set_humidity(&mut self, humidity: Humidity) {
        self.humidity_percent = Some(round_tenths(humidity.into()));
    }
}

/// Prometheus collector for the sensor gauges.
///
/// Values are read from the shared snapshot under its lock so that a scrape sees
/// either all or none of the values from a particular reading. Gauges without a
/// value yet are left out of the exposition entirely.
struct SnapshotCollector {
    current: Arc<Mutex<Snapshot>>,
    celsius: Gauge,
    fahrenheit: Gauge,
    humidity: Gauge,
}

impl SnapshotCollector {
    fn new(current: Arc<Mutex<Snapshot>>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            current,
            celsius: Gauge::new(
                "dht22_temperature_celsius",
                "Temperature in celsius provided by dht sensor",
            )?,
            fahrenheit: Gauge::new(
                "dht22_temperature_fahrenheit",
                "Temperature in fahrenheit provided by dht sensor",
            )?,
            humidity: Gauge::new("dht22_humidity", "Humidity in percents provided by dht sensor")?,
        })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.celsius.desc());
        descs.extend(self.fahrenheit.desc());
        descs.extend(self.humidity.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let mut mfs = Vec::new();

        for (gauge, value) in [
            (&self.celsius, current.temperature_celsius),
            (&self.fahrenheit, current.temperature_fahrenheit),
            (&self.humidity, current.humidity_percent),
        ] {
            if let Some(v) = value {
                gauge.set(v);
                mfs.extend(gauge.collect());
            }
        }

        mfs
    }
}

/// Last-known-good temperature and humidity values, plus counters describing how
/// reading the sensor has been going.
///
/// Cloning is cheap and all clones share the same state. The sampling loop is
/// expected to be the only writer.
#[derive(Clone)]
pub struct MetricRegistry {
    current: Arc<Mutex<Snapshot>>,
    last_read: Gauge,
    collections: IntCounter,
    errors: IntCounterVec,
}

impl MetricRegistry {
    /// Create gauges and counters, all unset, and register them with `reg`.
    pub fn new(reg: &Registry) -> Result<Self, prometheus::Error> {
        let current = Arc::new(Mutex::new(Snapshot::default()));
        let collector = SnapshotCollector::new(current.clone())?;
        let last_read = Gauge::new("dht22_last_read_timestamp", "Timestamp of last successful read")?;
        let collections = IntCounter::new("dht22_collections_total", "Number of attempted reads")?;
        let errors = IntCounterVec::new(
            Opts::new("dht22_errors_total", "Number of failed reads by type"),
            &["kind"],
        )?;

        reg.register(Box::new(collector))?;
        reg.register(Box::new(last_read.clone()))?;
        reg.register(Box::new(collections.clone()))?;
        reg.register(Box::new(errors.clone()))?;

        Ok(Self {
            current,
            last_read,
            collections,
            errors,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set temperature in celsius and the equivalent in fahrenheit together.
    pub fn set_temperature(&self, celsius: TemperatureCelsius) {
        self.lock().set_temperature(celsius);
    }

    pub fn set_humidity(&self, humidity: Humidity) {
        self.lock().set_humidity(humidity);
    }

    /// Replace all values with those from `reading` in a single update.
    pub fn publish(&self, reading: &SensorReading) {
        let mut current = self.lock();
        current.set_temperature(reading.temperature());
        current.set_humidity(reading.humidity());

        // If we can't get the number of seconds since the epoch, skip the update
        let _ = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| self.last_read.set(d.as_secs_f64()));
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.lock()
    }

    pub fn record_attempt(&self) {
        self.collections.inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.errors.with_label_values(&[kind]).inc();
    }
}

/// Error exposing Prometheus metrics in the text exposition format.
#[derive(Debug)]
pub enum ExpositionError {
    Runtime(&'static str, Box<dyn Error + Send + Sync + 'static>),
    Encoding(&'static str, Box<dyn Error + Send + Sync + 'static>),
}

impl fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpositionError::Runtime(msg, ref e) => write!(f, "{}: {}", msg, e),
            ExpositionError::Encoding(msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for ExpositionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExpositionError::Runtime(_, ref e) => Some(e.as_ref()),
            ExpositionError::Encoding(_, ref e) => Some(e.as_ref()),
        }
    }
}

/// Renders every metric in a registry in the text exposition format.
#[derive(Debug, Clone)]
pub struct MetricsExposition {
    registry: Registry,
}

impl MetricsExposition {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Gather and encode all metrics. Gathering runs on the blocking pool since the
    /// process collector reads from `/proc`.
    pub async fn encoded_text(&self) -> Result<Vec<u8>, ExpositionError> {
        let registry = self.registry.clone();

        task::spawn_blocking(move || {
            let families = registry.gather();
            let mut buffer = Vec::new();

            tracing::debug!(
                message = "encoding metric families to text exposition format",
                num_metrics = families.len(),
            );

            TextEncoder::new()
                .encode(&families, &mut buffer)
                .map_err(|e| ExpositionError::Encoding("unable to encode Prometheus metrics", Box::new(e)))
                .map(|_| buffer)
        })
        .instrument(tracing::debug_span!("gather_metrics"))
        .await
        .map_err(|e| ExpositionError::Runtime("unable to gather Prometheus metrics", Box::new(e)))?
    }
}
