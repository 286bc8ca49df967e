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

use crate::metrics::MetricRegistry;
use crate::sensor::SensorSource;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::{task, time};
use tracing::Instrument;

/// Delay before trying again after the sensor failed to respond correctly on the bus.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

/// Label used for the error counter when a read crashed instead of returning.
const PANIC_LABEL: &str = "panic";

/// Periodically reads the sensor and publishes valid readings to a `MetricRegistry`.
///
/// Failures never end the loop. A failure on the bus itself is followed by a short
/// backoff delay, any other failure (and every success) by the regular interval.
/// Values in the registry are only ever replaced by a newer valid reading.
pub struct SamplingLoop {
    source: Arc<Mutex<SensorSource>>,
    metrics: MetricRegistry,
    interval: Duration,
    backoff: Duration,
}

impl SamplingLoop {
    pub fn new(source: SensorSource, metrics: MetricRegistry, interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            metrics,
            interval,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Make a single attempt to read the sensor, publishing the result if it is valid,
    /// and return how long to wait before the next attempt.
    pub async fn sample(&self) -> Duration {
        self.metrics.record_attempt();
        let source = self.source.clone();

        // Reading blocks for tens of milliseconds busy-waiting on the data pin
        let res = task::spawn_blocking(move || {
            let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
            source.read()
        })
        .instrument(tracing::debug_span!("sensor_read"))
        .await;

        match res {
            Ok(Ok(reading)) => {
                self.metrics.publish(&reading);
                tracing::debug!(
                    message = "published sensor reading",
                    temperature = %reading.temperature(),
                    humidity = %reading.humidity(),
                );
                self.interval
            }
            Ok(Err(e)) => {
                self.metrics.record_error(e.kind().as_label());
                let delay = if e.requires_backoff() {
                    self.backoff
                } else {
                    self.interval
                };

                tracing::warn!(
                    message = "unable to read sensor, keeping previous values",
                    kind = e.kind().as_label(),
                    error = %e,
                    retry_secs = delay.as_secs_f64(),
                );
                delay
            }
            Err(e) => {
                self.metrics.record_error(PANIC_LABEL);
                tracing::error!(message = "sensor read task failed", error = %e);
                self.backoff
            }
        }
    }

    /// Read the sensor forever. This only returns if the future is dropped.
    pub async fn run(self) {
        tracing::info!(
            message = "starting sensor sampling",
            interval_secs = self.interval.as_secs_f64(),
            backoff_secs = self.backoff.as_secs_f64(),
        );

        loop {
            let delay = self.sample().await;
            time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::{SamplingLoop, DEFAULT_BACKOFF};
    use crate::metrics::{MetricRegistry, Snapshot};
    use crate::sensor::{DriverErrorKind, PanicDriver, RawSample, ScriptedDriver, SensorSource};
    use prometheus::Registry;
    use std::time::Duration;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn sampler(script: Vec<Result<RawSample, DriverErrorKind>>) -> (SamplingLoop, MetricRegistry) {
        let metrics = MetricRegistry::new(&Registry::new()).unwrap();
        let source = SensorSource::new(ScriptedDriver::new(script));
        (SamplingLoop::new(source, metrics.clone(), INTERVAL), metrics)
    }

    fn missing_temperature() -> RawSample {
        RawSample {
            temperature: None,
            humidity: Some(45.0),
        }
    }

    #[tokio::test]
    async fn test_success_publishes_and_waits_interval() {
        let (sampler, metrics) = sampler(vec![Ok(RawSample::new(22.5, 45.3))]);

        assert_eq!(INTERVAL, sampler.sample().await);

        let snapshot = metrics.snapshot();
        assert_eq!(Some(22.5), snapshot.temperature_celsius);
        assert_eq!(Some(72.5), snapshot.temperature_fahrenheit);
        assert_eq!(Some(45.3), snapshot.humidity_percent);
    }

    #[tokio::test]
    async fn test_driver_failure_backs_off() {
        let (sampler, metrics) = sampler(vec![Err(DriverErrorKind::Checksum)]);

        assert_eq!(DEFAULT_BACKOFF, sampler.sample().await);
        assert_eq!(Snapshot::default(), metrics.snapshot());
    }

    #[tokio::test]
    async fn test_missing_field_waits_interval() {
        let (sampler, metrics) = sampler(vec![Ok(missing_temperature())]);

        assert_eq!(INTERVAL, sampler.sample().await);
        assert_eq!(Snapshot::default(), metrics.snapshot());
    }

    #[tokio::test]
    async fn test_out_of_range_waits_interval() {
        let (sampler, metrics) = sampler(vec![Ok(RawSample::new(250.0, 40.0))]);

        assert_eq!(INTERVAL, sampler.sample().await);
        assert_eq!(Snapshot::default(), metrics.snapshot());
    }

    #[tokio::test]
    async fn test_failures_keep_last_known_good() {
        let (sampler, metrics) = sampler(vec![
            Ok(RawSample::new(20.0, 50.0)),
            Err(DriverErrorKind::ReadTimeout),
            Ok(missing_temperature()),
            Ok(RawSample::new(20.0, 201.0)),
        ]);

        sampler.sample().await;
        let good = metrics.snapshot();

        for _ in 0..3 {
            sampler.sample().await;
            assert_eq!(good, metrics.snapshot());
        }
    }

    #[tokio::test]
    async fn test_success_after_failures_replaces_values() {
        let (sampler, metrics) = sampler(vec![
            Ok(RawSample::new(10.0, 10.0)),
            Err(DriverErrorKind::Checksum),
            Err(DriverErrorKind::ReadTimeout),
            Err(DriverErrorKind::Checksum),
            Ok(RawSample::new(25.0, 60.0)),
        ]);

        for _ in 0..5 {
            sampler.sample().await;
        }

        let snapshot = metrics.snapshot();
        assert_eq!(Some(25.0), snapshot.temperature_celsius);
        assert_eq!(Some(77.0), snapshot.temperature_fahrenheit);
        assert_eq!(Some(60.0), snapshot.humidity_percent);
    }

    #[tokio::test]
    async fn test_driver_panic_is_absorbed() {
        let metrics = MetricRegistry::new(&Registry::new()).unwrap();
        let sampler = SamplingLoop::new(SensorSource::new(PanicDriver), metrics.clone(), INTERVAL);

        assert_eq!(DEFAULT_BACKOFF, sampler.sample().await);
        // The source mutex is poisoned now, later reads must still be attempted
        assert_eq!(DEFAULT_BACKOFF, sampler.sample().await);
        assert_eq!(Snapshot::default(), metrics.snapshot());
    }

    #[tokio::test]
    async fn test_run_survives_continuous_failures() {
        let reg = Registry::new();
        let metrics = MetricRegistry::new(&reg).unwrap();
        let source = SensorSource::new(ScriptedDriver::new(vec![]));
        let sampler = SamplingLoop::new(source, metrics.clone(), INTERVAL).with_backoff(Duration::from_millis(1));

        let res = tokio::time::timeout(Duration::from_millis(200), sampler.run()).await;
        assert!(res.is_err(), "sampling loop must not return");

        let attempts = reg
            .gather()
            .iter()
            .find(|mf| mf.get_name() == "dht22_collections_total")
            .map(|mf| mf.get_metric()[0].get_counter().get_value())
            .unwrap();

        assert!(attempts > 1.0, "expected repeated attempts, got {}", attempts);
        assert_eq!(Snapshot::default(), metrics.snapshot());
    }
}
