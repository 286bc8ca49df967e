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

use clap::{crate_version, Parser};
use dht22_exporter::http::{http_route, RequestContext};
use dht22_exporter::metrics::{MetricRegistry, MetricsExposition};
use dht22_exporter::sampling::SamplingLoop;
use dht22_exporter::sensor::{open_pin, DHT22Driver, SensorSource};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use prometheus::Registry;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8001;

/// Expose temperature and humidity from a DHT22 sensor as Prometheus metrics
///
/// Periodically read temperature and humidity from a DHT22 sensor connected to a GPIO
/// pin of a local machine, usually a Raspberry PI, and expose the last valid reading
/// as Prometheus gauges at /metrics.
#[derive(Debug, Parser)]
#[clap(name = "dht22_exporter", version = crate_version!())]
struct ExporterApplication {
    /// BCM GPIO pin number the DHT22 sensor data line is connected to
    #[clap(short = 'g', long)]
    gpio: u8,

    /// Read the sensor at this interval, in seconds
    #[clap(short = 'i', long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Address to expose metrics on. Defaults to all interfaces
    #[clap(short = 'a', long)]
    address: Option<String>,

    /// Port to expose metrics on
    #[clap(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = ExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let startup = Instant::now();
    let address = opts.address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS);
    let bind = resolve_bind(address, opts.port).unwrap_or_else(|e| {
        tracing::error!(message = "invalid bind address", address = address, port = opts.port, error = %e);
        process::exit(1)
    });

    let pin = open_pin(opts.gpio).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize data pin", gpio = opts.gpio, error = %e);
        process::exit(1)
    });

    let registry = Registry::new();
    register_process_collector(&registry);
    let metrics = MetricRegistry::new(&registry).unwrap_or_else(|e| {
        tracing::error!(message = "failed to register sensor metrics", error = %e);
        process::exit(1)
    });

    let source = SensorSource::new(DHT22Driver::from_pin(pin));
    let sampler = SamplingLoop::new(source, metrics, Duration::from_secs(opts.interval));

    let context = Arc::new(RequestContext::new(MetricsExposition::new(registry)));
    let service = make_service_fn(move |_| {
        let context = context.clone();

        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                http_route(req, context.clone()).instrument(tracing::span!(Level::DEBUG, "dht22_request"))
            }))
        }
    });

    let server = Server::try_bind(&bind).unwrap_or_else(|e| {
        tracing::error!(message = "error starting server", address = %bind, error = %e);
        process::exit(1)
    });

    tracing::info!(message = "starting server", address = %bind, gpio = opts.gpio);
    task::spawn(sampler.run());

    server
        .serve(service)
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!(message = "server shutdown", runtime_secs = %startup.elapsed().as_secs());
    Ok(())
}

/// Resolve an IP address or hostname and port to the first matching socket address.
fn resolve_bind(address: &str, port: u16) -> io::Result<SocketAddr> {
    (address, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve to anything"))
}

#[cfg(target_os = "linux")]
fn register_process_collector(registry: &Registry) {
    let collector = prometheus::process_collector::ProcessCollector::for_self();
    if let Err(e) = registry.register(Box::new(collector)) {
        tracing::warn!(message = "unable to register process metrics", error = %e);
    }
}

#[cfg(not(target_os = "linux"))]
fn register_process_collector(_registry: &Registry) {}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
