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

use crate::metrics::MetricsExposition;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::TEXT_FORMAT;
use std::sync::Arc;

/// Global state shared between all HTTP requests via Arc.
#[derive(Debug)]
pub struct RequestContext {
    exposition: MetricsExposition,
}

impl RequestContext {
    pub fn new(exposition: MetricsExposition) -> Self {
        RequestContext { exposition }
    }
}

/// Serve the current metrics at `/metrics` for `GET` requests. If the metrics can't
/// be encoded an HTTP 500 is returned and the error is logged.
pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let res = match (&method, path.as_ref()) {
        (&Method::GET, "/metrics") => match context.exposition.encoded_text().await {
            Ok(buffer) => {
                let mut res = Response::new(Body::from(buffer));
                res.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
                res
            }
            Err(e) => {
                tracing::error!(message = "error encoding metrics to text format", error = %e);
                status_only(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },
        (_, "/metrics") => status_only(StatusCode::METHOD_NOT_ALLOWED),
        _ => status_only(StatusCode::NOT_FOUND),
    };

    Ok(res)
}

fn status_only(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}

#[cfg(test)]
mod test {
    use super::{http_route, RequestContext};
    use crate::metrics::{MetricRegistry, MetricsExposition};
    use crate::sensor::{RawSample, SensorReading};
    use hyper::header::CONTENT_TYPE;
    use hyper::{Body, Method, Request, StatusCode};
    use prometheus::{Registry, TEXT_FORMAT};
    use std::sync::Arc;

    fn context() -> (Arc<RequestContext>, MetricRegistry) {
        let reg = Registry::new();
        let metrics = MetricRegistry::new(&reg).unwrap();
        (Arc::new(RequestContext::new(MetricsExposition::new(reg))), metrics)
    }

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder().method(method).uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_get_metrics() {
        let (context, metrics) = context();
        metrics.publish(&SensorReading::try_from(RawSample::new(22.5, 45.3)).unwrap());

        let res = http_route(request(Method::GET, "/metrics"), context).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
        assert_eq!(TEXT_FORMAT, res.headers()[CONTENT_TYPE]);

        let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("dht22_temperature_celsius 22.5"));
        assert!(text.contains("dht22_temperature_fahrenheit 72.5"));
        assert!(text.contains("dht22_humidity 45.3"));
    }

    #[tokio::test]
    async fn test_get_metrics_before_first_reading() {
        let (context, _metrics) = context();

        let res = http_route(request(Method::GET, "/metrics"), context).await.unwrap();
        assert_eq!(StatusCode::OK, res.status());
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (context, _metrics) = context();

        let res = http_route(request(Method::POST, "/metrics"), context).await.unwrap();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, res.status());
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (context, _metrics) = context();

        let res = http_route(request(Method::GET, "/"), context).await.unwrap();
        assert_eq!(StatusCode::NOT_FOUND, res.status());
    }
}
