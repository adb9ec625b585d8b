//! `metrics-api` — a numeric value read from a JSON HTTP endpoint.
//!
//! Each measurement performs one `GET`; no connection is held between
//! cycles, so `release()` has nothing to do.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use http::uri::PathAndQuery;
use http_body_util::{BodyExt, Empty};
use serde_json::Value;
use tracing::debug;

use crate::error::{ScalerError, ScalerResult};
use crate::metric::{Measurement, MetricReading, MetricSpec};
use crate::scaler::{Scaler, ScalerConfig};

pub const TRIGGER_TYPE: &str = "metrics-api";

pub struct MetricsApiScaler {
    authority: String,
    path: PathAndQuery,
    uri: String,
    value_location: String,
    activation_threshold: f64,
    /// Pre-validated credential header, marked sensitive.
    auth: Option<(HeaderName, HeaderValue)>,
    timeout: Duration,
    spec: MetricSpec,
}

impl MetricsApiScaler {
    /// Required: `url` (`http://host[:port]/path`), `valueLocation`, `targetValue`.
    /// Optional: `activationTargetValue`, `authMode` (`bearer` reads auth
    /// `token`; `apiKey` reads auth `apiKey` and sends it in `keyParamName`,
    /// default `X-API-KEY`), `timeoutMs` (default 3000).
    pub fn new(config: &ScalerConfig) -> ScalerResult<Self> {
        let meta = config.metadata();
        let url = meta.required_str("url")?;
        let Some(rest) = url.strip_prefix("http://") else {
            return Err(ScalerError::Config(format!(
                "\"url\" {url:?} must use http://"
            )));
        };
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(ScalerError::Config(format!("\"url\" {url:?} has no host")));
        }
        let authority = if authority.contains(':') {
            authority.to_string()
        } else {
            format!("{authority}:80")
        };
        let path = PathAndQuery::try_from(path)
            .map_err(|e| ScalerError::Config(format!("\"url\" {url:?} has an invalid path: {e}")))?;

        let value_location = meta.required_str("valueLocation")?.to_string();
        let target = meta.required_positive_f64("targetValue")?;
        let activation = meta.f64_or("activationTargetValue", 0.0)?;
        let timeout = Duration::from_millis(meta.u64_or("timeoutMs", 3000)?);

        let auth = match meta.one_of("authMode", &["none", "bearer", "apiKey"], "none")? {
            "bearer" => {
                let token = meta.auth_param("token").ok_or_else(|| {
                    ScalerError::Config("authMode bearer requires auth \"token\"".to_string())
                })?;
                Some((AUTHORIZATION, sensitive_value("token", &format!("Bearer {token}"))?))
            }
            "apiKey" => {
                let name = meta.optional_str("keyParamName")?.unwrap_or("X-API-KEY");
                let header = HeaderName::try_from(name).map_err(|_| {
                    ScalerError::Config(format!("\"keyParamName\" {name:?} is not a valid header name"))
                })?;
                let key = meta.auth_param("apiKey").ok_or_else(|| {
                    ScalerError::Config("authMode apiKey requires auth \"apiKey\"".to_string())
                })?;
                Some((header, sensitive_value("apiKey", key)?))
            }
            _ => None,
        };

        Ok(Self {
            uri: format!("http://{authority}{path}"),
            path,
            authority,
            spec: MetricSpec {
                name: config.metric_name(&value_location),
                target_value: target,
                target_type: config.metric_type,
            },
            value_location,
            activation_threshold: activation,
            auth,
            timeout,
        })
    }

    async fn fetch(&self) -> ScalerResult<Bytes> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| ScalerError::Backend(format!("connect {}: {e}", self.authority)))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ScalerError::Backend(format!("handshake: {e}")))?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut req = http::Request::builder()
            .method("GET")
            .uri(self.path.as_str())
            .header("host", &self.authority)
            .header("accept", "application/json")
            .header("user-agent", "surge-scalers/0.1");
        if let Some((name, value)) = &self.auth {
            req = req.header(name, value);
        }
        let req = req
            .body(Empty::<Bytes>::new())
            .map_err(|e| ScalerError::Config(format!("invalid request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ScalerError::Backend(format!("request {}: {e}", self.uri)))?;
        if !resp.status().is_success() {
            return Err(ScalerError::Backend(format!(
                "{} returned {}",
                self.uri,
                resp.status()
            )));
        }
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ScalerError::Backend(format!("reading body: {e}")))?;
        Ok(body.to_bytes())
    }
}

fn sensitive_value(param: &str, raw: &str) -> ScalerResult<HeaderValue> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| {
        ScalerError::Config(format!("auth {param:?} contains characters not allowed in a header"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Follow a dotted path (`a.b.0.c`) into a JSON document and read a number.
/// Numeric strings are accepted.
fn extract_value(doc: &Value, location: &str) -> Result<f64, String> {
    let mut node = doc;
    for segment in location.split('.') {
        node = match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| format!("{location:?} not found at {segment:?}"))?;
    }
    match node {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{location:?} is not finite")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("{location:?} holds non-numeric string {s:?}")),
        other => Err(format!("{location:?} holds {other}, not a number")),
    }
}

#[async_trait]
impl Scaler for MetricsApiScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn measure(&self) -> ScalerResult<Measurement> {
        let body = tokio::time::timeout(self.timeout, self.fetch())
            .await
            .map_err(|_| ScalerError::Timeout(self.timeout))??;
        let doc: Value = serde_json::from_slice(&body)
            .map_err(|e| ScalerError::Backend(format!("invalid JSON from {}: {e}", self.uri)))?;
        let value = extract_value(&doc, &self.value_location).map_err(ScalerError::Backend)?;
        debug!(metric = %self.spec.name, value, "metrics api sample");

        Ok(Measurement {
            active: value > self.activation_threshold,
            readings: vec![MetricReading::new(&self.spec, value)],
        })
    }

    async fn release(&self) -> ScalerResult<()> {
        Ok(())
    }
}
