//! `queue` — message-queue depth or publish rate.

use std::collections::BTreeMap;

use crate::error::ScalerResult;
use crate::scaler::ScalerConfig;
use crate::source::{SourceSpec, pick_auth};

pub const TRIGGER_TYPE: &str = "queue";

const MODES: [&str; 2] = ["QueueLength", "MessageRate"];

/// Required: `host`, `queueName`.
/// Optional: `mode` (`QueueLength` | `MessageRate`), `value` (target, default 5),
/// `activationValue` (default 0), `vhost`.
pub fn parse(config: &ScalerConfig) -> ScalerResult<SourceSpec> {
    let meta = config.metadata();
    let host = meta.required_str("host")?;
    let queue = meta.required_str("queueName")?;
    let mode = meta.one_of("mode", &MODES, "QueueLength")?;
    let target = meta.positive_f64_or("value", 5.0)?;
    let activation = meta.f64_or("activationValue", 0.0)?;

    let mut params = BTreeMap::from([
        ("host".to_string(), host.to_string()),
        ("queueName".to_string(), queue.to_string()),
        ("mode".to_string(), mode.to_string()),
    ]);
    if let Some(vhost) = meta.optional_str("vhost")? {
        params.insert("vhost".to_string(), vhost.to_string());
    }

    Ok(SourceSpec {
        metric_detail: queue.to_string(),
        target_value: target,
        activation_threshold: activation,
        params,
        auth: pick_auth(config, &["username", "password"]),
    })
}
