//! `external` — an out-of-process service reporting value and activity.
//!
//! Every metadata key other than the ones consumed here is forwarded to the
//! service unchanged. The service's activity flag is used as-is.

use std::collections::BTreeMap;

use crate::error::ScalerResult;
use crate::scaler::ScalerConfig;
use crate::source::SourceSpec;

pub const TRIGGER_TYPE: &str = "external";

const CONSUMED: [&str; 3] = ["targetValue", "activationTargetValue", "metricName"];

/// Required: `scalerAddress`, `targetValue`.
/// Optional: `metricName` (default `external`), `activationTargetValue`.
pub fn parse(config: &ScalerConfig) -> ScalerResult<SourceSpec> {
    let meta = config.metadata();
    let address = meta.required_str("scalerAddress")?;
    let target = meta.required_positive_f64("targetValue")?;
    let activation = meta.f64_or("activationTargetValue", 0.0)?;
    let metric = meta.optional_str("metricName")?.unwrap_or("external");

    let mut params: BTreeMap<String, String> = config
        .metadata
        .iter()
        .filter(|(k, _)| !CONSUMED.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    params.insert("scalerAddress".to_string(), address.to_string());

    Ok(SourceSpec {
        metric_detail: metric.to_string(),
        target_value: target,
        activation_threshold: activation,
        params,
        auth: config
            .auth_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}
