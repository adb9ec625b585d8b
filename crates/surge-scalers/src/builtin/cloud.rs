//! `cloud-metric` — an aggregated statistic from a cloud monitoring API.

use std::collections::BTreeMap;

use surge_state::IdentityMode;

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::ScalerConfig;
use crate::source::{SourceSpec, pick_auth};

pub const TRIGGER_TYPE: &str = "cloud-metric";

const STATS: [&str; 5] = ["Average", "Sum", "Maximum", "Minimum", "SampleCount"];

/// Auth parameter each workload-identity provider supplies.
pub fn identity_parameter(identity: IdentityMode) -> Option<&'static str> {
    match identity {
        IdentityMode::None => None,
        IdentityMode::Aws => Some("awsRoleArn"),
        IdentityMode::Azure => Some("azureClientId"),
        IdentityMode::Gcp => Some("gcpServiceAccount"),
    }
}

/// Required: `metricNamespace`, `metricName`, `targetMetricValue`, `region`,
/// and either workload identity or `accessKey` + `secretKey` auth parameters.
/// Optional: `activationTargetMetricValue` (default 0), `metricStat`
/// (default `Average`), `metricStatPeriod` seconds (default 300),
/// `dimensions` (`name=value;name=value`).
pub fn parse(config: &ScalerConfig) -> ScalerResult<SourceSpec> {
    let meta = config.metadata();
    let namespace = meta.required_str("metricNamespace")?;
    let metric = meta.required_str("metricName")?;
    let region = meta.required_str("region")?;
    let target = meta.required_positive_f64("targetMetricValue")?;
    let activation = meta.f64_or("activationTargetMetricValue", 0.0)?;
    let stat = meta.one_of("metricStat", &STATS, "Average")?;
    let period = meta.u64_or("metricStatPeriod", 300)?;
    if period == 0 {
        return Err(ScalerError::Config(
            "\"metricStatPeriod\" must be greater than 0".to_string(),
        ));
    }

    let mut params = BTreeMap::from([
        ("metricNamespace".to_string(), namespace.to_string()),
        ("metricName".to_string(), metric.to_string()),
        ("region".to_string(), region.to_string()),
        ("metricStat".to_string(), stat.to_string()),
        ("metricStatPeriod".to_string(), period.to_string()),
    ]);
    if let Some(dimensions) = meta.optional_str("dimensions")? {
        validate_dimensions(dimensions)?;
        params.insert("dimensions".to_string(), dimensions.to_string());
    }

    let auth = match identity_parameter(config.identity) {
        Some(param) => {
            if meta.auth_param(param).is_none() {
                return Err(ScalerError::Config(format!(
                    "identity {:?} did not resolve parameter {param:?}",
                    config.identity
                )));
            }
            pick_auth(config, &[param])
        }
        None => {
            for key in ["accessKey", "secretKey"] {
                if meta.auth_param(key).is_none() {
                    return Err(ScalerError::Config(format!(
                        "missing credential {key:?}; set it via auth or use workload identity"
                    )));
                }
            }
            pick_auth(config, &["accessKey", "secretKey", "sessionToken"])
        }
    };

    Ok(SourceSpec {
        metric_detail: format!("{namespace}-{metric}"),
        target_value: target,
        activation_threshold: activation,
        params,
        auth,
    })
}

fn validate_dimensions(raw: &str) -> ScalerResult<()> {
    for pair in raw.split(';').filter(|p| !p.trim().is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {}
            _ => {
                return Err(ScalerError::Config(format!(
                    "\"dimensions\" entry {pair:?} must look like name=value"
                )));
            }
        }
    }
    Ok(())
}
