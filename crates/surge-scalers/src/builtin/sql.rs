//! `sql` — scalar result of an aggregate query.

use std::collections::BTreeMap;

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::ScalerConfig;
use crate::source::SourceSpec;

pub const TRIGGER_TYPE: &str = "sql";

/// Required: `connection` (usually via auth or `connectionFromEnv`), `query`,
/// `targetQueryValue`. Optional: `activationTargetQueryValue` (default 0).
pub fn parse(config: &ScalerConfig) -> ScalerResult<SourceSpec> {
    let meta = config.metadata();
    let connection = meta.required_str("connection")?;
    let query = meta.required_str("query")?;
    if !query.trim_start().to_ascii_lowercase().starts_with("select") {
        return Err(ScalerError::Config(
            "\"query\" must be a SELECT statement".to_string(),
        ));
    }
    let target = meta.required_positive_f64("targetQueryValue")?;
    let activation = meta.f64_or("activationTargetQueryValue", 0.0)?;

    Ok(SourceSpec {
        metric_detail: String::new(),
        target_value: target,
        activation_threshold: activation,
        params: BTreeMap::from([("query".to_string(), query.to_string())]),
        auth: BTreeMap::from([("connection".to_string(), connection.to_string())]),
    })
}
