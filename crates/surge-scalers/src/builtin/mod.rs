//! Built-in trigger types.

pub mod cloud;
pub mod cron;
pub mod external;
pub mod metrics_api;
pub mod queue;
pub mod sql;
pub mod stream;

use crate::source::SourceParser;

/// Metadata parser for a backend-driven trigger type.
pub fn source_parser(trigger_type: &str) -> Option<SourceParser> {
    match trigger_type {
        queue::TRIGGER_TYPE => Some(queue::parse),
        stream::TRIGGER_TYPE => Some(stream::parse),
        sql::TRIGGER_TYPE => Some(sql::parse),
        cloud::TRIGGER_TYPE => Some(cloud::parse),
        external::TRIGGER_TYPE => Some(external::parse),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use surge_state::{IdentityMode, MetricTargetType};

    use crate::scaler::ScalerConfig;

    pub fn pairs(items: &[(&str, &str)]) -> HashMap<String, String> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    pub fn config(trigger_type: &str, metadata: &[(&str, &str)], auth: &[(&str, &str)]) -> ScalerConfig {
        ScalerConfig {
            object_name: "worker".to_string(),
            namespace: "default".to_string(),
            trigger_index: 0,
            trigger_type: trigger_type.to_string(),
            resolved_env: HashMap::new(),
            metadata: pairs(metadata),
            auth_params: pairs(auth),
            identity: IdentityMode::None,
            metric_type: MetricTargetType::AverageValue,
        }
    }
}
