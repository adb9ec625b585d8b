//! `stream` — consumer-group lag on a partitioned stream.

use std::collections::BTreeMap;

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::ScalerConfig;
use crate::source::{SourceSpec, pick_auth};

pub const TRIGGER_TYPE: &str = "stream";

/// Required: `bootstrapServers`, `stream`, `consumerGroup`.
/// Optional: `lagCount` (default 5), `activationLagCount` (default 0),
/// `offsetResetPolicy` (`latest` | `earliest`), `allowIdleConsumers`,
/// `partitionLimit` (0 = no limit).
pub fn parse(config: &ScalerConfig) -> ScalerResult<SourceSpec> {
    let meta = config.metadata();
    let servers = meta.required_str("bootstrapServers")?;
    let stream = meta.required_str("stream")?;
    let group = meta.required_str("consumerGroup")?;
    let lag = meta.positive_f64_or("lagCount", 5.0)?;
    let activation = meta.f64_or("activationLagCount", 0.0)?;
    if activation < 0.0 {
        return Err(ScalerError::Config(format!(
            "\"activationLagCount\" must not be negative, got {activation}"
        )));
    }
    let reset = meta.one_of("offsetResetPolicy", &["latest", "earliest"], "latest")?;
    let allow_idle = meta.bool_or("allowIdleConsumers", false)?;
    let partition_limit = meta.u64_or("partitionLimit", 0)?;

    let params = BTreeMap::from([
        ("bootstrapServers".to_string(), servers.to_string()),
        ("stream".to_string(), stream.to_string()),
        ("consumerGroup".to_string(), group.to_string()),
        ("offsetResetPolicy".to_string(), reset.to_string()),
        ("allowIdleConsumers".to_string(), allow_idle.to_string()),
        ("partitionLimit".to_string(), partition_limit.to_string()),
    ]);

    Ok(SourceSpec {
        metric_detail: format!("{stream}-{group}"),
        target_value: lag,
        activation_threshold: activation,
        params,
        auth: pick_auth(config, &["username", "password", "tls", "ca"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::config;

    #[test]
    fn requires_stream_and_consumer_group() {
        let cfg = config(TRIGGER_TYPE, &[("bootstrapServers", "broker:9092"), ("stream", "events")], &[]);
        let err = parse(&cfg).unwrap_err();
        assert!(err.to_string().contains("consumerGroup"));
    }

    #[test]
    fn parses_full_metadata() {
        let cfg = config(
            TRIGGER_TYPE,
            &[
                ("bootstrapServers", "broker:9092"),
                ("stream", "events"),
                ("consumerGroup", "billing"),
                ("lagCount", "50"),
                ("activationLagCount", "3"),
                ("offsetResetPolicy", "earliest"),
                ("allowIdleConsumers", "true"),
            ],
            &[("password", "pw")],
        );
        let spec = parse(&cfg).unwrap();
        assert_eq!(spec.target_value, 50.0);
        assert_eq!(spec.activation_threshold, 3.0);
        assert_eq!(spec.metric_detail, "events-billing");
        assert_eq!(spec.params["offsetResetPolicy"], "earliest");
        assert_eq!(spec.params["allowIdleConsumers"], "true");
        assert_eq!(spec.auth.len(), 1);
    }

    #[test]
    fn rejects_invalid_numbers_and_flags() {
        let base = [
            ("bootstrapServers", "broker:9092"),
            ("stream", "events"),
            ("consumerGroup", "billing"),
        ];
        for bad in [
            ("lagCount", "-1"),
            ("activationLagCount", "-2"),
            ("allowIdleConsumers", "sometimes"),
            ("partitionLimit", "1.5"),
            ("offsetResetPolicy", "newest"),
        ] {
            let mut items = base.to_vec();
            items.push(bad);
            let cfg = config(TRIGGER_TYPE, &items, &[]);
            assert!(parse(&cfg).unwrap_err().is_config(), "{bad:?} should be rejected");
        }
    }
}
