//! Metric specs and readings produced by scalers.

pub use surge_state::MetricTargetType;

/// A metric a scaler reports, with the target the control law aims for.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub target_value: f64,
    pub target_type: MetricTargetType,
}

/// One measured value for a metric spec.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub name: String,
    pub value: f64,
    pub spec: MetricSpec,
}

impl MetricReading {
    pub fn new(spec: &MetricSpec, value: f64) -> Self {
        Self {
            name: spec.name.clone(),
            value,
            spec: spec.clone(),
        }
    }
}

/// The result of one `measure()` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Measurement {
    /// Whether the trigger currently has load worth scaling for.
    pub active: bool,
    pub readings: Vec<MetricReading>,
}

/// Build a metric name of the form `s{index}-{type}-{detail}`.
///
/// Lower-cased; every run of characters outside `[a-z0-9]` becomes one `-`.
pub fn metric_name(index: usize, trigger_type: &str, detail: &str) -> String {
    let raw = if detail.is_empty() {
        format!("s{index}-{trigger_type}")
    } else {
        format!("s{index}-{trigger_type}-{detail}")
    };

    let mut name = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            name.push(c);
            last_dash = false;
        } else if !last_dash {
            name.push('-');
            last_dash = true;
        }
    }
    name.trim_end_matches('-').to_string()
}
