//! Desired replica count from one cycle's readings.

use surge_scalers::{MetricReading, MetricTargetType};
use surge_state::ScalingPolicy;

/// Aggregated result of one poll cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScalingDecision {
    /// OR of the activation signals of every trigger that measured successfully.
    pub is_active: bool,
    /// Every reading that succeeded this cycle.
    pub readings: Vec<MetricReading>,
}

/// Replicas one reading asks for, given `current` running replicas.
///
/// `Value` readings are workload totals and scale with `current`;
/// `AverageValue` readings are per-replica and do not depend on it.
pub fn trigger_contribution(current: u32, reading: &MetricReading) -> u32 {
    let target = reading.spec.target_value;
    if target.is_nan() || target <= 0.0 || !reading.value.is_finite() {
        return 0;
    }
    let ratio = reading.value.max(0.0) / target;
    let wanted = match reading.spec.target_type {
        MetricTargetType::Value => f64::from(current) * ratio,
        MetricTargetType::AverageValue => ratio,
    };
    // Float-to-int casts saturate.
    wanted.ceil() as u32
}

/// Apply the control law and clamp to the policy bounds.
pub fn desired_replicas(current: u32, decision: &ScalingDecision, policy: &ScalingPolicy) -> u32 {
    if !decision.is_active && policy.allows_scale_to_zero() {
        return 0;
    }

    let demand = decision
        .readings
        .iter()
        .map(|r| trigger_contribution(current, r))
        .max()
        .unwrap_or(0);

    let floor = if decision.is_active {
        policy.min_replicas.max(1)
    } else {
        policy.min_replicas
    };
    demand.max(floor).min(policy.max_replicas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_scalers::MetricSpec;

    fn reading(value: f64, target: f64, target_type: MetricTargetType) -> MetricReading {
        let spec = MetricSpec {
            name: "s0-test".to_string(),
            target_value: target,
            target_type,
        };
        MetricReading::new(&spec, value)
    }

    fn policy(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy {
            min_replicas: min,
            max_replicas: max,
            ..ScalingPolicy::default()
        }
    }

    fn active(readings: Vec<MetricReading>) -> ScalingDecision {
        ScalingDecision {
            is_active: true,
            readings,
        }
    }

    #[test]
    fn average_value_ignores_current_replicas() {
        let r = reading(7.0, 2.0, MetricTargetType::AverageValue);
        assert_eq!(trigger_contribution(1, &r), 4);
        assert_eq!(trigger_contribution(50, &r), 4);
    }

    #[test]
    fn value_scales_linearly_with_current_replicas() {
        let r = reading(4.0, 1.0, MetricTargetType::Value);
        assert_eq!(trigger_contribution(2, &r), 8);
        assert_eq!(trigger_contribution(4, &r), 16);
        assert_eq!(trigger_contribution(0, &r), 0);
    }

    #[test]
    fn degenerate_readings_contribute_nothing() {
        assert_eq!(trigger_contribution(3, &reading(5.0, 0.0, MetricTargetType::AverageValue)), 0);
        assert_eq!(trigger_contribution(3, &reading(f64::NAN, 1.0, MetricTargetType::AverageValue)), 0);
        assert_eq!(trigger_contribution(3, &reading(-4.0, 1.0, MetricTargetType::Value)), 0);
    }

    #[test]
    fn max_across_triggers_wins() {
        let d = active(vec![
            reading(3.0, 1.0, MetricTargetType::AverageValue),
            reading(10.0, 1.0, MetricTargetType::Value),
        ]);
        // Value: ceil(2 * 10 / 1) = 20 beats 3.
        assert_eq!(desired_replicas(2, &d, &policy(0, 100)), 20);
    }

    #[test]
    fn result_always_within_bounds() {
        for current in [0, 1, 5, 40] {
            for value in [0.0, 0.5, 3.0, 1e9] {
                for is_active in [false, true] {
                    let d = ScalingDecision {
                        is_active,
                        readings: vec![reading(value, 1.0, MetricTargetType::Value)],
                    };
                    let p = policy(2, 10);
                    let desired = desired_replicas(current, &d, &p);
                    assert!((2..=10).contains(&desired), "{current} {value} {is_active} -> {desired}");
                }
            }
        }
    }

    #[test]
    fn inactive_scales_to_zero_only_when_min_is_zero() {
        let idle = ScalingDecision {
            is_active: false,
            readings: vec![reading(9.0, 1.0, MetricTargetType::AverageValue)],
        };
        assert_eq!(desired_replicas(5, &idle, &policy(0, 10)), 0);
        // With a non-zero floor the control law still runs.
        assert_eq!(desired_replicas(5, &idle, &policy(1, 10)), 9);
    }

    #[test]
    fn activation_wakes_value_trigger_from_zero() {
        let d = active(vec![reading(4.0, 1.0, MetricTargetType::Value)]);
        assert_eq!(desired_replicas(0, &d, &policy(0, 10)), 1);
    }

    #[test]
    fn missing_readings_are_not_zero_demand() {
        // One trigger measured 4; the other failed and simply has no reading.
        let d = active(vec![reading(4.0, 1.0, MetricTargetType::AverageValue)]);
        assert_eq!(desired_replicas(10, &d, &policy(0, 20)), 4);
    }
}
