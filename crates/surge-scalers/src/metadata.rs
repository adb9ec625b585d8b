//! Typed, validating access to a trigger's string parameters.
//!
//! A parameter `k` is looked up, in order, in:
//!
//! 1. trigger metadata `k`
//! 2. trigger metadata `kFromEnv`, naming a variable of the resolved container env
//! 3. resolved authentication parameters `k`
//!
//! Every accessor returns [`ScalerError::Config`] on a missing required key or a
//! value that does not parse, so constructors fail before any I/O.

use crate::error::{ScalerError, ScalerResult};
use crate::scaler::ScalerConfig;

/// Borrowing view over a [`ScalerConfig`]'s parameters.
#[derive(Debug, Clone, Copy)]
pub struct TriggerMetadata<'a> {
    config: &'a ScalerConfig,
}

impl<'a> TriggerMetadata<'a> {
    pub fn new(config: &'a ScalerConfig) -> Self {
        Self { config }
    }

    /// Resolve a parameter through metadata, env indirection and auth params.
    pub fn lookup(&self, key: &str) -> ScalerResult<Option<&'a str>> {
        if let Some(v) = self.config.metadata.get(key).filter(|v| !v.is_empty()) {
            return Ok(Some(v.as_str()));
        }

        let env_key = format!("{key}FromEnv");
        if let Some(var) = self.config.metadata.get(&env_key).filter(|v| !v.is_empty()) {
            return match self.config.resolved_env.get(var) {
                Some(v) => Ok(Some(v.as_str())),
                None => Err(ScalerError::Config(format!(
                    "{env_key} references environment variable {var:?}, which is not set on the target container"
                ))),
            };
        }

        Ok(self
            .config
            .auth_params
            .get(key)
            .filter(|v| !v.is_empty())
            .map(String::as_str))
    }

    pub fn optional_str(&self, key: &str) -> ScalerResult<Option<&'a str>> {
        self.lookup(key)
    }

    pub fn required_str(&self, key: &str) -> ScalerResult<&'a str> {
        self.lookup(key)?
            .ok_or_else(|| ScalerError::Config(format!("missing required parameter {key:?}")))
    }

    /// A value that must only come from authentication parameters.
    pub fn auth_param(&self, key: &str) -> Option<&'a str> {
        self.config
            .auth_params
            .get(key)
            .filter(|v| !v.is_empty())
            .map(String::as_str)
    }

    pub fn required_f64(&self, key: &str) -> ScalerResult<f64> {
        parse_f64(key, self.required_str(key)?)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> ScalerResult<f64> {
        match self.lookup(key)? {
            Some(v) => parse_f64(key, v),
            None => Ok(default),
        }
    }

    /// Like [`f64_or`](Self::f64_or) but rejects values `<= 0`.
    pub fn positive_f64_or(&self, key: &str, default: f64) -> ScalerResult<f64> {
        let value = self.f64_or(key, default)?;
        ensure_positive(key, value)
    }

    pub fn required_positive_f64(&self, key: &str) -> ScalerResult<f64> {
        let value = self.required_f64(key)?;
        ensure_positive(key, value)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> ScalerResult<u64> {
        match self.lookup(key)? {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                ScalerError::Config(format!("{key:?} must be a non-negative integer, got {v:?}"))
            }),
            None => Ok(default),
        }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> ScalerResult<bool> {
        match self.lookup(key)? {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ScalerError::Config(format!(
                    "{key:?} must be a boolean, got {v:?}"
                ))),
            },
            None => Ok(default),
        }
    }

    /// A value restricted to `allowed` (case-sensitive), or `default` when unset.
    pub fn one_of(
        &self,
        key: &str,
        allowed: &[&'static str],
        default: &'static str,
    ) -> ScalerResult<&'a str> {
        match self.lookup(key)? {
            Some(v) if allowed.iter().any(|a| *a == v) => Ok(v),
            Some(v) => Err(ScalerError::Config(format!(
                "{key:?} must be one of {allowed:?}, got {v:?}"
            ))),
            None => Ok(default),
        }
    }
}

fn parse_f64(key: &str, value: &str) -> ScalerResult<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ScalerError::Config(format!(
            "{key:?} must be a number, got {value:?}"
        ))),
    }
}

fn ensure_positive(key: &str, value: f64) -> ScalerResult<f64> {
    if value > 0.0 {
        Ok(value)
    } else {
        Err(ScalerError::Config(format!(
            "{key:?} must be greater than 0, got {value}"
        )))
    }
}
