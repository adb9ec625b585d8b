//! The boundary to concrete metric sources.
//!
//! A [`MetricBackend`] speaks one source's wire protocol (a queue broker, a
//! SQL driver, a monitoring API). Scalers hand it a validated
//! [`BackendTarget`] and get back a [`BackendConnection`] they own for the
//! rest of the poll cycle.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use surge_state::IdentityMode;

use crate::error::ScalerResult;

/// Validated parameters identifying what to measure and how to authenticate.
#[derive(Clone, PartialEq)]
pub struct BackendTarget {
    pub trigger_type: String,
    /// `{namespace}/{name}` of the scaling object, for backend-side logging.
    pub object: String,
    /// Logged with any URL userinfo masked.
    pub params: BTreeMap<String, String>,
    /// Credentials; never logged.
    pub auth: BTreeMap<String, String>,
    pub identity: IdentityMode,
}

impl fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTarget")
            .field("trigger_type", &self.trigger_type)
            .field("object", &self.object)
            .field(
                "params",
                &self
                    .params
                    .iter()
                    .map(|(k, v)| (k, redact_userinfo(v)))
                    .collect::<BTreeMap<_, _>>(),
            )
            .field("auth", &self.auth.keys().collect::<Vec<_>>())
            .field("identity", &self.identity)
            .finish()
    }
}

/// Mask the `user:password@` part of a `scheme://` URL.
fn redact_userinfo(value: &str) -> Cow<'_, str> {
    let Some(scheme_end) = value.find("://") else {
        return Cow::Borrowed(value);
    };
    let (head, rest) = value.split_at(scheme_end + 3);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => Cow::Owned(format!("{head}***{}", &rest[at..])),
        None => Cow::Borrowed(value),
    }
}

/// A single sample read from a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendSample {
    pub value: f64,
    /// Set by sources that decide activity themselves; otherwise the scaler
    /// compares `value` against its activation threshold.
    pub active: Option<bool>,
}

impl BackendSample {
    pub fn value(value: f64) -> Self {
        Self {
            value,
            active: None,
        }
    }
}

/// A metric source driver, shared across all scaling objects.
#[async_trait]
pub trait MetricBackend: Send + Sync {
    async fn connect(&self, target: &BackendTarget) -> ScalerResult<Box<dyn BackendConnection>>;
}

/// An open connection, owned by exactly one scaler for one cycle.
#[async_trait]
pub trait BackendConnection: Send {
    async fn sample(&mut self) -> ScalerResult<BackendSample>;

    async fn close(self: Box<Self>) -> ScalerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_credentials() {
        let target = BackendTarget {
            trigger_type: "sql".to_string(),
            object: "default/reports".to_string(),
            params: BTreeMap::from([("query".to_string(), "SELECT 1".to_string())]),
            auth: BTreeMap::from([(
                "connection".to_string(),
                "postgres://user:pw@db/reports".to_string(),
            )]),
            identity: IdentityMode::None,
        };
        let rendered = format!("{target:?}");
        assert!(rendered.contains("connection"));
        assert!(!rendered.contains("user:pw"));
    }

    #[test]
    fn debug_output_masks_userinfo_in_params() {
        let target = BackendTarget {
            trigger_type: "queue".to_string(),
            object: "default/worker".to_string(),
            params: BTreeMap::from([
                ("host".to_string(), "amqp://user:pw@broker:5672/vh".to_string()),
                ("queueName".to_string(), "jobs".to_string()),
            ]),
            auth: BTreeMap::new(),
            identity: IdentityMode::None,
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("user:pw"), "{rendered}");
        assert!(rendered.contains("amqp://***@broker:5672/vh"), "{rendered}");
        assert!(rendered.contains("jobs"));
        // The value handed to the backend is untouched.
        assert_eq!(target.params["host"], "amqp://user:pw@broker:5672/vh");
    }

    #[test]
    fn userinfo_masking_leaves_plain_values_alone() {
        assert_eq!(redact_userinfo("amqp://broker/vh"), "amqp://broker/vh");
        assert_eq!(redact_userinfo("SELECT count(*) FROM jobs"), "SELECT count(*) FROM jobs");
        assert_eq!(redact_userinfo("http://h/path@x"), "http://h/path@x");
        assert_eq!(redact_userinfo("redis://:secret@cache"), "redis://***@cache");
    }
}
