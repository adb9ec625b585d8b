//! surge-scalers — one scaler per trigger, built through a registry.
//!
//! A [`Scaler`] wraps a single declared trigger: it publishes the metric
//! specs it reports, measures the current value and activation signal, and
//! releases whatever connection it holds. Scalers are constructed fresh for
//! every poll cycle by the [`ScalerRegistry`], which maps a trigger's type
//! tag to a constructor. Constructors validate their metadata eagerly, so a
//! malformed trigger fails at construction and never at measurement.
//!
//! # Built-in trigger types
//!
//! ```text
//! cron          window between two cron expressions      (self-contained)
//! metrics-api   JSON value fetched over HTTP             (self-contained)
//! queue         queue depth / message rate               (MetricBackend)
//! stream        consumer-group lag                       (MetricBackend)
//! sql           scalar result of an aggregate query      (MetricBackend)
//! cloud-metric  provider monitoring statistic            (MetricBackend)
//! external      value and activity from an external service (MetricBackend)
//! ```
//!
//! Backend-driven types are only available once a [`MetricBackend`] is
//! registered for them; the wire protocol lives in the backend.

pub mod backend;
pub mod builtin;
pub mod error;
pub mod metadata;
pub mod metric;
pub mod registry;
pub mod scaler;
pub mod source;

pub use backend::{BackendConnection, BackendSample, BackendTarget, MetricBackend};
pub use error::{ScalerError, ScalerResult};
pub use metadata::TriggerMetadata;
pub use metric::{Measurement, MetricReading, MetricSpec, MetricTargetType, metric_name};
pub use registry::{ScalerFactory, ScalerRegistry};
pub use scaler::{Scaler, ScalerConfig};
