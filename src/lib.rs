pub mod compare;
pub mod config;
pub mod engagement;
pub mod error;
pub mod extract;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod sources;
pub mod taxonomy;
pub mod week;

pub use config::Settings;
pub use error::{Error, Result};
pub use models::{Metric, MetricKind, Platform, PlatformSample};
pub use week::WeekPeriod;
