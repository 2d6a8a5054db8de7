//! Outlier model training, scoring and lifecycle

pub mod forest;
pub mod lifecycle;

pub use forest::{score, train, ForestParams, IsolationForest, OutlierScore, ScoringModel};
pub use lifecycle::{ModelLifecycleManager, ModelVersionInfo, RollingWindow};
