//! Humane endpoint evaluation
//!
//! An observation reaches an endpoint when the weight loss relative to
//! baseline meets the experiment's weight-loss threshold, or when its total
//! CSS meets the CSS threshold under the configured operator.

use serde::{Deserialize, Serialize};

use crate::derived::DerivedFields;
use crate::models::CssOperator;

/// Endpoint thresholds configured on an experiment
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointThresholds {
    /// Weight loss in percent (e.g. 20.0 for a 20 % loss)
    pub weight_loss_pct: Option<f64>,
    pub css_threshold: Option<i64>,
    pub css_operator: CssOperator,
}

/// Which endpoints an observation has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub weight_loss_reached: bool,
    pub css_reached: bool,
}

impl EndpointStatus {
    pub fn any(&self) -> bool {
        self.weight_loss_reached || self.css_reached
    }
}

/// Evaluate an observation's derived fields against the thresholds
///
/// Unscored observations (pre-baseline or missing inputs) never reach an
/// endpoint.
pub fn evaluate_endpoint(derived: &DerivedFields, thresholds: &EndpointThresholds) -> EndpointStatus {
    let weight_loss_reached = match (derived.weight_pct_change, thresholds.weight_loss_pct) {
        (Some(change), Some(limit)) => change <= -limit.abs(),
        _ => false,
    };
    let css_reached = match (derived.total_css, thresholds.css_threshold) {
        (Some(css), Some(limit)) => thresholds.css_operator.reached(css, limit),
        _ => false,
    };

    EndpointStatus {
        weight_loss_reached,
        css_reached,
    }
}
