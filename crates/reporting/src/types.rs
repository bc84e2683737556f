//! Funnel definitions and the reports produced from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FunnelDefinitionInput")]
pub struct FunnelDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<FunnelStep>,
}

/// Wire shape of a definition; a missing or blank name falls back to the id.
#[derive(Deserialize)]
struct FunnelDefinitionInput {
    id: String,
    #[serde(default)]
    name: Option<String>,
    steps: Vec<FunnelStep>,
}

impl From<FunnelDefinitionInput> for FunnelDefinition {
    fn from(input: FunnelDefinitionInput) -> Self {
        let name = input
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| input.id.clone());
        Self {
            id: input.id,
            name,
            steps: input.steps,
        }
    }
}

impl FunnelDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<FunnelStep>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            steps,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub event_type: String,
    pub step_name: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FunnelStep {
    /// A required step whose name is the event type it matches.
    pub fn new(event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        Self {
            step_name: event_type.clone(),
            event_type,
            required: true,
        }
    }

    pub fn named(event_type: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            step_name: step_name.into(),
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionFunnel {
    pub funnel_id: String,
    pub total_users: u64,
    pub completed_users: u64,
    pub conversion_rate: f64,
    pub step_analytics: Vec<StepAnalytics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_breakdown: Option<BTreeMap<String, SegmentReport>>,
    /// Mean milliseconds from first-step to last-step event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_complete: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAnalytics {
    pub step_name: String,
    pub total_users: u64,
    pub completion_rate: f64,
    pub dropoff_rate: f64,
    /// Mean milliseconds since the previous step's event.
    pub average_time: f64,
    pub next_step_correlations: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentReport {
    pub users: u64,
    pub conversion_rate: f64,
    pub step_analytics: Vec<StepAnalytics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropOff {
    pub from_step: String,
    pub to_step: String,
    pub dropoff_rate: f64,
    pub users: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub duplicates_skipped: usize,
    pub users_touched: usize,
}
