//! Growth analytics reporting — conversion funnels, drop-off rates,
//! segment breakdowns, and cross-funnel comparison.

pub mod funnel;
pub mod segment;
mod store;
pub mod types;

pub use funnel::FunnelAnalyzer;
pub use segment::{ComparisonOperator, PropertyFilter, Segment};
pub use types::{
    ConversionFunnel, DropOff, FunnelDefinition, FunnelStep, IngestSummary, SegmentReport,
    StepAnalytics,
};
