//! Funnel analysis — tracks user progression through multi-step conversion paths.

use chrono::Utc;
use dashmap::DashMap;
use growth_core::config::FunnelConfig;
use growth_core::{GrowthError, GrowthResult, Timeframe, UserEvent};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::segment::Segment;
use crate::store::{EventStore, UserTimeline};
use crate::types::{
    ConversionFunnel, DropOff, FunnelDefinition, FunnelStep, IngestSummary, SegmentReport,
    StepAnalytics,
};

/// Accumulates user events and scores them against registered funnels.
///
/// A user's reference event for a step is their earliest event of that
/// step's type; later steps only count as "proceeded" when a matching event
/// is strictly later than the previous step's reference event.
pub struct FunnelAnalyzer {
    funnels: DashMap<String, FunnelDefinition>,
    store: RwLock<EventStore>,
    config: FunnelConfig,
}

impl FunnelAnalyzer {
    pub fn new() -> Self {
        Self::with_config(FunnelConfig::default())
    }

    pub fn with_config(config: FunnelConfig) -> Self {
        Self {
            funnels: DashMap::new(),
            store: RwLock::new(EventStore::default()),
            config,
        }
    }

    /// Register a funnel, replacing any definition with the same id.
    pub fn register_funnel(&self, funnel: FunnelDefinition) -> GrowthResult<()> {
        if funnel.steps.is_empty() {
            warn!(funnel_id = %funnel.id, "Rejected funnel without steps");
            return Err(GrowthError::EmptyFunnel(funnel.id));
        }
        if funnel.steps.len() > self.config.max_steps {
            warn!(funnel_id = %funnel.id, steps = funnel.steps.len(), "Rejected oversized funnel");
            return Err(GrowthError::TooManySteps {
                funnel_id: funnel.id,
                steps: funnel.steps.len(),
                limit: self.config.max_steps,
            });
        }

        info!(funnel_id = %funnel.id, steps = funnel.steps.len(), "Funnel registered");
        if self.funnels.insert(funnel.id.clone(), funnel).is_some() {
            debug!("Previous funnel definition replaced");
        }
        Ok(())
    }

    /// Append events to the log. Without de-duplication, delivering the same
    /// events twice counts them twice.
    pub fn process_events<I>(&self, events: I) -> IngestSummary
    where
        I: IntoIterator<Item = UserEvent>,
    {
        let summary = self
            .store
            .write()
            .ingest(events, self.config.dedupe_event_ids);

        if summary.duplicates_skipped > 0 {
            warn!(
                skipped = summary.duplicates_skipped,
                "Skipped events with previously seen ids"
            );
        }
        info!(
            accepted = summary.accepted,
            users = summary.users_touched,
            "Events ingested"
        );
        summary
    }

    pub fn analyze_funnel(
        &self,
        funnel_id: &str,
        timeframe: Option<Timeframe>,
    ) -> GrowthResult<ConversionFunnel> {
        let funnel = self.funnel(funnel_id)?;
        let store = self.store.read();
        let timelines = store.timelines(|e| in_timeframe(e, timeframe));
        Ok(build_report(&funnel, &timelines))
    }

    /// Base report plus one breakdown per segment. Each segment filters the
    /// full event log by its own predicate and the timeframe.
    pub fn analyze_funnel_with_segments(
        &self,
        funnel_id: &str,
        segments: &BTreeMap<String, Segment>,
        timeframe: Option<Timeframe>,
    ) -> GrowthResult<ConversionFunnel> {
        let funnel = self.funnel(funnel_id)?;
        let store = self.store.read();
        let timelines = store.timelines(|e| in_timeframe(e, timeframe));
        let mut report = build_report(&funnel, &timelines);

        let breakdown = segments
            .iter()
            .map(|(name, segment)| {
                let segment_timelines =
                    store.timelines(|e| in_timeframe(e, timeframe) && segment.matches(e));
                let stats = FunnelStats::compute(&funnel.steps, &segment_timelines);
                debug!(segment = %name, users = stats.total_users, "Segment analyzed");
                let report = SegmentReport {
                    users: stats.total_users,
                    conversion_rate: stats.conversion_rate(),
                    step_analytics: stats.step_analytics,
                };
                (name.clone(), report)
            })
            .collect();

        report.segment_breakdown = Some(breakdown);
        Ok(report)
    }

    /// Analyze several funnels over the same window. Each id gets its own
    /// result, so one unknown id does not discard the others.
    pub fn compare_funnels<S: AsRef<str>>(
        &self,
        funnel_ids: &[S],
        timeframe: Option<Timeframe>,
    ) -> BTreeMap<String, GrowthResult<ConversionFunnel>> {
        funnel_ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                (id.to_string(), self.analyze_funnel(id, timeframe))
            })
            .collect()
    }

    /// All-or-nothing comparison: the first unknown id aborts the batch.
    pub fn compare_funnels_strict<S: AsRef<str>>(
        &self,
        funnel_ids: &[S],
        timeframe: Option<Timeframe>,
    ) -> GrowthResult<BTreeMap<String, ConversionFunnel>> {
        funnel_ids
            .iter()
            .map(|id| {
                let id = id.as_ref();
                self.analyze_funnel(id, timeframe)
                    .map(|report| (id.to_string(), report))
            })
            .collect()
    }

    /// Drop-off between each adjacent pair of steps over the whole event log.
    pub fn calculate_drop_off_rates(&self, funnel_id: &str) -> GrowthResult<Vec<DropOff>> {
        let funnel = self.funnel(funnel_id)?;
        let store = self.store.read();
        let timelines = store.timelines(|_| true);

        let drop_offs = funnel
            .steps
            .windows(2)
            .map(|pair| {
                let (from, to) = (&pair[0], &pair[1]);
                let mut at_step = 0u64;
                let mut proceeded = 0u64;
                for timeline in &timelines {
                    if let Some(reached) = first_match(timeline, &from.event_type) {
                        at_step += 1;
                        if has_later(timeline, &to.event_type, reached) {
                            proceeded += 1;
                        }
                    }
                }
                DropOff {
                    from_step: from.step_name.clone(),
                    to_step: to.step_name.clone(),
                    dropoff_rate: ratio(at_step - proceeded, at_step),
                    users: at_step,
                }
            })
            .collect();
        Ok(drop_offs)
    }

    pub fn get_funnel(&self, funnel_id: &str) -> Option<FunnelDefinition> {
        self.funnels.get(funnel_id).map(|f| f.value().clone())
    }

    pub fn list_funnels(&self) -> Vec<FunnelDefinition> {
        self.funnels.iter().map(|f| f.value().clone()).collect()
    }

    /// A user's events in timestamp order.
    pub fn user_events(&self, user_id: &str) -> Vec<UserEvent> {
        self.store.read().user_events(user_id)
    }

    pub fn event_count(&self) -> usize {
        self.store.read().event_count()
    }

    pub fn user_count(&self) -> usize {
        self.store.read().user_count()
    }

    fn funnel(&self, funnel_id: &str) -> GrowthResult<FunnelDefinition> {
        self.get_funnel(funnel_id)
            .ok_or_else(|| GrowthError::UnknownFunnel(funnel_id.to_string()))
    }
}

impl Default for FunnelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_report(funnel: &FunnelDefinition, timelines: &[UserTimeline<'_>]) -> ConversionFunnel {
    let stats = FunnelStats::compute(&funnel.steps, timelines);
    debug!(
        funnel_id = %funnel.id,
        users = stats.total_users,
        completed = stats.completed_users,
        "Funnel analyzed"
    );
    ConversionFunnel {
        funnel_id: funnel.id.clone(),
        total_users: stats.total_users,
        completed_users: stats.completed_users,
        conversion_rate: stats.conversion_rate(),
        step_analytics: stats.step_analytics,
        segment_breakdown: None,
        time_to_complete: stats.time_to_complete,
        computed_at: Utc::now(),
    }
}

struct FunnelStats {
    total_users: u64,
    completed_users: u64,
    step_analytics: Vec<StepAnalytics>,
    time_to_complete: Option<f64>,
}

impl FunnelStats {
    fn compute(steps: &[FunnelStep], timelines: &[UserTimeline<'_>]) -> Self {
        let total_users = timelines.len() as u64;

        // reached[u][i]: timestamp of user u's reference event for step i.
        let reached: Vec<Vec<Option<i64>>> = timelines
            .iter()
            .map(|timeline| {
                steps
                    .iter()
                    .map(|step| first_match(timeline, &step.event_type))
                    .collect()
            })
            .collect();

        let mut step_analytics: Vec<StepAnalytics> = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let at_step = reached.iter().filter(|r| r[i].is_some()).count() as u64;

            let mut next_step_correlations = BTreeMap::new();
            if let Some(next) = steps.get(i + 1) {
                let proceeded = timelines
                    .iter()
                    .zip(&reached)
                    .filter(|(timeline, r)| {
                        r[i].is_some_and(|ts| has_later(timeline, &next.event_type, ts))
                    })
                    .count() as u64;
                next_step_correlations.insert(next.step_name.clone(), ratio(proceeded, at_step));
            }

            let (average_time, dropoff_rate) = match step_analytics.last() {
                Some(previous) => (
                    mean(reached.iter().filter_map(|r| Some(elapsed(r[i - 1]?, r[i]?))))
                        .unwrap_or(0.0),
                    if previous.total_users == 0 {
                        0.0
                    } else {
                        1.0 - ratio(at_step, previous.total_users)
                    },
                ),
                None => (0.0, 0.0),
            };

            step_analytics.push(StepAnalytics {
                step_name: step.step_name.clone(),
                total_users: at_step,
                completion_rate: ratio(at_step, total_users),
                dropoff_rate,
                average_time,
                next_step_correlations,
            });
        }

        let completed_users = step_analytics.last().map_or(0, |s| s.total_users);
        let last = steps.len().saturating_sub(1);
        let time_to_complete = mean(
            reached
                .iter()
                .filter_map(|r| Some(elapsed(r.first().copied()??, r.get(last).copied()??))),
        );

        Self {
            total_users,
            completed_users,
            step_analytics,
            time_to_complete,
        }
    }

    fn conversion_rate(&self) -> f64 {
        ratio(self.completed_users, self.total_users)
    }
}

fn in_timeframe(event: &UserEvent, timeframe: Option<Timeframe>) -> bool {
    timeframe.is_none_or(|tf| tf.contains(event.timestamp))
}

/// Timeline is timestamp-sorted, so the first match is the earliest.
fn first_match(timeline: &[&UserEvent], event_type: &str) -> Option<i64> {
    timeline
        .iter()
        .find(|e| e.event_type == event_type)
        .map(|e| e.timestamp)
}

fn has_later(timeline: &[&UserEvent], event_type: &str, after: i64) -> bool {
    timeline
        .iter()
        .any(|e| e.event_type == event_type && e.timestamp > after)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Milliseconds from `from` to `to`; widened so any pair of `i64` stamps fits.
fn elapsed(from: i64, to: i64) -> f64 {
    (i128::from(to) - i128::from(from)) as f64
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0f64, 0u64), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup_funnel() -> FunnelDefinition {
        FunnelDefinition::new(
            "signup",
            vec![
                FunnelStep::new("signup"),
                FunnelStep::new("onboard"),
                FunnelStep::new("convert"),
            ],
        )
    }

    fn analyzer_with(events: Vec<UserEvent>) -> FunnelAnalyzer {
        let analyzer = FunnelAnalyzer::new();
        analyzer.register_funnel(signup_funnel()).unwrap();
        analyzer.process_events(events);
        analyzer
    }

    #[test]
    fn test_basic_conversion() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("userA", "signup", 100),
            UserEvent::new("userA", "onboard", 200),
            UserEvent::new("userA", "convert", 300),
            UserEvent::new("userB", "signup", 150),
        ]);
        let report = analyzer.analyze_funnel("signup", None).unwrap();

        assert_eq!(report.total_users, 2);
        assert_eq!(report.completed_users, 1);
        assert_eq!(report.conversion_rate, 0.5);
        assert_eq!(report.step_analytics[0].total_users, 2);
        assert_eq!(report.step_analytics[1].total_users, 1);
        assert_eq!(report.step_analytics[2].total_users, 1);
        assert_eq!(report.time_to_complete, Some(200.0));
    }

    #[test]
    fn test_step_metrics() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 0),
            UserEvent::new("a", "onboard", 100),
            UserEvent::new("b", "signup", 0),
            UserEvent::new("b", "onboard", 300),
            UserEvent::new("c", "signup", 0),
            UserEvent::new("d", "signup", 0),
        ]);
        let report = analyzer.analyze_funnel("signup", None).unwrap();
        let steps = &report.step_analytics;

        assert_eq!(steps[0].dropoff_rate, 0.0);
        assert_eq!(steps[0].average_time, 0.0);
        assert_eq!(steps[0].next_step_correlations["onboard"], 0.5);

        assert_eq!(steps[1].completion_rate, 0.5);
        assert_eq!(steps[1].dropoff_rate, 0.5);
        assert_eq!(steps[1].average_time, 200.0);
        assert_eq!(steps[1].next_step_correlations["convert"], 0.0);

        assert_eq!(steps[2].total_users, 0);
        assert_eq!(steps[2].dropoff_rate, 1.0);
        assert!(steps[2].next_step_correlations.is_empty());
        assert_eq!(report.time_to_complete, None);
    }

    #[test]
    fn test_reference_event_is_earliest() {
        // Arrival order puts the late signup first.
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 500),
            UserEvent::new("a", "onboard", 300),
            UserEvent::new("a", "signup", 100),
        ]);
        let report = analyzer.analyze_funnel("signup", None).unwrap();
        assert_eq!(report.step_analytics[1].average_time, 200.0);
        assert_eq!(report.step_analytics[0].next_step_correlations["onboard"], 1.0);
    }

    #[test]
    fn test_correlation_requires_strictly_later_event() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 100),
            UserEvent::new("a", "onboard", 100),
        ]);
        let report = analyzer.analyze_funnel("signup", None).unwrap();
        assert_eq!(report.step_analytics[0].next_step_correlations["onboard"], 0.0);
        // Reaching a step does not depend on ordering.
        assert_eq!(report.step_analytics[1].total_users, 1);
    }

    #[test]
    fn test_unknown_funnel() {
        let analyzer = FunnelAnalyzer::new();
        let err = analyzer.analyze_funnel("does-not-exist", None).unwrap_err();
        assert!(matches!(err, GrowthError::UnknownFunnel(id) if id == "does-not-exist"));
        assert!(analyzer.calculate_drop_off_rates("does-not-exist").is_err());
    }

    #[test]
    fn test_rejects_empty_and_oversized_funnels() {
        let analyzer = FunnelAnalyzer::with_config(FunnelConfig {
            dedupe_event_ids: false,
            max_steps: 2,
        });
        let err = analyzer
            .register_funnel(FunnelDefinition::new("empty", vec![]))
            .unwrap_err();
        assert!(matches!(err, GrowthError::EmptyFunnel(_)));

        let err = analyzer.register_funnel(signup_funnel()).unwrap_err();
        assert!(matches!(err, GrowthError::TooManySteps { steps: 3, limit: 2, .. }));
        assert!(analyzer.list_funnels().is_empty());
    }

    #[test]
    fn test_timeframe_is_inclusive() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 100),
            UserEvent::new("b", "signup", 200),
            UserEvent::new("c", "signup", 201),
            UserEvent::new("d", "signup", 99),
        ]);
        let report = analyzer
            .analyze_funnel("signup", Some(Timeframe::new(100, 200)))
            .unwrap();
        assert_eq!(report.total_users, 2);
        assert_eq!(report.step_analytics[0].total_users, 2);
    }

    #[test]
    fn test_segments_filter_full_log() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 100).with_property("platform", serde_json::json!("ios")),
            UserEvent::new("a", "onboard", 200).with_property("platform", serde_json::json!("ios")),
            UserEvent::new("a", "convert", 300).with_property("platform", serde_json::json!("ios")),
            UserEvent::new("b", "signup", 100).with_property("platform", serde_json::json!("web")),
        ]);
        let mut segments = BTreeMap::new();
        segments.insert(
            "ios".to_string(),
            Segment::predicate(|e| e.property("platform") == Some(&serde_json::json!("ios"))),
        );
        segments.insert("nobody".to_string(), Segment::predicate(|_| false));

        let report = analyzer
            .analyze_funnel_with_segments("signup", &segments, None)
            .unwrap();
        assert_eq!(report.total_users, 2);
        let breakdown = report.segment_breakdown.unwrap();
        assert_eq!(breakdown["ios"].users, 1);
        assert_eq!(breakdown["ios"].conversion_rate, 1.0);
        assert_eq!(breakdown["nobody"].users, 0);
        assert_eq!(breakdown["nobody"].conversion_rate, 0.0);
        assert_eq!(breakdown["nobody"].step_analytics.len(), 3);
    }

    #[test]
    fn test_compare_funnels_keeps_partial_results() {
        let analyzer = analyzer_with(vec![UserEvent::new("a", "signup", 1)]);
        analyzer
            .register_funnel(FunnelDefinition::new("short", vec![FunnelStep::new("signup")]))
            .unwrap();

        let results = analyzer.compare_funnels(&["signup", "missing", "short"], None);
        assert_eq!(results.len(), 3);
        assert!(results["missing"].is_err());
        assert_eq!(results["short"].as_ref().unwrap().conversion_rate, 1.0);
        assert_eq!(results["signup"].as_ref().unwrap().conversion_rate, 0.0);

        assert!(analyzer
            .compare_funnels_strict(&["signup", "missing", "short"], None)
            .is_err());
        let all = analyzer.compare_funnels_strict(&["signup", "short"], None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_drop_off_rates() {
        let analyzer = analyzer_with(vec![
            UserEvent::new("a", "signup", 1),
            UserEvent::new("a", "onboard", 2),
            UserEvent::new("b", "signup", 1),
            UserEvent::new("b", "onboard", 1),
        ]);
        let drop_offs = analyzer.calculate_drop_off_rates("signup").unwrap();
        assert_eq!(drop_offs.len(), 2);
        assert_eq!(drop_offs[0].from_step, "signup");
        assert_eq!(drop_offs[0].to_step, "onboard");
        assert_eq!(drop_offs[0].users, 2);
        assert_eq!(drop_offs[0].dropoff_rate, 0.5);
        assert_eq!(drop_offs[1].users, 2);
        assert_eq!(drop_offs[1].dropoff_rate, 1.0);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let analyzer = FunnelAnalyzer::new();
        analyzer
            .register_funnel(FunnelDefinition::new(
                "edges",
                vec![FunnelStep::new("x"), FunnelStep::new("y")],
            ))
            .unwrap();
        analyzer.process_events(vec![
            UserEvent::new("u", "y", i64::MAX),
            UserEvent::new("u", "x", i64::MIN),
        ]);

        let report = analyzer.analyze_funnel("edges", None).unwrap();
        let span = 2f64.powi(64);
        assert_eq!(report.step_analytics[1].average_time, span);
        assert_eq!(report.time_to_complete, Some(span));
        assert_eq!(report.step_analytics[0].next_step_correlations["y"], 1.0);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let analyzer = analyzer_with(vec![UserEvent::new("a", "signup", 1)]);
        analyzer
            .register_funnel(FunnelDefinition::new("signup", vec![FunnelStep::new("install")]))
            .unwrap();
        let report = analyzer.analyze_funnel("signup", None).unwrap();
        assert_eq!(report.step_analytics.len(), 1);
        assert_eq!(report.step_analytics[0].step_name, "install");
        assert_eq!(report.completed_users, 0);
        assert_eq!(analyzer.list_funnels().len(), 1);
    }
}
