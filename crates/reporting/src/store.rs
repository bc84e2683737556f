//! Append-only event log with a per-user index kept in timestamp order.

use growth_core::UserEvent;
use std::collections::{BTreeMap, HashSet};

use crate::types::IngestSummary;

/// One user's events, ascending by timestamp.
pub(crate) type UserTimeline<'a> = Vec<&'a UserEvent>;

#[derive(Debug, Default)]
pub(crate) struct EventStore {
    log: Vec<UserEvent>,
    /// Indices into `log`, sorted by timestamp; ties keep arrival order.
    by_user: BTreeMap<String, Vec<usize>>,
    seen_ids: HashSet<String>,
}

impl EventStore {
    pub(crate) fn ingest<I>(&mut self, events: I, dedupe_event_ids: bool) -> IngestSummary
    where
        I: IntoIterator<Item = UserEvent>,
    {
        let mut summary = IngestSummary::default();
        let mut touched: HashSet<String> = HashSet::new();

        for event in events {
            if let Some(id) = &event.event_id {
                if dedupe_event_ids && !self.seen_ids.insert(id.clone()) {
                    summary.duplicates_skipped += 1;
                    continue;
                }
            }
            let index = self.log.len();
            self.by_user
                .entry(event.user_id.clone())
                .or_default()
                .push(index);
            touched.insert(event.user_id.clone());
            self.log.push(event);
            summary.accepted += 1;
        }

        for user_id in &touched {
            if let Some(indices) = self.by_user.get_mut(user_id) {
                let log = &self.log;
                indices.sort_by_key(|&i| log[i].timestamp);
            }
        }
        summary.users_touched = touched.len();
        summary
    }

    /// Timelines of every user with at least one event accepted by `keep`.
    pub(crate) fn timelines<F>(&self, keep: F) -> Vec<UserTimeline<'_>>
    where
        F: Fn(&UserEvent) -> bool,
    {
        self.by_user
            .values()
            .filter_map(|indices| {
                let timeline: UserTimeline<'_> = indices
                    .iter()
                    .map(|&i| &self.log[i])
                    .filter(|event| keep(*event))
                    .collect();
                (!timeline.is_empty()).then_some(timeline)
            })
            .collect()
    }

    pub(crate) fn user_events(&self, user_id: &str) -> Vec<UserEvent> {
        self.by_user
            .get(user_id)
            .map(|indices| indices.iter().map(|&i| self.log[i].clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn event_count(&self) -> usize {
        self.log.len()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.by_user.len()
    }
}
