//! Segment filters for funnel breakdowns: caller closures or declarative
//! property comparisons loaded from JSON.

use growth_core::UserEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type EventPredicate = dyn Fn(&UserEvent) -> bool + Send + Sync;

static ABSENT: Value = Value::Null;

/// Selects the events that belong to one segment of a breakdown.
#[derive(Clone)]
pub enum Segment {
    Predicate(Arc<EventPredicate>),
    /// All filters must match.
    Filters(Vec<PropertyFilter>),
}

impl Segment {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&UserEvent) -> bool + Send + Sync + 'static,
    {
        Segment::Predicate(Arc::new(f))
    }

    pub fn filters(filters: Vec<PropertyFilter>) -> Self {
        Segment::Filters(filters)
    }

    pub fn matches(&self, event: &UserEvent) -> bool {
        match self {
            Segment::Predicate(f) => f(event),
            Segment::Filters(filters) => filters.iter().all(|f| f.matches(event)),
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Predicate(_) => f.write_str("Segment::Predicate(..)"),
            Segment::Filters(filters) => f.debug_tuple("Segment::Filters").field(filters).finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// `user_id`, `event_type`, or a key of the event's properties.
    pub field: String,
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
}

impl PropertyFilter {
    pub fn new(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn matches(&self, event: &UserEvent) -> bool {
        match self.field.as_str() {
            "user_id" => self.operator.test_str(&event.user_id, &self.value),
            "event_type" => self.operator.test_str(&event.event_type, &self.value),
            key => self.operator.test(event.property(key), &self.value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsSet,
    IsNotSet,
    InList,
    NotInList,
}

impl ComparisonOperator {
    /// Compare a property value; `None` (absent) behaves like JSON `null`.
    pub fn test(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.unwrap_or(&ABSENT);
        if let Some(text) = actual.as_str() {
            return self.test_str(text, expected);
        }
        match self {
            Self::Equals => actual == expected,
            Self::NotEquals => actual != expected,
            Self::GreaterThan => numeric_cmp(actual, expected) == Some(Ordering::Greater),
            Self::GreaterThanOrEqual => matches!(
                numeric_cmp(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::LessThan => numeric_cmp(actual, expected) == Some(Ordering::Less),
            Self::LessThanOrEqual => matches!(
                numeric_cmp(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            // Substring operators only apply to text.
            Self::Contains | Self::StartsWith | Self::EndsWith => false,
            Self::NotContains => true,
            Self::IsSet => !actual.is_null(),
            Self::IsNotSet => actual.is_null(),
            Self::InList => expected.as_array().is_some_and(|list| list.contains(actual)),
            Self::NotInList => expected.as_array().is_none_or(|list| !list.contains(actual)),
        }
    }

    /// Compare a text field that is always present on the event.
    pub fn test_str(self, actual: &str, expected: &Value) -> bool {
        let wanted = expected.as_str();
        let listed = || {
            expected
                .as_array()
                .map(|list| list.iter().any(|v| v.as_str() == Some(actual)))
        };
        match self {
            Self::Equals => wanted == Some(actual),
            Self::NotEquals => wanted != Some(actual),
            Self::Contains => wanted.is_some_and(|e| actual.contains(e)),
            Self::NotContains => wanted.is_none_or(|e| !actual.contains(e)),
            Self::StartsWith => wanted.is_some_and(|e| actual.starts_with(e)),
            Self::EndsWith => wanted.is_some_and(|e| actual.ends_with(e)),
            Self::IsSet => true,
            Self::IsNotSet => false,
            Self::InList => listed() == Some(true),
            Self::NotInList => listed() != Some(true),
            Self::GreaterThan
            | Self::GreaterThanOrEqual
            | Self::LessThan
            | Self::LessThanOrEqual => false,
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}
