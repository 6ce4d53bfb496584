// Metrics domain models
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_ms: i64,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(time_ms: i64, value: f64) -> Self {
        Self { time_ms, value }
    }
}

/// What the next fetch should retrieve. Replaced wholesale on every
/// topic or window change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchParameters {
    pub instance_id: String,
    pub selected_topic: Option<String>,
    pub time_window_minutes: u32,
}

impl FetchParameters {
    pub fn new(instance_id: impl Into<String>, time_window_minutes: u32) -> Self {
        Self {
            instance_id: instance_id.into(),
            selected_topic: None,
            time_window_minutes,
        }
    }

    pub fn with_topic(&self, topic: Option<String>) -> Self {
        Self {
            selected_topic: topic,
            ..self.clone()
        }
    }

    pub fn with_window(&self, time_window_minutes: u32) -> Self {
        Self {
            time_window_minutes,
            ..self.clone()
        }
    }
}

/// Topic list plus per-topic series, as returned by one completed fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub available_topics: BTreeSet<String>,
    pub series: BTreeMap<String, Vec<TimeSeriesPoint>>,
}

impl FetchResult {
    pub fn new(
        available_topics: impl IntoIterator<Item = String>,
        series: BTreeMap<String, Vec<TimeSeriesPoint>>,
    ) -> Self {
        Self {
            available_topics: available_topics.into_iter().collect(),
            series,
        }
    }

    /// Topics named either by the topic list or by a series key.
    pub fn topics(&self) -> impl Iterator<Item = &String> {
        self.available_topics.iter().chain(self.series.keys())
    }

    pub fn has_topics(&self) -> bool {
        !self.available_topics.is_empty() || !self.series.is_empty()
    }
}

/// Stamp identifying one logical fetch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}
