// Read-only projection of the panel state for the presentation layer
use crate::domain::metrics::TimeSeriesPoint;
use crate::domain::panel_machine::{ControllerState, PanelMachine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    pub state: &'static str,
    pub is_loading: bool,
    pub is_failed: bool,
    pub is_data_unavailable: bool,
    pub is_refreshing: bool,
    pub topics: Vec<String>,
    pub selected_topic: Option<String>,
    pub time_window_minutes: u32,
    pub series: BTreeMap<String, Vec<TimeSeriesPoint>>,
    pub failures_so_far: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PanelView {
    pub fn project(machine: &PanelMachine, last_updated: Option<DateTime<Utc>>) -> Self {
        let state = machine.state();
        let params = machine.params();

        Self {
            state: state.name(),
            is_loading: matches!(
                state,
                ControllerState::Loading | ControllerState::RetryWait
            ),
            is_failed: matches!(state, ControllerState::CriticalFail),
            is_data_unavailable: matches!(state, ControllerState::NoData),
            is_refreshing: matches!(state, ControllerState::Refreshing { .. }),
            topics: machine.known_topics().iter().cloned().collect(),
            selected_topic: params.selected_topic.clone(),
            time_window_minutes: params.time_window_minutes,
            series: state
                .result()
                .map(|r| r.series.clone())
                .unwrap_or_default(),
            failures_so_far: machine.budget().failures_so_far(),
            last_updated,
        }
    }
}
