// Panel state machine - Pure transition logic for the topic metrics panel
use crate::domain::metrics::{FetchParameters, FetchResult, Generation};
use std::collections::BTreeSet;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Loading,
    RetryWait,
    CriticalFail,
    NoData,
    Ready { result: FetchResult },
    /// Background fetch from `Ready`; the prior result stays visible.
    Refreshing { result: FetchResult },
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Loading => "loading",
            ControllerState::RetryWait => "retry_wait",
            ControllerState::CriticalFail => "critical_fail",
            ControllerState::NoData => "no_data",
            ControllerState::Ready { .. } => "ready",
            ControllerState::Refreshing { .. } => "refreshing",
        }
    }

    pub fn result(&self) -> Option<&FetchResult> {
        match self {
            ControllerState::Ready { result } | ControllerState::Refreshing { result } => {
                Some(result)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    failures_so_far: u32,
    max_retries: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            failures_so_far: 0,
            max_retries,
        }
    }

    pub fn failures_so_far(&self) -> u32 {
        self.failures_so_far
    }

    pub fn record_failure(&mut self) {
        self.failures_so_far = self.failures_so_far.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.failures_so_far = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures_so_far >= self.max_retries
    }
}

/// User intent coming from the panel.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SelectTopic(Option<String>),
    ChangeTimeWindow(u32),
    Refresh,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    FetchSucceeded {
        generation: Generation,
        result: FetchResult,
    },
    FetchFailed {
        generation: Generation,
        reason: String,
    },
    RetryElapsed {
        generation: Generation,
    },
}

impl Event {
    fn generation(&self) -> Option<Generation> {
        match self {
            Event::Command(_) => None,
            Event::FetchSucceeded { generation, .. }
            | Event::FetchFailed { generation, .. }
            | Event::RetryElapsed { generation } => Some(*generation),
        }
    }
}

/// Work the caller must perform after a transition. Both complete by
/// feeding an event carrying the same generation back into the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Fetch {
        generation: Generation,
        params: FetchParameters,
    },
    ScheduleRetry {
        generation: Generation,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Moved { effect: Option<Effect> },
    /// Event not meaningful in the current state.
    Ignored,
    /// Event belongs to a superseded generation.
    Stale,
}

#[derive(Debug, Clone)]
pub struct PanelMachine {
    state: ControllerState,
    params: FetchParameters,
    budget: RetryBudget,
    generation: Generation,
    known_topics: BTreeSet<String>,
}

impl PanelMachine {
    pub fn new(params: FetchParameters, max_retries: u32) -> Self {
        Self {
            state: ControllerState::Loading,
            params,
            budget: RetryBudget::new(max_retries),
            generation: Generation::default(),
            known_topics: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn params(&self) -> &FetchParameters {
        &self.params
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Every topic seen by an accepted fetch, sorted and de-duplicated.
    pub fn known_topics(&self) -> &BTreeSet<String> {
        &self.known_topics
    }

    /// Initial fetch for the parameters given at construction.
    pub fn start(&mut self) -> Effect {
        self.begin_fetch()
    }

    pub fn handle(&mut self, event: Event) -> Transition {
        if let Some(generation) = event.generation() {
            if generation != self.generation {
                return Transition::Stale;
            }
        }

        match event {
            Event::Command(Command::SelectTopic(topic)) => {
                self.params = self.params.with_topic(topic);
                Self::moved(self.begin_fetch())
            }
            Event::Command(Command::ChangeTimeWindow(minutes)) => {
                self.params = self.params.with_window(minutes);
                Self::moved(self.begin_fetch())
            }
            Event::Command(Command::Refresh) => self.on_refresh(),
            Event::FetchSucceeded { result, .. } => self.on_fetch_succeeded(result),
            Event::FetchFailed { .. } => self.on_fetch_failed(),
            Event::RetryElapsed { .. } => self.on_retry_elapsed(),
        }
    }

    fn on_refresh(&mut self) -> Transition {
        match &self.state {
            ControllerState::Loading | ControllerState::Refreshing { .. } => Transition::Ignored,
            ControllerState::Ready { result } => {
                let result = result.clone();
                self.budget.reset();
                self.generation = self.generation.next();
                self.state = ControllerState::Refreshing { result };
                Self::moved(self.fetch_effect())
            }
            ControllerState::RetryWait
            | ControllerState::CriticalFail
            | ControllerState::NoData => Self::moved(self.begin_fetch()),
        }
    }

    fn on_fetch_succeeded(&mut self, result: FetchResult) -> Transition {
        match &self.state {
            ControllerState::Loading | ControllerState::Refreshing { .. } => {
                self.known_topics.extend(result.topics().cloned());
                self.state = if self.known_topics.is_empty() {
                    ControllerState::NoData
                } else {
                    ControllerState::Ready { result }
                };
                Transition::Moved { effect: None }
            }
            _ => Transition::Ignored,
        }
    }

    fn on_fetch_failed(&mut self) -> Transition {
        match &self.state {
            ControllerState::Loading => {
                self.budget.record_failure();
                self.state = ControllerState::RetryWait;
                Transition::Moved {
                    effect: Some(Effect::ScheduleRetry {
                        generation: self.generation,
                    }),
                }
            }
            ControllerState::Refreshing { result } => {
                self.state = ControllerState::Ready {
                    result: result.clone(),
                };
                Transition::Moved { effect: None }
            }
            _ => Transition::Ignored,
        }
    }

    fn on_retry_elapsed(&mut self) -> Transition {
        if self.state != ControllerState::RetryWait {
            return Transition::Ignored;
        }

        if self.budget.is_exhausted() {
            self.state = ControllerState::CriticalFail;
            Transition::Moved { effect: None }
        } else {
            // Retries stay within the current generation.
            self.state = ControllerState::Loading;
            Self::moved(self.fetch_effect())
        }
    }

    fn begin_fetch(&mut self) -> Effect {
        self.budget.reset();
        self.generation = self.generation.next();
        self.state = ControllerState::Loading;
        self.fetch_effect()
    }

    fn fetch_effect(&self) -> Effect {
        Effect::Fetch {
            generation: self.generation,
            params: self.params.clone(),
        }
    }

    fn moved(effect: Effect) -> Transition {
        Transition::Moved {
            effect: Some(effect),
        }
    }
}
