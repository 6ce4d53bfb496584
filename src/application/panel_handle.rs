// Panel handle - Command surface and read-only view of a running controller
use crate::domain::panel_machine::Command;
use crate::domain::panel_view::PanelView;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PanelError {
    #[error("panel controller is no longer running")]
    Detached,
    #[error("invalid time window: {0} minutes")]
    InvalidTimeWindow(u32),
}

#[derive(Clone)]
pub struct PanelHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<PanelView>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PanelHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        view: watch::Receiver<PanelView>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            commands,
            view,
            shutdown: Arc::new(shutdown),
        }
    }

    pub async fn select_topic(&self, topic: Option<String>) -> Result<(), PanelError> {
        self.send(Command::SelectTopic(topic)).await
    }

    pub async fn change_time_window(&self, minutes: u32) -> Result<(), PanelError> {
        if minutes == 0 {
            return Err(PanelError::InvalidTimeWindow(minutes));
        }
        self.send(Command::ChangeTimeWindow(minutes)).await
    }

    pub async fn refresh(&self) -> Result<(), PanelError> {
        self.send(Command::Refresh).await
    }

    /// Snapshot of the latest published projection.
    pub fn view(&self) -> PanelView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every projection change.
    pub fn subscribe(&self) -> watch::Receiver<PanelView> {
        self.view.clone()
    }

    /// Detach the controller. Fetches still in flight are left to finish
    /// and their results are dropped.
    pub fn unmount(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_detached(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), PanelError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PanelError::Detached)
    }
}
