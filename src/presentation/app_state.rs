// Application state for HTTP handlers
use crate::application::panel_handle::PanelHandle;

#[derive(Clone)]
pub struct AppState {
    pub panel: PanelHandle,
}
