// Domain layer - Pure values and the panel state machine
pub mod metrics;
pub mod panel_machine;
pub mod panel_view;
