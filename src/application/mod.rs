// Application layer - Gateway contract and the polling controller
pub mod metrics_gateway;
pub mod panel_handle;
pub mod polling_controller;
