// Presentation layer - HTTP surface over the panel handle
pub mod app_state;
pub mod handlers;
pub mod routes;
