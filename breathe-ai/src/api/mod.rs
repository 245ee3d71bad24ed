//! HTTP API handlers for breathe-ai

pub mod health;
pub mod history;
pub mod upload;

pub use health::health_routes;
pub use history::history_routes;
pub use upload::upload_routes;
