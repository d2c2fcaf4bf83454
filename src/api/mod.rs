//! API layer - HTTP endpoint handlers.

mod health;
mod notify;
mod routes;

pub use health::{health, HealthResponse};
pub use notify::{notify, NotifyResponse};
pub use routes::api_routes;
