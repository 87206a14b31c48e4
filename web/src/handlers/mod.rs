//! HTTP request handlers.

pub mod campaign;
pub mod health;

pub use campaign::{create_campaign, get_campaign, open};
pub use health::{health_check, metrics};
