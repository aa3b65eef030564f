pub mod common;
pub mod health;
pub mod payment_webhooks;
pub mod purchases;
