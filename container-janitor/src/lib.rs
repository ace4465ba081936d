pub mod config;
pub mod connect;
pub mod docker;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod health;
pub mod janitor;
pub mod labels;
pub mod metrics;
pub mod remover;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
