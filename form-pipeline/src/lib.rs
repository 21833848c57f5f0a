//! Shared request pipeline for the site's form handlers: request parsing,
//! validation, bot verification, downstream Microsoft Graph calls and the
//! response contract.

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod request_id;
pub mod response;
pub mod secrets;
pub mod services;
pub mod token_cache;
pub mod turnstile;
pub mod validation;

/// Installs the plain-text subscriber used by every handler binary.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
}
