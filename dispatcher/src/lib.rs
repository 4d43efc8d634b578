//! Shipiru dispatcher turns source-control push webhooks into supervised
//! runs of a fixed build script.
//!
//! The webhook endpoint validates the payload, hands the resulting push
//! event to the dispatch supervisor, and answers `202` without waiting.
//! The supervisor bounds concurrency per repository and globally, runs the
//! script with `[clone_url, branch]` as discrete arguments, enforces a
//! timeout, and logs every job transition.

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
