//! Lifecycle and retention engine.
//!
//! Classifies users into lifecycle states, scores churn risk, drives the
//! habit loops behind retention, and grades power users into capability
//! tiers. Pure evaluators live in [`domain`]; [`application`] wires them to
//! the document store and [`interface`] exposes them over HTTP.

pub mod app;
pub mod application;
pub mod clock;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod state;

pub use app::build_router;
