//! Thin HTTP surface: request validation in, job dicts out. Everything
//! interesting happens in the engine.

pub mod app;
pub mod routes;

pub use app::{build_app, AppState};
