//! # Middleware Module
//!
//! Request observation for the HTTP layer: structured request logs and
//! the per-endpoint counters exposed by `/metrics`, applied to every
//! route from one place.

pub mod observe;

pub use observe::RequestObserver;
