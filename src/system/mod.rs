//! System utilities and monitoring
//!
//! This module contains metrics collection and logging setup.

pub mod logging;
pub mod metrics;

pub use metrics::Metrics;
