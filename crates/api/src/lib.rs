//! HTTP API: webhook intake, signature checks, and background sync dispatch.

pub mod app;
pub mod context;
pub mod middleware;
