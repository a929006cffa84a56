//! `stocklink-auth` — webhook origin verification (zero-trust boundary).
//!
//! This crate is intentionally decoupled from HTTP: it works on raw body bytes
//! and the header value as received.

pub mod signature;

pub use signature::{HmacSha256Verifier, WebhookVerifier, SIGNATURE_HEADER};
