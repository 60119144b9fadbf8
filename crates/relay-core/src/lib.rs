//! Single-sign-on session relay (identity provider session, refresh, handoff).

pub mod config;
pub mod error;
pub mod handoff;
pub mod logging;
pub mod navigator;
pub mod oidc;
pub mod session;
