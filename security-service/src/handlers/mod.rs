//! HTTP handlers for security-service.

pub mod alerts;
pub mod health;
pub mod keys;
pub mod login_security;
pub mod metrics;
pub mod monitoring;
pub mod permissions;
pub mod two_factor;
