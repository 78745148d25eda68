//! Request and response bodies for the HTTP surface.

pub mod alerts;
pub mod login;
pub mod permissions;
pub mod two_factor;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
