use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::services::two_factor::VerifyOutcome;

#[derive(Debug, Deserialize, Validate)]
pub struct TwoFactorTokenRequest {
    /// A 6-digit TOTP code or an 8-digit backup code; spaces and dashes are ignored.
    #[validate(length(min = 6, max = 16, message = "Token must be 6 to 16 characters"))]
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyTwoFactorResponse {
    pub verified: bool,
    pub outcome: VerifyOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
