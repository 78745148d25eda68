use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginCheckRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Reported by the authentication front end after a rejected login.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginFailureRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(max = 64))]
    pub ip_address: Option<String>,

    #[validate(length(max = 512))]
    pub user_agent: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccessRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 128, message = "User id is required"))]
    pub user_id: String,

    #[validate(length(max = 64))]
    pub ip_address: Option<String>,

    #[validate(length(max = 512))]
    pub user_agent: Option<String>,
}
