use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::PermissionMap;

#[derive(Debug, Deserialize, Validate)]
pub struct PermissionCheckQuery {
    #[validate(length(min = 1, max = 64, message = "Permission is required"))]
    pub permission: String,
}

#[derive(Debug, Serialize)]
pub struct PermissionCheckResponse {
    pub permission: String,
    pub granted: bool,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChangeRequest {
    #[validate(length(min = 1, max = 128, message = "User id is required"))]
    pub user_id: String,

    #[validate(length(min = 1, max = 64, message = "Permission is required"))]
    pub permission: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChangeResponse {
    pub user_id: String,
    pub permissions: PermissionMap,
}
