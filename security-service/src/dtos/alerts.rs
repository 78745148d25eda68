use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::SecurityAlert;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AlertListQuery {
    #[serde(default)]
    pub unacknowledged_only: bool,

    #[validate(range(min = 1, max = 500, message = "Limit must be between 1 and 500"))]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<SecurityAlert>,
    pub count: usize,
}
