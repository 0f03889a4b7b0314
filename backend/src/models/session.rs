use serde::{Deserialize, Serialize};

/// Identity decoded from a verified session token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}
