use serde::{Deserialize, Serialize};

/// Upload payload: the twelve captured frames in target-angle order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchRequest {
    pub images: Vec<String>,
}

/// Response envelope for the upload endpoint. Success carries `url` and
/// `message`; rejection and server failure carry `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StitchResponse {
    pub fn ok(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            url: Some(url.into()),
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            message: None,
            error: Some(error.into()),
        }
    }
}
