use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeQuery {
    #[validate(length(min = 1, max = 100))]
    pub app_name: String,
    #[validate(length(min = 1, max = 2048))]
    pub return_url: String,
    #[validate(length(min = 1, max = 512))]
    pub state: String,
    #[validate(length(min = 1, max = 100))]
    pub context_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[validate(length(min = 1, max = 256))]
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub state: String,
}
