use serde::{Deserialize, Serialize};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by both register and login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
    pub email: String,
}

// -- Groups --

/// Both fields are optional on the wire so that a missing field surfaces as
/// a validation error rather than a deserialization rejection.
#[derive(Debug, Default, Deserialize)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    pub members: Option<Vec<String>>,
}

// -- Users --

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub query: String,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable reason, e.g. `conflict` or `invalid_credentials`.
    pub error: String,
    pub detail: String,
}
