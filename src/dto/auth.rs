use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::{
    public::ParticipantSummary,
    validation::{validate_access_code, validate_display_name},
};

/// Credentials used both to sign up and to log in.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct CredentialsRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub display_name: String,
    #[validate(custom(function = "validate_access_code"))]
    pub access_code: String,
}

/// Authenticated participant returned by sign-up and login.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct AuthResponse {
    pub participant: ParticipantSummary,
}
