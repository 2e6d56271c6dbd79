use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SetupResponse {
    /// Base32 secret for manual entry.
    #[schema(example = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP")]
    pub secret: String,
    #[schema(example = "otpauth://totp/iam:alice?secret=JBSWY3DPEHPK3PXP&issuer=iam")]
    pub provisioning_uri: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct DisableRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BackupCodesResponse {
    /// Plain codes; shown once and never retrievable again.
    pub backup_codes: Vec<String>,
}
