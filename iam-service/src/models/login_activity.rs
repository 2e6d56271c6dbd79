use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;
use woothee::parser::Parser;

/// Outcome tag recorded for each login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    UserNotFound,
    InvalidPassword,
    Inactive,
    InvalidBackupCode,
    ChallengeIssued,
    Success,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::UserNotFound => "user_not_found",
            LoginStatus::InvalidPassword => "invalid_password",
            LoginStatus::Inactive => "inactive",
            LoginStatus::InvalidBackupCode => "invalid_backup_code",
            LoginStatus::ChallengeIssued => "challenge_issued",
            LoginStatus::Success => "success",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LoginStatus::Success)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LoginActivity {
    pub activity_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub principal_id: Option<Uuid>,
    pub username: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub os_name: Option<String>,
    pub browser_name: Option<String>,
    pub device_type: Option<String>,
    pub status_code: String,
    pub success: bool,
    pub created_utc: DateTime<Utc>,
}

impl LoginActivity {
    pub fn new(
        tenant_id: Option<Uuid>,
        principal_id: Option<Uuid>,
        username: String,
        client: &ClientInfo,
        status: LoginStatus,
    ) -> Self {
        let agent = client
            .user_agent
            .as_deref()
            .map(UserAgentDetails::parse)
            .unwrap_or_default();

        Self {
            activity_id: Uuid::new_v4(),
            tenant_id,
            principal_id,
            username,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            os_name: agent.os,
            browser_name: agent.browser,
            device_type: agent.device,
            status_code: status.as_str().to_string(),
            success: status.is_success(),
            created_utc: Utc::now(),
        }
    }
}

/// Caller details captured from the request for the audit trail.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Operating system, browser and device class read from a user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAgentDetails {
    pub os: Option<String>,
    pub browser: Option<String>,
    pub device: Option<String>,
}

impl UserAgentDetails {
    pub fn parse(user_agent: &str) -> Self {
        let known = |value: &str| {
            let value = value.trim();
            (!value.is_empty() && value != "UNKNOWN").then(|| value.to_string())
        };

        match Parser::new().parse(user_agent) {
            Some(result) => Self {
                os: known(&result.os),
                browser: known(&result.name),
                device: known(&result.category),
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_ON_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    #[test]
    fn test_parses_desktop_browser() {
        let details = UserAgentDetails::parse(CHROME_ON_WINDOWS);
        assert_eq!(details.browser.as_deref(), Some("Chrome"));
        assert_eq!(details.device.as_deref(), Some("pc"));
        assert!(details.os.unwrap().starts_with("Windows"));
    }

    #[test]
    fn test_unrecognised_agent_leaves_fields_empty() {
        assert_eq!(UserAgentDetails::parse("integration-test"), UserAgentDetails::default());
    }

    #[test]
    fn test_activity_carries_parsed_agent() {
        let client = ClientInfo {
            ip_address: Some("198.51.100.7".to_string()),
            user_agent: Some(CHROME_ON_WINDOWS.to_string()),
        };
        let activity = LoginActivity::new(None, None, "alice".into(), &client, LoginStatus::Success);

        assert!(activity.success);
        assert_eq!(activity.browser_name.as_deref(), Some("Chrome"));
        assert_eq!(activity.device_type.as_deref(), Some("pc"));
    }
}
