//! Wire-facing envelope and view types.
//!
//! Host applications serialize these directly; the engine's own types stay
//! internal so a response can never leak a password hash by accident.

use serde::Serialize;

use crate::account::{Account, AccountRole, AccountStatus};
use crate::error::ProvisionError;

/// Uniform success/error envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Wraps a successful payload.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Wraps a failure message.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl<T> From<ProvisionError> for ApiResponse<T> {
    fn from(err: ProvisionError) -> Self {
        Self::err(err.to_string())
    }
}

/// Public projection of an [`Account`]. Carries no password material.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    /// Account name.
    pub name: String,
    /// Contact address.
    pub email: String,
    /// Role tag.
    pub role: AccountRole,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// Name under which VPN credentials are filed.
    pub vpn_name: Option<String>,
    /// True once a VPN password has been established.
    pub credential_set: bool,
    /// Maximum simultaneous devices.
    pub device_limit: u32,
    /// Administrator who approved this account.
    pub approved_by: Option<String>,
    /// Unix timestamp of approval.
    pub approved_at: Option<u64>,
    /// Unix timestamp of registration.
    pub created_at: u64,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            status: account.status,
            vpn_name: account.vpn_name.clone(),
            credential_set: account.credential_set,
            device_limit: account.device_limit,
            approved_by: account.approved_by.clone(),
            approved_at: account.approved_at,
            created_at: account.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::DEFAULT_DEVICE_LIMIT;

    #[test]
    fn test_envelope_shapes() {
        let ok: ApiResponse<u32> = ApiResponse::ok(7);
        assert_eq!(
            serde_json::to_string(&ok).expect("json"),
            r#"{"success":true,"data":7}"#
        );

        let err: ApiResponse<u32> =
            ProvisionError::not_found("account", "ghost").into();
        assert_eq!(
            serde_json::to_string(&err).expect("json"),
            r#"{"success":false,"error":"account not found: ghost"}"#
        );
    }

    #[test]
    fn test_account_view_omits_password_hash() {
        let account = Account::new(
            "alice".to_string(),
            "alice@x.test".to_string(),
            AccountRole::User,
            "sha256$aa$bb".to_string(),
            DEFAULT_DEVICE_LIMIT,
            1_000,
        );
        let json = serde_json::to_string(&AccountView::from(&account)).expect("json");
        assert!(json.contains("\"name\":\"alice\""));
        assert!(!json.contains("sha256$aa$bb"));
        assert!(!json.contains("hash"));
    }
}
