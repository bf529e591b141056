use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CredentialError, CredentialResult};
use crate::usage::UsageWindow;

/// key: gateway-keys-model
/// Persisted gateway API key. Holds the pepper-keyed hash of the secret, never
/// the secret itself.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct GatewayApiKey {
    pub key_id: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub status: KeyStatus,
    pub display_prefix: String,
    pub name: String,
    pub owner_id: String,
    pub scopes: Vec<String>,
    pub created_by: Option<String>,
    pub limits: KeyLimits,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Paused,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Paused => "paused",
            KeyStatus::Revoked => "revoked",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(KeyStatus::Active),
            "paused" => Some(KeyStatus::Paused),
            "revoked" => Some(KeyStatus::Revoked),
            _ => None,
        }
    }
}

/// Request and cost ceilings. `None` means unlimited. Costs are integral minor
/// currency units.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyLimits {
    pub daily_requests: Option<i64>,
    pub weekly_requests: Option<i64>,
    pub monthly_requests: Option<i64>,
    pub daily_cost_minor: Option<i64>,
    pub weekly_cost_minor: Option<i64>,
    pub monthly_cost_minor: Option<i64>,
    #[serde(default)]
    pub soft_blocked: bool,
}

impl KeyLimits {
    pub fn request_cap(&self, window: UsageWindow) -> Option<i64> {
        match window {
            UsageWindow::Daily => self.daily_requests,
            UsageWindow::Weekly => self.weekly_requests,
            UsageWindow::Monthly => self.monthly_requests,
        }
    }

    pub fn cost_cap(&self, window: UsageWindow) -> Option<i64> {
        match window {
            UsageWindow::Daily => self.daily_cost_minor,
            UsageWindow::Weekly => self.weekly_cost_minor,
            UsageWindow::Monthly => self.monthly_cost_minor,
        }
    }

    pub fn validate(&self) -> CredentialResult<()> {
        let caps = [
            self.daily_requests,
            self.weekly_requests,
            self.monthly_requests,
            self.daily_cost_minor,
            self.weekly_cost_minor,
            self.monthly_cost_minor,
        ];
        if caps.iter().flatten().any(|cap| *cap < 0) {
            return Err(CredentialError::InvalidInput(
                "limits must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Explicit per-field change: leave alone, set a value, or clear to unlimited.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitChange<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Copy> LimitChange<T> {
    pub fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            LimitChange::Keep => current,
            LimitChange::Set(value) => Some(*value),
            LimitChange::Clear => None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, LimitChange::Keep)
    }

    /// Value written when the change is not `Keep`.
    pub fn target(&self) -> Option<T> {
        match self {
            LimitChange::Set(value) => Some(*value),
            LimitChange::Keep | LimitChange::Clear => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimitsUpdate {
    #[serde(default)]
    pub daily_requests: LimitChange<i64>,
    #[serde(default)]
    pub weekly_requests: LimitChange<i64>,
    #[serde(default)]
    pub monthly_requests: LimitChange<i64>,
    #[serde(default)]
    pub daily_cost_minor: LimitChange<i64>,
    #[serde(default)]
    pub weekly_cost_minor: LimitChange<i64>,
    #[serde(default)]
    pub monthly_cost_minor: LimitChange<i64>,
    #[serde(default)]
    pub soft_blocked: Option<bool>,
}

impl LimitsUpdate {
    pub fn changes(&self) -> [LimitChange<i64>; 6] {
        [
            self.daily_requests,
            self.weekly_requests,
            self.monthly_requests,
            self.daily_cost_minor,
            self.weekly_cost_minor,
            self.monthly_cost_minor,
        ]
    }

    pub fn validate(&self) -> CredentialResult<()> {
        if self
            .changes()
            .iter()
            .any(|change| matches!(change, LimitChange::Set(value) if *value < 0))
        {
            return Err(CredentialError::InvalidInput(
                "limits must not be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn apply(&self, limits: &mut KeyLimits) {
        limits.daily_requests = self.daily_requests.apply(limits.daily_requests);
        limits.weekly_requests = self.weekly_requests.apply(limits.weekly_requests);
        limits.monthly_requests = self.monthly_requests.apply(limits.monthly_requests);
        limits.daily_cost_minor = self.daily_cost_minor.apply(limits.daily_cost_minor);
        limits.weekly_cost_minor = self.weekly_cost_minor.apply(limits.weekly_cost_minor);
        limits.monthly_cost_minor = self.monthly_cost_minor.apply(limits.monthly_cost_minor);
        if let Some(blocked) = self.soft_blocked {
            limits.soft_blocked = blocked;
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IssueKeyRequest {
    pub name: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub limits: KeyLimits,
}

/// Name and pause state changes. The secret hash is untouched.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyUpdate {
    pub name: Option<String>,
    pub paused: Option<bool>,
}

impl KeyUpdate {
    pub fn target_status(&self) -> Option<KeyStatus> {
        self.paused.map(|paused| {
            if paused {
                KeyStatus::Paused
            } else {
                KeyStatus::Active
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_change_applies_each_variant() {
        assert_eq!(LimitChange::Keep.apply(Some(5)), Some(5));
        assert_eq!(LimitChange::Set(9).apply(Some(5)), Some(9));
        assert_eq!(LimitChange::<i64>::Clear.apply(Some(5)), None);
    }

    #[test]
    fn limits_update_deserializes_tagged_fields() {
        let update: LimitsUpdate = serde_json::from_str(
            r#"{"daily_requests": {"set": 100}, "monthly_cost_minor": "clear", "soft_blocked": true}"#,
        )
        .unwrap();
        assert_eq!(update.daily_requests, LimitChange::Set(100));
        assert_eq!(update.weekly_requests, LimitChange::Keep);
        assert_eq!(update.monthly_cost_minor, LimitChange::Clear);

        let mut limits = KeyLimits {
            monthly_cost_minor: Some(5_000),
            weekly_requests: Some(7),
            ..KeyLimits::default()
        };
        update.apply(&mut limits);
        assert_eq!(limits.daily_requests, Some(100));
        assert_eq!(limits.weekly_requests, Some(7));
        assert_eq!(limits.monthly_cost_minor, None);
        assert!(limits.soft_blocked);
    }

    #[test]
    fn negative_limits_are_rejected() {
        let update = LimitsUpdate {
            weekly_cost_minor: LimitChange::Set(-1),
            ..LimitsUpdate::default()
        };
        assert!(matches!(
            update.validate(),
            Err(CredentialError::InvalidInput(_))
        ));
        let limits = KeyLimits {
            daily_requests: Some(-3),
            ..KeyLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn serialized_key_omits_secret_hash() {
        let now = Utc::now();
        let key = GatewayApiKey {
            key_id: "gk_0011223344556677".into(),
            secret_hash: "deadbeef".into(),
            status: KeyStatus::Active,
            display_prefix: "sk_live_ab12...".into(),
            name: "prod-key".into(),
            owner_id: "team-1".into(),
            scopes: vec![],
            created_by: None,
            limits: KeyLimits::default(),
            created_at: now,
            updated_at: now,
            revoked_at: None,
        };
        let json = serde_json::to_value(&key).unwrap();
        assert!(json.get("secret_hash").is_none());
        assert_eq!(json["status"], "active");
    }
}
