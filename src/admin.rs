//! Admin surface view models.
//!
//! The admin panel is a thin privileged client: the password entered by the
//! operator is forwarded verbatim on every call and the backend is the sole
//! authority. This module holds the wire shapes and the broadcast draft; the
//! event handling lives in the app module.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Maximum call-to-action buttons attachable to a broadcast.
pub const MAX_BROADCAST_BUTTONS: usize = 3;

/// One row of the admin user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUserRecord {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub star_balance: i64,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub referred_by: Option<String>,
}

impl AdminUserRecord {
    /// Case-insensitive match on username or numeric id.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().trim_start_matches('@').to_lowercase();
        if query.is_empty() {
            return true;
        }
        if self.user_id.to_string().contains(&query) {
            return true;
        }
        self.username
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&query))
    }
}

/// Aggregate stats plus the user table, as returned by `admin-stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminStats {
    #[serde(default)]
    pub total_users: u64,
    #[serde(default)]
    pub paying_users: u64,
    #[serde(default)]
    pub new_users_24h: u64,
    #[serde(default)]
    pub new_users_7d: u64,
    #[serde(default)]
    pub total_star_balance: i64,
    #[serde(default)]
    pub users: Vec<AdminUserRecord>,
}

impl AdminStats {
    #[must_use]
    pub fn filtered(&self, query: &str) -> Vec<&AdminUserRecord> {
        self.users.iter().filter(|u| u.matches(query)).collect()
    }

    #[must_use]
    pub fn find(&self, user_id: i64) -> Option<&AdminUserRecord> {
        self.users.iter().find(|u| u.user_id == user_id)
    }
}

/// Who a broadcast goes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceFilter {
    #[default]
    All,
    HasBalance,
    ZeroBalance,
    // serde's snake_case puts no underscore before digits; pin the wire ids.
    #[serde(rename = "new_7d")]
    New7d,
    #[serde(rename = "new_24h")]
    New24h,
}

impl AudienceFilter {
    pub const ALL: [Self; 5] = [
        Self::All,
        Self::HasBalance,
        Self::ZeroBalance,
        Self::New7d,
        Self::New24h,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::HasBalance => "has_balance",
            Self::ZeroBalance => "zero_balance",
            Self::New7d => "new_7d",
            Self::New24h => "new_24h",
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::All => "Everyone",
            Self::HasBalance => "With balance",
            Self::ZeroBalance => "Zero balance",
            Self::New7d => "Joined last 7 days",
            Self::New24h => "Joined last 24 hours",
        }
    }
}

/// A broadcast call-to-action button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastButton {
    pub text: String,
    pub url: String,
}

impl BroadcastButton {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.text.trim().is_empty() && !self.url.trim().is_empty()
    }
}

/// The broadcast being composed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastDraft {
    pub text: String,
    pub photo_url: String,
    pub buttons: Vec<BroadcastButton>,
    pub filter: AudienceFilter,
    /// ISO-8601 timestamp; `None` sends immediately.
    pub schedule_at: Option<String>,
}

impl BroadcastDraft {
    /// Adds an empty button row; refuses past the cap.
    pub fn add_button(&mut self) -> bool {
        if self.buttons.len() >= MAX_BROADCAST_BUTTONS {
            return false;
        }
        self.buttons.push(BroadcastButton::default());
        true
    }

    pub fn remove_button(&mut self, index: usize) {
        if index < self.buttons.len() {
            self.buttons.remove(index);
        }
    }

    /// Buttons with both fields filled; incomplete rows are skipped on send.
    #[must_use]
    pub fn complete_buttons(&self) -> Vec<&BroadcastButton> {
        self.buttons.iter().filter(|b| b.is_complete()).collect()
    }

    #[must_use]
    pub fn can_send(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// `admin-broadcast-send` request body. A test send targets only the
    /// given user and ignores the schedule.
    #[must_use]
    pub fn to_payload(&self, password: &str, test_user_id: Option<i64>) -> Value {
        let mut body = json!({
            "password": password,
            "message_text": self.text,
            "filter_type": self.filter.as_str(),
            "buttons": self.complete_buttons(),
        });
        if let Some(map) = body.as_object_mut() {
            if !self.photo_url.trim().is_empty() {
                map.insert("photo_url".into(), json!(self.photo_url));
            }
            if let Some(test_user_id) = test_user_id {
                map.insert("test_user_id".into(), json!(test_user_id));
            } else if let Some(schedule_at) = &self.schedule_at {
                map.insert("schedule_at".into(), json!(schedule_at));
            }
        }
        body
    }
}

/// Server-computed audience size for the current filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientPreview {
    pub count: u64,
}

/// What `admin-broadcast-send` reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum BroadcastOutcome {
    TestSent,
    Scheduled { broadcast_id: Option<String> },
    Sent { sent: u64, failed: u64, blocked: u64 },
}

impl BroadcastOutcome {
    /// Reads the loosely-shaped send report.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        match value.get("status").and_then(Value::as_str) {
            Some("test_sent") => Self::TestSent,
            Some("scheduled") => Self::Scheduled {
                broadcast_id: value
                    .get("broadcast_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            _ => {
                let count = |key| value.get(key).and_then(Value::as_u64).unwrap_or(0);
                Self::Sent {
                    sent: count("sent"),
                    failed: count("failed"),
                    blocked: count("blocked"),
                }
            }
        }
    }
}

/// `admin-add-stars` reply echoing the authoritative new balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjusted {
    pub user_id: i64,
    pub star_balance: i64,
    #[serde(default)]
    pub username: Option<String>,
}

/// `admin-delete-user` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: Option<&str>) -> AdminUserRecord {
        AdminUserRecord {
            user_id: id,
            username: name.map(str::to_owned),
            star_balance: 0,
            blocked: false,
            created_at: None,
            referred_by: None,
        }
    }

    #[test]
    fn search_matches_username_and_id() {
        let u = user(987_654, Some("StarGazer"));
        assert!(u.matches("star"));
        assert!(u.matches("@STARgazer"));
        assert!(u.matches("8765"));
        assert!(u.matches("  "));
        assert!(!u.matches("nebula"));
    }

    #[test]
    fn search_handles_anonymous_users() {
        let u = user(42, None);
        assert!(u.matches("42"));
        assert!(!u.matches("name"));
    }

    #[test]
    fn button_cap_is_enforced() {
        let mut draft = BroadcastDraft::default();
        assert!(draft.add_button());
        assert!(draft.add_button());
        assert!(draft.add_button());
        assert!(!draft.add_button());
        assert_eq!(draft.buttons.len(), MAX_BROADCAST_BUTTONS);
    }

    #[test]
    fn incomplete_buttons_are_dropped_from_the_payload() {
        let mut draft = BroadcastDraft {
            text: "hello".into(),
            ..BroadcastDraft::default()
        };
        draft.buttons.push(BroadcastButton {
            text: "Open".into(),
            url: "https://t.me/x".into(),
        });
        draft.buttons.push(BroadcastButton {
            text: "no url".into(),
            url: "   ".into(),
        });
        let body = draft.to_payload("pw", None);
        assert_eq!(body["buttons"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_send_overrides_schedule() {
        let draft = BroadcastDraft {
            text: "hi".into(),
            schedule_at: Some("2026-09-01T10:00:00Z".into()),
            ..BroadcastDraft::default()
        };
        let body = draft.to_payload("pw", Some(7));
        assert_eq!(body["test_user_id"], 7);
        assert!(body.get("schedule_at").is_none());

        let body = draft.to_payload("pw", None);
        assert_eq!(body["schedule_at"], "2026-09-01T10:00:00Z");
    }

    #[test]
    fn empty_text_cannot_send() {
        let draft = BroadcastDraft {
            text: "  \n ".into(),
            ..BroadcastDraft::default()
        };
        assert!(!draft.can_send());
    }

    #[test]
    fn filter_ids_round_trip_on_the_wire() {
        for filter in AudienceFilter::ALL {
            let v = serde_json::to_value(filter).unwrap();
            assert_eq!(v, serde_json::json!(filter.as_str()));
        }
    }

    #[test]
    fn broadcast_outcome_shapes() {
        let test = serde_json::json!({"status": "test_sent"});
        assert_eq!(BroadcastOutcome::from_value(&test), BroadcastOutcome::TestSent);

        let scheduled = serde_json::json!({"status": "scheduled", "broadcast_id": "b1"});
        assert_eq!(
            BroadcastOutcome::from_value(&scheduled),
            BroadcastOutcome::Scheduled {
                broadcast_id: Some("b1".into())
            }
        );

        let sent = serde_json::json!({"sent": 90, "failed": 3, "blocked": 7});
        assert_eq!(
            BroadcastOutcome::from_value(&sent),
            BroadcastOutcome::Sent {
                sent: 90,
                failed: 3,
                blocked: 7
            }
        );
    }

    #[test]
    fn stats_filtering_uses_the_query() {
        let stats = AdminStats {
            users: vec![user(1, Some("alpha")), user(2, Some("beta"))],
            ..AdminStats::default()
        };
        assert_eq!(stats.filtered("alp").len(), 1);
        assert_eq!(stats.filtered("").len(), 2);
        assert!(stats.find(2).is_some());
        assert!(stats.find(3).is_none());
    }
}
