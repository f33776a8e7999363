//! User identity payload and sign-in transition labels.
//!
//! The identity endpoint answers with a user object. Three shapes matter:
//!
//! - `id > 0`: a real, authorized user
//! - `id == -1`: explicitly signed out ([`SIGNED_OUT_USER_ID`])
//! - `id` missing: ambiguous; the check failed or the server said nothing
//!
//! The last two must never be conflated: a caller may retry the ambiguous
//! case instead of showing a sign-in prompt.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Reserved user id meaning "explicitly signed out".
pub const SIGNED_OUT_USER_ID: i64 = -1;

/// A user as reported by the identity endpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Server id. `-1` = signed out, `None` = unknown.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Anything else the server sent along.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl User {
    /// A user with only an id set.
    pub fn with_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// The explicit signed-out sentinel.
    pub fn signed_out() -> Self {
        Self::with_id(SIGNED_OUT_USER_ID)
    }

    /// The ambiguous "no answer" user.
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// True when the id names a real user.
    pub fn is_authorized(&self) -> bool {
        matches!(self.id, Some(id) if id > 0)
    }

    pub fn is_signed_out(&self) -> bool {
        self.id == Some(SIGNED_OUT_USER_ID)
    }

    /// True when the server gave neither a real id nor the sign-out sentinel.
    pub fn is_unknown(&self) -> bool {
        !self.is_authorized() && !self.is_signed_out()
    }
}

/// Label for the change between two user snapshots.
///
/// Always computed from a diff, never from the raw payload, so listeners are
/// never told "signed-in" when the id did not actually change.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UserTransition {
    /// Was authorized, now explicitly signed out.
    SignedOut,
    /// Was authorized, now a different authorized user.
    ChangedUser,
    /// Was not authorized, now a real user.
    SignedIn,
    /// No authorization boundary crossed.
    Updated,
}

impl UserTransition {
    /// Diff `previous` against `next`.
    ///
    /// `previous == None` means the session never saw a user.
    pub fn between(previous: Option<&User>, next: &User) -> Self {
        let was_authorized = previous.is_some_and(User::is_authorized);
        if was_authorized {
            let prev_id = previous.and_then(|u| u.id);
            if next.is_signed_out() {
                UserTransition::SignedOut
            } else if next.is_authorized() && next.id != prev_id {
                UserTransition::ChangedUser
            } else {
                UserTransition::Updated
            }
        } else if next.is_authorized() {
            UserTransition::SignedIn
        } else {
            UserTransition::Updated
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(User::signed_out().is_signed_out());
        assert!(!User::signed_out().is_authorized());
        assert!(User::unknown().is_unknown());
        assert!(!User::signed_out().is_unknown());
        assert!(User::with_id(5).is_authorized());
    }

    #[test]
    fn test_signed_out_transition() {
        let t = UserTransition::between(Some(&User::with_id(5)), &User::signed_out());
        assert_eq!(t, UserTransition::SignedOut);
    }

    #[test]
    fn test_changed_user_transition() {
        let t = UserTransition::between(Some(&User::with_id(5)), &User::with_id(7));
        assert_eq!(t, UserTransition::ChangedUser);
    }

    #[test]
    fn test_signed_in_transition() {
        assert_eq!(
            UserTransition::between(None, &User::with_id(7)),
            UserTransition::SignedIn
        );
        assert_eq!(
            UserTransition::between(Some(&User::signed_out()), &User::with_id(7)),
            UserTransition::SignedIn
        );
    }

    #[test]
    fn test_same_user_is_update() {
        let prev = User::with_id(5).named("Old");
        let next = User::with_id(5).named("New");
        assert_eq!(UserTransition::between(Some(&prev), &next), UserTransition::Updated);
    }

    #[test]
    fn test_unknown_after_authorized_is_update() {
        // ambiguous answers never count as sign-out
        let t = UserTransition::between(Some(&User::with_id(5)), &User::unknown());
        assert_eq!(t, UserTransition::Updated);
    }

    #[test]
    fn test_labels() {
        assert_eq!(UserTransition::SignedOut.to_string(), "signed-out");
        assert_eq!(UserTransition::ChangedUser.to_string(), "changed-user");
        let parsed: UserTransition = "signed-in".parse().unwrap();
        assert_eq!(parsed, UserTransition::SignedIn);
    }

    #[test]
    fn test_extra_fields_survive() {
        let json = r#"{"id": 3, "name": "Amy", "presence": "away"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, Some(3));
        assert_eq!(user.extra.get("presence").and_then(|v| v.as_str()), Some("away"));
    }

    #[test]
    fn test_missing_id_is_unknown() {
        let user: User = serde_json::from_str(r#"{"name": "ghost"}"#).unwrap();
        assert!(user.is_unknown());
    }
}
