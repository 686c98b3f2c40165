use serde::{Deserialize, Serialize};

use crate::models::task::deserialize_timestamp;

/// Name shown when the provider knows neither a display name nor an email.
pub const PLACEHOLDER_NAME: &str = "User";

/// Identity as pushed by the identity provider on a session change.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub uid: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// The session user. Replaced wholesale on every session event, never edited in place.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl User {
    /// Projects a provider identity: display name, else the local part of the email.
    pub fn from_identity(identity: &ProviderIdentity) -> Self {
        let name = identity
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                identity
                    .email
                    .as_deref()
                    .and_then(|email| email.split('@').next())
                    .filter(|local| !local.is_empty())
            })
            .map(str::to_string);

        User {
            uid: identity.uid.clone(),
            name,
            email: identity.email.clone(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(PLACEHOLDER_NAME)
    }
}

/// Persisted profile record keyed by `uid`, independent of the session user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    #[serde(rename = "memberSince")]
    pub member_since: Option<String>,
    #[serde(
        rename = "createdAt",
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    #[serde(
        rename = "updatedAt",
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<String>,
}

impl UserProfile {
    /// Default profile for an account that has none yet.
    pub fn initial(user: &User, member_since: String) -> Self {
        UserProfile {
            uid: user.uid.clone(),
            email: user.email.clone(),
            display_name: user.name.clone(),
            phone: None,
            location: None,
            photo_url: Some(format!("https://i.pravatar.cc/150?u={}", user.uid)),
            member_since: Some(member_since),
            created_at: None,
            updated_at: None,
        }
    }
}

/// Partial profile update. `uid`, `email`, `memberSince` and `createdAt` are not editable.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(display_name: Option<&str>, email: Option<&str>) -> ProviderIdentity {
        ProviderIdentity {
            uid: "u1".to_string(),
            display_name: display_name.map(str::to_string),
            email: email.map(str::to_string),
        }
    }

    #[test]
    fn name_falls_back_to_email_local_part() {
        let user = User::from_identity(&identity(None, Some("a@b.com")));
        assert_eq!(
            user,
            User {
                uid: "u1".to_string(),
                name: Some("a".to_string()),
                email: Some("a@b.com".to_string()),
            }
        );
    }

    #[test]
    fn display_name_wins_over_email() {
        let user = User::from_identity(&identity(Some("Ada"), Some("a@b.com")));
        assert_eq!(user.display_name(), "Ada");
    }

    #[test]
    fn placeholder_without_name_or_email() {
        let user = User::from_identity(&identity(Some("  "), None));
        assert_eq!(user.name, None);
        assert_eq!(user.display_name(), PLACEHOLDER_NAME);
    }

    #[test]
    fn patch_never_serializes_locked_fields() {
        let patch = ProfilePatch {
            phone: Some("+57 300".to_string()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({"phone": "+57 300"}));
        assert!(ProfilePatch::default().is_empty());
    }

    #[test]
    fn profile_accepts_native_timestamps() {
        let profile: UserProfile = serde_json::from_value(json!({
            "uid": "u1",
            "email": "a@b.com",
            "displayName": null,
            "phone": null,
            "location": null,
            "photoURL": "https://i.pravatar.cc/150?u=u1",
            "memberSince": "2023-01-01T00:00:00.000Z",
            "createdAt": {"seconds": 1700000000, "nanoseconds": 0}
        }))
        .unwrap();
        assert_eq!(profile.created_at.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert_eq!(profile.updated_at, None);
    }
}
