//! user type representing the owner of user-owned nodes.

use serde::{Deserialize, Serialize};

/// unique identifier for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// a user owning nodes.
///
/// policies refer to users as `name@` or `name@domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// unique identifier.
    pub id: UserId,

    /// login name, e.g. `user1`.
    pub name: String,

    /// email address, if the identity provider supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// display name - typically the user's full name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl User {
    /// create a new user with the given name.
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: None,
            display_name: None,
        }
    }

    /// set the email address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// check whether a policy user reference (`name@` or `name@domain`,
    /// already lower-cased) designates this user.
    ///
    /// `name@` matches the login name or the local part of the email.
    /// `name@domain` matches the full email, or the login name when the
    /// login name itself is an email address.
    pub fn matches_reference(&self, reference: &str) -> bool {
        let name = self.name.to_lowercase();
        let email = self.email.as_deref().map(str::to_lowercase);

        match reference.split_once('@') {
            Some((local, "")) => {
                name == local
                    || email
                        .as_deref()
                        .and_then(|e| e.split_once('@'))
                        .is_some_and(|(l, _)| l == local)
            }
            Some(_) => name == reference || email.as_deref() == Some(reference),
            None => name == reference,
        }
    }
}
