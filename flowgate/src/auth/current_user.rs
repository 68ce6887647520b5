//! The identity resolved for a request, and an extractor for handlers running behind the guard.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::errors::Error;

/// Header carrying the resolved user id to downstream consumers
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the resolved role to downstream consumers
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Platform role as reported by the identity service.
///
/// Only `ADMIN` carries meaning for the guard; every other wire value is kept verbatim so it can be
/// forwarded unchanged in [`USER_ROLE_HEADER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Member,
    Other(String),
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "ADMIN",
            Role::Member => "MEMBER",
            Role::Other(role) => role,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ADMIN" => Role::Admin,
            "MEMBER" => Role::Member,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity resolved from a valid access token. Lives for one request only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub role: Role,
}

// Numeric ids are forwarded in their decimal form
fn id_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(id) => id,
        Id::Number(id) => id.to_string(),
    })
}

/// Extractor for handlers mounted behind the session guard.
///
/// The guard stores the resolved [`UserIdentity`] as a request extension; handlers take it from
/// there instead of looking up a "current user" from ambient state.
///
/// ```ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> String {
///     format!("hello {}", user.id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserIdentity);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserIdentity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(Error::Unauthenticated { message: None })
    }
}
