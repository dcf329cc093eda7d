use crate::auth::credentials::{Claims, CredentialCodec, CredentialError};
use crate::error::{AppError, AppResult};
use crate::store::Deadline;

/// Scheme word expected in the `Authorization` header.
pub const AUTH_SCHEME: &str = "Token";

/// The decoded caller behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
    pub email: String,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.subject_id,
            username: claims.username,
            email: claims.email,
        }
    }
}

/// Request-scoped caller identity plus the deadline for store calls.
///
/// Built once per request and handed by reference to every use case; it is
/// never stored or shared between requests.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    identity: Option<Identity>,
    deadline: Deadline,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            deadline: Deadline::none(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Decode a raw `Authorization` header value.
    ///
    /// An absent header or one whose scheme word is not exactly `Token` gives
    /// an anonymous context. A `Token` credential that fails verification is
    /// an error.
    pub fn from_authorization(
        header: Option<&str>,
        codec: &CredentialCodec,
    ) -> Result<Self, CredentialError> {
        match header.and_then(token_from_header) {
            Some(token) => {
                let claims = codec.verify(token)?;
                Ok(Self::authenticated(claims.into()))
            }
            None => Ok(Self::anonymous()),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn viewer_id(&self) -> Option<i64> {
        self.identity.as_ref().map(|i| i.user_id)
    }

    pub fn require_identity(&self) -> AppResult<&Identity> {
        self.identity.as_ref().ok_or_else(AppError::unauthenticated)
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }
}

/// Pull `<value>` out of `"Token <value>"`.
pub fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    if scheme != AUTH_SCHEME || token.is_empty() {
        return None;
    }
    Some(token)
}
