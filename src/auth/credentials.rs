use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Identity claims embedded in every issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "user_id")]
    pub subject_id: i64,
    #[serde(rename = "user_name")]
    pub username: String,
    #[serde(rename = "user_email")]
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid credential: {0}")]
pub struct CredentialError(#[from] jsonwebtoken::errors::Error);

/// Signs and verifies HS256 tokens with one shared secret.
///
/// Tokens carry no expiry; they stay valid until the secret is rotated.
#[derive(Clone)]
pub struct CredentialCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl CredentialCodec {
    pub fn new(secret: &str) -> Self {
        // Pinned to HS256: a token whose header names any other algorithm is rejected.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, CredentialError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, CredentialError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}
