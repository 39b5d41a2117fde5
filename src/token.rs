use std::sync::Arc;

use josekit::jws::{JwsHeader, HS256};
use josekit::jwt::{self, JwtPayload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::settings::Auth;

/// HS256 keys shorter than the digest are rejected by the signer.
pub const MIN_SECRET_LEN: usize = 32;

/// Access token claims. `sub` is the username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: i32,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn username(&self) -> &str {
        &self.sub
    }
}

/// Issues and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Arc<[u8]>,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(auth: &Auth) -> Self {
        Self {
            secret: Arc::from(auth.jwt_secret.as_bytes()),
            ttl_secs: auth.token_ttl_secs,
        }
    }

    pub fn issue(&self, username: &str, uid: i32) -> Result<String, AppError> {
        self.issue_at(username, uid, chrono::Utc::now().timestamp())
    }

    fn issue_at(&self, username: &str, uid: i32, now: i64) -> Result<String, AppError> {
        let mut payload = JwtPayload::new();
        payload.set_subject(username);
        payload.set_claim("uid", Some(json!(uid)))?;
        payload.set_claim("iat", Some(json!(now)))?;
        payload.set_claim("exp", Some(json!(now + self.ttl_secs)))?;

        let mut header = JwsHeader::new();
        header.set_token_type("JWT");
        let signer = HS256.signer_from_bytes(&self.secret)?;
        Ok(jwt::encode_with_signer(&payload, &header, &signer)?)
    }

    /// Checks signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let verifier = HS256.verifier_from_bytes(&self.secret)?;
        let (payload, _header) = jwt::decode_with_verifier(token, &verifier)?;
        let claims: Claims = serde_json::from_value(Value::Object(payload.claims_set().clone()))?;

        if claims.exp <= chrono::Utc::now().timestamp() {
            return Err(AppError::Unauthorized("Token expired".into()));
        }
        Ok(claims)
    }
}
