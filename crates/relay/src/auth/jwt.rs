use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

use crate::config::MIN_JWT_SECRET_BYTES;

pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessTokenClaims {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    exp: i64,
}

/// Verified identity of the caller behind a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject_id: i64,
    /// Authorization tier, passed through uninterpreted.
    pub level: String,
    pub issuer: Option<String>,
    pub expires_at: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8], issuer: Option<String>) -> anyhow::Result<Self> {
        if secret.len() < MIN_JWT_SECRET_BYTES {
            bail!("jwt secret must be at least {MIN_JWT_SECRET_BYTES} bytes long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
        })
    }

    pub fn authenticate(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::Unauthorized("empty token".to_string()));
        }

        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|error| AuthError::Unauthorized(error.to_string()))?
            .claims;

        debug!(subject_id = claims.id, level = %claims.level, "access token verified");

        Ok(IdentityClaims {
            subject_id: claims.id,
            level: claims.level,
            issuer: claims.iss,
            expires_at: claims.exp,
        })
    }

    pub fn issue_token(&self, subject_id: i64, level: &str) -> anyhow::Result<String> {
        self.issue_token_at(subject_id, level, current_unix_timestamp()?)
    }

    fn issue_token_at(
        &self,
        subject_id: i64,
        level: &str,
        issued_at: i64,
    ) -> anyhow::Result<String> {
        let claims = AccessTokenClaims {
            id: subject_id,
            level: level.to_string(),
            iss: self.issuer.clone(),
            iat: Some(issued_at),
            exp: issued_at + ACCESS_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode access token")
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
