use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::{
        claims::{Claims, OauthStateClaims},
        repo_types::Role,
    },
    config::JwtConfig,
};

/// Fixed session lifetime.
pub const SESSION_TTL: Duration = Duration::days(30);

pub const OAUTH_STATE_TTL: Duration = Duration::minutes(10);

/// Signing material, built once at startup and shared read-only.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
}

impl SessionKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> anyhow::Result<(String, Claims)> {
        self.issue_at(user_id, role, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        user_id: Uuid,
        role: Role,
        now: OffsetDateTime,
    ) -> anyhow::Result<(String, Claims)> {
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.unix_timestamp(),
            exp: (now + SESSION_TTL).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, role = %role, "session token signed");
        Ok((token, claims))
    }

    /// Any structural, signature, issuer/audience or expiry problem yields
    /// `None`; callers cannot tell which.
    pub fn validate(&self, token: &str) -> Option<Claims> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    pub fn validate_at(&self, token: &str, now: OffsetDateTime) -> Option<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        // Expiry is checked below against `now`, with no leeway.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(error = %e, "session token rejected");
                return None;
            }
        };
        if now.unix_timestamp() >= claims.exp {
            debug!(user_id = %claims.sub, "session token expired");
            return None;
        }
        Some(claims)
    }

    pub fn sign_oauth_state(
        &self,
        state: &str,
        nonce: &str,
        pkce_verifier: &str,
    ) -> anyhow::Result<String> {
        let claims = OauthStateClaims {
            state: state.to_string(),
            nonce: nonce.to_string(),
            pkce_verifier: pkce_verifier.to_string(),
            exp: (OffsetDateTime::now_utc() + OAUTH_STATE_TTL).unix_timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_oauth_state(&self, token: &str) -> Option<OauthStateClaims> {
        let mut validation = Validation::default();
        // State cookie has no sub/iss/aud claims
        validation.required_spec_claims.clear();
        validation.validate_exp = true;
        validation.leeway = 0;
        decode::<OauthStateClaims>(token, &self.decoding, &validation)
            .ok()
            .map(|d| d.claims)
    }
}
