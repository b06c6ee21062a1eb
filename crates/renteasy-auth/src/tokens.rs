use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use renteasy_types::models::AuthUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Access,
    Refresh,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "uid")]
    pub user_id: i64,
    pub aud: Audience,
    pub iat: i64,
    pub exp: i64,
    /// Unique per token. Not checked anywhere yet; it is what a revocation
    /// list would key on.
    pub jti: String,
}

impl Claims {
    pub fn auth_user(&self) -> AuthUser {
        AuthUser {
            user_id: self.user_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token signature does not match")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("malformed token")]
    MalformedToken,

    #[error("token issued for a different audience")]
    WrongAudience,

    #[error("failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),

    #[error("token secrets must be non-empty")]
    EmptySecret,

    #[error("access and refresh tokens must use different secrets")]
    SharedSecret,

    #[error("token lifetime out of range")]
    TtlOutOfRange,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl TokenConfig {
    pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
    pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues, verifies and rotates session tokens. Stateless: nothing is stored
/// server-side, so a rotated refresh token stays valid until it expires.
pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if config.access_secret == config.refresh_secret {
            return Err(TokenError::SharedSecret);
        }

        Ok(Self {
            access: SigningKeys::from_secret(&config.access_secret),
            refresh: SigningKeys::from_secret(&config.refresh_secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn keys(&self, audience: Audience) -> &SigningKeys {
        match audience {
            Audience::Access => &self.access,
            Audience::Refresh => &self.refresh,
        }
    }

    pub fn issue(&self, user_id: i64, audience: Audience, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(user_id, audience, ttl, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: i64,
        audience: Audience,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::TtlOutOfRange)?;
        let claims = Claims {
            user_id,
            aud: audience,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.keys(audience).encoding)
            .map_err(TokenError::Encoding)
    }

    /// Access + refresh pair with the configured lifetimes.
    pub fn issue_pair(&self, user_id: i64) -> Result<TokenPair, TokenError> {
        self.issue_pair_at(user_id, Utc::now())
    }

    pub fn issue_pair_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.issue_at(user_id, Audience::Access, self.access_ttl, now)?,
            refresh_token: self.issue_at(user_id, Audience::Refresh, self.refresh_ttl, now)?,
        })
    }

    pub fn verify(&self, token: &str, audience: Audience) -> Result<Claims, TokenError> {
        self.verify_at(token, audience, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        audience: Audience,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against `now` so callers control the clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_audience(&[audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let data = decode::<Claims>(token, &self.keys(audience).decoding, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAudience => TokenError::WrongAudience,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::MalformedToken,
            },
        )?;

        // Signed by our key but claiming the other audience
        if data.claims.aud != audience {
            return Err(TokenError::WrongAudience);
        }
        if now.timestamp() > data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }

    /// Verifies a refresh token and issues a fresh pair for the same subject.
    pub fn rotate(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        self.rotate_at(refresh_token, Utc::now())
    }

    pub fn rotate_at(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        let claims = self.verify_at(refresh_token, Audience::Refresh, now)?;
        debug!("Rotating tokens for user {} (jti {})", claims.user_id, claims.jti);
        self.issue_pair_at(claims.user_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_SECRET: &str = "test-access-secret-minimum-32-chars!";
    const REFRESH_SECRET: &str = "test-refresh-secret-minimum-32-chars";

    fn service() -> TokenService {
        TokenService::new(TokenConfig {
            access_secret: ACCESS_SECRET.into(),
            refresh_secret: REFRESH_SECRET.into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
        })
        .unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000, 0).unwrap()
    }

    #[test]
    fn issue_then_verify_returns_subject() {
        let tokens = service();
        for user_id in [1, 42, i64::from(u32::MAX) + 7] {
            let token = tokens
                .issue_at(user_id, Audience::Access, Duration::minutes(15), fixed_now())
                .unwrap();
            let claims = tokens
                .verify_at(&token, Audience::Access, fixed_now() + Duration::minutes(14))
                .unwrap();
            assert_eq!(claims.user_id, user_id);
            assert_eq!(claims.aud, Audience::Access);
            assert_eq!(claims.exp - claims.iat, 15 * 60);
        }
    }

    #[test]
    fn token_expires_after_ttl() {
        let tokens = service();
        let ttl = Duration::seconds(30);
        let token = tokens.issue_at(5, Audience::Access, ttl, fixed_now()).unwrap();

        assert!(tokens.verify_at(&token, Audience::Access, fixed_now() + ttl).is_ok());
        let err = tokens
            .verify_at(&token, Audience::Access, fixed_now() + ttl + Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn wall_clock_verify_accepts_fresh_token() {
        let tokens = service();
        let token = tokens.issue(9, Audience::Access, Duration::minutes(1)).unwrap();
        assert_eq!(tokens.verify(&token, Audience::Access).unwrap().user_id, 9);
    }

    #[test]
    fn cross_audience_is_rejected() {
        let tokens = service();
        let pair = tokens.issue_pair_at(3, fixed_now()).unwrap();

        let err = tokens
            .verify_at(&pair.access_token, Audience::Refresh, fixed_now())
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));

        let err = tokens
            .verify_at(&pair.refresh_token, Audience::Access, fixed_now())
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn wrong_audience_with_matching_key_is_rejected() {
        // Correctly signed with the refresh secret but claiming "access"
        let claims = Claims {
            user_id: 3,
            aud: Audience::Access,
            iat: fixed_now().timestamp(),
            exp: fixed_now().timestamp() + 60,
            jti: "forged".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(REFRESH_SECRET.as_bytes()),
        )
        .unwrap();

        let err = service()
            .verify_at(&token, Audience::Refresh, fixed_now())
            .unwrap_err();
        assert!(matches!(err, TokenError::WrongAudience));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = TokenService::new(TokenConfig {
            access_secret: "someone-elses-access-secret-32-chars".into(),
            refresh_secret: "someone-elses-refresh-secret-32char".into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
        })
        .unwrap();
        let token = other.issue_at(1, Audience::Access, Duration::minutes(5), fixed_now()).unwrap();

        let err = service().verify_at(&token, Audience::Access, fixed_now()).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let tokens = service();
        for input in ["", "garbage", "a.b.c", "eyJhbGciOiJIUzI1NiJ9.e30"] {
            let err = tokens.verify_at(input, Audience::Access, fixed_now()).unwrap_err();
            assert!(matches!(err, TokenError::MalformedToken), "{input:?} gave {err:?}");
        }
    }

    #[test]
    fn rotate_keeps_subject_and_issues_fresh_pair() {
        let tokens = service();
        let original = tokens.issue_pair_at(77, fixed_now()).unwrap();

        let later = fixed_now() + Duration::hours(1);
        let rotated = tokens.rotate_at(&original.refresh_token, later).unwrap();
        assert_ne!(rotated.refresh_token, original.refresh_token);

        let access = tokens.verify_at(&rotated.access_token, Audience::Access, later).unwrap();
        assert_eq!(access.user_id, 77);
        let refresh = tokens.verify_at(&rotated.refresh_token, Audience::Refresh, later).unwrap();
        assert_eq!(refresh.user_id, 77);

        // Stateless rotation: the old refresh token is still accepted
        assert!(tokens.rotate_at(&original.refresh_token, later).is_ok());
    }

    #[test]
    fn rotate_rejects_access_token_and_expired_refresh() {
        let tokens = service();
        let pair = tokens.issue_pair_at(4, fixed_now()).unwrap();

        assert!(tokens.rotate_at(&pair.access_token, fixed_now()).is_err());

        let err = tokens
            .rotate_at(&pair.refresh_token, fixed_now() + Duration::days(8))
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn overflowing_ttl_is_an_error() {
        let err = service()
            .issue_at(1, Audience::Access, Duration::days(365 * 1_000_000), fixed_now())
            .unwrap_err();
        assert!(matches!(err, TokenError::TtlOutOfRange));
    }

    #[test]
    fn same_second_tokens_are_distinct() {
        let tokens = service();
        let a = tokens.issue_at(1, Audience::Access, Duration::minutes(1), fixed_now()).unwrap();
        let b = tokens.issue_at(1, Audience::Access, Duration::minutes(1), fixed_now()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_shared_or_empty_secrets() {
        let shared = TokenConfig {
            access_secret: "same-secret".into(),
            refresh_secret: "same-secret".into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
        };
        assert!(matches!(TokenService::new(shared.clone()), Err(TokenError::SharedSecret)));

        let empty = TokenConfig {
            access_secret: String::new(),
            ..shared
        };
        assert!(matches!(TokenService::new(empty), Err(TokenError::EmptySecret)));
    }
}
