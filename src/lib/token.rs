use std::{collections::HashSet, fmt};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{RequestError, Result},
    permissions::Identity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub jti: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub grants: Vec<String>,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::user(self.sub.clone(), self.grants.clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub default_ttl: Duration,
    pub clock_skew: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub subject: String,
    pub grants: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct TokenManager {
    header: Header,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    default_ttl: Duration,
    clock_skew: Duration,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

impl TokenManager {
    pub fn new(config: TokenManagerConfig) -> Result<Self> {
        if config.secret.trim().is_empty() {
            return Err(RequestError::Config(
                "auth.secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            header: Header::new(Algorithm::HS256),
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer,
            audience: config.audience,
            default_ttl: config.default_ttl,
            clock_skew: config.clock_skew,
        })
    }

    /// Mint a token for `subject`. A zero TTL yields a token without expiry.
    pub fn issue(
        &self,
        subject: &str,
        grants: Vec<String>,
        ttl_secs: Option<u64>,
    ) -> Result<IssuedToken> {
        if subject.trim().is_empty() {
            return Err(RequestError::Config(
                "token subject must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let ttl = ttl_secs
            .map(|secs| Duration::seconds(secs.min(i64::MAX as u64) as i64))
            .unwrap_or(self.default_ttl);
        let expires_at = if ttl.is_zero() { None } else { Some(now + ttl) };

        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.map(|ts| ts.timestamp()),
            grants,
        };

        let token = encode(&self.header, &claims, &self.encoding_key)
            .map_err(|err| RequestError::Serialization(format!("failed to encode jwt: {err}")))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            subject: claims.sub,
            grants: claims.grants,
            issued_at: now,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let claims = self.decode(token)?;
        self.ensure_active(&claims)?;
        Ok(claims)
    }

    /// Identity for an optional bearer token; no token means anonymous.
    pub fn identity(&self, token: Option<&str>) -> Result<Identity> {
        match token {
            Some(token) => Ok(self.verify(token)?.identity()),
            None => Ok(Identity::anonymous()),
        }
    }

    fn decode(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let decoded = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| RequestError::InvalidToken)?;
        Ok(decoded.claims)
    }

    fn ensure_active(&self, claims: &Claims) -> Result<()> {
        if claims.iss != self.issuer || claims.aud != self.audience {
            return Err(RequestError::Unauthorized);
        }

        let now = Utc::now();
        if let Some(exp) = claims.exp {
            let exp = DateTime::from_timestamp(exp, 0).ok_or(RequestError::InvalidToken)?;
            if now - self.clock_skew > exp {
                return Err(RequestError::TokenExpired);
            }
        }
        let iat = DateTime::from_timestamp(claims.iat, 0).ok_or(RequestError::InvalidToken)?;
        if iat - self.clock_skew > now {
            return Err(RequestError::Unauthorized);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(secret: &str) -> TokenManager {
        TokenManager::new(TokenManagerConfig {
            issuer: "reqflow://test".into(),
            audience: "reqflow".into(),
            secret: secret.into(),
            default_ttl: Duration::hours(1),
            clock_skew: Duration::seconds(0),
        })
        .unwrap()
    }

    #[test]
    fn issued_tokens_verify_into_identities() {
        let manager = manager("s3cret");
        let issued = manager
            .issue("alice", vec!["read".into(), "create*".into()], None)
            .unwrap();
        assert!(issued.expires_at.is_some());

        let identity = manager.identity(Some(&issued.token)).unwrap();
        assert_eq!(identity.id.as_deref(), Some("alice"));
        assert_eq!(identity.grants, vec!["read", "create*"]);
    }

    #[test]
    fn missing_token_is_anonymous() {
        let identity = manager("s3cret").identity(None).unwrap();
        assert!(identity.is_anonymous());
    }

    #[test]
    fn foreign_signatures_are_rejected() {
        let issued = manager("one").issue("alice", vec![], None).unwrap();
        assert!(matches!(
            manager("two").verify(&issued.token),
            Err(RequestError::InvalidToken)
        ));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let manager = manager("s3cret");
        let mut claims = manager.verify(&manager.issue("bob", vec![], Some(60)).unwrap().token).unwrap();
        claims.exp = Some((Utc::now() - Duration::hours(2)).timestamp());
        let token = encode(&manager.header, &claims, &manager.encoding_key).unwrap();
        assert!(matches!(manager.verify(&token), Err(RequestError::TokenExpired)));
    }

    #[test]
    fn zero_ttl_never_expires() {
        let issued = manager("s3cret").issue("svc", vec!["*".into()], Some(0)).unwrap();
        assert!(issued.expires_at.is_none());
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        let result = TokenManager::new(TokenManagerConfig {
            issuer: "i".into(),
            audience: "a".into(),
            secret: " ".into(),
            default_ttl: Duration::hours(1),
            clock_skew: Duration::seconds(0),
        });
        assert!(matches!(result, Err(RequestError::Config(_))));
    }
}
