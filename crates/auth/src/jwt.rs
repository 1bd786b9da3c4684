//! HS256 JWT decoding + verification.
//!
//! The validator trait keeps the API layer decoupled from the concrete
//! algorithm; the HS256 implementation is the only one in use.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use thiserror::Error;

use crate::claims::{validate_claims, JwtClaims, TokenValidationError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("token could not be decoded")]
    Decode,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Verifies a bearer token and returns its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError>;
}

/// HS256 (shared-secret) validator.
pub struct Hs256JwtValidator {
    key: DecodingKey,
}

impl Hs256JwtValidator {
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            key: DecodingKey::from_secret(&secret),
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<JwtClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is enforced against our own claims model below (the claims
        // carry explicit issued_at/expires_at fields, not exp/iat).
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &validation)
            .map_err(|_| JwtError::Decode)?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use funil_core::TenantId;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::{PrincipalId, Role};

    fn mint(secret: &[u8], issued: DateTime<Utc>, expires: DateTime<Utc>) -> String {
        let claims = JwtClaims {
            sub: PrincipalId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::new("admin")],
            issued_at: issued,
            expires_at: expires,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn validates_a_token_signed_with_the_shared_secret() {
        let now = Utc::now();
        let token = mint(b"secret", now - Duration::minutes(1), now + Duration::minutes(5));
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        let claims = validator.validate(&token, now).unwrap();
        assert_eq!(claims.roles, vec![Role::new("admin")]);
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let now = Utc::now();
        let token = mint(b"other", now - Duration::minutes(1), now + Duration::minutes(5));
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        assert_eq!(validator.validate(&token, now), Err(JwtError::Decode));
    }

    #[test]
    fn rejects_an_expired_token() {
        let now = Utc::now();
        let token = mint(b"secret", now - Duration::minutes(10), now - Duration::minutes(1));
        let validator = Hs256JwtValidator::new(b"secret".to_vec());
        assert_eq!(
            validator.validate(&token, now),
            Err(JwtError::Claims(TokenValidationError::Expired))
        );
    }
}
