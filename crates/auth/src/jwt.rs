use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::{JwtClaims, TokenValidationError, validate_claims};

/// Decodes and verifies bearer tokens into [`JwtClaims`].
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<JwtClaims, TokenValidationError>;
}

/// HS256 shared-secret validator.
///
/// Time-window checks are done by [`validate_claims`] against our own
/// `issued_at`/`expires_at` claims, so jsonwebtoken's `exp` handling is
/// disabled.
pub struct Hs256JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str) -> Result<JwtClaims, TokenValidationError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| TokenValidationError::Decode(e.to_string()))?;
        validate_claims(&data.claims, Utc::now())?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use counterflow_core::TenantId;
    use jsonwebtoken::{EncodingKey, Header};

    use crate::{PrincipalId, Role};

    const SECRET: &[u8] = b"test-secret";

    fn mint(claims: &JwtClaims, secret: &[u8]) -> String {
        jsonwebtoken::encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
            .unwrap()
    }

    fn fresh_claims() -> JwtClaims {
        let now = Utc::now();
        JwtClaims {
            sub: PrincipalId::new(),
            tenant_id: TenantId::new(),
            roles: vec![Role::manager()],
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn round_trips_valid_token() {
        let claims = fresh_claims();
        let token = mint(&claims, SECRET);
        let validator = Hs256JwtValidator::new(SECRET);
        assert_eq!(validator.validate(&token).unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = mint(&fresh_claims(), b"other-secret");
        let validator = Hs256JwtValidator::new(SECRET);
        assert!(matches!(
            validator.validate(&token),
            Err(TokenValidationError::Decode(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let mut claims = fresh_claims();
        claims.issued_at = Utc::now() - Duration::hours(2);
        claims.expires_at = Utc::now() - Duration::hours(1);
        let token = mint(&claims, SECRET);
        let validator = Hs256JwtValidator::new(SECRET);
        assert_eq!(
            validator.validate(&token),
            Err(TokenValidationError::Expired)
        );
    }
}
