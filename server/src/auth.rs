//! Token check for the `jwt` login variant.
//!
//! The HTTP surface signs an HS512 token for the user; the client sends it in
//! the password field of its login packet.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub cid: i32,
    pub exp: i64,
}

pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Signs a token for `cid`; the server only needs this in tests and tooling.
    pub fn issue(&self, cid: i32, valid_for: Duration) -> Result<String, StoreError> {
        let claims = Claims {
            cid,
            exp: (Utc::now() + valid_for).timestamp(),
        };
        encode(&Header::new(Algorithm::HS512), &claims, &self.encoding_key)
            .map_err(|e| StoreError::InvalidToken(e.to_string()))
    }

    /// Accepts the token only if it is valid, unexpired and issued for `cid`.
    pub fn verify(&self, token: &str, cid: i32) -> Result<Claims, StoreError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| StoreError::InvalidToken(e.to_string()))?;

        if claims.cid != cid {
            return Err(StoreError::InvalidToken(format!(
                "token issued for cid {}",
                claims.cid
            )));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let verifier = JwtVerifier::new("secret");
        let token = verifier.issue(2352, Duration::minutes(5)).unwrap();

        let claims = verifier.verify(&token, 2352).unwrap();
        assert_eq!(claims.cid, 2352);
    }

    #[test]
    fn test_wrong_cid_is_rejected() {
        let verifier = JwtVerifier::new("secret");
        let token = verifier.issue(2352, Duration::minutes(5)).unwrap();
        assert!(matches!(verifier.verify(&token, 1000), Err(StoreError::InvalidToken(_))));
    }

    #[test]
    fn test_expired_or_foreign_token_is_rejected() {
        let verifier = JwtVerifier::new("secret");
        let expired = verifier.issue(2352, Duration::minutes(-10)).unwrap();
        assert!(verifier.verify(&expired, 2352).is_err());

        let other = JwtVerifier::new("another secret");
        let foreign = other.issue(2352, Duration::minutes(5)).unwrap();
        assert!(verifier.verify(&foreign, 2352).is_err());

        assert!(verifier.verify("not-a-token", 2352).is_err());
    }
}
