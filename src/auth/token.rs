use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{ Hmac, Mac };
use serde::{ Deserialize, Serialize };
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key")]
    InvalidKey,
}

/// Verifies `<payload>.<signature>` credentials, where the payload is
/// base64url JSON claims and the signature is hex HMAC-SHA256 over the
/// encoded payload.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidKey)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let (payload, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let sig = hex::decode(sig).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Signs claims with the configured secret. Issuance belongs to the
    /// account service; this exists for operators and tests.
    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let json = serde_json::to_vec(claims).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, sig))
    }

    pub fn issue(&self, subject: &str, ttl_secs: i64) -> Result<String, TokenError> {
        self.sign(&Claims {
            sub: subject.to_string(),
            exp: Utc::now().timestamp() + ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue("user-1", 60).unwrap();
        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn rejects_token_signed_with_other_secret() {
        let token = TokenVerifier::new("other").issue("user-1", 60).unwrap();
        assert_eq!(TokenVerifier::new("secret").verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue("user-1", -5).unwrap();
        assert_eq!(verifier.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn rejects_garbage() {
        let verifier = TokenVerifier::new("secret");
        assert_eq!(verifier.verify("no-dot-here"), Err(TokenError::Malformed));
        assert_eq!(verifier.verify("abc.zz"), Err(TokenError::Malformed));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let verifier = TokenVerifier::new("secret");
        let token = verifier.issue("user-1", 60).unwrap();
        let (_, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin-1","exp":99999999999}"#);
        let forged = format!("{}.{}", forged, sig);
        assert_eq!(verifier.verify(&forged), Err(TokenError::BadSignature));
    }
}
