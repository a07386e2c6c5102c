//! HS512-signed bearer tokens.
//!
//! Tokens are compact JWS strings (`header.payload.signature`, base64url
//! without padding). Validity depends only on the signature and the expiry
//! claim; there is no server-side store, so rotating the signing key is the
//! only way to revoke issued tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    hmac::{Hmac, Mac},
    secrecy::{ExposeSecret, SecretVec},
    serde::{Deserialize, Serialize},
    sha2::Sha512,
    tracing::debug,
};

use tether_protocol::TOKEN_TTL_SECS;

type HmacSha512 = Hmac<Sha512>;

const ALGORITHM: &str = "HS512";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token subject must not be empty")]
    EmptySubject,
    #[error("signing key must not be empty")]
    EmptyKey,
    #[error("malformed or tampered token")]
    Malformed,
    #[error("token expired")]
    Expired,
}

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues and validates tokens with one symmetric key.
pub struct TokenService {
    key: SecretVec<u8>,
    ttl_secs: u64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(key: Vec<u8>) -> Result<Self, TokenError> {
        if key.is_empty() {
            return Err(TokenError::EmptyKey);
        }
        Ok(Self {
            key: SecretVec::new(key),
            ttl_secs: TOKEN_TTL_SECS,
        })
    }

    pub fn issue(&self, subject: &str) -> Result<String, TokenError> {
        self.issue_at(subject, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, subject: &str, now: u64) -> Result<String, TokenError> {
        if subject.is_empty() {
            return Err(TokenError::EmptySubject);
        }
        let header = Header {
            alg: ALGORITHM.into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        let signing_input = format!("{}.{}", encode_json(&header)?, encode_json(&claims)?);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(&signing_input)?.finalize().into_bytes());

        debug!(subject, exp = claims.exp, "issued token");
        Ok(format!("{signing_input}.{signature}"))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, unix_now())
    }

    /// Validate `token` as if the current time were `now` (unix seconds).
    pub fn validate_at(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let result = self.check(token, now);
        if let Err(e) = &result {
            debug!(error = %e, "token rejected");
        }
        result
    }

    fn check(&self, token: &str, now: u64) -> Result<Claims, TokenError> {
        let (signing_input, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (header, payload) = signing_input
            .split_once('.')
            .filter(|(_, payload)| !payload.contains('.'))
            .ok_or(TokenError::Malformed)?;

        let header: Header = decode_json(header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Malformed)?;
        self.mac(signing_input)?
            .verify_slice(&signature)
            .map_err(|_| TokenError::Malformed)?;

        let claims: Claims = decode_json(payload)?;
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, signing_input: &str) -> Result<HmacSha512, TokenError> {
        let mut mac = HmacSha512::new_from_slice(self.key.expose_secret())
            .map_err(|_| TokenError::EmptyKey)?;
        mac.update(signing_input.as_bytes());
        Ok(mac)
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    serde_json::to_vec(value)
        .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
        .map_err(|_| TokenError::Malformed)
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}
