//! Login credentials: one configured username plus an argon2 password hash.

use {
    argon2::Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    rand::RngCore,
    subtle::ConstantTimeEq,
    tracing::{info, warn},
};

use tether_config::WebInterfaceConfig;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no login password configured (set web.password_hash or web.password)")]
    NotConfigured,
    #[error("invalid password hash: {0}")]
    InvalidHash(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Verified-against credentials for `/auth/login`.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password_hash: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let password_hash = password_hash.into();
        PasswordHash::new(&password_hash)
            .map_err(|e| CredentialError::InvalidHash(e.to_string()))?;
        Ok(Self {
            username: username.into(),
            password_hash,
        })
    }

    /// Build from config. Run [`ensure_password_hash`] first so a legacy
    /// plaintext password has been migrated.
    pub fn from_config(web: &WebInterfaceConfig) -> Result<Self, CredentialError> {
        let hash = web
            .password_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(CredentialError::NotConfigured)?;
        Self::new(web.username.clone(), hash)
    }

    /// Check a login attempt. Both halves are always evaluated so response
    /// time does not reveal whether the username matched.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok: bool = username.as_bytes().ct_eq(self.username.as_bytes()).into();
        let pass_ok = PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        user_ok && pass_ok
    }
}

/// Hash `password` into an argon2id PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| CredentialError::Hash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}

/// Replace a legacy plaintext `web.password` with `web.password_hash`.
///
/// Returns `true` when the config changed and must be persisted.
pub fn ensure_password_hash(web: &mut WebInterfaceConfig) -> Result<bool, CredentialError> {
    let has_hash = web.password_hash.as_deref().is_some_and(|h| !h.is_empty());
    let Some(plaintext) = web.legacy_password().map(str::to_owned) else {
        return if has_hash {
            Ok(false)
        } else {
            Err(CredentialError::NotConfigured)
        };
    };

    if has_hash {
        warn!("both web.password and web.password_hash are set, dropping the plaintext password");
    } else {
        if web.username == "admin" && plaintext == "password" {
            warn!("web interface is using the default credentials, change them");
        }
        web.password_hash = Some(hash_password(&plaintext)?);
        info!("migrated plaintext web password to an argon2 hash");
    }
    web.password = None;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    fn creds() -> Credentials {
        Credentials::new("admin", hash_password("hunter2").unwrap()).unwrap()
    }

    #[test]
    fn accepts_exact_credentials() {
        assert!(creds().verify("admin", "hunter2"));
    }

    #[test]
    fn rejects_any_single_character_change() {
        let creds = creds();
        for bad in ["hunter3", "Hunter2", "hunter", "hunter22", ""] {
            assert!(!creds.verify("admin", bad), "{bad}");
        }
        assert!(!creds.verify("Admin", "hunter2"));
    }

    #[test]
    fn rejects_invalid_hash() {
        assert!(matches!(
            Credentials::new("admin", "plaintext"),
            Err(CredentialError::InvalidHash(_))
        ));
    }

    #[test]
    fn migrates_legacy_plaintext() {
        let mut web = WebInterfaceConfig::default();
        assert!(ensure_password_hash(&mut web).unwrap());
        assert!(web.password.is_none());
        let creds = Credentials::from_config(&web).unwrap();
        assert!(creds.verify("admin", "password"));

        // Second run is a no-op.
        assert!(!ensure_password_hash(&mut web).unwrap());
    }

    #[test]
    fn existing_hash_wins_over_plaintext() {
        let mut web = WebInterfaceConfig::default();
        web.password_hash = Some(hash_password("from-hash").unwrap());
        web.password = Some(Secret::new("from-plaintext".into()));
        assert!(ensure_password_hash(&mut web).unwrap());
        let creds = Credentials::from_config(&web).unwrap();
        assert!(creds.verify("admin", "from-hash"));
        assert!(!creds.verify("admin", "from-plaintext"));
    }

    #[test]
    fn missing_password_is_an_error() {
        let mut web = WebInterfaceConfig::default();
        web.password = None;
        assert!(matches!(
            ensure_password_hash(&mut web),
            Err(CredentialError::NotConfigured)
        ));
    }
}
