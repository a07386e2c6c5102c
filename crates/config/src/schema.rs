use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub web: WebInterfaceConfig,
}

/// Web interface (HTTP + WebSocket gateway) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebInterfaceConfig {
    /// Enable the web interface for remote companion control.
    pub enabled: bool,

    /// Address the listener binds to.
    pub bind: String,

    /// Listener port. `0` picks a free port.
    pub port: u16,

    /// Username accepted by `/auth/login`.
    pub username: String,

    /// Legacy plaintext password. Hashed into `password_hash` and removed
    /// from the file the first time the gateway starts.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,

    /// Argon2 PHC string for the login password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Base64 HMAC key for token signing, generated when blank.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub signing_key: Option<Secret<String>>,

    /// Directory custom skin uploads are written to.
    pub skins_dir: PathBuf,

    /// Upper bound for a single skin upload, in bytes.
    pub max_skin_bytes: usize,

    /// Seconds between companion status broadcasts.
    pub status_interval_secs: u64,

    /// Require the token subject to own a companion before commanding it
    /// over REST.
    pub enforce_ownership: bool,

    /// Directory holding the bundled web client, served at `/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
}

impl Default for WebInterfaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "0.0.0.0".into(),
            port: 8080,
            username: "admin".into(),
            password: Some(Secret::new("password".into())),
            password_hash: None,
            signing_key: None,
            skins_dir: PathBuf::from("skins"),
            max_skin_bytes: 1024 * 1024,
            status_interval_secs: 5,
            enforce_ownership: false,
            static_dir: None,
        }
    }
}

impl WebInterfaceConfig {
    /// Signing key material, if one is configured and non-blank.
    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.trim().is_empty())
    }

    /// Legacy plaintext password, if one is still present.
    pub fn legacy_password(&self) -> Option<&str> {
        self.password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .filter(|p| !p.is_empty())
    }
}

pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
