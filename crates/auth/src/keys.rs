use {
    base64::{Engine, engine::general_purpose::STANDARD},
    rand::RngCore,
    secrecy::Secret,
    tracing::{info, warn},
};

use tether_config::WebInterfaceConfig;

/// Raw key length for generated HS512 keys.
const SIGNING_KEY_BYTES: usize = 64;

/// Generate fresh signing key material, base64-encoded.
pub fn generate_signing_key() -> String {
    let mut bytes = [0u8; SIGNING_KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Turn configured key material into HMAC key bytes. Material that is not
/// valid base64 (a hand-written passphrase) is used verbatim.
pub fn decode_signing_key(material: &str) -> Vec<u8> {
    let material = material.trim();
    match STANDARD.decode(material) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => {
            warn!("signing key is not base64, using it as a raw passphrase");
            material.as_bytes().to_vec()
        },
    }
}

/// Populate `web.signing_key` when it is missing or blank.
///
/// Returns `true` if a key was generated; the caller must persist the config
/// so that issued tokens survive a restart.
pub fn ensure_signing_key(web: &mut WebInterfaceConfig) -> bool {
    if web.signing_key().is_some() {
        return false;
    }
    web.signing_key = Some(Secret::new(generate_signing_key()));
    info!("generated new token signing key");
    true
}
