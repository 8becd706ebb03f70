use base64::{engine::general_purpose, Engine as _};
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::ServiceError;

/// Generate an opaque secret: 32 random bytes, URL-safe base64, with a
/// stable prefix so leaked values can be recognized in logs and scanners.
pub(crate) fn generate_secret(rng: &SystemRandom, prefix: &str) -> Result<String, ServiceError> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| ServiceError::Internal("Failed to generate random bytes".to_string()))?;
    Ok(format!(
        "{}{}",
        prefix,
        general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    ))
}
