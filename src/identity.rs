use axum::{Json, Router, debug_handler, routing::post};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AppState, ServiceError, ServiceResult};

pub const TRIPCODE_LEN: usize = 12;

/// Derives the display pseudonym shown next to a user's messages.
///
/// SHA-256 of the passphrase bytes, base64-encoded, stripped to
/// alphanumerics, truncated to [`TRIPCODE_LEN`]. Deterministic: the same
/// passphrase always maps to the same tripcode.
///
/// This is not an authentication mechanism. There is no key and no
/// server-side verification; anyone who knows the passphrase can reproduce
/// the tripcode. Treat it as a stable nickname suffix, nothing more.
pub fn derive_tripcode(passphrase: &str) -> ServiceResult<String> {
    let digest = Sha256::digest(passphrase.as_bytes());
    let tripcode: String = STANDARD
        .encode(digest)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(TRIPCODE_LEN)
        .collect();

    // A 32-byte digest always yields alphanumerics after stripping; an empty
    // result means the encoding step misbehaved.
    if tripcode.is_empty() {
        return Err(ServiceError::Hash);
    }
    Ok(tripcode)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/tripcode", post(tripcode))
}

#[derive(Debug, Deserialize)]
pub(crate) struct TripcodeRequest {
    passphrase: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TripcodeResponse {
    tripcode: String,
}

#[debug_handler]
pub(crate) async fn tripcode(
    Json(TripcodeRequest { passphrase }): Json<TripcodeRequest>,
) -> ServiceResult<Json<TripcodeResponse>> {
    Ok(Json(TripcodeResponse {
        tripcode: derive_tripcode(&passphrase)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_passphrase_same_tripcode() {
        let a = derive_tripcode("abc").unwrap();
        let b = derive_tripcode("abc").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tripcodes_are_short_alphanumeric_handles() {
        let tripcode = derive_tripcode("hunter2").unwrap();
        assert_eq!(tripcode.len(), TRIPCODE_LEN);
        assert!(tripcode.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn different_passphrases_diverge() {
        assert_ne!(
            derive_tripcode("abc").unwrap(),
            derive_tripcode("abd").unwrap()
        );
        assert_ne!(derive_tripcode("").unwrap(), derive_tripcode(" ").unwrap());
    }
}
