//! Webhook signature verification (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header name GitHub uses for the SHA-256 payload signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Check that `payload` was signed with `secret`.
///
/// Fails closed: an empty secret, a missing header, a header without the
/// `sha256=` prefix, or a digest that is not valid hex all return `false`.
/// The digest comparison is constant-time.
///
/// # Examples
///
/// ```
/// use lookout_review::signature::{sign, verify};
///
/// let body = br#"{"action":"opened"}"#;
/// let header = sign("secret", body);
/// assert!(verify("secret", body, Some(&header)));
/// assert!(!verify("other", body, Some(&header)));
/// assert!(!verify("", body, Some(&header)));
/// ```
pub fn verify(secret: &str, payload: &[u8], signature_header: Option<&str>) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(signature_hex) = signature_header.and_then(|h| h.strip_prefix(SIGNATURE_PREFIX))
    else {
        return false;
    };
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Produce the `sha256=<hex>` header value for `payload`.
///
/// Used by tests and by tooling that replays deliveries.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(payload);
    format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const PAYLOAD: &[u8] = b"Hello, World!";

    #[test]
    fn matches_github_documented_vector() {
        let header = "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17";
        assert_eq!(sign(SECRET, PAYLOAD), header);
        assert!(verify(SECRET, PAYLOAD, Some(header)));
    }

    #[test]
    fn any_payload_byte_flip_fails() {
        let header = sign(SECRET, PAYLOAD);
        for i in 0..PAYLOAD.len() {
            let mut mutated = PAYLOAD.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verify(SECRET, &mutated, Some(&header)), "byte {i}");
        }
    }

    #[test]
    fn any_secret_byte_flip_fails() {
        let header = sign(SECRET, PAYLOAD);
        let secret = SECRET.as_bytes();
        for i in 0..secret.len() {
            let mut mutated = secret.to_vec();
            mutated[i] ^= 0x01;
            let mutated = String::from_utf8_lossy(&mutated).into_owned();
            assert!(!verify(&mutated, PAYLOAD, Some(&header)), "byte {i}");
        }
    }

    #[test]
    fn any_digest_char_change_fails() {
        let header = sign(SECRET, PAYLOAD);
        let prefix_len = SIGNATURE_PREFIX.len();
        for i in prefix_len..header.len() {
            let mut chars: Vec<char> = header.chars().collect();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            let mutated: String = chars.into_iter().collect();
            assert!(!verify(SECRET, PAYLOAD, Some(&mutated)), "char {i}");
        }
    }

    #[test]
    fn empty_secret_never_verifies() {
        let header = sign("", PAYLOAD);
        assert!(!verify("", PAYLOAD, Some(&header)));
    }

    #[test]
    fn missing_or_malformed_header_fails() {
        let header = sign(SECRET, PAYLOAD);
        let bare_hex = header.trim_start_matches(SIGNATURE_PREFIX);
        assert!(!verify(SECRET, PAYLOAD, None));
        assert!(!verify(SECRET, PAYLOAD, Some(bare_hex)));
        assert!(!verify(SECRET, PAYLOAD, Some(&format!("sha1={bare_hex}"))));
        assert!(!verify(SECRET, PAYLOAD, Some("sha256=not-hex")));
        assert!(!verify(SECRET, PAYLOAD, Some("sha256=")));
    }
}
