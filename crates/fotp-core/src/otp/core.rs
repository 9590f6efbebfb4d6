//! Core OTP computation: RFC 4226 (HOTP) and RFC 6238 (TOTP).
//!
//! Pure functions over raw key bytes: HMAC with MD5, SHA-1, SHA-256 or
//! SHA-512, dynamic truncation, time-step arithmetic, and the strict
//! Base32 codec used for shared secrets.

use crate::otp::types::*;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// Smallest and largest supported code length.
pub const MIN_DIGITS: u8 = 6;
pub const MAX_DIGITS: u8 = 8;

/// Default TOTP step in seconds.
pub const DEFAULT_PERIOD: u32 = 30;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Raw HMAC-OTP (RFC 4226 §5.3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compute an HOTP code for the given raw key bytes and counter.
pub fn hotp_raw(key: &[u8], counter: u64, digits: u8, algo: Algorithm) -> String {
    let mac = compute_hmac(key, &counter.to_be_bytes(), algo);
    truncate(&mac, digits)
}

/// HMAC(key, message) using the selected hash.
fn compute_hmac(key: &[u8], data: &[u8], algo: Algorithm) -> Vec<u8> {
    macro_rules! mac_with {
        ($hash:ty) => {{
            let mut mac =
                Hmac::<$hash>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }};
    }
    match algo {
        Algorithm::Md5 => mac_with!(Md5),
        Algorithm::Sha1 => mac_with!(Sha1),
        Algorithm::Sha256 => mac_with!(Sha256),
        Algorithm::Sha512 => mac_with!(Sha512),
    }
}

/// Dynamic truncation per RFC 4226 §5.3.
///
/// A 16-byte MD5 MAC can yield an offset whose 4-byte window runs past the
/// end, so the offset is clamped to `len - 4`. `digits` is capped at
/// [`MAX_DIGITS`].
fn truncate(mac: &[u8], digits: u8) -> String {
    let digits = digits.min(MAX_DIGITS);
    let offset = ((mac[mac.len() - 1] & 0x0f) as usize).min(mac.len() - 4);
    let binary = ((mac[offset] as u32 & 0x7f) << 24)
        | ((mac[offset + 1] as u32) << 16)
        | ((mac[offset + 2] as u32) << 8)
        | (mac[offset + 3] as u32);
    let modulus = 10u32.pow(digits as u32);
    format!("{:0>width$}", binary % modulus, width = digits as usize)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  TOTP time arithmetic (RFC 6238)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Time-step counter for a given unix timestamp.
pub fn time_step_at(unix_seconds: u64, period: u32) -> u64 {
    unix_seconds / period as u64
}

/// Half-open validity window `[from, until)` of the step containing `unix_seconds`.
pub fn window_at(unix_seconds: u64, period: u32) -> (u64, u64) {
    let from = time_step_at(unix_seconds, period) * period as u64;
    (from, from.saturating_add(period as u64))
}

/// Seconds remaining until the step containing `unix_seconds` expires.
pub fn seconds_remaining_at(unix_seconds: u64, period: u32) -> u64 {
    let (_, until) = window_at(unix_seconds, period);
    until.saturating_sub(unix_seconds)
}

/// TOTP code for raw key bytes at an explicit unix timestamp.
pub fn totp_raw(key: &[u8], unix_seconds: u64, period: u32, digits: u8, algo: Algorithm) -> String {
    hotp_raw(key, time_step_at(unix_seconds, period), digits, algo)
}

/// Current unix timestamp in seconds.
pub fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Base32 secrets (RFC 4648)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode a Base32 secret.
///
/// Case-insensitive; trailing `=` padding is optional. Any other character
/// outside `A-Z2-7`, a truncated final group, or an empty result is an
/// `InvalidSecret` error.
pub fn decode_secret(b32: &str) -> Result<Vec<u8>, OtpError> {
    let invalid = |why: &str| {
        OtpError::new(OtpErrorKind::InvalidSecret, "Invalid base-32 secret").with_detail(why)
    };

    let upper = b32.to_ascii_uppercase();
    let body = upper.trim_end_matches('=');
    if let Some(bad) = body.chars().find(|c| !matches!(c, 'A'..='Z' | '2'..='7')) {
        return Err(invalid(&format!("unexpected character {:?}", bad)));
    }
    if matches!(body.len() % 8, 1 | 3 | 6) {
        return Err(invalid("truncated final group"));
    }

    let bytes = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, body)
        .ok_or_else(|| invalid("undecodable"))?;
    if bytes.is_empty() {
        return Err(invalid("empty secret"));
    }
    Ok(bytes)
}

/// Encode raw bytes to Base32 (no padding, uppercase).
pub fn encode_secret(bytes: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, bytes)
}

/// Generate a cryptographically-random secret of `byte_length` bytes.
pub fn generate_secret(byte_length: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; byte_length];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Check if a string decodes as a valid Base32 secret.
pub fn is_valid_base32(s: &str) -> bool {
    decode_secret(s).is_ok()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Utility helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compare two codes without short-circuiting on the first mismatch.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Format an OTP code with a space in the middle (e.g. "123 456").
pub fn format_code_display(code: &str) -> String {
    let len = code.chars().count();
    if len <= 4 {
        return code.to_string();
    }
    match code.char_indices().nth(len / 2) {
        Some((mid, _)) => format!("{} {}", &code[..mid], &code[mid..]),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4226 Appendix D secret: "12345678901234567890" (ASCII)
    const RFC_SHA1_KEY: &[u8] = b"12345678901234567890";
    const RFC_SHA256_KEY: &[u8] = b"12345678901234567890123456789012";
    const RFC_SHA512_KEY: &[u8] =
        b"1234567890123456789012345678901234567890123456789012345678901234";

    // ── RFC 4226 test vectors (Appendix D) ───────────────────────

    #[test]
    fn rfc4226_hotp_vectors() {
        let expected = [
            "755224", "287082", "359152", "969429", "338314",
            "254676", "287922", "162583", "399871", "520489",
        ];
        for (counter, exp) in expected.iter().enumerate() {
            let code = hotp_raw(RFC_SHA1_KEY, counter as u64, 6, Algorithm::Sha1);
            assert_eq!(&code, exp, "HOTP mismatch at counter {}", counter);
        }
    }

    // ── RFC 6238 test vectors (Appendix B) ───────────────────────

    const RFC6238_TIMES: [u64; 6] = [59, 1111111109, 1111111111, 1234567890, 2000000000, 20000000000];

    #[test]
    fn rfc6238_totp_sha1() {
        let expected = ["94287082", "07081804", "14050471", "89005924", "69279037", "65353130"];
        for (t, exp) in RFC6238_TIMES.iter().zip(expected) {
            assert_eq!(totp_raw(RFC_SHA1_KEY, *t, 30, 8, Algorithm::Sha1), exp, "T={}", t);
        }
    }

    #[test]
    fn rfc6238_totp_sha256() {
        let expected = ["46119246", "68084774", "67062674", "91819424", "90698825", "77737706"];
        for (t, exp) in RFC6238_TIMES.iter().zip(expected) {
            assert_eq!(totp_raw(RFC_SHA256_KEY, *t, 30, 8, Algorithm::Sha256), exp, "T={}", t);
        }
    }

    #[test]
    fn rfc6238_totp_sha512() {
        let expected = ["90693936", "25091201", "99943326", "93441116", "38618901", "47863826"];
        for (t, exp) in RFC6238_TIMES.iter().zip(expected) {
            assert_eq!(totp_raw(RFC_SHA512_KEY, *t, 30, 8, Algorithm::Sha512), exp, "T={}", t);
        }
    }

    // ── Output shape ─────────────────────────────────────────────

    #[test]
    fn codes_have_requested_length_for_every_algorithm() {
        for algo in [Algorithm::Md5, Algorithm::Sha1, Algorithm::Sha256, Algorithm::Sha512] {
            for digits in MIN_DIGITS..=MAX_DIGITS {
                for counter in [0u64, 1, 7, 1 << 40, u64::MAX] {
                    let code = hotp_raw(b"some shared secret", counter, digits, algo);
                    assert_eq!(code.len(), digits as usize);
                    assert!(code.chars().all(|c| c.is_ascii_digit()));
                }
            }
        }
    }

    #[test]
    fn truncate_clamps_offset_for_short_macs() {
        // 16-byte MAC whose last nibble asks for offset 15.
        let mut mac = [0u8; 16];
        mac[12] = 0x01;
        mac[15] = 0x0f;
        // Window clamped to bytes 12..16 → 0x0100000F
        assert_eq!(truncate(&mac, 8), format!("{:08}", 0x0100_000Fu32 % 100_000_000));
    }

    #[test]
    fn digits_above_max_are_capped() {
        let eight = hotp_raw(RFC_SHA1_KEY, 0, 8, Algorithm::Sha1);
        assert_eq!(eight, "84755224");
        for digits in [9, 10, 255] {
            assert_eq!(hotp_raw(RFC_SHA1_KEY, 0, digits, Algorithm::Sha1), eight, "digits={}", digits);
        }
    }

    #[test]
    fn truncate_masks_sign_bit() {
        let mut mac = [0xffu8; 20];
        mac[19] = 0x00; // offset 0
        let code = truncate(&mac, 8);
        assert_eq!(code, format!("{:08}", 0x7fff_ffffu32 % 100_000_000));
    }

    // ── Time-step helpers ────────────────────────────────────────

    #[test]
    fn steps_advance_on_period_boundaries() {
        assert_eq!(time_step_at(0, 30), 0);
        assert_eq!(time_step_at(29, 30), 0);
        assert_eq!(time_step_at(30, 30), 1);
        assert_eq!(time_step_at(59, 30), 1);
        assert_eq!(time_step_at(60, 30), 2);
    }

    #[test]
    fn window_is_half_open() {
        assert_eq!(window_at(59, 30), (30, 60));
        assert_eq!(window_at(60, 30), (60, 90));
    }

    #[test]
    fn window_saturates_at_end_of_time() {
        let (from, until) = window_at(u64::MAX, 30);
        assert_eq!(from, u64::MAX - u64::MAX % 30);
        assert_eq!(until, u64::MAX);
        assert_eq!(seconds_remaining_at(u64::MAX, 30), 0);
        assert_eq!(window_at(u64::MAX, u32::MAX).1, u64::MAX);
    }

    #[test]
    fn remaining_counts_down_to_one() {
        assert_eq!(seconds_remaining_at(0, 30), 30);
        assert_eq!(seconds_remaining_at(1, 30), 29);
        assert_eq!(seconds_remaining_at(29, 30), 1);
        assert_eq!(seconds_remaining_at(30, 30), 30);
    }

    // ── Secret helpers ───────────────────────────────────────────

    #[test]
    fn decode_rfc_secret() {
        let key = decode_secret("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        assert_eq!(key, RFC_SHA1_KEY);
    }

    #[test]
    fn decode_ignores_case() {
        let upper = decode_secret("JBSWY3DPEHPK3PXP").unwrap();
        let lower = decode_secret("jbswy3dpehpk3pxp").unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn decode_with_and_without_padding() {
        let padded = decode_secret(
            "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNA=",
        )
        .unwrap();
        assert_eq!(padded, RFC_SHA512_KEY);
        let unpadded = decode_secret("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZA").unwrap();
        assert_eq!(unpadded, RFC_SHA256_KEY);
    }

    #[test]
    fn decode_rejects_non_alphabet() {
        for bad in ["JBSWY3DPEHPK3PX0", "JBSWY3DPEHPK3PX1", "JBSWY3DPEHPK3PX8", "JBSWY3DPEHPK3PX9"] {
            let err = decode_secret(bad).unwrap_err();
            assert_eq!(err.kind, OtpErrorKind::InvalidSecret);
        }
        assert!(decode_secret("JBSW Y3DP").is_err());
        assert!(decode_secret("JBSW=Y3DP").is_err());
        assert!(decode_secret("JBSWY3DPÉ").is_err());
    }

    #[test]
    fn decode_rejects_empty_and_truncated() {
        assert!(decode_secret("").is_err());
        assert!(decode_secret("====").is_err());
        assert!(decode_secret("A").is_err());
        assert!(decode_secret("ABC").is_err());
        assert!(decode_secret("ABCDEF").is_err());
    }

    #[test]
    fn encoded_secret_decodes_back() {
        let original = b"hello world secret";
        assert_eq!(decode_secret(&encode_secret(original)).unwrap(), original);
    }

    #[test]
    fn generated_secrets_are_random() {
        let s = generate_secret(20);
        assert_eq!(s.len(), 20);
        assert_ne!(s, generate_secret(20));
    }

    #[test]
    fn validity_check_matches_decoder() {
        assert!(is_valid_base32("JBSWY3DPEHPK3PXP"));
        assert!(!is_valid_base32(""));
        assert!(!is_valid_base32("!!!"));
    }

    // ── Display formatting ───────────────────────────────────────

    #[test]
    fn display_splits_in_halves() {
        assert_eq!(format_code_display("123456"), "123 456");
        assert_eq!(format_code_display("1234567"), "123 4567");
        assert_eq!(format_code_display("12345678"), "1234 5678");
        assert_eq!(format_code_display("1234"), "1234");
    }

    #[test]
    fn display_splits_on_char_boundaries() {
        assert_eq!(format_code_display("火火火火火火"), "火火火 火火火");
        assert_eq!(format_code_display("1é2345"), "1é2 345");
        assert_eq!(format_code_display("火火火火"), "火火火火");
        assert_eq!(format_code_display(""), "");
    }

    #[test]
    fn constant_time_compare() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
