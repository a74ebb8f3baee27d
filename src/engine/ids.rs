//! Generation of the human-readable identifiers the engine hands out:
//! ticket numbers, payment references, transfer codes and credential nonces.
//! Collisions are handled by the unique indexes on the owning tables; callers
//! retry generation on a unique-violation.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

/// `TKT-<millis>-<6 hex chars>`.
pub fn ticket_number() -> String {
    format!("TKT-{}-{}", Utc::now().timestamp_millis(), random_hex(3))
}

/// `PAY-<millis>-<6 hex chars>`, the human-readable payment reference.
pub fn payment_reference() -> String {
    format!("PAY-{}-{}", Utc::now().timestamp_millis(), random_hex(3))
}

/// Random 16-character alphanumeric transfer code.
pub fn transfer_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// 16 hex characters of entropy for credential nonces.
pub fn credential_nonce() -> String {
    random_hex(8)
}

/// 32-byte hex token for streaming-event access.
pub fn stream_access_token() -> String {
    random_hex(32)
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_number_shape() {
        let n = ticket_number();
        let parts: Vec<&str> = n.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "TKT");
        assert!(parts[1].parse::<i64>().is_ok(), "millis segment: {}", n);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_payment_reference_shape() {
        let r = payment_reference();
        assert!(r.starts_with("PAY-"));
        assert_eq!(r.split('-').count(), 3);
    }

    #[test]
    fn test_transfer_code_length_and_charset() {
        let code = transfer_code();
        assert_eq!(code.len(), 16);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_stream_token_is_32_bytes_hex() {
        let t = stream_access_token();
        assert_eq!(t.len(), 64);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_nonce_is_16_hex_chars() {
        assert_eq!(credential_nonce().len(), 16);
    }
}
