//! Credential payload builders for the four supported formats. The byte
//! layout of each payload is load-bearing: gate scanners look tickets up by
//! the exact stored string, so construction is canonical and deterministic.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// QR payload: canonical JSON carrying a SHA-256 validation key computed
/// over the same JSON without the `validationKey` field.
pub fn qr_payload(
    ticket_number: &str,
    event_id: Uuid,
    user_id: Uuid,
    timestamp_ms: i64,
    nonce: &str,
) -> String {
    let unsigned = format!(
        r#"{{"ticketNumber":"{ticket_number}","eventId":"{event_id}","userId":"{user_id}","timestamp":{timestamp_ms},"nonce":"{nonce}","format":"qr_code"}}"#
    );
    let validation_key = sha256_hex(unsigned.as_bytes());
    format!(
        r#"{{"ticketNumber":"{ticket_number}","eventId":"{event_id}","userId":"{user_id}","timestamp":{timestamp_ms},"nonce":"{nonce}","format":"qr_code","validationKey":"{validation_key}"}}"#
    )
}

/// Recomputes the validation key of a presented QR payload.
pub fn qr_payload_is_intact(payload: &str) -> bool {
    let parsed: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let (tn, eid, uid, ts, nonce, key) = match (
        parsed["ticketNumber"].as_str(),
        parsed["eventId"].as_str(),
        parsed["userId"].as_str(),
        parsed["timestamp"].as_i64(),
        parsed["nonce"].as_str(),
        parsed["validationKey"].as_str(),
    ) {
        (Some(tn), Some(eid), Some(uid), Some(ts), Some(nonce), Some(key)) => {
            (tn, eid, uid, ts, nonce, key)
        }
        _ => return false,
    };
    let unsigned = format!(
        r#"{{"ticketNumber":"{tn}","eventId":"{eid}","userId":"{uid}","timestamp":{ts},"nonce":"{nonce}","format":"qr_code"}}"#
    );
    sha256_hex(unsigned.as_bytes()) == key
}

/// NFC payload: base64 of a compact JSON with 8-char id prefixes and an
/// MD5-derived signature, sized for NDEF records.
pub fn nfc_payload(
    ticket_number: &str,
    event_id: Uuid,
    user_id: Uuid,
    timestamp_secs: i64,
) -> String {
    let event = event_id.to_string();
    let user = user_id.to_string();
    let sig_full = format!("{:x}", md5::compute(format!("{ticket_number}{event}{user}")));
    let json = format!(
        r#"{{"tn":"{ticket_number}","eid":"{}","uid":"{}","ts":{timestamp_secs},"sig":"{}"}}"#,
        &event[..8],
        &user[..8],
        &sig_full[..8],
    );
    BASE64.encode(json)
}

/// RFID payload: hex of a JSON envelope with a CRC32 checksum over the
/// concatenated fields.
pub fn rfid_payload(
    ticket_number: &str,
    event_id: Uuid,
    user_id: Uuid,
    issued_ms: i64,
) -> String {
    let event = event_id.to_string();
    let user = user_id.to_string();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(format!("{ticket_number}{event}{user}{issued_ms}").as_bytes());
    let checksum = format!("{:08x}", hasher.finalize());
    let json = format!(
        r#"{{"ticket":"{ticket_number}","event":"{event}","user":"{user}","issued":{issued_ms},"checksum":"{checksum}"}}"#
    );
    hex::encode(json)
}

/// Barcode payload: the digits of the ticket number followed by the last
/// six digits of the issue timestamp.
pub fn barcode_payload(ticket_number: &str, now_ms: i64) -> String {
    let digits: String = ticket_number.chars().filter(|c| c.is_ascii_digit()).collect();
    let millis = now_ms.to_string();
    let tail = if millis.len() > 6 {
        &millis[millis.len() - 6..]
    } else {
        &millis
    };
    format!("{digits}{tail}")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid) {
        (
            Uuid::parse_str("0191b9a2-55aa-7e30-9d25-6a2d2cbb8f10").unwrap(),
            Uuid::parse_str("7f9c24e5-3011-45e9-95c0-a2a38cfa11bd").unwrap(),
        )
    }

    #[test]
    fn test_qr_payload_is_canonical_json() {
        let (eid, uid) = ids();
        let payload = qr_payload("TKT-1712345678901-a3f2c1", eid, uid, 1712345678901, "deadbeefdeadbeef");
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["ticketNumber"], "TKT-1712345678901-a3f2c1");
        assert_eq!(parsed["format"], "qr_code");
        assert_eq!(parsed["timestamp"], 1712345678901i64);
        assert_eq!(parsed["validationKey"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_qr_validation_key_detects_tampering() {
        let (eid, uid) = ids();
        let payload = qr_payload("TKT-1-aaaaaa", eid, uid, 1, "deadbeefdeadbeef");
        assert!(qr_payload_is_intact(&payload));

        let forged = payload.replace("TKT-1-aaaaaa", "TKT-1-bbbbbb");
        assert!(!qr_payload_is_intact(&forged));
    }

    #[test]
    fn test_qr_payload_is_deterministic() {
        let (eid, uid) = ids();
        let a = qr_payload("TKT-1-aaaaaa", eid, uid, 42, "deadbeefdeadbeef");
        let b = qr_payload("TKT-1-aaaaaa", eid, uid, 42, "deadbeefdeadbeef");
        assert_eq!(a, b);
    }

    #[test]
    fn test_nfc_payload_truncates_ids() {
        let (eid, uid) = ids();
        let payload = nfc_payload("TKT-1-aaaaaa", eid, uid, 1712345678);
        let decoded = String::from_utf8(BASE64.decode(payload).unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(parsed["eid"], "0191b9a2");
        assert_eq!(parsed["uid"], "7f9c24e5");
        assert_eq!(parsed["ts"], 1712345678i64);
        assert_eq!(parsed["sig"].as_str().unwrap().len(), 8);
    }

    #[test]
    fn test_rfid_payload_round_trips_through_hex() {
        let (eid, uid) = ids();
        let payload = rfid_payload("TKT-1-aaaaaa", eid, uid, 1712345678901);
        let decoded = String::from_utf8(hex::decode(payload).unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(parsed["ticket"], "TKT-1-aaaaaa");
        assert_eq!(parsed["issued"], 1712345678901i64);
        assert_eq!(parsed["checksum"].as_str().unwrap().len(), 8);
    }

    #[test]
    fn test_rfid_checksum_matches_crc32_of_fields() {
        let (eid, uid) = ids();
        let payload = rfid_payload("TKT-1-aaaaaa", eid, uid, 99);
        let decoded = String::from_utf8(hex::decode(payload).unwrap()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&decoded).unwrap();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(format!("TKT-1-aaaaaa{}{}{}", eid, uid, 99).as_bytes());
        assert_eq!(
            parsed["checksum"].as_str().unwrap(),
            format!("{:08x}", hasher.finalize())
        );
    }

    #[test]
    fn test_barcode_is_digits_plus_timestamp_tail() {
        let code = barcode_payload("TKT-1712345678901-a3f2c1", 1712349990123);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        // digits of the ticket number, then the last six of the timestamp
        assert!(code.starts_with("1712345678901321"));
        assert!(code.ends_with("990123"));
    }
}
