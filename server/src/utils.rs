use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static MAC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid MAC pattern"));

static GUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$")
        .expect("valid GUID pattern")
});

// Login tokens arrive unpadded and sometimes with junk after the payload
const LENIENT_BASE64: GeneralPurpose =
    GeneralPurpose::new(&alphabet::STANDARD, NO_PAD.with_decode_allow_trailing_bits(true));

// Get current unix time in seconds
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

/// Value of `key=` in an `a=1&b=2` parameter string, `""` if absent.
///
/// `password` is always last in login tokens and may itself contain `&`, so it
/// takes the rest of the string.
pub fn param_get_value<'a>(key: &str, data: &'a str) -> &'a str {
    let pattern = format!("{}=", key);
    let Some(start) = data.find(&pattern) else {
        return "";
    };
    let rest = &data[start + pattern.len()..];

    if key == "password" {
        return rest;
    }
    match rest.find('&') {
        Some(end) => &rest[..end],
        None => rest,
    }
}

/// Decodes standard base64, stopping at the first character outside the alphabet
pub fn decode_base64_lenient(encoded: &str) -> String {
    let valid = encoded
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '/'))
        .unwrap_or(encoded.len());
    let mut payload = &encoded[..valid];

    // A lone trailing sextet carries no complete byte
    if payload.len() % 4 == 1 {
        payload = &payload[..payload.len() - 1];
    }

    match LENIENT_BASE64.decode(payload) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

pub fn is_valid_mac(mac: &str) -> bool {
    MAC_PATTERN.is_match(mac)
}

/// 8-4-4-4-12 hex GUID without any run of five identical characters
pub fn is_valid_guid(guid: &str) -> bool {
    if !GUID_PATTERN.is_match(guid) {
        return false;
    }

    let bytes = guid.as_bytes();
    let mut run = 1;
    for i in 1..bytes.len() {
        if bytes[i] == bytes[i - 1] {
            run += 1;
            if run >= 5 {
                return false;
            }
        } else {
            run = 1;
        }
    }
    true
}

/// 1234567 -> "1,234,567"
pub fn format_number(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
