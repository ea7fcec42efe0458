//! Internal helper functions.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Undo the C-style escaping the keyring tool applies to listing fields.
///
/// Colons and other special bytes inside a field are written as `\xNN`.
pub(crate) fn unescape_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1] == b'x'
            && bytes[i + 2].is_ascii_hexdigit()
            && bytes[i + 3].is_ascii_hexdigit()
        {
            if let Ok(byte) = u8::from_str_radix(&field[i + 2..i + 4], 16) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a listing timestamp.
///
/// Seconds since the epoch are the norm; ISO 8601 basic format
/// (`20240131T120000`) is emitted by some configurations.
pub(crate) fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }
    if let Ok(seconds) = field.parse::<i64>() {
        return Utc.timestamp_opt(seconds, 0).single();
    }
    NaiveDateTime::parse_from_str(field, "%Y%m%dT%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Normalize a fingerprint or key ID for comparison (uppercase, no spaces).
pub(crate) fn normalize_hex(id: &str) -> String {
    id.replace(' ', "").to_uppercase()
}

/// Trim trailing whitespace, including the blank line the remote appends.
pub(crate) fn trim_armor(armor: &str) -> &str {
    armor.trim_end()
}
