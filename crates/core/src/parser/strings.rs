//! Literal and hex string payloads.
//!
//! Both string forms keep the source bytes next to the decoded value so a
//! writer can reproduce the original spelling.

/// A `( ... )` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralString {
    /// Unescaped bytes.
    pub value: Vec<u8>,
    /// Bytes between the outer parentheses, escapes untouched.
    pub raw: Vec<u8>,
}

/// A `< ... >` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexString {
    /// The hex digits as written, whitespace removed.
    pub text: String,
    /// Decoded bytes. An odd trailing digit is read as if followed by `0`.
    pub hex: Vec<u8>,
    /// Bytes between the angle brackets, whitespace included.
    pub raw: Vec<u8>,
}

/// Escape bytes for use inside a literal string.
///
/// Only the escape classes `\n \r \t \b \f \( \) \\` are produced; all
/// other bytes are copied through.
pub fn escape_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for &b in data {
        match b {
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0c => out.extend_from_slice(b"\\f"),
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            _ => out.push(b),
        }
    }
    out
}

/// Resolve escape sequences in the body of a literal string.
///
/// Besides the single-character escapes this handles `\ddd` octal codes
/// (one to three digits, high bits dropped) and backslash-newline line
/// continuations. Unknown escapes keep the escaped byte.
pub fn unescape_literal(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        i += 1;
        if b != b'\\' {
            result.push(b);
            continue;
        }
        let Some(&c) = raw.get(i) else {
            // Dangling backslash at the very end.
            break;
        };
        i += 1;
        match c {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(0x08),
            b'f' => result.push(0x0c),
            b'(' | b')' | b'\\' => result.push(c),
            b'\r' => {
                // Line continuation - skip \r and optional \n
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            }
            b'\n' => {}
            b'0'..=b'7' => {
                let mut octal = u32::from(c - b'0');
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(&d @ b'0'..=b'7') => {
                            octal = octal * 8 + u32::from(d - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                result.push((octal & 0xFF) as u8);
            }
            _ => result.push(c),
        }
    }
    result
}

/// Serialize bytes as a complete literal string, parentheses included.
pub fn serialize_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(b'(');
    out.extend_from_slice(&escape_literal(data));
    out.push(b')');
    out
}

/// Serialize bytes as a complete hex string, angle brackets included.
pub fn serialize_hex(data: &[u8]) -> Vec<u8> {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = Vec::with_capacity(data.len() * 2 + 2);
    out.push(b'<');
    for &b in data {
        out.push(DIGITS[(b >> 4) as usize]);
        out.push(DIGITS[(b & 0x0F) as usize]);
    }
    out.push(b'>');
    out
}

pub(crate) const fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode a run of hex digits (no whitespace) into bytes.
pub(crate) fn decode_hex_digits(digits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(digits.len().div_ceil(2));
    for pair in digits.chunks(2) {
        let high = hex_value(pair[0]).unwrap_or(0);
        let low = pair.get(1).and_then(|&c| hex_value(c)).unwrap_or(0);
        out.push((high << 4) | low);
    }
    out
}
