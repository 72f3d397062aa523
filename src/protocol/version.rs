//! Protocol version detection from the version-check exchange.

use crate::core::packet::HEADER_SIZE;
use crate::core::stream::Reader;
use crate::error::Result;

/// Client version-check request; always passed through untouched
pub const VERSION_CHECK_REQUEST: u16 = 1;

/// Server version-check response carrying the version string
pub const VERSION_CHECK_RESPONSE: u16 = 2;

/// Payload offset of the UTF-16 version string in [`VERSION_CHECK_RESPONSE`]
pub const VERSION_STRING_OFFSET: usize = 14;

/// Extract the decimal number from the first `(CL:<digits>)` in `text`
pub fn extract_version(text: &str) -> Option<u32> {
    const OPEN: &str = "(CL:";
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let tail = &rest[start + OPEN.len()..];
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && tail[digits..].starts_with(')') {
            return tail[..digits].parse().ok();
        }
        rest = tail;
    }
    None
}

/// Read the version string of a plaintext version-check response frame.
/// `Ok(None)` when the string carries no version marker.
pub fn detect_version(frame: &[u8]) -> Result<Option<u32>> {
    let mut reader = Reader::at(frame, HEADER_SIZE + VERSION_STRING_OFFSET);
    let text = reader.string()?;
    Ok(extract_version(&text))
}
