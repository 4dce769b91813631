//! Detection and repair of translations that were stored still
//! percent-encoded.

use std::borrow::Cow;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Repair<'a> {
    /// No encoding artifacts present.
    Clean,
    /// Artifacts decoded successfully.
    Decoded(Cow<'a, str>),
    /// Artifacts present but the bytes do not decode to valid UTF-8.
    Corrupt,
}

/// True if `text` contains at least one `%XX` escape.
pub(crate) fn has_encoding_artifacts(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes
        .windows(3)
        .any(|w| w[0] == b'%' && w[1].is_ascii_hexdigit() && w[2].is_ascii_hexdigit())
}

pub(crate) fn repair(text: &str) -> Repair<'_> {
    if !has_encoding_artifacts(text) {
        return Repair::Clean;
    }
    match urlencoding::decode(text) {
        Ok(decoded) => Repair::Decoded(decoded),
        Err(_) => Repair::Corrupt,
    }
}
