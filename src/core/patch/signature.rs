//! Byte signatures used to detect whether a patch is installed
//!
//! A signature reads a fixed window of the image and compares it against a
//! known pre-patch form and a known post-patch form. Post-patch forms may be
//! predicates rather than exact bytes, since an installed hook often encodes
//! a target that varies between images (a Thumb `BL` pair, for instance).

use crate::core::address::Address;
use crate::core::image::RomImage;
use crate::core::patch::{Detector, PatchStatus};
use crate::error::{RomError, Result};

/// Matches a window of bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Byte-for-byte equality
    Exact(Vec<u8>),
    /// Equality with `None` positions ignored
    Pattern(Vec<Option<u8>>),
    /// `bytes[i] & mask[i] == value[i]` for every position
    Mask { mask: Vec<u8>, value: Vec<u8> },
}

impl Matcher {
    /// Mask matcher; `mask` and `value` must be the same length
    pub fn mask(mask: Vec<u8>, value: Vec<u8>) -> Result<Self> {
        if mask.len() != value.len() {
            return Err(RomError::InvalidCatalog(format!(
                "mask is {} bytes but value is {}",
                mask.len(),
                value.len()
            )));
        }
        Ok(Matcher::Mask { mask, value })
    }

    /// Thumb `BL` instruction pair at the start of the window
    pub fn thumb_bl() -> Self {
        Matcher::Mask {
            mask: vec![0x00, 0xF8, 0x00, 0xF8],
            value: vec![0x00, 0xF0, 0x00, 0xF8],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Matcher::Exact(bytes) => bytes.len(),
            Matcher::Pattern(pattern) => pattern.len(),
            Matcher::Mask { mask, .. } => mask.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compare against the start of `bytes`
    pub fn matches(&self, bytes: &[u8]) -> bool {
        if bytes.len() < self.len() {
            return false;
        }
        match self {
            Matcher::Exact(expected) => &bytes[..expected.len()] == expected.as_slice(),
            Matcher::Pattern(pattern) => pattern
                .iter()
                .zip(bytes)
                .all(|(p, b)| p.map_or(true, |p| p == *b)),
            Matcher::Mask { mask, value } => mask
                .iter()
                .zip(value)
                .zip(bytes)
                .all(|((m, v), b)| b & m == *v),
        }
    }
}

/// Fixed-address signature for one patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub address: Address,
    pub unpatched: Matcher,
    pub patched: Matcher,
}

impl Signature {
    pub fn new(address: Address, unpatched: Matcher, patched: Matcher) -> Result<Self> {
        if unpatched.is_empty() || patched.is_empty() {
            return Err(RomError::InvalidCatalog(format!(
                "signature at {} has an empty matcher",
                address
            )));
        }
        Ok(Signature {
            address,
            unpatched,
            patched,
        })
    }

    /// Bytes read from the image
    pub fn window_len(&self) -> usize {
        self.unpatched.len().max(self.patched.len())
    }

    pub fn classify(&self, image: &RomImage) -> PatchStatus {
        let Ok(window) = image.read(self.address, self.window_len()) else {
            return PatchStatus::Indeterminate;
        };

        if self.unpatched.matches(window) {
            PatchStatus::NotApplied
        } else if self.patched.matches(window) {
            PatchStatus::Applied
        } else {
            PatchStatus::Indeterminate
        }
    }
}

impl Detector for Signature {
    fn detect(&self, image: &RomImage) -> PatchStatus {
        self.classify(image)
    }
}

/// Parse space-separated hex bytes, e.g. `"00 B5 04 1C"`
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    parse_pattern(text)?
        .into_iter()
        .map(|b| {
            b.ok_or_else(|| {
                RomError::InvalidCatalog(format!("wildcard not allowed in '{}'", text))
            })
        })
        .collect()
}

/// Parse hex bytes where `??` (or `?`) matches anything
pub fn parse_pattern(text: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in text.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        let value = u8::from_str_radix(token, 16).map_err(|e| {
            RomError::InvalidCatalog(format!("invalid byte token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(RomError::InvalidCatalog("byte pattern is empty".to_string()));
    }

    Ok(bytes)
}

/// Inverse of [`parse_pattern`]
pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
