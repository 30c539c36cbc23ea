use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DicomError, Result};

/// A DICOM data element tag: `(group << 16) | element`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub u32);

impl Tag {
    pub const fn new(group: u16, element: u16) -> Self {
        Tag(((group as u32) << 16) | element as u32)
    }

    pub const fn group(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn element(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Group length elements carry the element number 0x0000.
    pub const fn is_group_length(self) -> bool {
        self.element() == 0x0000
    }

    pub const fn is_file_meta(self) -> bool {
        self.group() == 0x0002
    }

    /// Private groups are odd-numbered.
    pub const fn is_private(self) -> bool {
        self.group() % 2 == 1
    }

    /// Parse `gggg,eeee`, with or without surrounding parentheses.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (g, e) = trimmed
            .split_once(',')
            .ok_or_else(|| DicomError::InvalidTag(s.to_string()))?;
        let group = u16::from_str_radix(g.trim(), 16)
            .map_err(|_| DicomError::InvalidTag(s.to_string()))?;
        let element = u16::from_str_radix(e.trim(), 16)
            .map_err(|_| DicomError::InvalidTag(s.to_string()))?;
        Ok(Tag::new(group, element))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04x},{:04x})", self.group(), self.element())
    }
}
