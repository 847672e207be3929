//! Clipboard item model.
//!
//! A [`ClipboardItem`] is one format of one copy operation. Its payload is
//! either present (eager transfer) or absent, which means the format is
//! advertised but its bytes must be pulled from the current owner when some
//! consumer actually asks for them.
//!
//! [`ClipboardData`] is the same thing as it travels on the wire:
//! `{"format": "...", "data": "..."}`, with `data: null` for deferred items.
use serde::{Deserialize, Serialize};

use super::FormatTag;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardItem {
    pub format: FormatTag,
    pub payload: Option<Vec<u8>>,
}

impl ClipboardItem {
    pub fn eager(format: FormatTag, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            payload: Some(payload.into()),
        }
    }

    pub fn deferred(format: FormatTag) -> Self {
        Self {
            format,
            payload: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::eager(FormatTag::text(), text.into().into_bytes())
    }

    pub fn is_deferred(&self) -> bool {
        self.payload.is_none()
    }

    pub fn size_bytes(&self) -> usize {
        self.payload.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Wire representation of a clipboard item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipboardData {
    /// Older peers send the format under the `cf` key.
    #[serde(alias = "cf")]
    pub format: FormatTag,

    #[serde(default)]
    pub data: Option<String>,
}

impl From<ClipboardData> for ClipboardItem {
    fn from(value: ClipboardData) -> Self {
        Self {
            format: value.format,
            payload: value.data.map(String::into_bytes),
        }
    }
}

impl From<&ClipboardItem> for ClipboardData {
    fn from(value: &ClipboardItem) -> Self {
        Self {
            format: value.format.clone(),
            data: value
                .payload
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}
