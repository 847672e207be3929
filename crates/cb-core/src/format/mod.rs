//! Format registry.
//!
//! Maps canonical [`FormatTag`]s onto the identifiers the native clipboard
//! understands and back, and applies the envelope transforms some native
//! formats require. Everything here is pure: no I/O, no shared state.
//!
//! Unknown tags are passed through unchanged in both directions so newer
//! peers can exchange formats this registry has never heard of.
mod html;

use serde::{Deserialize, Serialize};

use crate::clipboard::{ClipboardItem, FormatTag};
use crate::ids::impl_string_id;

pub use html::{extract_fragment, wrap_fragment};

pub const NATIVE_TEXT: &str = "Text";
pub const NATIVE_HTML: &str = "HTML Format";
pub const NATIVE_BITMAP: &str = "Bitmap";

/// Identifier of a format as registered with the native clipboard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeFormatId(String);

impl_string_id!(NativeFormatId);

/// A clipboard item after normalization, ready for the native clipboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeItem {
    pub format: NativeFormatId,
    pub payload: Option<Vec<u8>>,
}

pub fn to_native(tag: &FormatTag) -> NativeFormatId {
    match tag.as_str() {
        FormatTag::TEXT => NativeFormatId::from(NATIVE_TEXT),
        FormatTag::HTML => NativeFormatId::from(NATIVE_HTML),
        FormatTag::BITMAP => NativeFormatId::from(NATIVE_BITMAP),
        other => NativeFormatId::from(other),
    }
}

pub fn to_canonical(native: &NativeFormatId) -> FormatTag {
    match native.as_str() {
        NATIVE_TEXT => FormatTag::text(),
        NATIVE_HTML => FormatTag::html(),
        NATIVE_BITMAP => FormatTag::bitmap(),
        other => FormatTag::from(other),
    }
}

/// Convert a canonical item into its native form.
///
/// `html` payloads are wrapped in the clipboard HTML envelope. Absent
/// payloads stay absent; they are normalized once the owner supplies them.
pub fn normalize(item: ClipboardItem) -> NativeItem {
    let format = to_native(&item.format);
    let payload = match (item.format.as_str(), item.payload) {
        (FormatTag::HTML, Some(bytes)) => {
            Some(wrap_fragment(&String::from_utf8_lossy(&bytes)).into_bytes())
        }
        (_, payload) => payload,
    };
    NativeItem { format, payload }
}
