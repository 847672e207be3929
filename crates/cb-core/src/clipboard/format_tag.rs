use serde::{Deserialize, Serialize};

use crate::ids::impl_string_id;

/// Canonical, protocol-level name of a clipboard format.
///
/// The well-known tags are `text`, `html` and `bitmap`. Any other value is a
/// passthrough native identifier and travels through the system untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatTag(String);

impl_string_id!(FormatTag);

impl FormatTag {
    pub const TEXT: &'static str = "text";
    pub const HTML: &'static str = "html";
    pub const BITMAP: &'static str = "bitmap";

    pub fn text() -> Self {
        Self::new(Self::TEXT)
    }

    pub fn html() -> Self {
        Self::new(Self::HTML)
    }

    pub fn bitmap() -> Self {
        Self::new(Self::BITMAP)
    }

    /// Whether this tag is one of the canonical tags known to the registry.
    pub fn is_well_known(&self) -> bool {
        matches!(self.as_str(), Self::TEXT | Self::HTML | Self::BITMAP)
    }
}

impl Default for FormatTag {
    fn default() -> Self {
        Self::text()
    }
}
