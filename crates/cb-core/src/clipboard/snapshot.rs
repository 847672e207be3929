use std::collections::HashSet;

use thiserror::Error;

use super::{ClipboardData, ClipboardItem, FormatTag};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("duplicate format in snapshot: {0}")]
    DuplicateFormat(FormatTag),
}

/// One atomic clipboard write: an ordered set of items with unique formats.
///
/// Item order decides which format is registered with the clipboard first;
/// it does not imply a read priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    items: Vec<ClipboardItem>,
}

impl ClipboardSnapshot {
    pub fn new(items: Vec<ClipboardItem>) -> Result<Self, SnapshotError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.format.clone()) {
                return Err(SnapshotError::DuplicateFormat(item.format.clone()));
            }
        }
        Ok(Self { items })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            items: vec![ClipboardItem::text(text)],
        }
    }

    pub fn from_wire(data: Vec<ClipboardData>) -> Result<Self, SnapshotError> {
        Self::new(data.into_iter().map(ClipboardItem::from).collect())
    }

    /// Interpret raw user input as a snapshot.
    ///
    /// A JSON array of `{format, data}` objects, or a single such object, is
    /// decoded as-is. Anything else (including JSON that does not decode into
    /// a valid snapshot) becomes a single `text` item holding the raw input.
    pub fn parse_input(input: &str) -> Self {
        let decoded = match input.trim_start().as_bytes().first() {
            Some(b'[') => serde_json::from_str::<Vec<ClipboardData>>(input).ok(),
            Some(b'{') => serde_json::from_str::<ClipboardData>(input)
                .ok()
                .map(|data| vec![data]),
            _ => None,
        };

        decoded
            .and_then(|data| Self::from_wire(data).ok())
            .unwrap_or_else(|| Self::from_text(input))
    }

    pub fn items(&self) -> &[ClipboardItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ClipboardItem> {
        self.items
    }

    pub fn get(&self, format: &FormatTag) -> Option<&ClipboardItem> {
        self.items.iter().find(|item| &item.format == format)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_deferred(&self) -> bool {
        self.items.iter().any(ClipboardItem::is_deferred)
    }

    pub fn total_size_bytes(&self) -> usize {
        self.items.iter().map(ClipboardItem::size_bytes).sum()
    }

    pub fn to_wire(&self) -> Vec<ClipboardData> {
        self.items.iter().map(ClipboardData::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_formats() {
        let err = ClipboardSnapshot::new(vec![
            ClipboardItem::text("a"),
            ClipboardItem::text("b"),
        ])
        .expect_err("duplicate");
        assert_eq!(err, SnapshotError::DuplicateFormat(FormatTag::text()));
    }

    #[test]
    fn parse_input_decodes_json_array() {
        let snapshot = ClipboardSnapshot::parse_input(
            r#"[{"cf":"text", "data":"Test"}, {"cf":"html", "data":"<b>Test</b>"}]"#,
        );
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(&FormatTag::html()).and_then(|i| i.payload.clone()),
            Some(b"<b>Test</b>".to_vec())
        );
    }

    #[test]
    fn parse_input_decodes_single_object() {
        let snapshot = ClipboardSnapshot::parse_input(r#"{"format":"bitmap","data":null}"#);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.has_deferred());
    }

    #[test]
    fn parse_input_falls_back_to_text() {
        for raw in ["Test", "[not json", "{\"format\": 3}", ""] {
            let snapshot = ClipboardSnapshot::parse_input(raw);
            assert_eq!(snapshot, ClipboardSnapshot::from_text(raw), "input {raw:?}");
        }
    }

    #[test]
    fn parse_input_treats_duplicates_as_malformed() {
        let raw = r#"[{"format":"text","data":"a"},{"format":"text","data":"b"}]"#;
        let snapshot = ClipboardSnapshot::parse_input(raw);
        assert_eq!(snapshot, ClipboardSnapshot::from_text(raw));
    }
}
