//! Clipboard HTML envelope.
//!
//! Native HTML clipboard data is a small header followed by a document that
//! embeds the copied fragment between two marker comments. The header fields
//! are byte offsets into the whole envelope, zero padded to eight digits so
//! the header length does not depend on the values it contains.

const VERSION_LINE: &str = "Version:1.0\r\n";
const DOCUMENT_PREFIX: &str = "<!DOCTYPE><HTML><HEAD></HEAD><BODY><!--StartFragment -->";
const DOCUMENT_SUFFIX: &str = "<!--EndFragment --></BODY></HTML>";

const START_HTML: &str = "StartHTML:";
const END_HTML: &str = "EndHTML:";
const START_FRAGMENT: &str = "StartFragment:";
const END_FRAGMENT: &str = "EndFragment:";

fn header(start_html: usize, end_html: usize, start_fragment: usize, end_fragment: usize) -> String {
    format!(
        "{VERSION_LINE}{START_HTML}{start_html:08}\r\n{END_HTML}{end_html:08}\r\n\
         {START_FRAGMENT}{start_fragment:08}\r\n{END_FRAGMENT}{end_fragment:08}\r\n"
    )
}

/// Wrap an HTML fragment in the clipboard envelope.
pub fn wrap_fragment(fragment: &str) -> String {
    let header_len = header(0, 0, 0, 0).len();
    let start_html = header_len;
    let start_fragment = start_html + DOCUMENT_PREFIX.len();
    let end_fragment = start_fragment + fragment.len();
    let end_html = end_fragment + DOCUMENT_SUFFIX.len();

    let mut out = header(start_html, end_html, start_fragment, end_fragment);
    out.reserve(end_html - header_len);
    out.push_str(DOCUMENT_PREFIX);
    out.push_str(fragment);
    out.push_str(DOCUMENT_SUFFIX);
    out
}

fn offset_field(envelope: &str, key: &str) -> Option<usize> {
    envelope
        .lines()
        .take_while(|line| !line.starts_with('<'))
        .find_map(|line| line.strip_prefix(key))
        .and_then(|value| value.trim().parse().ok())
}

/// Recover the fragment from an envelope produced by any conforming writer.
///
/// Input without a usable header is returned unchanged.
pub fn extract_fragment(envelope: &str) -> &str {
    let range = offset_field(envelope, START_FRAGMENT)
        .zip(offset_field(envelope, END_FRAGMENT))
        .filter(|(start, end)| start <= end && *end <= envelope.len());

    match range {
        Some((start, end)) => envelope.get(start..end).unwrap_or(envelope),
        None => envelope,
    }
}
