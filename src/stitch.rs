use regex::bytes::Regex;

use crate::error::HarvestError;

pub const PUBMED_COLLECTION: &str = "PubmedArticleSet";
pub const BREAK_MARKER: &str = "<!-- breakset -->";

/// Splices per-batch response bodies into one collection per chunk.
///
/// Every payload has its closing collection tag replaced by [`BREAK_MARKER`];
/// all but the first payload of a chunk also lose the envelope (XML
/// declaration, DOCTYPE, collection open tag). The real closing tag is
/// written once, when the chunk is sealed.
#[derive(Debug, Clone)]
pub struct DocumentStitcher {
    collection: String,
    open_tag: Regex,
    close_tag: Regex,
}

impl DocumentStitcher {
    pub fn new(collection: &str) -> Result<Self, HarvestError> {
        let name = regex::escape(collection);
        let open_tag = Regex::new(&format!(r"<{name}(?:\s[^>]*)?/?>"))
            .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?;
        let close_tag = Regex::new(&format!(r"</{name}\s*>"))
            .map_err(|err| HarvestError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            collection: collection.to_string(),
            open_tag,
            close_tag,
        })
    }

    pub fn pubmed() -> Result<Self, HarvestError> {
        Self::new(PUBMED_COLLECTION)
    }

    pub fn stitch(&self, raw: &[u8], first_in_chunk: bool) -> Result<Vec<u8>, HarvestError> {
        let open = self.open_tag.find(raw).ok_or_else(|| {
            HarvestError::MalformedResponse(format!(
                "response has no <{}> element",
                self.collection
            ))
        })?;
        let self_closing = open.as_bytes().ends_with(b"/>");

        let mut out = Vec::with_capacity(raw.len());
        if first_in_chunk {
            out.extend_from_slice(&raw[..open.start()]);
            if self_closing {
                out.extend_from_slice(format!("<{}>", self.collection).as_bytes());
            } else {
                out.extend_from_slice(open.as_bytes());
            }
        }
        let body = strip_leading_newline(&raw[open.end()..]);
        if first_in_chunk {
            out.push(b'\n');
        }
        out.extend_from_slice(&self.close_tag.replace_all(body, BREAK_MARKER.as_bytes()));
        if !out.ends_with(b"\n") {
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Bytes appended exactly once when a chunk is sealed.
    pub fn closing_tag(&self) -> Vec<u8> {
        format!("</{}>\n", self.collection).into_bytes()
    }
}

fn strip_leading_newline(body: &[u8]) -> &[u8] {
    body.strip_prefix(b"\r\n")
        .or_else(|| body.strip_prefix(b"\n"))
        .unwrap_or(body)
}
