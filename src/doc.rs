// src/doc.rs - Plot documents and their embedded metadata
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocError {
    #[error("document is empty")]
    Empty,
    #[error("document is not an SVG")]
    NotSvg,
    #[error("malformed tg:{name} attribute: {value}")]
    BadAttr { name: &'static str, value: String },
}

/// Metadata embedded in a plot document as `tg:` namespaced attributes.
///
/// Documents are produced by the drawing tool with these attributes already
/// present; the spooler only reads them. Missing attributes fall back to
/// defaults so hand-made documents still queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocMeta {
    pub version: u32,
    pub line_count: u32,
    pub layer_count: u32,
    pub oob_count: u32,
    pub short_count: u32,
    /// Total travel distance in mm.
    pub travel: f64,
    /// Pen-down travel distance in mm.
    pub travel_ink: f64,
    /// Pen-up travel distance in mm.
    pub travel_blank: f64,
    pub format: Option<String>,
    pub width_mm: Option<f64>,
    pub height_mm: Option<f64>,
    pub speed: Option<u32>,
    pub author: String,
    pub timestamp: String,
}

impl DocMeta {
    /// Extract the `tg:` attributes from a document body.
    pub fn extract(payload: &str) -> Result<Self, DocError> {
        Ok(Self {
            version: num_attr(payload, "version")?.unwrap_or(0),
            line_count: num_attr(payload, "count")?.unwrap_or(0),
            layer_count: num_attr(payload, "layer_count")?.unwrap_or(1),
            oob_count: num_attr(payload, "oob_count")?.unwrap_or(0),
            short_count: num_attr(payload, "short_count")?.unwrap_or(0),
            travel: num_attr(payload, "travel")?.unwrap_or(0.0),
            travel_ink: num_attr(payload, "travel_ink")?.unwrap_or(0.0),
            travel_blank: num_attr(payload, "travel_blank")?.unwrap_or(0.0),
            format: attr(payload, "format").map(str::to_string),
            width_mm: num_attr(payload, "width_mm")?,
            height_mm: num_attr(payload, "height_mm")?,
            speed: num_attr(payload, "speed")?,
            author: attr(payload, "author").unwrap_or_default().to_string(),
            timestamp: attr(payload, "timestamp").unwrap_or_default().to_string(),
        })
    }
}

/// An immutable plot document: the raw SVG payload, its content hash and the
/// metadata parsed out of it. The hash identifies the content in logs and
/// filenames; it is not used for equality.
#[derive(Debug, Clone)]
pub struct PlotDoc {
    payload: String,
    hash: String,
    meta: DocMeta,
}

impl PlotDoc {
    pub fn parse(payload: String) -> Result<Self, DocError> {
        if payload.trim().is_empty() {
            return Err(DocError::Empty);
        }
        if !payload.contains("<svg") {
            return Err(DocError::NotSvg);
        }
        let meta = DocMeta::extract(&payload)?;
        let hash = content_hash(&payload);
        Ok(Self { payload, hash, meta })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Full hex SHA-256 of the payload.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Truncated hash used for display and filenames.
    pub fn short_hash(&self) -> &str {
        &self.hash[..8]
    }

    pub fn meta(&self) -> &DocMeta {
        &self.meta
    }
}

fn content_hash(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Find the value of a `tg:name="..."` attribute.
fn attr<'a>(payload: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("tg:{name}=\"");
    let start = payload.find(&needle)? + needle.len();
    let rest = &payload[start..];
    Some(&rest[..rest.find('"')?])
}

fn num_attr<T: std::str::FromStr>(
    payload: &str,
    name: &'static str,
) -> Result<Option<T>, DocError> {
    match attr(payload, name) {
        None => Ok(None),
        Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| DocError::BadAttr {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!-- Created with tg-plot (v4) at 20241010_210611.777_UTC+1 -->
<svg xmlns="http://www.w3.org/2000/svg"
     xmlns:tg="https://sketch.process.studio/turtle-graphics"
     tg:version="4" tg:count="8" tg:layer_count="1" tg:oob_count="0" tg:short_count="0" tg:travel="1762" tg:travel_ink="1236" tg:travel_blank="525" tg:format="A4 Landscape" tg:width_mm="297" tg:height_mm="210" tg:speed="100" tg:author="test-client" tg:timestamp="20241010_210611.777_UTC+1"
     width="297mm" height="210mm" viewBox="-148.5 -105 297 210">
    <g id="Layer 0"><path d="M -99.75 -99.75 L 99.75 -99.75" /></g>
</svg>
"#;

    #[test]
    fn extracts_embedded_metadata() {
        let doc = PlotDoc::parse(SAMPLE.to_string()).unwrap();
        let meta = doc.meta();
        assert_eq!(meta.version, 4);
        assert_eq!(meta.line_count, 8);
        assert_eq!(meta.layer_count, 1);
        assert_eq!(meta.travel, 1762.0);
        assert_eq!(meta.travel_ink, 1236.0);
        assert_eq!(meta.format.as_deref(), Some("A4 Landscape"));
        assert_eq!(meta.width_mm, Some(297.0));
        assert_eq!(meta.height_mm, Some(210.0));
        assert_eq!(meta.speed, Some(100));
        assert_eq!(meta.author, "test-client");
    }

    #[test]
    fn travel_does_not_shadow_travel_ink() {
        // tg:travel and tg:travel_ink must resolve independently
        let doc = PlotDoc::parse(SAMPLE.to_string()).unwrap();
        assert_eq!(doc.meta().travel, 1762.0);
        assert_eq!(doc.meta().travel_blank, 525.0);
    }

    #[test]
    fn hash_is_stable_and_truncates() {
        let a = PlotDoc::parse(SAMPLE.to_string()).unwrap();
        let b = PlotDoc::parse(SAMPLE.to_string()).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
        assert_eq!(a.short_hash(), &a.hash()[..8]);
    }

    #[test]
    fn rejects_non_svg_payloads() {
        assert!(matches!(PlotDoc::parse(String::new()), Err(DocError::Empty)));
        assert!(matches!(
            PlotDoc::parse("not a document".to_string()),
            Err(DocError::NotSvg)
        ));
    }

    #[test]
    fn malformed_numeric_attribute_is_an_error() {
        let payload = SAMPLE.replace("tg:count=\"8\"", "tg:count=\"eight\"");
        assert!(matches!(
            PlotDoc::parse(payload),
            Err(DocError::BadAttr { name: "count", .. })
        ));
    }

    #[test]
    fn missing_attributes_fall_back_to_defaults() {
        let payload = "<svg width=\"10mm\"><path d=\"M 0 0\"/></svg>".to_string();
        let doc = PlotDoc::parse(payload).unwrap();
        assert_eq!(doc.meta().layer_count, 1);
        assert_eq!(doc.meta().speed, None);
        assert!(doc.meta().author.is_empty());
    }
}
