//! Core data models used throughout QA Harness.
//!
//! These types represent the documents, chunks, retrieved context, test
//! cases and scripts that flow through the build and generation pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QaError;

/// Literal value a model must use for any field it cannot derive from context.
pub const UNKNOWN: &str = "UNKNOWN";

/// Declared format of an uploaded source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    Text,
    Markdown,
    Json,
    Html,
    Pdf,
}

impl FormatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Text => "text",
            FormatKind::Markdown => "markdown",
            FormatKind::Json => "json",
            FormatKind::Html => "html",
            FormatKind::Pdf => "pdf",
        }
    }

    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" => Some(FormatKind::Text),
            "md" | "markdown" => Some(FormatKind::Markdown),
            "json" => Some(FormatKind::Json),
            "html" | "htm" => Some(FormatKind::Html),
            "pdf" => Some(FormatKind::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(FormatKind::Text),
            other => Self::from_extension(other).ok_or_else(|| {
                QaError::InvalidRequest(format!(
                    "unknown format '{}': expected text, markdown, json, html or pdf",
                    s
                ))
            }),
        }
    }
}

/// A parsed source file. Immutable once produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub id: String,
    pub raw_text: String,
    pub format_kind: FormatKind,
}

/// Half-open character range `[start, end)` into the normalized source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A contiguous segment of a source document.
///
/// `(source_id, ordinal)` is unique and doubles as the citation handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_id: String,
    pub ordinal: u32,
    pub text: String,
    pub span: CharSpan,
}

impl Chunk {
    pub fn handle(&self) -> CitationHandle {
        CitationHandle::new(self.source_id.clone(), self.ordinal)
    }
}

/// Structured citation key, rendered as `"<source_id> (chunk_<ordinal>)"`.
///
/// Ordering is `(source_id, ordinal)`, which is also the tie-break order
/// for equally similar chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CitationHandle {
    pub source_id: String,
    pub ordinal: u32,
}

impl CitationHandle {
    pub fn new(source_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            source_id: source_id.into(),
            ordinal,
        }
    }
}

const CHUNK_MARKER: &str = " (chunk_";

impl fmt::Display for CitationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{})", self.source_id, CHUNK_MARKER, self.ordinal)
    }
}

impl FromStr for CitationHandle {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            QaError::InvalidRequest(format!(
                "malformed citation '{}': expected '<source_id> (chunk_<n>)'",
                s
            ))
        };
        let trimmed = s.trim();
        let body = trimmed.strip_suffix(')').ok_or_else(invalid)?;
        let pos = body.rfind(CHUNK_MARKER).ok_or_else(invalid)?;
        let source_id = body[..pos].trim();
        let ordinal = body[pos + CHUNK_MARKER.len()..]
            .parse::<u32>()
            .map_err(|_| invalid())?;
        if source_id.is_empty() {
            return Err(invalid());
        }
        Ok(CitationHandle::new(source_id, ordinal))
    }
}

impl TryFrom<String> for CitationHandle {
    type Error = QaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CitationHandle> for String {
    fn from(handle: CitationHandle) -> Self {
        handle.to_string()
    }
}

/// One chunk surfaced by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
    /// 0 = most similar.
    pub rank: usize,
}

/// Rank-ordered result of a single query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub query: String,
    pub items: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetrievedChunk> {
        self.items.iter()
    }

    pub fn handles(&self) -> Vec<CitationHandle> {
        self.items.iter().map(|r| r.chunk.handle()).collect()
    }

    pub fn contains(&self, handle: &CitationHandle) -> bool {
        self.items
            .iter()
            .any(|r| r.chunk.ordinal == handle.ordinal && r.chunk.source_id == handle.source_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Positive,
    Negative,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Positive => "positive",
            TestType::Negative => "negative",
        }
    }
}

impl FromStr for TestType {
    type Err = QaError;

    /// Exact match only: `"Positive"` or `"pos"` are schema violations.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(TestType::Positive),
            "negative" => Ok(TestType::Negative),
            other => Err(QaError::InvalidRequest(format!(
                "Test_Type must be \"positive\" or \"negative\", got \"{}\"",
                other
            ))),
        }
    }
}

/// A validated, evidence-grounded test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "Test_ID")]
    pub test_id: String,
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "Test_Scenario")]
    pub scenario: String,
    #[serde(rename = "Preconditions")]
    pub preconditions: Vec<String>,
    #[serde(rename = "Steps")]
    pub steps: Vec<String>,
    #[serde(rename = "Expected_Result")]
    pub expected_result: String,
    #[serde(rename = "Test_Type")]
    pub test_type: TestType,
    #[serde(rename = "Grounded_In")]
    pub grounded_in: Vec<CitationHandle>,
    #[serde(rename = "SelectorsNeeded", default)]
    pub selectors_needed: Vec<String>,
}

/// Immutable snapshot of semantic element keys to concrete locators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorMap(BTreeMap<String, String>);

impl SelectorMap {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Exact key match, else the first key containing `term` (case-insensitive).
    pub fn find(&self, term: &str) -> Option<(&str, &str)> {
        if let Some((k, v)) = self.0.get_key_value(term) {
            return Some((k.as_str(), v.as_str()));
        }
        let needle = term.to_lowercase();
        self.iter().find(|(k, _)| k.to_lowercase().contains(&needle))
    }

    /// Sorted `key: locator` lines.
    pub fn format_listing(&self) -> String {
        if self.0.is_empty() {
            return "No selectors found".to_string();
        }
        self.iter()
            .map(|(k, v)| format!("  {}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(String, String)> for SelectorMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Browser-automation script produced for one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedScript {
    pub test_id: String,
    #[serde(rename = "script")]
    pub code: String,
    /// `SelectorsNeeded` entries absent from the selector snapshot.
    pub missing_selectors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_and_parse() {
        let h = CitationHandle::new("discount_rules.md", 3);
        assert_eq!(h.to_string(), "discount_rules.md (chunk_3)");
        assert_eq!("discount_rules.md (chunk_3)".parse::<CitationHandle>().unwrap(), h);
    }

    #[test]
    fn handle_parse_uses_last_marker() {
        let h: CitationHandle = "odd (chunk_1) name.txt (chunk_12)".parse().unwrap();
        assert_eq!(h.source_id, "odd (chunk_1) name.txt");
        assert_eq!(h.ordinal, 12);
    }

    #[test]
    fn handle_parse_rejects_malformed() {
        for bad in [
            "faq.md",
            "faq.md (chunk_)",
            "faq.md (chunk_x)",
            " (chunk_2)",
            "faq.md chunk_2",
            "faq.md (chunk_-1)",
        ] {
            assert!(bad.parse::<CitationHandle>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn handles_order_by_source_then_ordinal() {
        let mut handles = vec![
            CitationHandle::new("b.md", 0),
            CitationHandle::new("a.md", 10),
            CitationHandle::new("a.md", 2),
        ];
        handles.sort();
        assert_eq!(handles[0], CitationHandle::new("a.md", 2));
        assert_eq!(handles[1], CitationHandle::new("a.md", 10));
        assert_eq!(handles[2], CitationHandle::new("b.md", 0));
    }

    #[test]
    fn test_case_serde_uses_wire_names() {
        let json = r#"{
            "Test_ID": "TC-001",
            "Feature": "Discount code",
            "Test_Scenario": "Apply SAVE15",
            "Preconditions": ["Cart has items"],
            "Steps": ["Enter SAVE15", "Click apply"],
            "Expected_Result": "Total reduced by 15%",
            "Test_Type": "positive",
            "Grounded_In": ["product_specs.md (chunk_0)"]
        }"#;
        let tc: TestCase = serde_json::from_str(json).unwrap();
        assert_eq!(tc.test_type, TestType::Positive);
        assert_eq!(tc.grounded_in, vec![CitationHandle::new("product_specs.md", 0)]);
        assert!(tc.selectors_needed.is_empty());

        let back = serde_json::to_value(&tc).unwrap();
        assert_eq!(back["Grounded_In"][0], "product_specs.md (chunk_0)");
        assert_eq!(back["Test_Type"], "positive");
    }

    #[test]
    fn test_type_is_exact() {
        assert!("positive".parse::<TestType>().is_ok());
        assert!("Positive".parse::<TestType>().is_err());
        assert!("edge".parse::<TestType>().is_err());
    }

    #[test]
    fn format_kind_from_extension_and_str() {
        assert_eq!(FormatKind::from_path(Path::new("a/b/FAQ.MD")), Some(FormatKind::Markdown));
        assert_eq!(FormatKind::from_path(Path::new("page.htm")), Some(FormatKind::Html));
        assert_eq!(FormatKind::from_path(Path::new("blob.bin")), None);
        assert_eq!("plain".parse::<FormatKind>().unwrap(), FormatKind::Text);
        assert!("docx".parse::<FormatKind>().is_err());
    }

    #[test]
    fn selector_map_find() {
        let map: SelectorMap = vec![
            ("button_apply".to_string(), "#apply".to_string()),
            ("input_text_discount-code".to_string(), "#discount-code".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.find("button_apply"), Some(("button_apply", "#apply")));
        assert_eq!(
            map.find("DISCOUNT"),
            Some(("input_text_discount-code", "#discount-code"))
        );
        assert_eq!(map.find("email"), None);
        assert!(map.format_listing().contains("  button_apply: #apply"));
    }
}
