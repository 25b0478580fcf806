//! Source document parsing.
//!
//! Converts the raw bytes of one uploaded file into a [`SourceDocument`]
//! according to its declared [`FormatKind`]:
//!
//! | Format | Extraction |
//! |--------|------------|
//! | text, markdown | UTF-8, verbatim |
//! | json | flattened to indented `key: value` lines in document order |
//! | html | visible text in document order, whitespace collapsed |
//! | pdf | text page by page, each page preceded by a `--- page N ---` marker |
//!
//! Every failure is a [`QaError::Parse`] naming the source, so a build can
//! skip the file and keep going.

use scraper::{ElementRef, Html};
use serde_json::Value;

use qa_harness_core::models::{FormatKind, SourceDocument};
use qa_harness_core::{QaError, Result};

use crate::selectors::collapse_whitespace;

/// Elements whose content is never visible text.
const HIDDEN_SUBTREES: &[&str] = &["head", "script", "style", "noscript", "template"];

const INDENT: &str = "  ";

/// Characters replaced by `_` when a file name becomes a source id.
const UNSAFE_ID_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Turn a file name or relative path into a source id.
pub fn sanitize_source_id(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if UNSAFE_ID_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect()
}

/// Parse one source. Empty extracted text is an error.
pub fn parse_source(source_id: &str, bytes: &[u8], format_kind: FormatKind) -> Result<SourceDocument> {
    if source_id.trim().is_empty() {
        return Err(QaError::parse(source_id, "source id is empty"));
    }

    let raw_text = match format_kind {
        FormatKind::Text | FormatKind::Markdown => decode_utf8(source_id, bytes)?,
        FormatKind::Json => flatten_json_bytes(source_id, bytes)?,
        FormatKind::Html => html_to_text(&decode_utf8(source_id, bytes)?),
        FormatKind::Pdf => pdf_to_text(source_id, bytes)?,
    };

    if raw_text.trim().is_empty() {
        return Err(QaError::parse(source_id, "no extractable text"));
    }

    Ok(SourceDocument {
        id: source_id.to_string(),
        raw_text,
        format_kind,
    })
}

fn decode_utf8(source_id: &str, bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| QaError::parse(source_id, format!("not valid UTF-8: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text).to_string())
}

fn flatten_json_bytes(source_id: &str, bytes: &[u8]) -> Result<String> {
    let text = decode_utf8(source_id, bytes)?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| QaError::parse(source_id, format!("invalid JSON: {}", e)))?;
    Ok(flatten_json(&value))
}

/// Render a JSON value as readable indented text.
///
/// Objects become `key: value` lines, nested containers open with `key:`
/// and indent their children, array scalars become `- value` and array
/// containers open with `Item N:` (1-based).
pub fn flatten_json(value: &Value) -> String {
    let mut lines = Vec::new();
    flatten_into(value, 0, &mut lines);
    lines.join("\n")
}

fn flatten_into(value: &Value, depth: usize, lines: &mut Vec<String>) {
    let prefix = INDENT.repeat(depth);
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if is_container(child) {
                    lines.push(format!("{}{}:", prefix, key));
                    flatten_into(child, depth + 1, lines);
                } else {
                    lines.push(format!("{}{}: {}", prefix, key, scalar(child)));
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if is_container(item) {
                    lines.push(format!("{}Item {}:", prefix, i + 1));
                    flatten_into(item, depth + 1, lines);
                } else {
                    lines.push(format!("{}- {}", prefix, scalar(item)));
                }
            }
        }
        other => lines.push(format!("{}{}", prefix, scalar(other))),
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Visible text of a markup document, one text run per line.
pub fn html_to_text(markup: &str) -> String {
    let html = Html::parse_document(markup);
    let mut lines: Vec<String> = Vec::new();
    let mut stack = vec![html.tree.root()];

    while let Some(node) = stack.pop() {
        if let Some(el) = ElementRef::wrap(node) {
            if HIDDEN_SUBTREES.contains(&el.value().name()) {
                continue;
            }
        }
        if let Some(text) = node.value().as_text() {
            let run = collapse_whitespace(text);
            if !run.is_empty() {
                lines.push(run);
            }
        }
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    lines.join("\n")
}

fn pdf_to_text(source_id: &str, bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed inputs.
    let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| QaError::parse(source_id, "PDF extraction failed: malformed document"))?
        .map_err(|e| QaError::parse(source_id, format!("PDF extraction failed: {}", e)))?;

    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(QaError::parse(source_id, "no extractable text"));
    }

    Ok(pages
        .iter()
        .enumerate()
        .map(|(i, page)| format!("--- page {} ---\n{}", i + 1, page.trim()))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_markdown_verbatim() {
        let doc = parse_source("faq.md", b"# FAQ\n\nCodes expire.", FormatKind::Markdown).unwrap();
        assert_eq!(doc.raw_text, "# FAQ\n\nCodes expire.");
        assert_eq!(doc.id, "faq.md");
        let bom = parse_source("a.txt", "\u{feff}hello".as_bytes(), FormatKind::Text).unwrap();
        assert_eq!(bom.raw_text, "hello");
    }

    #[test]
    fn test_invalid_utf8_names_source() {
        let err = parse_source("bad.txt", &[0xff, 0xfe, 0x00], FormatKind::Text).unwrap_err();
        match err {
            QaError::Parse { source_id, .. } => assert_eq!(source_id, "bad.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_content_rejected() {
        let err = parse_source("empty.md", b"  \n\t ", FormatKind::Markdown).unwrap_err();
        assert!(err.to_string().contains("no extractable text"));
    }

    #[test]
    fn test_json_flattening() {
        let json = br#"{
            "product": "Widget",
            "price": 19.5,
            "discounts": [
                {"code": "SAVE15", "percent": 15},
                "FREESHIP"
            ],
            "shipping": {"free_over": 50, "express": true}
        }"#;
        let doc = parse_source("specs.json", json, FormatKind::Json).unwrap();
        let expected = "\
product: Widget
price: 19.5
discounts:
  Item 1:
    code: SAVE15
    percent: 15
  - FREESHIP
shipping:
  free_over: 50
  express: true";
        assert_eq!(doc.raw_text, expected);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_source("x.json", b"{\"a\": ", FormatKind::Json).unwrap_err();
        assert!(matches!(err, QaError::Parse { .. }));
    }

    #[test]
    fn test_html_visible_text() {
        let html = br#"<html><head><title>T</title><style>p{}</style></head>
        <body>
          <h1>Checkout</h1>
          <script>var hidden = 1;</script>
          <p>Enter your   discount
             code.</p>
          <noscript>Enable JS</noscript>
          <button>Apply</button>
        </body></html>"#;
        let doc = parse_source("checkout.html", html, FormatKind::Html).unwrap();
        assert_eq!(doc.raw_text, "Checkout\nEnter your discount code.\nApply");
    }

    /// Valid PDF with one Helvetica text line per page, xref offsets computed
    /// from the written body.
    fn minimal_pdf(pages: &[&str]) -> Vec<u8> {
        let font_id = 3 + 2 * pages.len();
        let kids: Vec<String> = (0..pages.len()).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages.len()),
        ];
        for (i, text) in pages.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R \
                 /Resources << /Font << /F1 {} 0 R >> >> >>",
                4 + 2 * i,
                font_id
            ));
            let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
            objects.push(format!("<< /Length {} >> stream\n{}\nendstream", stream.len(), stream));
        }
        objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj {} endobj\n", i + 1, body).as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
        out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_start
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn test_pdf_pages_are_marked() {
        let pdf = minimal_pdf(&["Discount codes expire", "Refunds take five days"]);
        let doc = parse_source("policy.pdf", &pdf, FormatKind::Pdf).unwrap();
        let text = &doc.raw_text;

        let page1 = text.find("--- page 1 ---").expect("page 1 marker");
        let discount = text.find("Discount").expect("page 1 text");
        let page2 = text.find("--- page 2 ---").expect("page 2 marker");
        let refunds = text.find("Refunds").expect("page 2 text");
        assert!(page1 < discount && discount < page2 && page2 < refunds, "{}", text);
        assert!(text.starts_with("--- page 1 ---\n"));
        assert_eq!(doc.id, "policy.pdf");
    }

    #[test]
    fn test_corrupt_pdf_is_parse_error() {
        let err = parse_source("broken.pdf", b"%PDF-1.4 not really", FormatKind::Pdf).unwrap_err();
        match err {
            QaError::Parse { source_id, .. } => assert_eq!(source_id, "broken.pdf"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sanitize_source_id() {
        assert_eq!(sanitize_source_id("docs/faq:v2?.md"), "docs_faq_v2_.md");
        assert_eq!(sanitize_source_id(" plain.txt "), "plain.txt");
    }
}
