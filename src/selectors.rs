//! Selector inventory extraction from markup.
//!
//! Walks every element of a page in document order and maps a semantic key
//! `<role>_<label>` to the most specific locator the element offers:
//!
//! | Attribute | Locator |
//! |-----------|---------|
//! | `id` | `#id` (or `[id='…']` when the id is not a plain CSS identifier) |
//! | `name` | `tag[name='…']` |
//! | `class` | `tag.first-class` |
//!
//! Id uniqueness is assumed, not re-verified. When two elements derive the
//! same key the [`CollisionPolicy`] decides which locator is kept.

use std::collections::{BTreeMap, HashMap};

use scraper::{ElementRef, Html};
use serde::Deserialize;
use tracing::debug;

use qa_harness_core::models::SelectorMap;
use qa_harness_core::{QaError, Result};

/// Longest label kept in a key, in characters.
const MAX_LABEL_LEN: usize = 40;

/// Subtrees never walked.
const SKIPPED_SUBTREES: &[&str] = &["head", "script", "style", "template"];

/// Tags that never identify an interactive or visible element.
const IGNORED_TAGS: &[&str] = &[
    "html", "head", "meta", "link", "script", "style", "title", "base", "noscript", "template",
];

/// Resolution of two elements deriving the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the first element in document order.
    #[default]
    FirstWins,
    /// Keep the last element in document order.
    LastWins,
    /// Fail with [`QaError::SelectorCollision`].
    Error,
}

/// Extract the selector map from a markup document.
///
/// Only [`CollisionPolicy::Error`] can fail. Two elements that derive the
/// same key and the same locator are not a collision.
pub fn extract_selectors(markup: &str, policy: CollisionPolicy) -> Result<SelectorMap> {
    let html = Html::parse_document(markup);
    let labels_by_for = label_texts_by_target(&html);

    let mut map: BTreeMap<String, String> = BTreeMap::new();
    let mut stack = vec![html.tree.root()];

    while let Some(node) = stack.pop() {
        if let Some(el) = ElementRef::wrap(node) {
            let tag = el.value().name();
            if SKIPPED_SUBTREES.contains(&tag) {
                continue;
            }
            if !IGNORED_TAGS.contains(&tag) {
                if let Some((key, locator)) = selector_for(el, &labels_by_for) {
                    insert(&mut map, key, locator, policy)?;
                }
            }
        }
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    Ok(map.into_iter().collect())
}

fn insert(
    map: &mut BTreeMap<String, String>,
    key: String,
    locator: String,
    policy: CollisionPolicy,
) -> Result<()> {
    match map.get(&key) {
        None => {
            map.insert(key, locator);
        }
        Some(existing) if *existing == locator => {}
        Some(existing) => {
            debug!(key = %key, kept = ?policy, first = %existing, second = %locator, "selector key collision");
            match policy {
                CollisionPolicy::FirstWins => {}
                CollisionPolicy::LastWins => {
                    map.insert(key, locator);
                }
                CollisionPolicy::Error => {
                    return Err(QaError::SelectorCollision {
                        key,
                        first: existing.clone(),
                        second: locator,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Derive `(key, locator)` for an element carrying an id, name or class.
fn selector_for(el: ElementRef<'_>, labels_by_for: &HashMap<String, String>) -> Option<(String, String)> {
    let value = el.value();
    let id = non_empty(value.attr("id"));
    let name = non_empty(value.attr("name"));
    let first_class = value
        .attr("class")
        .and_then(|c| c.split_whitespace().next())
        .map(str::to_string);

    if id.is_none() && name.is_none() && first_class.is_none() {
        return None;
    }

    let label_candidates = [
        id.map(str::to_string),
        name.map(str::to_string),
        id.and_then(|i| labels_by_for.get(i).cloned())
            .or_else(|| enclosing_label_text(el)),
        Some(own_text(el)),
        first_class.clone(),
    ];
    let label = label_candidates
        .into_iter()
        .flatten()
        .map(|candidate| slugify(&candidate))
        .find(|slug| !slug.is_empty())?;

    let tag = value.name();
    let locator = if let Some(id) = id {
        if is_css_identifier(id) {
            format!("#{}", id)
        } else {
            format!("[id='{}']", escape_quotes(id))
        }
    } else if let Some(name) = name {
        format!("{}[name='{}']", tag, escape_quotes(name))
    } else {
        let class = first_class?;
        if is_css_identifier(&class) {
            format!("{}.{}", tag, class)
        } else {
            format!("{}[class~='{}']", tag, escape_quotes(&class))
        }
    };

    Some((format!("{}_{}", role_for(el), label), locator))
}

/// Role prefix inferred from tag and input type.
fn role_for(el: ElementRef<'_>) -> String {
    let value = el.value();
    match value.name() {
        "input" => {
            let input_type = value
                .attr("type")
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "text".to_string());
            match input_type.as_str() {
                "submit" | "button" | "reset" | "image" => "button".to_string(),
                other => {
                    let clean: String = other.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
                    format!("input_{}", if clean.is_empty() { "text" } else { &clean })
                }
            }
        }
        "a" => "link".to_string(),
        "img" => "image".to_string(),
        other => other.to_string(),
    }
}

fn label_texts_by_target(html: &Html) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for node in html.tree.root().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        if el.value().name() != "label" {
            continue;
        }
        if let Some(target) = non_empty(el.value().attr("for")) {
            let text = collapse_whitespace(&el.text().collect::<String>());
            if !text.is_empty() {
                out.entry(target.to_string()).or_insert(text);
            }
        }
    }
    out
}

fn enclosing_label_text(el: ElementRef<'_>) -> Option<String> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "label")
        .map(|label| collapse_whitespace(&label.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Visible text, else the attributes a user would read in its place.
fn own_text(el: ElementRef<'_>) -> String {
    let text = collapse_whitespace(&el.text().collect::<String>());
    if !text.is_empty() {
        return text;
    }
    let value = el.value();
    ["value", "placeholder", "aria-label", "alt", "title"]
        .iter()
        .find_map(|attr| non_empty(value.attr(attr)))
        .map(collapse_whitespace)
        .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase `[a-z0-9-]`, runs of other characters become one `-`.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
            if slug.len() >= MAX_LABEL_LEN {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(MAX_LABEL_LEN);
    slug.trim_end_matches('-').to_string()
}

fn is_css_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Checkout</title>
  <meta name="viewport" content="width=device-width">
  <script id="boot">window.x = 1;</script>
</head>
<body>
  <form id="checkout-form">
    <label for="discount-code">Discount code</label>
    <input type="text" id="discount-code" name="discount">
    <button id="apply-discount" type="button">Apply</button>
    <label>Email <input type="email" name="email"></label>
    <input type="submit" class="btn primary" value="Pay now">
  </form>
  <a class="help-link" href="/help">Need help?</a>
  <div class="error hidden"></div>
</body>
</html>"#;

    #[test]
    fn test_extracts_identifiable_elements() {
        let map = extract_selectors(CHECKOUT, CollisionPolicy::FirstWins).unwrap();
        assert_eq!(map.get("form_checkout-form"), Some("#checkout-form"));
        assert_eq!(map.get("input_text_discount-code"), Some("#discount-code"));
        assert_eq!(map.get("button_apply-discount"), Some("#apply-discount"));
        assert_eq!(map.get("input_email_email"), Some("input[name='email']"));
        assert_eq!(map.get("button_pay-now"), Some("input.btn"));
        assert_eq!(map.get("link_need-help"), Some("a.help-link"));
        assert_eq!(map.get("div_error"), Some("div.error"));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_head_and_script_are_ignored() {
        let map = extract_selectors(CHECKOUT, CollisionPolicy::FirstWins).unwrap();
        assert!(!map.iter().any(|(_, v)| v == "#boot"));
        assert!(!map.iter().any(|(k, _)| k.starts_with("meta")));
    }

    #[test]
    fn test_enclosing_label_names_classed_input() {
        let html = r#"<body><label>Promo Code <input class="field"></label></body>"#;
        let map = extract_selectors(html, CollisionPolicy::FirstWins).unwrap();
        assert_eq!(map.get("input_text_promo-code"), Some("input.field"));
    }

    const DUPLICATES: &str = r#"<body>
      <input name="qty" id="qty" type="number">
      <div id="first"><input name="qty" type="number"></div>
    </body>"#;

    #[test]
    fn test_collision_first_wins() {
        let map = extract_selectors(DUPLICATES, CollisionPolicy::FirstWins).unwrap();
        assert_eq!(map.get("input_number_qty"), Some("#qty"));
    }

    #[test]
    fn test_collision_last_wins() {
        let map = extract_selectors(DUPLICATES, CollisionPolicy::LastWins).unwrap();
        assert_eq!(map.get("input_number_qty"), Some("input[name='qty']"));
    }

    #[test]
    fn test_collision_error() {
        let err = extract_selectors(DUPLICATES, CollisionPolicy::Error).unwrap_err();
        match err {
            QaError::SelectorCollision { key, first, second } => {
                assert_eq!(key, "input_number_qty");
                assert_eq!(first, "#qty");
                assert_eq!(second, "input[name='qty']");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_identical_locators_are_not_collisions() {
        let html = r#"<body><p class="note">a</p><p class="note">a</p></body>"#;
        let map = extract_selectors(html, CollisionPolicy::Error).unwrap();
        assert_eq!(map.get("p_a"), Some("p.note"));
    }

    #[test]
    fn test_non_identifier_id_uses_attribute_locator() {
        let html = r#"<body><button id="2fa:submit">Go</button></body>"#;
        let map = extract_selectors(html, CollisionPolicy::FirstWins).unwrap();
        assert_eq!(map.get("button_2fa-submit"), Some("[id='2fa:submit']"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Discount_Code"), "discount-code");
        assert_eq!(slugify("  Pay   now! "), "pay-now");
        assert_eq!(slugify("___"), "");
        assert_eq!(slugify(&"a".repeat(60)).len(), MAX_LABEL_LEN);
        assert_eq!(slugify("Größe wählen"), "gr-e-w-hlen");
    }

    #[test]
    fn test_empty_markup() {
        let map = extract_selectors("", CollisionPolicy::FirstWins).unwrap();
        assert!(map.is_empty());
    }
}
