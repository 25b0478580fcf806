//! Language-model capability trait and response unwrapping helpers.

use async_trait::async_trait;

use crate::error::Result;

/// One single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// External language model consumed through a prompt-in, text-out contract.
///
/// Implementations report transport and service failures as
/// [`QaError::LanguageModel`](crate::error::QaError::LanguageModel).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Sampling settings shared by both generators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: 4096,
        }
    }
}

impl GenerationOptions {
    pub fn request(&self, prompt: String) -> CompletionRequest {
        CompletionRequest {
            prompt,
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        }
    }
}

/// Remove one surrounding markdown code fence, if present.
///
/// Handles an optional language tag on the opening fence. Text without a
/// fence is returned trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => return trimmed,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Locate the outermost JSON array or object in a model response.
///
/// Prose before the first `[`/`{` and after the matching last `]`/`}` is
/// discarded. The payload itself is returned untouched.
pub fn extract_json_payload(text: &str) -> Option<&str> {
    let body = strip_code_fences(text);
    let start = body.find(['[', '{'])?;
    let close = if body[start..].starts_with('[') { ']' } else { '}' };
    let end = body.rfind(close)?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\nprint('x')\n```\n"), "print('x')");
        assert_eq!(strip_code_fences("  plain  "), "plain");
        assert_eq!(strip_code_fences("```python\nunterminated"), "unterminated");
    }

    #[test]
    fn test_extract_payload_discards_prose() {
        let text = "Here are the tests:\n```json\n[{\"a\": 1}]\n```\nHope this helps";
        assert_eq!(extract_json_payload(text), Some("[{\"a\": 1}]"));
        assert_eq!(
            extract_json_payload("Sure! {\"Test_ID\": \"TC-1\"} done"),
            Some("{\"Test_ID\": \"TC-1\"}")
        );
        assert_eq!(extract_json_payload("no json here"), None);
    }

    #[test]
    fn test_request_uses_options() {
        let opts = GenerationOptions::default();
        let req = opts.request("p".into());
        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.max_output_tokens, 4096);
    }
}
