//! Context-bounded test-case generation.
//!
//! [`GroundedGenerator`] turns a query plus a [`RetrievedContext`] into
//! validated [`TestCase`]s. It never retrieves on its own and never repairs
//! model output: a response either passes every check or the whole call
//! fails.
//!
//! # Validation
//!
//! | Problem | Error |
//! |---------|-------|
//! | no JSON payload, invalid JSON, missing required field | [`QaError::GroundingViolation`] |
//! | empty `Grounded_In`, malformed or out-of-context citation | [`QaError::GroundingViolation`] |
//! | `Test_Type` not exactly `positive`/`negative` | [`QaError::SchemaViolation`] |
//! | empty text field, empty `Steps`, duplicate `Test_ID` | [`QaError::SchemaViolation`] |

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{QaError, Result};
use crate::llm::{extract_json_payload, GenerationOptions, LanguageModel};
use crate::models::{CitationHandle, RetrievedContext, TestCase, TestType, UNKNOWN};
use crate::retrieval::format_context;

const TEST_CASE_SCHEMA: &str = r#"[
  {
    "Test_ID": "TC-001",
    "Feature": "string",
    "Test_Scenario": "string describing the test",
    "Preconditions": ["precondition"],
    "Steps": ["step 1", "step 2"],
    "Expected_Result": "string describing the expected outcome",
    "Test_Type": "positive | negative",
    "Grounded_In": ["<source_id> (chunk_<n>)"],
    "SelectorsNeeded": ["semantic-element-name"]
  }
]"#;

/// Generates test cases whose every citation resolves into the supplied
/// context.
#[derive(Clone)]
pub struct GroundedGenerator {
    model: Arc<dyn LanguageModel>,
    options: GenerationOptions,
}

impl GroundedGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, options: GenerationOptions) -> Self {
        Self { model, options }
    }

    /// One model call, then strict validation against `ctx`.
    ///
    /// An empty context is rejected before the model is invoked since no
    /// output could cite it.
    pub async fn generate(&self, query: &str, ctx: &RetrievedContext) -> Result<Vec<TestCase>> {
        if ctx.is_empty() {
            return Err(QaError::InvalidRequest(format!(
                "no context retrieved for query '{}'",
                query
            )));
        }
        let request = self.options.request(build_prompt(query, ctx));
        let response = self.model.complete(&request).await?;
        if response.trim().is_empty() {
            return Err(QaError::language_model(
                format!("query '{}'", query),
                "model returned an empty response",
            ));
        }
        parse_test_cases(query, &response, ctx)
    }
}

/// Instruction block, serialized context, query and output schema.
pub fn build_prompt(query: &str, ctx: &RetrievedContext) -> String {
    let handles = ctx
        .handles()
        .iter()
        .map(|h| format!("- {}", h))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a QA test case generator. Respond with a JSON array only.\n\
         \n\
         RULES:\n\
         1. Use ONLY the information in the CONTEXT below. Do not use outside knowledge.\n\
         2. Any field that cannot be derived from the context must be the literal value \"{unknown}\".\n\
         3. Every test case must cite at least one context chunk in Grounded_In, using the exact handle \
         shown in its SOURCE header.\n\
         4. Test_Type must be exactly \"positive\" or \"negative\". Include both kinds when the context supports it.\n\
         5. SelectorsNeeded lists the page elements the test interacts with; use an empty list when none.\n\
         6. Output only the JSON array: no prose and no code fences.\n\
         \n\
         CONTEXT:\n\
         {context}\n\
         \n\
         VALID CITATION HANDLES:\n\
         {handles}\n\
         \n\
         QUERY: {query}\n\
         \n\
         OUTPUT SCHEMA:\n\
         {schema}\n",
        unknown = UNKNOWN,
        context = format_context(ctx),
        handles = handles,
        query = query,
        schema = TEST_CASE_SCHEMA,
    )
}

/// Loosely typed mirror of [`TestCase`] so that citation and enum problems
/// can be reported precisely instead of as generic serde errors.
#[derive(Debug, Deserialize)]
struct TestCaseDraft {
    #[serde(rename = "Test_ID")]
    test_id: String,
    #[serde(rename = "Feature")]
    feature: String,
    #[serde(rename = "Test_Scenario")]
    scenario: String,
    #[serde(rename = "Preconditions")]
    preconditions: Vec<String>,
    #[serde(rename = "Steps")]
    steps: Vec<String>,
    #[serde(rename = "Expected_Result")]
    expected_result: String,
    #[serde(rename = "Test_Type")]
    test_type: String,
    #[serde(rename = "Grounded_In")]
    grounded_in: Vec<String>,
    #[serde(rename = "SelectorsNeeded", default)]
    selectors_needed: Vec<String>,
}

/// Parse and validate a raw model response against the context it was
/// generated from.
pub fn parse_test_cases(
    query: &str,
    response: &str,
    ctx: &RetrievedContext,
) -> Result<Vec<TestCase>> {
    let payload = extract_json_payload(response)
        .ok_or_else(|| QaError::grounding(query, "response contains no JSON array or object"))?;

    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| QaError::grounding(query, format!("response is not valid JSON: {}", e)))?;
    let value = match value {
        serde_json::Value::Object(_) => serde_json::Value::Array(vec![value]),
        other => other,
    };
    let drafts: Vec<TestCaseDraft> = serde_json::from_value(value).map_err(|e| {
        QaError::grounding(query, format!("response does not match the test case schema: {}", e))
    })?;

    if drafts.is_empty() {
        return Err(QaError::schema(
            format!("response for query '{}'", query),
            "no test cases returned",
        ));
    }

    let mut seen_ids = HashSet::new();
    let mut cases = Vec::with_capacity(drafts.len());
    for (i, draft) in drafts.into_iter().enumerate() {
        let case = validate_draft(query, i, draft, ctx)?;
        if !seen_ids.insert(case.test_id.clone()) {
            return Err(QaError::schema(
                format!("test case {}", case.test_id),
                "duplicate Test_ID in response",
            ));
        }
        cases.push(case);
    }
    Ok(cases)
}

fn validate_draft(
    query: &str,
    position: usize,
    draft: TestCaseDraft,
    ctx: &RetrievedContext,
) -> Result<TestCase> {
    let test_id = draft.test_id.trim().to_string();
    let label = if test_id.is_empty() {
        format!("test case #{}", position + 1)
    } else {
        format!("test case {}", test_id)
    };

    for (field, value) in [
        ("Test_ID", &test_id),
        ("Feature", &draft.feature),
        ("Test_Scenario", &draft.scenario),
        ("Expected_Result", &draft.expected_result),
    ] {
        if value.trim().is_empty() {
            return Err(QaError::schema(&label, format!("{} is empty", field)));
        }
    }
    if draft.steps.is_empty() {
        return Err(QaError::schema(&label, "Steps is empty"));
    }
    if draft
        .steps
        .iter()
        .chain(draft.preconditions.iter())
        .any(|s| s.trim().is_empty())
    {
        return Err(QaError::schema(&label, "blank entry in Steps or Preconditions"));
    }

    let test_type: TestType = draft
        .test_type
        .parse()
        .map_err(|e: QaError| QaError::schema(&label, e))?;

    if draft.grounded_in.is_empty() {
        return Err(QaError::grounding(
            query,
            format!("{} has no Grounded_In citation", label),
        ));
    }
    let mut grounded_in: Vec<CitationHandle> = Vec::with_capacity(draft.grounded_in.len());
    for raw in &draft.grounded_in {
        let handle: CitationHandle = raw.parse().map_err(|_| {
            QaError::grounding(query, format!("{} has malformed citation '{}'", label, raw))
        })?;
        if !ctx.contains(&handle) {
            return Err(QaError::grounding(
                query,
                format!("{} cites '{}', which is not in the supplied context", label, handle),
            ));
        }
        if !grounded_in.contains(&handle) {
            grounded_in.push(handle);
        }
    }

    let mut selectors_needed: Vec<String> = Vec::with_capacity(draft.selectors_needed.len());
    for name in draft.selectors_needed {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(QaError::schema(&label, "blank entry in SelectorsNeeded"));
        }
        if !selectors_needed.contains(&name) {
            selectors_needed.push(name);
        }
    }

    Ok(TestCase {
        test_id,
        feature: draft.feature.trim().to_string(),
        scenario: draft.scenario.trim().to_string(),
        preconditions: draft.preconditions,
        steps: draft.steps,
        expected_result: draft.expected_result.trim().to_string(),
        test_type,
        grounded_in,
        selectors_needed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionRequest;
    use crate::models::{CharSpan, Chunk, RetrievedChunk};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModel {
        response: String,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for StubModel {
        fn model_name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn ctx() -> RetrievedContext {
        let item = |source: &str, ordinal: u32, text: &str, rank: usize| RetrievedChunk {
            chunk: Chunk {
                source_id: source.into(),
                ordinal,
                text: text.into(),
                span: CharSpan { start: 0, end: 1 },
            },
            score: 1.0 - rank as f32 * 0.1,
            rank,
        };
        RetrievedContext {
            query: "discount code".into(),
            items: vec![
                item("specs.md", 0, "SAVE15 applies 15% off.", 0),
                item("faq.md", 2, "Expired codes show an error.", 1),
            ],
        }
    }

    fn case_json(id: &str, test_type: &str, grounded: &[&str]) -> String {
        serde_json::json!({
            "Test_ID": id,
            "Feature": "Discount code",
            "Test_Scenario": "Apply a code",
            "Preconditions": ["Cart has one item"],
            "Steps": ["Enter code", "Click apply"],
            "Expected_Result": "Total reduced",
            "Test_Type": test_type,
            "Grounded_In": grounded,
            "SelectorsNeeded": ["input_text_discount-code", "button_apply", "button_apply"]
        })
        .to_string()
    }

    #[test]
    fn test_valid_response_parses() {
        let response = format!(
            "```json\n[{}, {}]\n```",
            case_json("TC-001", "positive", &["specs.md (chunk_0)", "specs.md (chunk_0)"]),
            case_json("TC-002", "negative", &["faq.md (chunk_2)"])
        );
        let cases = parse_test_cases("discount code", &response, &ctx()).unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].grounded_in, vec![CitationHandle::new("specs.md", 0)]);
        assert_eq!(cases[0].selectors_needed.len(), 2);
        assert_eq!(cases[1].test_type, TestType::Negative);
    }

    #[test]
    fn test_single_object_accepted() {
        let response = case_json("TC-001", "positive", &["faq.md (chunk_2)"]);
        let cases = parse_test_cases("q", &response, &ctx()).unwrap();
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn test_out_of_context_citation_rejected() {
        let response = format!("[{}]", case_json("TC-001", "positive", &["faq.md (chunk_3)"]));
        let err = parse_test_cases("q", &response, &ctx()).unwrap_err();
        assert!(matches!(err, QaError::GroundingViolation { .. }));
        assert!(err.to_string().contains("faq.md (chunk_3)"));
    }

    #[test]
    fn test_substring_lookalike_rejected() {
        // "specs.md (chunk_0)" is a substring of the forged handle's display.
        let response = format!(
            "[{}]",
            case_json("TC-001", "positive", &["old_specs.md (chunk_0)"])
        );
        assert!(matches!(
            parse_test_cases("q", &response, &ctx()),
            Err(QaError::GroundingViolation { .. })
        ));
    }

    #[test]
    fn test_missing_citations_rejected() {
        let response = format!("[{}]", case_json("TC-001", "positive", &[]));
        assert!(matches!(
            parse_test_cases("q", &response, &ctx()),
            Err(QaError::GroundingViolation { .. })
        ));
    }

    #[test]
    fn test_bad_test_type_is_schema_violation() {
        for bad in ["Positive", "edge", ""] {
            let response = format!("[{}]", case_json("TC-001", bad, &["specs.md (chunk_0)"]));
            let err = parse_test_cases("q", &response, &ctx()).unwrap_err();
            assert!(matches!(err, QaError::SchemaViolation { .. }), "{:?}", bad);
        }
    }

    #[test]
    fn test_unparseable_rejected() {
        for bad in ["I cannot help with that.", "[{\"Test_ID\": }]", "[{\"Test_ID\": \"TC-1\"}]"] {
            assert!(matches!(
                parse_test_cases("q", bad, &ctx()),
                Err(QaError::GroundingViolation { .. })
            ));
        }
    }

    #[test]
    fn test_duplicate_ids_and_empty_steps() {
        let dup = format!(
            "[{}, {}]",
            case_json("TC-001", "positive", &["specs.md (chunk_0)"]),
            case_json("TC-001", "negative", &["faq.md (chunk_2)"])
        );
        assert!(matches!(
            parse_test_cases("q", &dup, &ctx()),
            Err(QaError::SchemaViolation { .. })
        ));

        let mut value: serde_json::Value =
            serde_json::from_str(&case_json("TC-001", "positive", &["specs.md (chunk_0)"])).unwrap();
        value["Steps"] = serde_json::json!([]);
        assert!(matches!(
            parse_test_cases("q", &value.to_string(), &ctx()),
            Err(QaError::SchemaViolation { .. })
        ));
        assert!(matches!(
            parse_test_cases("q", "[]", &ctx()),
            Err(QaError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn test_unknown_is_accepted() {
        let mut value: serde_json::Value =
            serde_json::from_str(&case_json("TC-001", "positive", &["specs.md (chunk_0)"])).unwrap();
        value["Expected_Result"] = serde_json::json!("UNKNOWN");
        let cases = parse_test_cases("q", &value.to_string(), &ctx()).unwrap();
        assert_eq!(cases[0].expected_result, UNKNOWN);
    }

    #[test]
    fn test_prompt_contains_rules_context_and_query() {
        let prompt = build_prompt("discount code validation rules", &ctx());
        assert!(prompt.contains("UNKNOWN"));
        assert!(prompt.contains("=== SOURCE: specs.md (chunk_0) ==="));
        assert!(prompt.contains("- faq.md (chunk_2)"));
        assert!(prompt.contains("QUERY: discount code validation rules"));
        assert!(prompt.contains("\"Grounded_In\""));
    }

    #[tokio::test]
    async fn test_empty_context_skips_model() {
        let model = StubModel::new("[]");
        let gen = GroundedGenerator::new(model.clone(), GenerationOptions::default());
        let empty = RetrievedContext {
            query: "q".into(),
            items: vec![],
        };
        assert!(matches!(
            gen.generate("q", &empty).await,
            Err(QaError::InvalidRequest(_))
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_is_single_call() {
        let response = format!("[{}]", case_json("TC-001", "positive", &["specs.md (chunk_0)"]));
        let model = StubModel::new(&response);
        let gen = GroundedGenerator::new(model.clone(), GenerationOptions::default());
        let cases = gen.generate("discount code", &ctx()).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }
}
