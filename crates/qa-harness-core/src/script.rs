//! Browser-automation script generation constrained to a selector snapshot.
//!
//! Unresolved selectors are data, not errors: they are listed in
//! [`GeneratedScript::missing_selectors`] and the generated code must carry
//! a [`placeholder_for`] marker at each such location. Resolution is decided
//! from the test case's `SelectorsNeeded`, never by parsing generated code.

use std::sync::Arc;

use crate::error::{QaError, Result};
use crate::llm::{strip_code_fences, GenerationOptions, LanguageModel};
use crate::models::{Chunk, GeneratedScript, SelectorMap, TestCase};

/// Conspicuous marker the generated code must use in place of a locator
/// that does not exist in the selector map.
pub fn placeholder_for(name: &str) -> String {
    format!("__MISSING_SELECTOR__[{}]", name)
}

/// `SelectorsNeeded` entries absent from `selectors`, in test-case order.
pub fn missing_selectors(test_case: &TestCase, selectors: &SelectorMap) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for name in &test_case.selectors_needed {
        if !selectors.contains(name) && !missing.contains(name) {
            missing.push(name.clone());
        }
    }
    missing
}

/// `SelectorsNeeded` entries that do resolve, paired with their locators.
pub fn resolved_selectors<'a>(
    test_case: &'a TestCase,
    selectors: &'a SelectorMap,
) -> Vec<(&'a str, &'a str)> {
    test_case
        .selectors_needed
        .iter()
        .filter_map(|name| selectors.get(name).map(|loc| (name.as_str(), loc)))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOptions {
    /// Target framework named in the prompt, e.g. `"selenium-python"`.
    pub framework: String,
    pub generation: GenerationOptions,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            framework: "selenium-python".to_string(),
            generation: GenerationOptions::default(),
        }
    }
}

#[derive(Clone)]
pub struct ScriptGenerator {
    model: Arc<dyn LanguageModel>,
    options: ScriptOptions,
}

impl ScriptGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, options: ScriptOptions) -> Self {
        Self { model, options }
    }

    pub async fn generate(
        &self,
        test_case: &TestCase,
        selectors: &SelectorMap,
    ) -> Result<GeneratedScript> {
        self.generate_with_evidence(test_case, selectors, &[]).await
    }

    /// Same as [`generate`](Self::generate), with the chunk texts cited by
    /// the test case included in the prompt as supporting evidence.
    pub async fn generate_with_evidence(
        &self,
        test_case: &TestCase,
        selectors: &SelectorMap,
        evidence: &[Chunk],
    ) -> Result<GeneratedScript> {
        let missing = missing_selectors(test_case, selectors);
        let prompt = build_prompt(&self.options.framework, test_case, selectors, &missing, evidence);
        let response = self
            .model
            .complete(&self.options.generation.request(prompt))
            .await?;

        let code = strip_code_fences(&response).to_string();
        validate_script(test_case, &code, &missing)?;

        Ok(GeneratedScript {
            test_id: test_case.test_id.clone(),
            code,
            missing_selectors: missing,
        })
    }
}

/// Reject empty scripts and scripts that fabricate a locator for a missing
/// selector instead of marking it.
pub fn validate_script(test_case: &TestCase, code: &str, missing: &[String]) -> Result<()> {
    let context = format!("script for test case {}", test_case.test_id);
    if code.trim().is_empty() {
        return Err(QaError::schema(context, "model returned an empty script"));
    }
    let unmarked: Vec<&str> = missing
        .iter()
        .filter(|name| !code.contains(&placeholder_for(name)))
        .map(String::as_str)
        .collect();
    if !unmarked.is_empty() {
        return Err(QaError::schema(
            context,
            format!(
                "missing selectors without a placeholder marker: {}",
                unmarked.join(", ")
            ),
        ));
    }
    Ok(())
}

/// Build the script prompt. Only the selectors the test case needs are
/// listed; missing ones are listed with their required placeholder.
pub fn build_prompt(
    framework: &str,
    test_case: &TestCase,
    selectors: &SelectorMap,
    missing: &[String],
    evidence: &[Chunk],
) -> String {
    let mut prompt = format!(
        "You are a test automation engineer. Write a complete, runnable {framework} script \
         for the test case below. Output only code.\n\
         \n\
         REQUIREMENTS:\n\
         1. Wait explicitly for every element to be present and interactable before using it. \
         Do not use fixed sleeps.\n\
         2. End with an assertion that checks the Expected_Result.\n\
         3. Release the browser on every exit path (success, assertion failure, unexpected error), \
         e.g. with try/finally.\n\
         4. Use ONLY the locators listed under SELECTORS. Never invent a locator.\n\
         5. Where a selector is listed as MISSING, use its placeholder string verbatim as the locator.\n\
         \n\
         TEST CASE:\n\
         {test_case}\n",
        framework = framework,
        test_case = serde_json::to_string_pretty(test_case).unwrap_or_else(|_| format!("{:?}", test_case)),
    );

    prompt.push_str("\nSELECTORS:\n");
    let resolved = resolved_selectors(test_case, selectors);
    if resolved.is_empty() && missing.is_empty() {
        prompt.push_str("(none needed: the test performs no element interaction)\n");
    }
    for (name, locator) in resolved {
        prompt.push_str(&format!("  {}: {}\n", name, locator));
    }
    for name in missing {
        prompt.push_str(&format!("  {}: MISSING, use {}\n", name, placeholder_for(name)));
    }

    if !evidence.is_empty() {
        prompt.push_str("\nSUPPORTING EVIDENCE:\n");
        for chunk in evidence {
            prompt.push_str(&format!(
                "=== {} ===\n{}\n=== END ===\n",
                chunk.handle(),
                chunk.text.trim_end()
            ));
        }
    }

    prompt.push_str("\nSCRIPT:\n");
    prompt
}

/// Placeholder markers present in `code` for names outside `missing`.
///
/// A non-empty result means the model marked selectors that actually
/// resolve. The script is still valid.
pub fn unreferenced_placeholders(code: &str, missing: &[String]) -> Vec<String> {
    const OPEN: &str = "__MISSING_SELECTOR__[";
    let mut found = Vec::new();
    let mut rest = code;
    while let Some(pos) = rest.find(OPEN) {
        let after = &rest[pos + OPEN.len()..];
        let Some(close) = after.find(']') else { break };
        let name = &after[..close];
        if !missing.iter().any(|m| m == name) && !found.iter().any(|f: &String| f == name) {
            found.push(name.to_string());
        }
        rest = &after[close..];
    }
    found
}
