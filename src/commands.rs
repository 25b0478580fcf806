//! Command implementations behind the `qah` subcommands.
//!
//! Each `run_*` function loads what it needs, performs one operation
//! through [`Harness`], and prints the result. JSON goes to stdout; logs go
//! to stderr.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use qa_harness_core::models::{FormatKind, TestCase};

use crate::config::{Config, SourcesConfig};
use crate::connector_fs::{read_markup, resolve_root, scan_sources};
use crate::harness::Harness;
use crate::models::{BuildReport, BuildStatus, SourceUpload, TestCaseResponse};
use crate::selectors::extract_selectors;

/// `qah build`: collect sources, build and publish a knowledge base.
pub async fn run_build(
    config: &Config,
    files: Vec<PathBuf>,
    docs: Option<PathBuf>,
    markup: Option<PathBuf>,
) -> Result<()> {
    let markup_path = markup.or_else(|| config.sources.markup.clone());

    let mut uploads = Vec::new();
    for path in &files {
        uploads.push(read_upload(path)?);
    }
    if docs.is_some() || files.is_empty() {
        let root = resolve_root(docs, &config.sources)?;
        let sources = SourcesConfig {
            markup: markup_path.clone(),
            ..config.sources.clone()
        };
        uploads.extend(scan_sources(&root, &sources)?);
    }
    if uploads.is_empty() {
        bail!("No source documents found");
    }

    let markup = match markup_path {
        Some(path) => Some(read_markup(&path)?),
        None => None,
    };

    let harness = Harness::from_config(config.clone())?;
    let report = harness.build(uploads, markup).await?;
    print!("{}", render_report(&report));
    Ok(())
}

fn read_upload(path: &Path) -> Result<SourceUpload> {
    let format_kind = FormatKind::from_path(path)
        .ok_or_else(|| anyhow::anyhow!("Unsupported file type: {}", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(SourceUpload {
        filename,
        bytes,
        format_kind,
    })
}

pub fn render_report(report: &BuildReport) -> String {
    let mut out = format!(
        "Built knowledge base {}\n  chunks:    {}\n  selectors: {}\n  sources:\n",
        report.version, report.chunk_count, report.selector_count
    );
    for s in &report.sources {
        match (&s.status, &s.reason) {
            (BuildStatus::Failed, Some(reason)) => {
                out.push_str(&format!("    FAILED {} ({})\n", s.source_id, reason))
            }
            _ => out.push_str(&format!("    ok     {} ({} chunks)\n", s.source_id, s.chunk_count)),
        }
    }
    out
}

/// `qah generate`: retrieve and generate grounded test cases.
pub async fn run_generate(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    out: Option<PathBuf>,
) -> Result<()> {
    let harness = Harness::from_config(config.clone())?;
    let response = harness.generate_test_cases(query, top_k).await?;
    let json = serde_json::to_string_pretty(&response)?;
    match out {
        Some(path) => {
            std::fs::write(&path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "Wrote {} test case(s) to {}",
                response.test_cases.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// `qah script`: generate a browser-automation script for one test case.
///
/// With `out`, the script code is written to that file and the JSON result
/// still goes to stdout.
pub async fn run_script(
    config: &Config,
    input: &Path,
    id: Option<&str>,
    out: Option<PathBuf>,
) -> Result<()> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let cases = test_cases_from_json(&text)
        .with_context(|| format!("No test cases in {}", input.display()))?;
    let test_case = select_test_case(cases, id)?;

    let harness = Harness::from_config(config.clone())?;
    let script = harness.generate_script(&test_case).await?;
    if let Some(path) = out {
        std::fs::write(&path, &script.code)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    println!("{}", serde_json::to_string_pretty(&script)?);
    Ok(())
}

/// Accept a single test case, an array of them, or a generate response.
pub fn test_cases_from_json(text: &str) -> Result<Vec<TestCase>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let is_response = value.get("test_cases").is_some();
    let cases = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) if is_response => {
            serde_json::from_value::<TestCaseResponse>(value)
                .context("malformed test_cases list")?
                .test_cases
        }
        serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => bail!("expected a JSON object or array"),
    };
    if cases.is_empty() {
        bail!("test case list is empty");
    }
    Ok(cases)
}

pub fn select_test_case(cases: Vec<TestCase>, id: Option<&str>) -> Result<TestCase> {
    let ids: Vec<String> = cases.iter().map(|c| c.test_id.clone()).collect();
    match id {
        Some(id) => cases
            .into_iter()
            .find(|c| c.test_id == id)
            .ok_or_else(|| anyhow::anyhow!("No test case '{}' (have: {})", id, ids.join(", "))),
        None => {
            if cases.len() > 1 {
                bail!(
                    "{} test cases in input; pick one with --id ({})",
                    cases.len(),
                    ids.join(", ")
                );
            }
            cases
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("test case list is empty"))
        }
    }
}

/// `qah selectors`: print the selector map or look one element up.
pub async fn run_selectors(
    config: &Config,
    markup: Option<PathBuf>,
    find: Option<&str>,
) -> Result<()> {
    let selectors = match markup {
        Some(path) => {
            let page = read_markup(&path)?;
            extract_selectors(&page.text, config.selectors.collision)?
        }
        None => {
            let harness = Harness::from_config(config.clone())?;
            (*harness.selectors().await?).clone()
        }
    };

    match find {
        Some(term) => match selectors.find(term) {
            Some((key, locator)) => println!("{}: {}", key, locator),
            None => bail!("No selector matching '{}'", term),
        },
        None => {
            println!("{} selector(s)", selectors.len());
            println!("{}", selectors.format_listing());
        }
    }
    Ok(())
}
