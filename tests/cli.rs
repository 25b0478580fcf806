use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn qah_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("qah");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(docs_dir.join("guides")).unwrap();
    fs::write(
        docs_dir.join("discount_codes.md"),
        "# Discount codes\n\nA discount code is validated when Apply is clicked. \
         Expired codes are rejected with an error message. \
         Each code can be used once per account.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("guides").join("shipping.txt"),
        "Standard shipping takes five business days.\n\nExpress shipping takes two business days.",
    )
    .unwrap();
    fs::write(
        docs_dir.join("payments.json"),
        r#"{"payments": {"cards": ["visa", "mastercard"], "refunds": "within five days"}}"#,
    )
    .unwrap();
    fs::write(docs_dir.join("broken.json"), "{ this is not json").unwrap();

    fs::write(
        root.join("checkout.html"),
        r#"<html><body>
        <form id="checkout-form">
          <label for="discount-code">Discount code</label>
          <input type="text" id="discount-code">
          <button id="apply-discount">Apply</button>
          <input type="email" name="email">
          <a class="help-link" href="/help">Help</a>
        </form>
        </body></html>"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[index]
dir = "{root}/data/index"

[chunking]
size = 200
overlap = 20

[embedding]
provider = "hash"
dims = 64

[sources]
root = "{root}/docs"
markup = "{root}/checkout.html"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("qah.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_qah(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = qah_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run qah binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_build_reports_sources_and_selectors() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_qah(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("selectors: 5"), "stdout={}", stdout);
    assert!(stdout.contains("ok     discount_codes.md"));
    assert!(stdout.contains("ok     guides_shipping.txt"));
    assert!(stdout.contains("FAILED broken.json"));
}

#[test]
fn test_build_explicit_files() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("docs").join("discount_codes.md");

    let (stdout, stderr, success) =
        run_qah(&config_path, &["build", file.to_str().unwrap()]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("discount_codes.md"));
    assert!(!stdout.contains("shipping"));
}

#[test]
fn test_markup_inside_docs_dir_is_not_a_source() {
    let (tmp, config_path) = setup_test_env();
    let docs = tmp.path().join("docs");
    let page = docs.join("page.html");
    fs::copy(tmp.path().join("checkout.html"), &page).unwrap();

    let (stdout, stderr, success) = run_qah(
        &config_path,
        &[
            "build",
            "--docs",
            docs.to_str().unwrap(),
            "--markup",
            page.to_str().unwrap(),
        ],
    );
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("selectors: 5"), "stdout={}", stdout);
    assert!(stdout.contains("ok     discount_codes.md"));
    assert!(!stdout.contains("page.html"), "stdout={}", stdout);
}

#[test]
fn test_stats_before_and_after_build() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_qah(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("No knowledge base"));

    let (_, stderr, success) = run_qah(&config_path, &["build"]);
    assert!(success, "build failed: {}", stderr);

    let (stdout, stderr, success) = run_qah(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("feature-hash (64 dims)"));
    assert!(stdout.contains("size 200, overlap 20"));
    assert!(stdout.contains("(1 failed)"));
    assert!(stdout.contains("from checkout.html"));
}

#[test]
fn test_selectors_from_markup_and_snapshot() {
    let (tmp, config_path) = setup_test_env();
    let markup = tmp.path().join("checkout.html");

    let (stdout, stderr, success) = run_qah(
        &config_path,
        &["selectors", "--markup", markup.to_str().unwrap(), "--find", "discount"],
    );
    assert!(success, "selectors failed: {}", stderr);
    assert_eq!(stdout.trim(), "button_apply-discount: #apply-discount");

    let (_, _, success) = run_qah(&config_path, &["build"]);
    assert!(success);
    let (stdout, _, success) = run_qah(&config_path, &["selectors"]);
    assert!(success);
    assert!(stdout.contains("5 selector(s)"));
    assert!(stdout.contains("input_email_email: input[name='email']"));
    assert!(stdout.contains("link_help: a.help-link"));
}

#[test]
fn test_generate_without_model_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();
    run_qah(&config_path, &["build"]);

    let (stdout, stderr, success) =
        run_qah(&config_path, &["generate", "discount code validation rules"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_generate_without_build_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_qah(&config_path, &["generate", "anything"]);
    assert!(!success);
    assert!(stderr.contains("no knowledge base"), "stderr={}", stderr);
}

#[test]
fn test_script_requires_id_for_several_cases() {
    let (tmp, config_path) = setup_test_env();
    let case = |id: &str| {
        format!(
            r#"{{"Test_ID": "{}", "Feature": "f", "Test_Scenario": "s", "Preconditions": [],
            "Steps": ["x"], "Expected_Result": "r", "Test_Type": "positive",
            "Grounded_In": ["discount_codes.md (chunk_0)"]}}"#,
            id
        )
    };
    let input = tmp.path().join("cases.json");
    fs::write(&input, format!("[{}, {}]", case("TC-1"), case("TC-2"))).unwrap();

    let (_, stderr, success) = run_qah(&config_path, &["script", input.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("--id"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nsize = 100\noverlap = 100\n").unwrap();

    let (_, stderr, success) = run_qah(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr={}", stderr);
}
