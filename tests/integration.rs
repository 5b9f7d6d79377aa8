mod support;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use support::{FakeRemote, API_KEY};
use tempfile::TempDir;

fn research_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_research"))
}

fn setup_test_env(api_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[api]
base_url = "{}"
api_key = "{}"
timeout_secs = 5

[documents]
batch_size = 100

[[taxonomy]]
area = "Markets"
topics = ["Employment", "GDP"]

[[taxonomy]]
area = "Assets"
topics = ["NVDA (Equity)"]
"#,
        api_url, API_KEY
    );

    let config_path = config_dir.join("research.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_research(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = research_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RESEARCH_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run research binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn seeded_remote() -> FakeRemote {
    let remote = FakeRemote::start();
    remote.add_document(
        "gdp",
        "DeepResearch_GDP_Outlook",
        "2025-03-04T10:00:00Z",
        "# GDP Outlook\n\n## Summary\n\nGrowth is **steady**.\n\n- Consumption\n- Investment\n",
    );
    remote.add_document(
        "jobs",
        "DeepResearch_Employment_Report",
        "2025-03-06T08:30:00Z",
        "# Employment\n\nPayrolls rose.",
    );
    remote
}

#[test]
fn test_topics_prints_configured_taxonomy() {
    let (_tmp, config) = setup_test_env("http://127.0.0.1:1");
    let (stdout, stderr, success) = run_research(&config, &["topics"]);
    assert!(success, "topics failed: {}", stderr);
    assert_eq!(stdout, "Markets\n  Employment\n  GDP\nAssets\n  NVDA (Equity)\n");
}

#[test]
fn test_topics_without_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (stdout, _, success) = run_research(&missing, &["topics"]);
    assert!(success);
    assert!(stdout.contains("Concepts"));
    assert!(stdout.contains("  Semiconductor Supply Chain"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("bad.toml");
    fs::write(&path, "[api\nbase_url = ").unwrap();
    let (_, stderr, success) = run_research(&path, &["topics"]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"));
}

#[test]
fn test_list_newest_first() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (stdout, stderr, success) = run_research(&config, &["list"]);
    assert!(success, "list failed: {}", stderr);
    let jobs = stdout.find("Employment Report").expect("employment listed");
    let gdp = stdout.find("GDP Outlook").expect("gdp listed");
    assert!(jobs < gdp);
    assert!(stdout.contains("Mar 4, 2025 • Markets • GDP"));
}

#[test]
fn test_list_filters_by_category_and_search() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (stdout, _, success) = run_research(&config, &["list", "--search", "outlook"]);
    assert!(success);
    assert!(stdout.contains("GDP Outlook"));
    assert!(!stdout.contains("Employment Report"));

    let (stdout, _, success) = run_research(&config, &["list", "--category", "Assets"]);
    assert!(success);
    assert_eq!(stdout.trim(), "No documents match your filters.");
}

#[test]
fn test_list_with_unreachable_remote_is_empty() {
    let (_tmp, config) = setup_test_env("http://127.0.0.1:1");
    let (stdout, _, success) = run_research(&config, &["list"]);
    assert!(success);
    assert_eq!(stdout.trim(), "No documents match your filters.");
}

#[test]
fn test_view_prints_markdown_and_html() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (stdout, stderr, success) = run_research(&config, &["view", "gdp"]);
    assert!(success, "view failed: {}", stderr);
    assert!(stdout.starts_with("# GDP Outlook\n"));
    assert!(stdout.contains("Growth is **steady**."));

    let (stdout, _, success) = run_research(&config, &["view", "gdp", "--html"]);
    assert!(success);
    assert!(stdout.contains("<h2>Summary</h2>"));
    assert!(stdout.contains("<strong>steady</strong>"));
}

#[test]
fn test_view_unknown_id_fails() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (_, stderr, success) = run_research(&config, &["view", "missing"]);
    assert!(!success);
    assert!(stderr.contains("missing"));
}

#[test]
fn test_export_writes_pdf() {
    let remote = seeded_remote();
    let (tmp, config) = setup_test_env(&remote.api_url());
    let out = tmp.path().join("pdf");

    let (stdout, stderr, success) =
        run_research(&config, &["export", "gdp", "--out", out.to_str().unwrap()]);
    assert!(success, "export failed: {}", stderr);

    let written = out.join("GDP_Outlook.pdf");
    assert_eq!(stdout.trim(), written.display().to_string());
    let bytes = fs::read(&written).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
}

#[test]
fn test_delete_with_yes() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (stdout, stderr, success) = run_research(&config, &["delete", "jobs", "--yes"]);
    assert!(success, "delete failed: {}", stderr);
    assert!(stdout.contains("Deleted jobs. 1 document(s) remain."));
    assert_eq!(remote.state().deleted, vec!["jobs".to_string()]);
}

#[test]
fn test_generate_rejects_unknown_area() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (_, stderr, success) = run_research(
        &config,
        &["generate", "--area", "Weather", "--topic", "Rain", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("Weather"));
    assert!(remote.state().executed.is_empty());
}

#[test]
fn test_generate_rejects_unknown_depth_label() {
    let remote = seeded_remote();
    let (_tmp, config) = setup_test_env(&remote.api_url());

    let (_, _, success) = run_research(
        &config,
        &[
            "generate", "--area", "Markets", "--topic", "GDP", "--depth", "Bottomless",
            "--progress", "off",
        ],
    );
    assert!(!success);
    assert!(remote.state().executed.is_empty());
}
