use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

const CORPUS: &str = r#"{"id": "wiki::en::A/B testing", "source_type": "wikipedia", "title": "A/B testing", "url": "https://en.wikipedia.org/wiki/A/B_testing", "language": "en", "year": 2024, "topics": ["ab_testing"], "text": "A/B testing compares two versions of a page by splitting live traffic between a control and a variant."}
{"id": "wiki::fr::Test A/B", "source_type": "wikipedia", "title": "Test A/B", "url": "https://fr.wikipedia.org/wiki/Test_A/B", "language": "fr", "year": 2024, "topics": ["ab_testing"], "text": "Le test A/B consiste à comparer deux variantes d'une même page auprès de visiteurs différents."}
{"id": "wiki::en::Multi-armed bandit", "source_type": "wikipedia", "title": "Multi-armed bandit", "url": "https://en.wikipedia.org/wiki/Multi-armed_bandit", "language": "en", "year": 2023, "topics": ["bandits"], "text": "A bandit algorithm shifts traffic toward the better arm while it is still learning."}
"#;

/// Helper to run the CLI binary against an index inside `temp_dir`
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_xpa-retriever"))
        .args(args)
        .arg("--embedder")
        .arg("hashing")
        .arg("--index")
        .arg(index_path(temp_dir))
        .output()?;
    Ok(output)
}

fn index_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("index.sqlite")
}

fn write_corpus(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("corpus.jsonl");
    std::fs::write(&path, CORPUS)?;
    Ok(path)
}

fn build(temp_dir: &TempDir) -> Result<Output> {
    let corpus = write_corpus(temp_dir.path())?;
    let corpus = corpus.to_string_lossy().to_string();
    run_cli(temp_dir, &["build", "--corpus", &corpus])
}

#[test]
fn test_build_prints_summary_and_smoke_queries() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = build(&temp_dir)?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Indexed 3 documents into 3 chunks"));
    assert!(stdout.contains("Query: What is A/B testing?"));
    assert!(stdout.contains("Query: Qu'est-ce qu'un test A/B ?"));
    assert!(stdout.contains("https://fr.wikipedia.org/wiki/Test_A/B"));
    assert!(index_path(&temp_dir).exists());
    Ok(())
}

#[test]
fn test_search_json_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    assert!(build(&temp_dir)?.status.success());

    let output = run_cli(
        &temp_dir,
        &["search", "Qu'est-ce qu'un test A/B ?", "-k", "2", "--format", "json"],
    )?;
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let results = results.as_array().expect("json array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["rank"], 1);
    let top_id = results[0]["document_id"].as_str().unwrap_or_default();
    assert!(top_id == "wiki::fr::Test A/B" || top_id == "wiki::en::A/B testing");
    Ok(())
}

#[test]
fn test_stats_json_output() -> Result<()> {
    let temp_dir = TempDir::new()?;
    assert!(build(&temp_dir)?.status.success());

    let output = run_cli(&temp_dir, &["stats", "--format", "json"])?;
    assert!(output.status.success());

    let stats: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(stats["manifest"]["document_count"], 3);
    assert_eq!(stats["manifest"]["format_version"], 1);
    assert_eq!(stats["chunks_per_language"]["en"], 2);
    assert_eq!(stats["chunks_per_language"]["fr"], 1);
    Ok(())
}

#[test]
fn test_interactive_reads_until_eof() -> Result<()> {
    let temp_dir = TempDir::new()?;
    assert!(build(&temp_dir)?.status.success());

    let mut child = Command::new(env!("CARGO_BIN_EXE_xpa-retriever"))
        .args(["interactive", "-k", "1", "--embedder", "hashing", "--index"])
        .arg(index_path(&temp_dir))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all("\nbandit arm\n".as_bytes())?;

    let output = child.wait_with_output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("1. [EN] Multi-armed bandit"));
    assert!(stdout.contains("   https://en.wikipedia.org/wiki/Multi-armed_bandit"));
    Ok(())
}

#[test]
fn test_search_without_index_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["search", "anything"])?;

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr)?;
    assert!(stderr.contains("cannot load index"));
    Ok(())
}

#[test]
fn test_build_rejects_bad_chunking_flags() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let corpus = write_corpus(temp_dir.path())?;
    let corpus = corpus.to_string_lossy().to_string();

    let output = run_cli(
        &temp_dir,
        &[
            "build",
            "--corpus",
            &corpus,
            "--max-chunk-length",
            "100",
            "--chunk-overlap",
            "90",
        ],
    )?;
    assert!(!output.status.success());
    assert!(!index_path(&temp_dir).exists());
    Ok(())
}
