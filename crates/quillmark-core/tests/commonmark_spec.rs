//! Data-driven harness over the CommonMark conformance corpus. Drop the
//! upstream `spec.json` into `tests/commonmark/` at the workspace root to
//! run it; the harness skips quietly when the corpus is absent.

use quillmark_core::{markdown, RenderOptions};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SpecExample {
    markdown: String,
    html: String,
    example: u32,
    section: String,
}

#[test]
fn commonmark_spec() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    let spec_path = root.join("tests/commonmark/spec.json");
    if !spec_path.exists() {
        eprintln!("spec.json not found at {:?}; skipping corpus run", spec_path);
        return;
    }

    let spec_json = fs::read_to_string(&spec_path).expect("read spec.json");
    let examples: Vec<SpecExample> = serde_json::from_str(&spec_json).expect("parse spec.json");

    let options = RenderOptions::default();
    let mut passed = 0;
    let mut failures = Vec::new();
    for example in &examples {
        let actual = markdown(&example.markdown, &options);
        if actual == example.html {
            passed += 1;
        } else {
            failures.push(example);
        }
    }

    let total = examples.len();
    let pass_rate = (passed as f64 / total as f64) * 100.0;
    println!("CommonMark corpus: {}/{} ({:.1}%)", passed, total, pass_rate);

    if !failures.is_empty() {
        let mut by_section: HashMap<&str, u32> = HashMap::new();
        for failure in &failures {
            *by_section.entry(failure.section.as_str()).or_insert(0) += 1;
        }
        let mut sections: Vec<_> = by_section.into_iter().collect();
        sections.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
        println!("failures by section:");
        for (section, count) in sections {
            println!("  {}: {}", section, count);
        }
        for failure in failures.iter().take(5) {
            println!(
                "\n--- example {} ({})\ninput:\n{}\nexpected:\n{}\nactual:\n{}",
                failure.example,
                failure.section,
                failure.markdown,
                failure.html,
                markdown(&failure.markdown, &options)
            );
        }
    }

    assert!(
        pass_rate >= 60.0,
        "CommonMark pass rate {:.1}% fell below the baseline",
        pass_rate
    );
}
