//! Production code must not silence dead code or panic on recoverable errors.
//!
//! Only the part of each file before its `#[cfg(test)]` module is checked.

use std::fs;
use std::path::{Path, PathBuf};

const CRATES: [&str; 3] = ["reelplay-core", "reelplay-sim", "reelplay-cli"];

#[derive(Debug)]
struct Violation {
    file_path: String,
    line_number: usize,
    rule: &'static str,
    context: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".."))
}

fn find_rust_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            find_rust_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
    Ok(())
}

fn rule_for(line: &str) -> Option<&'static str> {
    let code = line.split("//").next().unwrap_or(line);
    if code.contains("#[allow(") && code.contains("dead_code") {
        Some("allow(dead_code)")
    } else if code.contains(".unwrap()") {
        Some("unwrap()")
    } else if code.contains(".expect(") {
        Some("expect()")
    } else {
        None
    }
}

fn check_source(path: &Path, content: &str, violations: &mut Vec<Violation>) {
    for (index, line) in content.lines().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            break;
        }
        if let Some(rule) = rule_for(line) {
            violations.push(Violation {
                file_path: path.display().to_string(),
                line_number: index + 1,
                rule,
                context: line.trim().to_string(),
            });
        }
    }
}

#[test]
fn test_production_code_has_no_forbidden_patterns() {
    let root = workspace_root();
    let mut files = Vec::new();
    for krate in CRATES {
        find_rust_files(&root.join(krate).join("src"), &mut files).unwrap();
    }
    assert!(!files.is_empty(), "no sources found under {}", root.display());

    let mut violations = Vec::new();
    for file in &files {
        let content = fs::read_to_string(file).unwrap();
        check_source(file, &content, &mut violations);
    }

    for violation in &violations {
        println!(
            "{}:{} [{}] {}",
            violation.file_path, violation.line_number, violation.rule, violation.context
        );
    }
    assert!(
        violations.is_empty(),
        "{} violation(s) in {} file(s)",
        violations.len(),
        files.len()
    );
}

#[test]
fn test_rules_skip_test_modules_and_comments() {
    let source = "fn a() {}\n// x.unwrap() in prose\n#[cfg(test)]\nmod tests { fn b() { x.unwrap(); } }\n";
    let mut violations = Vec::new();
    check_source(Path::new("lib.rs"), source, &mut violations);
    assert!(violations.is_empty());

    let source = "#[allow(dead_code)]\nfn c() { y.expect(\"boom\"); }\n";
    check_source(Path::new("lib.rs"), source, &mut violations);
    let rules: Vec<_> = violations.iter().map(|v| v.rule).collect();
    assert_eq!(rules, vec!["allow(dead_code)", "expect()"]);
}
