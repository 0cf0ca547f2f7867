use std::fs;
use std::path::{Path, PathBuf};

// Only the orchestrator may ask a giver to move items or change friends
const ALLOWED_HANDOFF_CALLERS: &[&str] = &[
    "src/orchestrator/orchestrator.rs",
    "src/orchestrator/handoff.rs",
    "src/session/dry_run.rs",
];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

#[test]
fn handoff_session_calls_are_limited_to_the_orchestrator() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            let is_handoff_call =
                trimmed.contains(".transfer_items(") || trimmed.contains(".add_friend(");
            if !is_handoff_call {
                continue;
            }
            if ALLOWED_HANDOFF_CALLERS.iter().any(|allowed| *allowed == rel) {
                continue;
            }
            offenders.push(format!("{}:{}", rel, idx + 1));
        }
    }

    assert!(
        offenders.is_empty(),
        "handoff session calls outside the orchestrator:\n{}",
        offenders.join("\n")
    );
}
