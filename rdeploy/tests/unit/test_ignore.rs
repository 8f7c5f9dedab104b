//! Ignore matching tests

use rdeploy::sync::ignore::{parse_patterns, should_ignore, PatternSet};

#[test]
fn test_directory_pattern_excludes_nested_file() {
    let set = PatternSet::new(["*.log", "build/"]).unwrap();
    assert!(should_ignore("app/build/out.log", &set));
    assert!(should_ignore("app/build/", &set));
    assert!(!should_ignore("app/src/main.py", &set));
}

#[test]
fn test_whitelisted_names_are_never_ignored() {
    let set = PatternSet::new(["*.md", "*.txt", "*.py"]).unwrap();
    assert!(!should_ignore("README.md", &set));
    assert!(!should_ignore("backend/prompt.txt", &set));
    assert!(!should_ignore("start_all.py", &set));
    assert!(should_ignore("CHANGELOG.md", &set));
}

#[test]
fn test_critical_patterns_apply_without_declarations() {
    let set = PatternSet::critical_only().unwrap();
    assert!(should_ignore("frontend/node_modules/react/index.js", &set));
    assert!(should_ignore("backend/__pycache__/", &set));
    assert!(should_ignore("lib/native.so", &set));
    assert!(!should_ignore("backend/", &set));
}

#[test]
fn test_backslash_paths_match_like_forward_slashes() {
    let set = PatternSet::new(["dist/"]).unwrap();
    assert!(should_ignore(r"web\dist\bundle.js", &set));
}

#[test]
fn test_parse_patterns_skips_comments_and_blanks() {
    let patterns = parse_patterns("# build output\n\nbuild/\n  *.tmp  \n");
    assert_eq!(patterns, vec!["build/", "*.tmp"]);
}
