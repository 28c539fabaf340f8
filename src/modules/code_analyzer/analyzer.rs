//! Input cleanup and style heuristics for Rust snippets.

use std::sync::LazyLock;

use regex::Regex;

const LONG_LINE: usize = 100;

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[A-Za-z0-9_+-]*[ \t]*\n?").expect("valid regex"));
static FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n?```\s*$").expect("valid regex"));
static UNWRAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.unwrap\(\)").expect("valid regex"));
static DEBUG_PRINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(dbg|println|eprintln)!").expect("valid regex"));
static UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bunsafe\s*\{").expect("valid regex"));
static CLONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.clone\(\)").expect("valid regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub code: String,
    /// Non-breaking spaces or zero-width characters were replaced.
    pub fixed_invisible: bool,
}

/// Strip Markdown fences and invisible characters that break parsing.
pub fn prepare(input: &str) -> Prepared {
    let mut code = input.to_string();
    if FENCE_OPEN.is_match(&code) && FENCE_CLOSE.is_match(&code) {
        code = FENCE_OPEN.replace(&code, "").into_owned();
        code = FENCE_CLOSE.replace(&code, "").into_owned();
    }
    let fixed_invisible = code.contains(['\u{00A0}', '\u{200B}', '\u{FEFF}']);
    let code = code
        .replace('\u{00A0}', " ")
        .replace(['\u{200B}', '\u{FEFF}'], "")
        .trim_matches('\n')
        .to_string();
    Prepared { code, fixed_invisible }
}

/// Style advice for a snippet. Empty when nothing stands out.
pub fn recommendations(code: &str) -> Vec<String> {
    let mut tips = Vec::new();

    let unwraps = UNWRAP.find_iter(code).count();
    if unwraps > 0 {
        tips.push(format!("Replace .unwrap() with ? or explicit error handling ({unwraps} found)."));
    }
    if DEBUG_PRINT.is_match(code) {
        tips.push("Debug output (println!/dbg!) left in the code; prefer the tracing macros.".to_string());
    }

    let indented: Vec<&str> = code
        .lines()
        .filter(|l| l.starts_with(' ') || l.starts_with('\t'))
        .collect();
    let tabs = indented.iter().any(|l| l.starts_with('\t'));
    let spaces = indented.iter().any(|l| l.starts_with(' '));
    if tabs && spaces {
        tips.push("Indentation mixes tabs and spaces.".to_string());
    } else if tabs {
        tips.push("Indent with 4 spaces instead of tabs.".to_string());
    }

    let long = code.lines().filter(|l| l.chars().count() > LONG_LINE).count();
    if long > 0 {
        tips.push(format!("{long} line(s) longer than {LONG_LINE} characters."));
    }
    let trailing = code.lines().filter(|l| l.ends_with(' ') || l.ends_with('\t')).count();
    if trailing > 0 {
        tips.push(format!("Trailing whitespace on {trailing} line(s)."));
    }
    if UNSAFE.is_match(code) && !code.contains("SAFETY") {
        tips.push("Explain each unsafe block with a // SAFETY: comment.".to_string());
    }
    let clones = CLONE.find_iter(code).count();
    if clones > 3 {
        tips.push(format!("{clones} .clone() calls; check whether borrowing would do."));
    }
    tips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_strips_fences() {
        let p = prepare("```rust\nfn main() {}\n```");
        assert_eq!(p.code, "fn main() {}");
        assert!(!p.fixed_invisible);
        let p = prepare("```\nlet x = 1;\n```\n");
        assert_eq!(p.code, "let x = 1;");
    }

    #[test]
    fn test_prepare_replaces_nbsp() {
        let p = prepare("let\u{00A0}x = 1;\u{200B}");
        assert_eq!(p.code, "let x = 1;");
        assert!(p.fixed_invisible);
    }

    #[test]
    fn test_unfenced_code_is_kept() {
        assert_eq!(prepare("\nfn a() {}\n").code, "fn a() {}");
    }

    #[test]
    fn test_recommendations() {
        let code = "fn main() {\n\tlet x = foo().unwrap();\n    println!(\"{x}\");  \n}";
        let tips = recommendations(code);
        assert!(tips.iter().any(|t| t.contains(".unwrap()") && t.contains("1 found")));
        assert!(tips.iter().any(|t| t.contains("Debug output")));
        assert!(tips.iter().any(|t| t.contains("mixes tabs")));
        assert!(tips.iter().any(|t| t.contains("Trailing whitespace on 1")));
    }

    #[test]
    fn test_clean_code_has_no_recommendations() {
        assert!(recommendations("fn add(a: i32, b: i32) -> i32 {\n    a + b\n}").is_empty());
    }

    #[test]
    fn test_unsafe_without_safety_comment() {
        assert!(recommendations("unsafe { ptr.read() }").iter().any(|t| t.contains("SAFETY")));
        assert!(recommendations("// SAFETY: aligned\nunsafe { ptr.read() }").is_empty());
    }
}
