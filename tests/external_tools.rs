//! Integration tests against the real external binaries.
//!
//! These tests require `rustfmt` on PATH.
//!
//! Run with: cargo test --features integ_test --test external_tools

#[cfg(feature = "integ_test")]
mod tests {
    use swiftbot::modules::code_analyzer::formatter::{CodeFormatter, FormatError, Rustfmt};

    fn rustfmt() -> Rustfmt {
        let fmt = Rustfmt::detect("rustfmt");
        assert!(fmt.available(), "rustfmt must be installed for integration tests");
        fmt
    }

    #[tokio::test]
    async fn test_formats_messy_file() {
        let out = rustfmt().format("fn main(){let x=1;println!(\"{}\",x);}").await.unwrap();
        assert!(out.changed);
        assert!(out.code.contains("fn main() {\n    let x = 1;"));
    }

    #[tokio::test]
    async fn test_formats_bare_statements() {
        let out = rustfmt().format("let   y=vec![1,2];").await.unwrap();
        assert_eq!(out.code.trim(), "let y = vec![1, 2];");
    }

    #[tokio::test]
    async fn test_reports_syntax_error() {
        let err = rustfmt().format("fn main( {").await.unwrap_err();
        assert!(matches!(err, FormatError::Syntax(_)));
    }

    #[tokio::test]
    async fn test_clean_code_is_unchanged() {
        let out = rustfmt().format("fn main() {}\n").await.unwrap();
        assert!(!out.changed);
    }
}
