//
// Copyright 2025 Tabs Data Inc.
//

//! Function source handling: normalization, content hashing and inline
//! dependency extraction.
//!
//! Dependencies are declared in a sentinel-delimited header comment:
//!
//! ```text
//! # /// script
//! # dependencies = [ "requests>=2", "polars" ]
//! # ///
//! ```
//!
//! The block body is TOML; unknown keys inside the block are ignored.

use data_encoding::HEXLOWER;
use mb_error::mb_error;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Opening sentinel of the inline metadata block.
const BLOCK_START: &str = "# /// script";
/// Closing sentinel of the inline metadata block.
const BLOCK_END: &str = "# ///";
/// Comment marker every line inside the block must start with.
const COMMENT_MARKER: &str = "#";

#[mb_error]
pub enum SourceError {
    #[error("Inline metadata block is not closed")]
    UnterminatedBlock = 0,
    #[error("Line inside the inline metadata block does not start with '#': {0}")]
    NotAComment(String) = 1,
    #[error("Invalid inline metadata: {0}")]
    InvalidMetadata(toml::de::Error) = 2,
}

/// Normalizes function source for hashing and storage: strips the BOM, converts
/// CRLF to LF, strips trailing whitespace per line and trailing blank lines.
pub fn normalize_source(source: &str) -> String {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let mut normalized = source
        .replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    while normalized.ends_with('\n') {
        normalized.pop();
    }
    if !normalized.is_empty() {
        normalized.push('\n');
    }
    normalized
}

/// Content hash of normalized source, hex-encoded SHA-256.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

#[derive(Debug, Default, Deserialize)]
struct InlineMetadata {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Extracts the inline dependency list from a source header.
///
/// A source without a metadata block has no dependencies. A malformed block is a
/// bad-source error: every line must carry the comment marker, the block must be
/// closed, and the body must parse as TOML.
pub fn parse_inline_deps(source: &str) -> Result<Vec<String>, SourceError> {
    let mut lines = source.lines();
    loop {
        match lines.next() {
            None => return Ok(Vec::new()),
            Some(line) if line.trim_end() == BLOCK_START => break,
            // the block must be a header: only comments and blank lines before it
            Some(line) if line.trim().is_empty() || line.starts_with(COMMENT_MARKER) => continue,
            Some(_) => return Ok(Vec::new()),
        }
    }

    let mut body = String::new();
    for line in lines {
        let line = line.trim_end();
        if line == BLOCK_END {
            let metadata: InlineMetadata =
                toml::from_str(&body).map_err(SourceError::InvalidMetadata)?;
            return Ok(metadata.dependencies);
        }
        if !line.starts_with(COMMENT_MARKER) {
            return Err(SourceError::NotAComment(line.to_string()));
        }
        let stripped = line
            .strip_prefix(COMMENT_MARKER)
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .unwrap_or(line);
        body.push_str(stripped);
        body.push('\n');
    }
    Err(SourceError::UnterminatedBlock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_bom_crlf_and_trailing_whitespace() {
        let source = "\u{feff}def main():\t \r\n    return 1   \r\n\r\n\r\n";
        assert_eq!(normalize_source(source), "def main():\n    return 1\n");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_source(""), "");
        assert_eq!(normalize_source("\n\n"), "");
    }

    #[test]
    fn test_content_hash_is_stable_across_line_endings() {
        let unix = normalize_source("a = 1\nb = 2\n");
        let windows = normalize_source("a = 1\r\nb = 2\r\n");
        assert_eq!(content_hash(&unix), content_hash(&windows));
        assert_ne!(content_hash(&unix), content_hash(&normalize_source("a = 2\n")));
    }

    #[test]
    fn test_parse_deps() {
        let source = r#"# /// script
# dependencies = [ "requests>=2.31", "polars" ]
# ///

def main(input):
    return input
"#;
        assert_eq!(
            parse_inline_deps(source).unwrap(),
            vec!["requests>=2.31".to_string(), "polars".to_string()]
        );
    }

    #[test]
    fn test_parse_deps_absent() {
        assert_eq!(parse_inline_deps("def main():\n    pass\n").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_parse_deps_after_leading_comment() {
        let source = "# my function\n\n# /// script\n# dependencies = [\"rich\"]\n# ///\n";
        assert_eq!(parse_inline_deps(source).unwrap(), vec!["rich".to_string()]);
    }

    #[test]
    fn test_parse_deps_block_after_code_is_ignored() {
        let source = "x = 1\n# /// script\n# dependencies = [\"rich\"]\n# ///\n";
        assert_eq!(parse_inline_deps(source).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_parse_deps_unknown_keys_ignored() {
        let source = "# /// script\n# requires-python = \">=3.11\"\n# dependencies = []\n# ///\n";
        assert_eq!(parse_inline_deps(source).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_parse_deps_unterminated_block() {
        let source = "# /// script\n# dependencies = []\n";
        assert!(matches!(
            parse_inline_deps(source),
            Err(SourceError::UnterminatedBlock)
        ));
    }

    #[test]
    fn test_parse_deps_non_comment_line() {
        let source = "# /// script\ndependencies = []\n# ///\n";
        assert!(matches!(
            parse_inline_deps(source),
            Err(SourceError::NotAComment(_))
        ));
    }

    #[test]
    fn test_parse_deps_bad_toml() {
        let source = "# /// script\n# dependencies = [oops\n# ///\n";
        assert!(matches!(
            parse_inline_deps(source),
            Err(SourceError::InvalidMetadata(_))
        ));
    }
}
