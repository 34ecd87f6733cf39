//! Minimal reader for the QIF header-list text format used by this
//! crate's own tests and by the interop test suites QPACK implementations
//! commonly share. Only the plain `name\tvalue` list format is handled
//! here; this crate has no interest in the encoder recipe annotations or
//! binary interop framing some QIF variants carry, since those describe
//! wire-level behavior this crate already exercises directly in its own
//! encoder/decoder tests.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QifError {
    /// A non-blank, non-comment line had no tab separating name and value.
    MissingTab { line: usize },
}

impl fmt::Display for QifError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QifError::MissingTab { line } => write!(f, "line {}: expected \"name\\tvalue\"", line),
        }
    }
}

/// Parses a QIF document into one header list per blank-line-separated
/// block. `#`-prefixed lines are comments and are skipped wherever they
/// appear.
pub fn parse(input: &str) -> Result<Vec<Vec<(Vec<u8>, Vec<u8>)>>, QifError> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for (i, raw_line) in input.lines().enumerate() {
        let line_no = i + 1;
        if raw_line.starts_with('#') {
            continue;
        }
        if raw_line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        let tab = raw_line.find('\t').ok_or(QifError::MissingTab { line: line_no })?;
        let name = raw_line[..tab].as_bytes().to_vec();
        let value = raw_line[tab + 1..].as_bytes().to_vec();
        current.push((name, value));
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    Ok(blocks)
}

/// Renders a header list back into QIF's `name\tvalue` form, one line per
/// field, for round-trip tests.
pub fn render(block: &[(Vec<u8>, Vec<u8>)]) -> String {
    let mut out = String::new();
    for (name, value) in block {
        out.push_str(&String::from_utf8_lossy(name));
        out.push('\t');
        out.push_str(&String::from_utf8_lossy(value));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_two_blocks_separated_by_blank_line() {
        let doc = ":method\tGET\n:path\t/\n\n:method\tPOST\n:path\t/submit\n";
        let blocks = parse(doc).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0][0], (b":method".to_vec(), b"GET".to_vec()));
        assert_eq!(blocks[1][1], (b":path".to_vec(), b"/submit".to_vec()));
    }

    #[test]
    fn skips_comment_lines() {
        let doc = "# this is a comment\n:method\tGET\n";
        let blocks = parse(doc).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].len(), 1);
    }

    #[test]
    fn missing_tab_is_an_error() {
        let doc = ":method GET\n";
        assert_eq!(parse(doc), Err(QifError::MissingTab { line: 1 }));
    }

    #[test]
    fn render_round_trips_through_parse() {
        let original = vec![(b":method".to_vec(), b"GET".to_vec()), (b":path".to_vec(), b"/".to_vec())];
        let rendered = render(&original);
        let parsed = parse(&rendered).unwrap();
        assert_eq!(parsed[0], original);
    }
}
