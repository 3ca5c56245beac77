//! Logical line counting.
//!
//! A logical line is a line that carries code: blank lines, comment-only
//! lines, lines inside block comments and Python docstring bodies do not
//! count. The counter is a small per-line state machine driven by a
//! [`CommentSyntax`] chosen from the file extension.
//!
//! The counter does not tokenize the language. Known limits: a comment
//! opener inside a JavaScript regex literal (`/a\/*b/`) starts a block
//! comment, and Rust raw strings (`r#"..."#`) are treated as plain strings.

use std::fmt;

/// Comment and string rules of a language family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentSyntax {
    pub line: &'static [&'static str],
    pub block: Option<(&'static str, &'static str)>,
    /// Block comments nest (`/* /* */ */` is one comment).
    pub nested_blocks: bool,
    /// Single-line string delimiters.
    pub quotes: &'static [char],
    /// Python-style `"""` / `'''` strings that may span lines.
    pub triple_quotes: bool,
}

const PYTHON: CommentSyntax = CommentSyntax {
    line: &["#"],
    block: None,
    nested_blocks: false,
    quotes: &['"', '\''],
    triple_quotes: true,
};

const RUST: CommentSyntax = CommentSyntax {
    line: &["//"],
    block: Some(("/*", "*/")),
    nested_blocks: true,
    quotes: &['"'],
    triple_quotes: false,
};

const C_FAMILY: CommentSyntax = CommentSyntax {
    line: &["//"],
    block: Some(("/*", "*/")),
    nested_blocks: false,
    quotes: &['"', '\''],
    triple_quotes: false,
};

const JAVASCRIPT: CommentSyntax = CommentSyntax {
    line: &["//"],
    block: Some(("/*", "*/")),
    nested_blocks: false,
    quotes: &['"', '\'', '`'],
    triple_quotes: false,
};

const PHP: CommentSyntax = CommentSyntax {
    line: &["//", "#"],
    block: Some(("/*", "*/")),
    nested_blocks: false,
    quotes: &['"', '\''],
    triple_quotes: false,
};

const HASH: CommentSyntax = CommentSyntax {
    line: &["#"],
    block: None,
    nested_blocks: false,
    quotes: &['"', '\''],
    triple_quotes: false,
};

/// No comment syntax known: every non-blank line counts.
const PLAIN: CommentSyntax = CommentSyntax {
    line: &[],
    block: None,
    nested_blocks: false,
    quotes: &[],
    triple_quotes: false,
};

/// Pick the comment rules for a file extension (without dot, lowercase).
pub fn syntax_for(extension: &str) -> CommentSyntax {
    match extension {
        "py" | "pyi" | "pyw" => PYTHON,
        "rs" => RUST,
        "c" | "h" | "cc" | "cpp" | "cxx" | "hpp" | "hh" | "cs" | "java" | "go" | "kt" | "kts"
        | "scala" | "swift" | "dart" => C_FAMILY,
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => JAVASCRIPT,
        "php" => PHP,
        "rb" | "sh" | "bash" | "zsh" | "pl" | "r" | "yaml" | "yml" | "toml" => HASH,
        _ => PLAIN,
    }
}

/// Why a file could not be counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCountError {
    NotUtf8,
    Binary,
    UnterminatedComment { line: usize },
    UnterminatedString { line: usize },
}

impl fmt::Display for LineCountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineCountError::NotUtf8 => write!(f, "not valid UTF-8"),
            LineCountError::Binary => write!(f, "binary content"),
            LineCountError::UnterminatedComment { line } => {
                write!(f, "unterminated block comment opened on line {}", line)
            }
            LineCountError::UnterminatedString { line } => {
                write!(f, "unterminated multi-line string opened on line {}", line)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Code,
    Block { opened: usize, depth: usize },
    Triple { delim: &'static str, opened: usize },
}

/// Count logical lines in raw file bytes.
pub fn count_bytes(bytes: &[u8], syntax: &CommentSyntax) -> Result<usize, LineCountError> {
    if bytes.contains(&0) {
        return Err(LineCountError::Binary);
    }
    let source = std::str::from_utf8(bytes).map_err(|_| LineCountError::NotUtf8)?;
    count_logical_lines(source, syntax)
}

/// Count logical lines of `source`.
pub fn count_logical_lines(source: &str, syntax: &CommentSyntax) -> Result<usize, LineCountError> {
    let mut state = State::Code;
    let mut count = 0;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let mut has_code = false;
        let mut rest = line;

        loop {
            match state {
                State::Block { opened, depth } => {
                    let Some((open, close)) = syntax.block else {
                        state = State::Code;
                        continue;
                    };
                    let next_open = if syntax.nested_blocks {
                        rest.find(open)
                    } else {
                        None
                    };
                    match (next_open, rest.find(close)) {
                        (Some(o), Some(c)) if o < c => {
                            rest = &rest[o + open.len()..];
                            state = State::Block { opened, depth: depth + 1 };
                        }
                        (Some(o), None) => {
                            rest = &rest[o + open.len()..];
                            state = State::Block { opened, depth: depth + 1 };
                        }
                        (_, Some(c)) => {
                            rest = &rest[c + close.len()..];
                            state = if depth > 1 {
                                State::Block { opened, depth: depth - 1 }
                            } else {
                                State::Code
                            };
                        }
                        (None, None) => break,
                    }
                }
                State::Triple { delim, .. } => match rest.find(delim) {
                    Some(pos) => {
                        rest = &rest[pos + delim.len()..];
                        state = State::Code;
                    }
                    None => break,
                },
                State::Code => {
                    rest = rest.trim_start();
                    if rest.is_empty() {
                        break;
                    }
                    if syntax.line.iter().any(|marker| rest.starts_with(marker)) {
                        break;
                    }
                    if let Some((open, _)) = syntax.block {
                        if rest.starts_with(open) {
                            rest = &rest[open.len()..];
                            state = State::Block {
                                opened: line_no,
                                depth: 1,
                            };
                            continue;
                        }
                    }
                    if syntax.triple_quotes {
                        if let Some(delim) = ["\"\"\"", "'''"].into_iter().find(|d| rest.starts_with(d)) {
                            // A string statement on its own (docstring) is not code;
                            // code before it on the same line already counted.
                            rest = &rest[delim.len()..];
                            state = State::Triple {
                                delim,
                                opened: line_no,
                            };
                            continue;
                        }
                    }

                    let Some(c) = rest.chars().next() else {
                        break;
                    };
                    has_code = true;

                    if syntax.quotes.contains(&c) {
                        rest = skip_string(&rest[c.len_utf8()..], c);
                    } else {
                        rest = &rest[c.len_utf8()..];
                    }
                }
            }
        }

        if has_code {
            count += 1;
        }
    }

    match state {
        State::Code => Ok(count),
        State::Block { opened, .. } => Err(LineCountError::UnterminatedComment { line: opened }),
        State::Triple { opened, .. } => Err(LineCountError::UnterminatedString { line: opened }),
    }
}

/// Skip past the closing `quote`, honoring backslash escapes.
/// Single-line strings end at end of line even when unterminated.
fn skip_string(rest: &str, quote: char) -> &str {
    let mut escaped = false;
    for (pos, c) in rest.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return &rest[pos + c.len_utf8()..];
        }
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_comments_and_blanks() {
        let src = "# header\n\nimport os\n\n    # indented comment\nx = 1  # trailing\n";
        assert_eq!(count_logical_lines(src, &PYTHON), Ok(2));
    }

    #[test]
    fn test_python_docstrings_do_not_count() {
        let src = r#""""Module docstring.

Spans lines.
"""

def f():
    '''One-line docstring.'''
    return 1
"#;
        assert_eq!(count_logical_lines(src, &PYTHON), Ok(2));
    }

    #[test]
    fn test_python_assigned_multiline_string_counts_once() {
        let src = "query = \"\"\"\nSELECT *\nFROM t\n\"\"\"\nprint(query)\n";
        assert_eq!(count_logical_lines(src, &PYTHON), Ok(2));
    }

    #[test]
    fn test_hash_inside_string_is_code() {
        let src = "url = \"http://x/#anchor\"\ns = 'it\\'s # not a comment'\n";
        assert_eq!(count_logical_lines(src, &PYTHON), Ok(2));
    }

    #[test]
    fn test_c_family_block_comments() {
        let src = "/*\n * License\n */\nint main() {\n  /* inline */ return 0; // done\n}\n";
        assert_eq!(count_logical_lines(src, &C_FAMILY), Ok(3));
    }

    #[test]
    fn test_code_after_block_comment_close() {
        let src = "/* start\nend */ int x = 1;\n";
        assert_eq!(count_logical_lines(src, &C_FAMILY), Ok(1));
    }

    #[test]
    fn test_comment_marker_in_string() {
        let src = "let s = \"// not a comment /* nor this\";\n";
        assert_eq!(count_logical_lines(src, &RUST), Ok(1));
    }

    #[test]
    fn test_rust_lifetimes_do_not_open_strings() {
        let src = "fn f<'a>(x: &'a str) -> &'a str {\n    x // tail\n}\n";
        assert_eq!(count_logical_lines(src, &RUST), Ok(3));
    }

    #[test]
    fn test_rust_nested_block_comments() {
        let src = "/* outer /* inner */ still outer */\nfn main() {}\n/* a /* b\n */ c */ let x = 1;\n";
        assert_eq!(count_logical_lines(src, &RUST), Ok(2));
    }

    #[test]
    fn test_c_block_comments_do_not_nest() {
        let src = "/* a /* b */ int x = 1;\n";
        assert_eq!(count_logical_lines(src, &C_FAMILY), Ok(1));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let src = "int x;\n/* never closed\nint y;\n";
        assert_eq!(
            count_logical_lines(src, &C_FAMILY),
            Err(LineCountError::UnterminatedComment { line: 2 })
        );
    }

    #[test]
    fn test_unterminated_docstring() {
        let src = "def f():\n    \"\"\"oops\n    return 1\n";
        assert_eq!(
            count_logical_lines(src, &PYTHON),
            Err(LineCountError::UnterminatedString { line: 2 })
        );
    }

    #[test]
    fn test_plain_counts_non_blank_lines() {
        let src = "a\n\n  \nb # c\n";
        assert_eq!(count_logical_lines(src, &PLAIN), Ok(2));
    }

    #[test]
    fn test_count_bytes_rejects_invalid_input() {
        assert_eq!(count_bytes(&[0xff, 0xfe, b'x'], &PYTHON), Err(LineCountError::NotUtf8));
        assert_eq!(count_bytes(b"x = 1\0\n", &PYTHON), Err(LineCountError::Binary));
        assert_eq!(count_bytes(b"x = 1\r\ny = 2\r\n", &PYTHON), Ok(2));
    }

    #[test]
    fn test_syntax_for_extension() {
        assert_eq!(syntax_for("py"), PYTHON);
        assert_eq!(syntax_for("tsx"), JAVASCRIPT);
        assert_eq!(syntax_for("java"), C_FAMILY);
        assert_eq!(syntax_for("unknown"), PLAIN);
    }
}
