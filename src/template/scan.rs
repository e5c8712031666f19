use std::ops::Range;

use crate::types::Dialect;

/// One `;`-terminated statement found in a query body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawStatement {
    /// Byte range of the statement, terminator excluded
    pub(crate) range: Range<usize>,
    /// Byte ranges of `:name` placeholders, colon included
    pub(crate) placeholders: Vec<Range<usize>>,
    /// False when the statement is only whitespace and comments
    pub(crate) has_code: bool,
}

#[derive(Clone, Copy)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    Bracketed,
    LineComment,
    BlockComment,
}

/// Split `sql` into statements and locate named placeholders, skipping string literals,
/// quoted identifiers and comments.
///
/// `MySQL` additionally treats `#` as a line comment and `\` as an escape inside quotes.
pub(crate) fn scan_statements(sql: &str, dialect: Dialect) -> Vec<RawStatement> {
    let mysql = dialect == Dialect::Mysql;
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut current = RawStatement {
        range: 0..0,
        placeholders: Vec::new(),
        has_code: false,
    };
    let mut start = 0;
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    state = State::SingleQuoted;
                    current.has_code = true;
                }
                b'"' => {
                    state = State::DoubleQuoted;
                    current.has_code = true;
                }
                b'`' => {
                    state = State::Backticked;
                    current.has_code = true;
                }
                b'[' if !mysql => {
                    state = State::Bracketed;
                    current.has_code = true;
                }
                b'-' if bytes.get(idx + 1) == Some(&b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'#' if mysql => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b';' => {
                    current.range = start..idx;
                    statements.push(std::mem::replace(
                        &mut current,
                        RawStatement {
                            range: 0..0,
                            placeholders: Vec::new(),
                            has_code: false,
                        },
                    ));
                    start = idx + 1;
                }
                b':' => {
                    current.has_code = true;
                    if bytes.get(idx + 1) == Some(&b':') {
                        // `::` is a cast or scope operator, never a placeholder
                        idx += 1;
                    } else if let Some(end) = scan_identifier(bytes, idx + 1) {
                        current.placeholders.push(idx..end);
                        idx = end - 1;
                    }
                }
                b if b.is_ascii_whitespace() => {}
                _ => current.has_code = true,
            },
            State::SingleQuoted | State::DoubleQuoted | State::Backticked => {
                let quote = match state {
                    State::SingleQuoted => b'\'',
                    State::DoubleQuoted => b'"',
                    _ => b'`',
                };
                if mysql && b == b'\\' && !matches!(state, State::Backticked) {
                    idx += 1; // skip escaped character
                } else if b == quote {
                    if bytes.get(idx + 1) == Some(&quote) {
                        idx += 1; // doubled quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::Bracketed => {
                if b == b']' {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    current.range = start..bytes.len();
    statements.push(current);
    statements
}

fn scan_identifier(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes.get(start) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return None,
    }
    let mut idx = start + 1;
    while idx < bytes.len() && (bytes[idx].is_ascii_alphanumeric() || bytes[idx] == b'_') {
        idx += 1;
    }
    Some(idx)
}
