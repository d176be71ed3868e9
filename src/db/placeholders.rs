//! Positional placeholder scanning.
//!
//! Statements may use either `?` placeholders, numbered left to right, or
//! Postgres-native `$1`, `$2`, ... placeholders. The scanner skips string
//! literals (including `E'...'` escape strings), quoted identifiers, line and
//! block comments, and dollar-quoted bodies, so placeholder characters inside
//! them are never touched.
//!
//! When a statement contains any `$n` placeholder it is treated as native and
//! `?` characters are left alone, since they are also jsonb operators. In a
//! `?`-style statement a literal question mark is written `??`.

use std::borrow::Cow;

/// Highest parameter index the Postgres wire protocol can carry.
const MAX_PARAMS: usize = u16::MAX as usize;

/// Placeholder syntax detected in a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// No placeholders at all
    None,
    /// `?`, numbered by position
    Question,
    /// `$1`, `$2`, ...
    Numbered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    /// 1-based parameter index
    Param(usize),
    /// `??` standing for a literal `?`
    EscapedQuestion,
}

/// A placeholder occurrence: byte range in the statement and what it means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Occurrence {
    start: usize,
    end: usize,
    mark: Mark,
}

/// A statement with its placeholder positions resolved.
#[derive(Debug, Clone)]
pub struct ParsedStatement<'a> {
    sql: &'a str,
    style: PlaceholderStyle,
    occurrences: Vec<Occurrence>,
}

impl<'a> ParsedStatement<'a> {
    /// Scan `sql` for placeholders.
    pub fn parse(sql: &'a str) -> Result<Self, String> {
        let mut questions = Vec::new();
        let mut numbered = Vec::new();
        scan(sql, &mut questions, &mut numbered)?;

        let (style, occurrences) = if !numbered.is_empty() {
            (PlaceholderStyle::Numbered, numbered)
        } else if questions.iter().any(|o: &Occurrence| matches!(o.mark, Mark::Param(_))) {
            (PlaceholderStyle::Question, questions)
        } else {
            (PlaceholderStyle::None, Vec::new())
        };

        Ok(Self {
            sql,
            style,
            occurrences,
        })
    }

    /// The original statement text.
    pub fn sql(&self) -> &'a str {
        self.sql
    }

    pub fn style(&self) -> PlaceholderStyle {
        self.style
    }

    /// Number of parameters the statement expects.
    ///
    /// For `?` statements this is the number of placeholders; for numbered
    /// statements it is the highest index, since `$n` may repeat.
    pub fn param_count(&self) -> usize {
        self.occurrences
            .iter()
            .filter_map(|o| match o.mark {
                Mark::Param(index) => Some(index),
                Mark::EscapedQuestion => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// The statement in Postgres-native `$n` form.
    pub fn to_native(&self) -> Cow<'a, str> {
        match self.style {
            PlaceholderStyle::Question => {
                Cow::Owned(self.render(|index| format!("${}", index)))
            }
            PlaceholderStyle::Numbered | PlaceholderStyle::None => Cow::Borrowed(self.sql),
        }
    }

    /// Rebuild the statement, replacing every placeholder with
    /// `replacement(index)` where `index` is 1-based.
    pub fn render(&self, mut replacement: impl FnMut(usize) -> String) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.occurrences.len() * 4);
        let mut cursor = 0;
        for occurrence in &self.occurrences {
            out.push_str(&self.sql[cursor..occurrence.start]);
            match occurrence.mark {
                Mark::Param(index) => out.push_str(&replacement(index)),
                Mark::EscapedQuestion => out.push('?'),
            }
            cursor = occurrence.end;
        }
        out.push_str(&self.sql[cursor..]);
        out
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn scan(
    sql: &str,
    questions: &mut Vec<Occurrence>,
    numbered: &mut Vec<Occurrence>,
) -> Result<(), String> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    while i < len {
        let prev = if i > 0 { Some(bytes[i - 1]) } else { None };
        let next = bytes.get(i + 1).copied();

        match bytes[i] {
            b'\'' => {
                // E'...' strings honour backslash escapes
                let escapes = matches!(prev, Some(b'e' | b'E'))
                    && !(i >= 2 && is_ident_byte(bytes[i - 2]));
                i = skip_quoted(bytes, i, b'\'', escapes);
            }
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'-' if next == Some(b'-') => {
                i = match sql[i..].find('\n') {
                    Some(offset) => i + offset + 1,
                    None => len,
                };
            }
            b'/' if next == Some(b'*') => i = skip_block_comment(bytes, i),
            b'$' if prev.is_some_and(is_ident_byte) => i += 1,
            b'$' if next.is_some_and(|b| b.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < len && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let digits = &sql[start + 1..i];
                let index = digits
                    .parse::<usize>()
                    .ok()
                    .filter(|n| (1..=MAX_PARAMS).contains(n))
                    .ok_or_else(|| format!("Invalid placeholder ${}", digits))?;
                numbered.push(Occurrence {
                    start,
                    end: i,
                    mark: Mark::Param(index),
                });
            }
            b'$' => match dollar_tag(bytes, i) {
                Some(tag_end) => {
                    let tag = &sql[i..tag_end];
                    i = match sql[tag_end..].find(tag) {
                        Some(offset) => tag_end + offset + tag.len(),
                        None => len,
                    };
                }
                None => i += 1,
            },
            b'?' if next == Some(b'?') => {
                questions.push(Occurrence {
                    start: i,
                    end: i + 2,
                    mark: Mark::EscapedQuestion,
                });
                i += 2;
            }
            b'?' => {
                let index = questions
                    .iter()
                    .filter(|o| matches!(o.mark, Mark::Param(_)))
                    .count()
                    + 1;
                if index > MAX_PARAMS {
                    return Err(format!("Statement has more than {} placeholders", MAX_PARAMS));
                }
                questions.push(Occurrence {
                    start: i,
                    end: i + 1,
                    mark: Mark::Param(index),
                });
                i += 1;
            }
            _ => i += 1,
        }
    }

    Ok(())
}

/// Return the index just past the closing quote (or the end of input).
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Block comments nest in Postgres.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// If a dollar-quote opening tag (`$$` or `$tag$`) starts at `start`,
/// return the index just past it.
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'$') => return Some(i + 1),
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' || *b >= 0x80 => {}
        _ => return None,
    }
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'$' {
            return Some(i + 1);
        }
        if !(b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80) {
            return None;
        }
        i += 1;
    }
    None
}
