//! Placeholder scanning for SQL and procedure text
//!
//! Four placeholder forms are recognised:
//!
//! | form     | meaning                                         |
//! |----------|-------------------------------------------------|
//! | `{name}` | value captured from the request path            |
//! | `:name`  | input bind from the query string or body        |
//! | `$name`  | the whole request payload as one JSON string    |
//! | `@name`  | output produced by a procedure                  |
//!
//! The scanner makes one pass over the text and records the byte span of
//! each placeholder. Quoted literals, comments, `::` casts, `:=`
//! assignments and `@@` system variables are skipped. Rewrites replace spans
//! back to front so earlier offsets stay valid.

use std::collections::HashSet;
use std::ops::Range;

use dynrest_common::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    Path,
    Query,
    Dollar,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    pub name: String,
    /// Byte range of the whole placeholder, sigils included
    pub span: Range<usize>,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// End offset of the identifier starting at `start`, if one starts there
fn ident_end(bytes: &[u8], start: usize) -> Option<usize> {
    if start >= bytes.len() || !is_ident_start(bytes[start]) {
        return None;
    }
    let mut end = start + 1;
    while end < bytes.len() && is_ident_char(bytes[end]) {
        end += 1;
    }
    Some(end)
}

fn skip_until(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    bytes[from..]
        .windows(terminator.len())
        .position(|w| w == terminator)
        .map_or(bytes.len(), |pos| from + pos + terminator.len())
}

/// Scan `sql` for placeholders in order of appearance
#[must_use]
pub fn scan(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        match b {
            b'\'' | b'"' => {
                i = skip_until(bytes, i + 1, &[b]);
            }
            b'-' if next == Some(b'-') => {
                i = skip_until(bytes, i + 2, b"\n");
            }
            b'/' if next == Some(b'*') => {
                i = skip_until(bytes, i + 2, b"*/");
            }
            b':' if matches!(next, Some(b':' | b'=')) => {
                i += 2;
            }
            b'@' if next == Some(b'@') => {
                i += 2;
                while i < bytes.len() && (is_ident_char(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
            }
            b'{' => {
                let closed = ident_end(bytes, i + 1).filter(|&end| bytes.get(end) == Some(&b'}'));
                if let Some(end) = closed {
                    found.push(Placeholder {
                        kind: PlaceholderKind::Path,
                        name: sql[i + 1..end].to_string(),
                        span: i..end + 1,
                    });
                    i = end + 1;
                } else {
                    i += 1;
                }
            }
            b':' | b'$' | b'@' => {
                let after_ident = i > 0 && is_ident_char(bytes[i - 1]);
                match ident_end(bytes, i + 1) {
                    Some(end) if !after_ident => {
                        let kind = match b {
                            b':' => PlaceholderKind::Query,
                            b'$' => PlaceholderKind::Dollar,
                            _ => PlaceholderKind::Output,
                        };
                        found.push(Placeholder {
                            kind,
                            name: sql[i + 1..end].to_string(),
                            span: i..end,
                        });
                        i = end;
                    }
                    Some(end) => i = end,
                    None => i += 1,
                }
            }
            _ => i += 1,
        }
    }

    found
}

/// Parameter names found in one statement, classified and de-duplicated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub path_params: Vec<String>,
    pub query_params: Vec<String>,
    pub dollar_param: Option<String>,
    pub output_params: Vec<String>,
}

impl Extracted {
    #[must_use]
    pub fn is_output(&self, name: &str) -> bool {
        self.output_params.iter().any(|n| n == name)
    }
}

fn collect_kind(
    placeholders: &[Placeholder],
    kind: PlaceholderKind,
    claimed: &HashSet<&str>,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in placeholders.iter().filter(|p| p.kind == kind) {
        if !claimed.contains(p.name.as_str()) && !names.contains(&p.name) {
            names.push(p.name.clone());
        }
    }
    names
}

/// Classify the placeholders of `sql`.
///
/// Precedence is path > query > dollar > output: a name claimed by an
/// earlier class is never added to a later one. Each list keeps first-seen
/// order. More than one distinct dollar name is a structural error.
pub fn extract(sql: &str) -> Result<Extracted> {
    let placeholders = scan(sql);
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut extracted = Extracted::default();

    extracted.path_params = collect_kind(&placeholders, PlaceholderKind::Path, &claimed);
    claimed.extend(extracted.path_params.iter().map(String::as_str));

    extracted.query_params = collect_kind(&placeholders, PlaceholderKind::Query, &claimed);
    claimed.extend(extracted.query_params.iter().map(String::as_str));

    let dollars = collect_kind(&placeholders, PlaceholderKind::Dollar, &claimed);
    if dollars.len() > 1 {
        return Err(Error::Rewrite(format!(
            "only one payload bind is allowed per statement, found ${}",
            dollars.join(", $")
        )));
    }
    extracted.dollar_param = dollars.into_iter().next();
    claimed.extend(extracted.dollar_param.as_deref());

    extracted.output_params = collect_kind(&placeholders, PlaceholderKind::Output, &claimed);

    Ok(extracted)
}

/// Replace placeholders in `sql`.
///
/// `replace` is called once per placeholder in order of appearance and may
/// return the replacement text, or `None` to keep the original. Spans are
/// then substituted back to front.
pub fn rewrite<F>(sql: &str, placeholders: &[Placeholder], mut replace: F) -> String
where
    F: FnMut(&Placeholder) -> Option<String>,
{
    let replacements: Vec<(Range<usize>, String)> = placeholders
        .iter()
        .filter_map(|p| replace(p).map(|text| (p.span.clone(), text)))
        .collect();

    let mut out = sql.to_string();
    for (span, text) in replacements.into_iter().rev() {
        out.replace_range(span, &text);
    }
    out
}
