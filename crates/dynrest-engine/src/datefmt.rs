//! Translation of Oracle-style date templates
//!
//! Endpoint authors write date formats with `YYYY`, `MM`, `DD`, `HH24`,
//! `HH`/`HH12`, `MI`, `SS` and `AM`/`PM` tokens. The validator parses values
//! with the chrono translation; the session dialect converts dates in SQL
//! with the `STR_TO_DATE` translation.

use chrono::{NaiveDate, NaiveDateTime};

/// Format applied when a date parameter declares none
pub const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Year4,
    Year2,
    Month,
    MonthName,
    Day,
    Hour24,
    Hour12,
    Minute,
    Second,
    Meridiem,
}

// Longest tokens first so HH24 wins over HH and MON over MM.
const TOKENS: &[(&str, Token)] = &[
    ("HH24", Token::Hour24),
    ("HH12", Token::Hour12),
    ("YYYY", Token::Year4),
    ("A.M.", Token::Meridiem),
    ("P.M.", Token::Meridiem),
    ("MON", Token::MonthName),
    ("YY", Token::Year2),
    ("MM", Token::Month),
    ("DD", Token::Day),
    ("HH", Token::Hour12),
    ("MI", Token::Minute),
    ("SS", Token::Second),
    ("AM", Token::Meridiem),
    ("PM", Token::Meridiem),
];

fn translate(format: &str, render: fn(Token) -> &'static str, escape_percent: &str) -> String {
    let upper = format.to_ascii_uppercase();
    let mut out = String::with_capacity(format.len() * 2);
    let mut i = 0;

    'outer: while i < format.len() {
        for (text, token) in TOKENS {
            if upper[i..].starts_with(text) {
                out.push_str(render(*token));
                i += text.len();
                continue 'outer;
            }
        }

        let ch = format[i..].chars().next().unwrap_or_default();
        if ch == '%' {
            out.push_str(escape_percent);
        } else {
            out.push(ch);
        }
        i += ch.len_utf8().max(1);
    }

    out
}

/// Translate an Oracle-style template into a chrono format string
#[must_use]
pub fn to_chrono(format: &str) -> String {
    translate(
        format,
        |token| match token {
            Token::Year4 => "%Y",
            Token::Year2 => "%y",
            Token::Month => "%m",
            Token::MonthName => "%b",
            Token::Day => "%d",
            Token::Hour24 => "%H",
            Token::Hour12 => "%I",
            Token::Minute => "%M",
            Token::Second => "%S",
            Token::Meridiem => "%p",
        },
        "%%",
    )
}

/// Translate an Oracle-style template into a `STR_TO_DATE` format string
#[must_use]
pub fn to_str_to_date(format: &str) -> String {
    translate(
        format,
        |token| match token {
            Token::Year4 => "%Y",
            Token::Year2 => "%y",
            Token::Month => "%m",
            Token::MonthName => "%b",
            Token::Day => "%d",
            Token::Hour24 => "%H",
            Token::Hour12 => "%h",
            Token::Minute => "%i",
            Token::Second => "%s",
            Token::Meridiem => "%p",
        },
        "%%",
    )
}

/// Parse `value` against an Oracle-style template.
///
/// Templates without time tokens yield midnight of the parsed day.
#[must_use]
pub fn parse(value: &str, format: &str) -> Option<NaiveDateTime> {
    let pattern = to_chrono(format);
    NaiveDateTime::parse_from_str(value, &pattern)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, &pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Render a parsed date back in its declared template
#[must_use]
pub fn render(value: &NaiveDateTime, format: &str) -> String {
    value.format(&to_chrono(format)).to_string()
}
