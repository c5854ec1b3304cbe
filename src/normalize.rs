//! Identifier canonicalisation for join keys.
//!
//! Both functions are pure and total. An identifier that carries no signal
//! (no digits, only zeros, no letters) normalises to `None`, and `None` never
//! participates in a join, so two missing identifiers can never match each
//! other.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::data::Value;

/// Length of the comparison key: the IBGE code without its check digit.
pub const CODE_KEY_LEN: usize = 6;

/// Which dataset a raw code comes from. The sides pad to different widths
/// before both are cut to [`CODE_KEY_LEN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSide {
    /// Boundary attributes: 7-digit code including the check digit.
    Geometry,
    /// Tabular records: 6-digit code, sometimes with leading zeros lost.
    Tabular,
}

impl CodeSide {
    pub fn min_width(self) -> usize {
        match self {
            CodeSide::Geometry => 7,
            CodeSide::Tabular => 6,
        }
    }
}

/// Six-digit join key for a raw municipality code. A key of all zeros is no
/// key, including short codes whose digits are cut off by the truncation.
pub fn canonical_code(raw: &str, side: CodeSide) -> Option<String> {
    let digits = raw.chars().filter(char::is_ascii_digit).collect::<String>();
    let padded = format!("{digits:0>width$}", width = side.min_width());
    let key = &padded[..CODE_KEY_LEN];
    if key.bytes().all(|b| b == b'0') {
        return None;
    }
    Some(key.to_string())
}

pub fn canonical_code_value(value: &Value, side: CodeSide) -> Option<String> {
    if value.is_null() {
        return None;
    }
    canonical_code(&value.as_display(), side)
}

pub fn canonical_name(raw: &str) -> Option<String> {
    let folded = raw
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(char::is_ascii)
        .map(|c| if c == '-' { ' ' } else { c })
        .collect::<String>();
    let tokens = folded.split_whitespace().map(title_case).collect::<Vec<_>>();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

pub fn canonical_name_value(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => canonical_name(s),
        _ => None,
    }
}

/// Upper-cases a letter that follows a non-letter and lower-cases the rest,
/// so `d'agua` becomes `D'Agua`.
fn title_case(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut previous_is_letter = false;
    for ch in token.chars() {
        if ch.is_ascii_alphabetic() {
            if previous_is_letter {
                out.push(ch.to_ascii_lowercase());
            } else {
                out.push(ch.to_ascii_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }
    out
}
