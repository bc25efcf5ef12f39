//! Strict parsers for the fixed textual layouts the model is asked to answer in.
//!
//! Each parser returns [`Parsed::Malformed`] instead of guessing when the reply
//! does not follow its layout. Callers treat every `Malformed` the same way:
//! fall back to their default result.

use crate::coverage::CoverageSet;
use crate::transcript::{CorrectionResult, FeedbackReport};
use regex::Regex;
use std::sync::LazyLock;

static INDEX_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[\d,\s]*\]").expect("index list pattern is valid"));

/// Result of parsing model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<T> {
    Parsed(T),
    Malformed(String),
}

impl<T> Parsed<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Parsed::Parsed(value) => Some(value),
            Parsed::Malformed(_) => None,
        }
    }

    /// Returns the parsed value or builds a fallback from the malformation reason.
    pub fn unwrap_or_else(self, fallback: impl FnOnce(String) -> T) -> T {
        match self {
            Parsed::Parsed(value) => value,
            Parsed::Malformed(reason) => fallback(reason),
        }
    }
}

/// Value after `LABEL:` if `line` carries that label (case-insensitive, `**bold**` tolerated).
fn labeled<'a>(line: &'a str, labels: &[&str]) -> Option<&'a str> {
    let (head, rest) = line.split_once(':')?;
    let head = head.trim().trim_matches('*').trim().to_uppercase();
    labels
        .iter()
        .any(|label| head == *label)
        .then(|| rest.trim().trim_start_matches('*').trim())
}

fn bullet(line: &str) -> Option<&str> {
    let line = line.trim();
    let item = line
        .strip_prefix('-')
        .or_else(|| line.strip_prefix('•'))
        .or_else(|| line.strip_prefix('*'))?
        .trim();
    (!item.is_empty()).then_some(item)
}

/// Parses a bracketed list of point indices, each of which must be below `point_count`.
pub fn parse_coverage(text: &str, point_count: usize) -> Parsed<CoverageSet> {
    let Some(list) = INDEX_LIST.find(text) else {
        return Parsed::Malformed("no bracketed index list".into());
    };
    let inner = list.as_str().trim_start_matches('[').trim_end_matches(']');

    let mut set = CoverageSet::new();
    for piece in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = match piece.parse() {
            Ok(index) => index,
            Err(_) => return Parsed::Malformed(format!("'{piece}' is not an index")),
        };
        if index >= point_count {
            return Parsed::Malformed(format!("index {index} out of range 0..{point_count}"));
        }
        set.insert(index);
    }
    Parsed::Parsed(set)
}

const ERRORS_FLAG: &[&str] = &["FEHLER"];
const CORRECTED: &[&str] = &["KORRIGIERT"];
const MISTAKE_LIST: &[&str] = &["FEHLER-LISTE"];
const CORRECTION_LABELS: &[&str] = &["FEHLER", "ORIGINAL", "KORRIGIERT", "FEHLER-LISTE"];

/// Parses a `FEHLER / ORIGINAL / KORRIGIERT / FEHLER-LISTE` correction block.
///
/// An absent or negative `FEHLER` flag yields the clean result without
/// looking at the rest of the reply.
pub fn parse_correction(text: &str, original: &str) -> Parsed<CorrectionResult> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    let flag = lines
        .iter()
        .find_map(|line| labeled(line, ERRORS_FLAG))
        .map(|value| value.trim_matches(['[', ']', ' ']).to_lowercase());
    if !flag.is_some_and(|value| value.starts_with("ja")) {
        return Parsed::Parsed(CorrectionResult::clean(original));
    }

    let Some(corrected) = lines
        .iter()
        .position(|line| labeled(line, CORRECTED).is_some())
        .and_then(|at| {
            let inline = labeled(lines[at], CORRECTED).unwrap_or_default();
            if !inline.is_empty() {
                return Some(inline);
            }
            // Sentence may follow on the next line.
            lines[at + 1..]
                .iter()
                .copied()
                .find(|line| !line.is_empty())
                .filter(|line| labeled(line, CORRECTION_LABELS).is_none())
        })
    else {
        return Parsed::Malformed("errors flagged but no corrected sentence".into());
    };

    let Some(list_start) = lines
        .iter()
        .position(|line| labeled(line, MISTAKE_LIST).is_some())
    else {
        return Parsed::Malformed("errors flagged but no mistake list".into());
    };
    let mistakes: Vec<String> = lines[list_start + 1..]
        .iter()
        .filter_map(|line| bullet(line))
        .map(str::to_string)
        .collect();
    if mistakes.is_empty() {
        return Parsed::Malformed("mistake list is empty".into());
    }

    Parsed::Parsed(CorrectionResult {
        has_errors: true,
        original: original.to_string(),
        corrected: corrected.to_string(),
        mistakes,
    })
}

const COVERAGE: &[&str] = &["ABDECKUNG"];
const STRENGTHS: &[&str] = &["STÄRKEN", "STAERKEN"];
const IMPROVEMENTS: &[&str] = &["VERBESSERUNGEN"];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Coverage,
    Strengths,
    Improvements,
}

/// Parses an `ABDECKUNG / STÄRKEN / VERBESSERUNGEN` feedback block.
pub fn parse_feedback(text: &str) -> Parsed<FeedbackReport> {
    let mut section = Section::Preamble;
    let mut coverage: Option<Vec<&str>> = None;
    let mut strengths: Option<Vec<String>> = None;
    let mut improvements: Option<Vec<String>> = None;

    for line in text.lines().map(str::trim) {
        if let Some(rest) = labeled(line, COVERAGE) {
            section = Section::Coverage;
            coverage = Some(if rest.is_empty() { vec![] } else { vec![rest] });
            continue;
        }
        if labeled(line, STRENGTHS).is_some() {
            section = Section::Strengths;
            strengths.get_or_insert_with(Vec::new);
            continue;
        }
        if labeled(line, IMPROVEMENTS).is_some() {
            section = Section::Improvements;
            improvements.get_or_insert_with(Vec::new);
            continue;
        }

        match section {
            Section::Preamble => {}
            Section::Coverage => {
                if let Some(parts) = coverage.as_mut().filter(|_| !line.is_empty()) {
                    parts.push(line);
                }
            }
            Section::Strengths => {
                if let (Some(items), Some(item)) = (strengths.as_mut(), bullet(line)) {
                    items.push(item.to_string());
                }
            }
            Section::Improvements => {
                if let (Some(items), Some(item)) = (improvements.as_mut(), bullet(line)) {
                    items.push(item.to_string());
                }
            }
        }
    }

    let coverage = match coverage {
        Some(parts) if !parts.is_empty() => parts.join(" "),
        _ => return Parsed::Malformed("missing ABDECKUNG section".into()),
    };
    let (Some(strengths), Some(improvements)) = (strengths, improvements) else {
        return Parsed::Malformed("missing STÄRKEN or VERBESSERUNGEN section".into());
    };

    Parsed::Parsed(FeedbackReport {
        summary: text.trim().to_string(),
        coverage,
        strengths,
        improvements,
    })
}
