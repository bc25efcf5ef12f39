//! Plain-text rendering of session output for the terminal.

use sprechen_core::writing::LetterEvaluation;
use sprechen_core::{CorrectionResult, CoverageSet, FeedbackReport, Scenario, Turn};
use std::fmt::Write;

pub fn tutor(turn: &Turn) -> String {
    format!("Prüfer: {}", turn.content)
}

/// Nothing to show when the utterance was fine.
pub fn correction(correction: &CorrectionResult) -> Option<String> {
    if !correction.has_errors {
        return None;
    }
    let mut out = format!("  Korrektur: {}", correction.corrected);
    for mistake in &correction.mistakes {
        let _ = write!(out, "\n    - {mistake}");
    }
    Some(out)
}

/// One checkbox line per discussion point.
pub fn coverage(scenario: &Scenario, covered: &CoverageSet) -> String {
    let mut out = format!(
        "  Leitpunkte {}/{}:",
        covered.len(),
        scenario.point_count()
    );
    for point in scenario.points() {
        let mark = if covered.contains(point.index) { "x" } else { " " };
        let _ = write!(out, "\n    [{mark}] {}", point.text);
    }
    out
}

pub fn report(report: &FeedbackReport) -> String {
    let mut out = String::from("=== Feedback ===\n");
    if report.strengths.is_empty() && report.improvements.is_empty() {
        out.push_str(&report.summary);
        return out;
    }
    let _ = writeln!(out, "Abdeckung: {}", report.coverage);
    out.push_str("Stärken:");
    for item in &report.strengths {
        let _ = write!(out, "\n  - {item}");
    }
    out.push_str("\nVerbesserungen:");
    for item in &report.improvements {
        let _ = write!(out, "\n  - {item}");
    }
    out
}

pub fn letter(evaluation: &LetterEvaluation) -> String {
    let score = &evaluation.score;
    let mut out = format!(
        "Wörter: {}\nPunkte: {} (Inhalt {}, Kommunikation {}, Korrektheit {})\n",
        evaluation.word_count, score.total, score.content, score.communication, score.accuracy
    );
    if !evaluation.missing_points.is_empty() {
        out.push_str("Fehlende Inhaltspunkte:");
        for point in &evaluation.missing_points {
            let _ = write!(out, "\n  - {point}");
        }
        out.push('\n');
    }
    if !evaluation.errors.is_empty() {
        out.push_str("Fehler:");
        for error in &evaluation.errors {
            let _ = write!(out, "\n  - {} → {}", error.original, error.corrected);
            if !error.explanation.is_empty() {
                let _ = write!(out, " ({})", error.explanation);
            }
        }
        out.push('\n');
    }
    let sections = [
        ("Stärken", &evaluation.feedback.strengths),
        ("Verbesserungen", &evaluation.feedback.improvements),
        ("Tipps", &evaluation.feedback.suggestions),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        let _ = write!(out, "{title}:");
        for item in items {
            let _ = write!(out, "\n  - {item}");
        }
        out.push('\n');
    }
    let _ = write!(out, "\nKorrigierter Text:\n{}", evaluation.corrected);
    out
}
