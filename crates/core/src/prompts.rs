//! Prompt templates.
//!
//! Defaults are compiled in from `prompts/*.md`. A directory of Markdown files
//! can override any of them by file stem (e.g. `feedback.md`). Placeholders
//! look like `{task}` and are filled by [`render`].

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Seed utterance sent with the opening request.
pub const START_UTTERANCE: &str = "Hallo! Ich bin bereit. Lass uns mit der Planung anfangen.";
/// Synthetic learner utterance that accompanies the closing request.
pub const CLOSING_CUE: &str = "Zusammenfassung";
/// Transcript labels used when a conversation is embedded in a prompt.
pub const TUTOR_LABEL: &str = "Prüfer:";
pub const LEARNER_LABEL: &str = "Teilnehmer:";

/// All templates used by the dialogue core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub tutor_persona: String,
    pub reminder_remaining: String,
    pub reminder_all_covered: String,
    pub reminder_closing: String,
    pub coverage_analysis: String,
    pub feedback: String,
    pub correction: String,
    pub letter_evaluation: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            tutor_persona: include_str!("../prompts/tutor_persona.md").to_string(),
            reminder_remaining: include_str!("../prompts/reminder_remaining.md").to_string(),
            reminder_all_covered: include_str!("../prompts/reminder_all_covered.md").to_string(),
            reminder_closing: include_str!("../prompts/reminder_closing.md").to_string(),
            coverage_analysis: include_str!("../prompts/coverage_analysis.md").to_string(),
            feedback: include_str!("../prompts/feedback.md").to_string(),
            correction: include_str!("../prompts/correction.md").to_string(),
            letter_evaluation: include_str!("../prompts/letter_evaluation.md").to_string(),
        }
    }
}

impl PromptSet {
    /// Starts from the defaults and replaces every template found in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut prompts = Self::default();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Could not read prompts directory {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let Some(slot) = prompts.slot_mut(&stem) else {
                debug!(file = %path.display(), "Ignoring unknown prompt file");
                continue;
            };
            *slot = std::fs::read_to_string(&path)
                .with_context(|| format!("Could not read prompt {}", path.display()))?;
            info!(prompt = %stem, "Prompt overridden from disk");
        }
        Ok(prompts)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut String> {
        Some(match name {
            "tutor_persona" => &mut self.tutor_persona,
            "reminder_remaining" => &mut self.reminder_remaining,
            "reminder_all_covered" => &mut self.reminder_all_covered,
            "reminder_closing" => &mut self.reminder_closing,
            "coverage_analysis" => &mut self.coverage_analysis,
            "feedback" => &mut self.feedback,
            "correction" => &mut self.correction,
            "letter_evaluation" => &mut self.letter_evaluation,
            _ => return None,
        })
    }
}

/// Replaces each `{key}` in `template` with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// `1. first\n2. second` style list.
pub fn numbered_from_one<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `0. first\n1. second` style list, matching the indices a model must answer with.
pub fn numbered_from_zero<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{i}. {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `- first\n- second` style list.
pub fn bulleted<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_all_occurrences() {
        let out = render("{a} und {b}, wieder {a}", &[("a", "eins"), ("b", "zwei")]);
        assert_eq!(out, "eins und zwei, wieder eins");
    }

    #[test]
    fn test_render_leaves_json_braces_alone() {
        let out = render("{\"score\": {x}}", &[("x", "1")]);
        assert_eq!(out, "{\"score\": 1}");
    }

    #[test]
    fn test_list_helpers() {
        let points = ["Wann?", "Wo?"];
        assert_eq!(numbered_from_one(&points), "1. Wann?\n2. Wo?");
        assert_eq!(numbered_from_zero(&points), "0. Wann?\n1. Wo?");
        assert_eq!(bulleted(&points), "- Wann?\n- Wo?");
    }

    #[test]
    fn test_defaults_contain_their_placeholders() {
        let prompts = PromptSet::default();
        for placeholder in ["{task}", "{theme}", "{points}"] {
            assert!(prompts.tutor_persona.contains(placeholder));
        }
        assert!(prompts.coverage_analysis.contains("{conversation}"));
        assert!(prompts.feedback.contains("ABDECKUNG:"));
        assert!(prompts.correction.contains("FEHLER-LISTE:"));
    }

    #[test]
    fn test_load_dir_overrides_known_stems_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("feedback.md"), "Eigenes Feedback {points}").unwrap();
        std::fs::write(dir.path().join("unknown.md"), "ignored").unwrap();
        std::fs::write(dir.path().join("correction.txt"), "not markdown").unwrap();

        let prompts = PromptSet::load_dir(dir.path()).unwrap();
        assert_eq!(prompts.feedback, "Eigenes Feedback {points}");
        assert_eq!(prompts.correction, PromptSet::default().correction);
    }

    #[test]
    fn test_load_dir_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PromptSet::load_dir(&dir.path().join("nope")).is_err());
    }
}
