//! Analysis modes.
//!
//! A mode selects which report style governs the reduce phase. The set of
//! modes is closed; each resolves to an opaque system prompt and a
//! category label used in report filenames. Prompts and labels can be
//! overridden per mode in the `[modes.<name>]` config tables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::config::ModeConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Structural deconstruction: models, evidence, concepts, knowledge map.
    Architect,
    /// Operational playbook: procedures, checklists, decision rules.
    Executor,
    /// Critical stress test: assumptions, counter-evidence, blind spots.
    Disruptor,
}

impl AnalysisMode {
    pub const ALL: [AnalysisMode; 3] = [
        AnalysisMode::Architect,
        AnalysisMode::Executor,
        AnalysisMode::Disruptor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Architect => "architect",
            AnalysisMode::Executor => "executor",
            AnalysisMode::Disruptor => "disruptor",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        AnalysisMode::ALL
            .into_iter()
            .find(|m| m.as_str() == key)
            .ok_or_else(|| {
                PipelineError::Validation(format!(
                    "unknown analysis mode '{}', expected one of: architect, executor, disruptor",
                    s
                ))
            })
    }
}

/// The resolved configuration behind a mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeProfile {
    /// Report category label, used as the filename prefix.
    pub label: String,
    pub system_prompt: String,
}

/// Validated lookup from mode key to [`ModeProfile`].
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    profiles: HashMap<AnalysisMode, ModeProfile>,
}

impl ModeCatalog {
    /// Built-in profiles with any configured overrides applied.
    pub fn from_config(overrides: &HashMap<String, ModeConfig>) -> Self {
        let mut profiles = HashMap::new();
        for mode in AnalysisMode::ALL {
            let mut profile = builtin_profile(mode);
            if let Some(o) = overrides.get(mode.as_str()) {
                if let Some(label) = &o.label {
                    profile.label = label.clone();
                }
                if let Some(prompt) = &o.system_prompt {
                    profile.system_prompt = prompt.clone();
                }
            }
            profiles.insert(mode, profile);
        }
        Self { profiles }
    }

    /// Parses `key` and returns the mode with its profile.
    ///
    /// An unknown key is a validation error, never a silent default.
    pub fn resolve(&self, key: &str) -> Result<(AnalysisMode, &ModeProfile), PipelineError> {
        let mode: AnalysisMode = key.parse()?;
        let profile = self
            .profiles
            .get(&mode)
            .ok_or_else(|| PipelineError::Validation(format!("mode '{}' is not configured", mode)))?;
        Ok((mode, profile))
    }

    /// Modes with their labels, in declaration order.
    pub fn list(&self) -> Vec<(AnalysisMode, &ModeProfile)> {
        AnalysisMode::ALL
            .into_iter()
            .filter_map(|m| self.profiles.get(&m).map(|p| (m, p)))
            .collect()
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::from_config(&HashMap::new())
    }
}

fn builtin_profile(mode: AnalysisMode) -> ModeProfile {
    let (label, prompt) = match mode {
        AnalysisMode::Architect => ("Blueprint", ARCHITECT_PROMPT),
        AnalysisMode::Executor => ("Playbook", EXECUTOR_PROMPT),
        AnalysisMode::Disruptor => ("Counterpoint", DISRUPTOR_PROMPT),
    };
    ModeProfile {
        label: label.to_string(),
        system_prompt: prompt.to_string(),
    }
}

const ARCHITECT_PROMPT: &str = "You are a senior analyst who deconstructs books with surgical \
precision. You receive condensed notes covering an entire book in order. Do not summarize \
loosely. Produce a Markdown report with these sections:\n\
1. Core models: the underlying mental models or formulas.\n\
2. Key evidence: hard data, experiments and cases that carry the argument.\n\
3. Core concepts: precise explanations of the book's technical vocabulary.\n\
4. Action strategy: three to five executable standard operating procedures.\n\
5. Knowledge map: how the argument develops from chapter to chapter.";

const EXECUTOR_PROMPT: &str = "You turn books into operating manuals. You receive condensed \
notes covering an entire book in order. Produce a Markdown playbook with: the outcome the book \
promises, prerequisites, step-by-step procedures with decision rules, checklists, metrics to \
track progress, common failure modes with remedies, and a 30-day implementation plan.";

const DISRUPTOR_PROMPT: &str = "You are a rigorous critic. You receive condensed notes covering \
an entire book in order. Produce a Markdown report that states the book's central thesis, lists \
its hidden assumptions, weighs the strength of each major piece of evidence, presents the \
strongest counter-arguments and contrary research, identifies where the advice fails or \
backfires, and closes with what a careful reader should keep and discard.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(
            "Architect".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::Architect
        );
        assert_eq!(
            " disruptor ".parse::<AnalysisMode>().unwrap(),
            AnalysisMode::Disruptor
        );
    }

    #[test]
    fn unknown_mode_is_validation_error() {
        let catalog = ModeCatalog::default();
        let err = catalog.resolve("summarizer").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "executor".to_string(),
            ModeConfig {
                label: Some("Runbook".to_string()),
                system_prompt: None,
            },
        );
        let catalog = ModeCatalog::from_config(&overrides);
        let (_, profile) = catalog.resolve("executor").unwrap();
        assert_eq!(profile.label, "Runbook");
        assert_eq!(profile.system_prompt, EXECUTOR_PROMPT);
    }

    #[test]
    fn list_covers_every_mode() {
        let catalog = ModeCatalog::default();
        let keys: Vec<&str> = catalog.list().iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(keys, vec!["architect", "executor", "disruptor"]);
    }
}
