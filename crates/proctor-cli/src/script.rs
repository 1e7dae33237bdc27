//! Session scripts for `proctor run`.
//!
//! A script is a TOML list of steps. Each step waits `delay_ms` and then
//! performs one action against the running session:
//!
//! ```toml
//! [[steps]]
//! action = "answer"
//! question = "q1"
//! value = { type = "text", value = "4" }
//!
//! [[steps]]
//! delay_ms = 1500
//! action = "signal"
//! signal = { signal = "visibility_hidden" }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use proctor_core::model::{AnswerValue, SubmitReason};
use proctor_core::security::EnvironmentSignal;

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Answer {
        question: String,
        value: AnswerValue,
    },
    Navigate {
        question: String,
    },
    Flag {
        question: String,
    },
    Signal {
        signal: EnvironmentSignal,
    },
    Capture,
    SnapshotInterval {
        secs: u64,
    },
    Save,
    Wait,
    Submit {
        #[serde(default)]
        reason: Option<SubmitReason>,
    },
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse script: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::security::KeyCombo;

    #[test]
    fn parse_all_actions() {
        let script = Script::parse(
            r#"
[[steps]]
action = "answer"
question = "q1"
value = { type = "text", value = "4" }

[[steps]]
action = "answer"
question = "q3"
value = { type = "choices", value = ["a", "c"] }

[[steps]]
action = "navigate"
question = "q2"

[[steps]]
action = "flag"
question = "q2"

[[steps]]
delay_ms = 250
action = "signal"
signal = { signal = "key", key = "c", ctrl = true }

[[steps]]
action = "signal"
signal = { signal = "visibility_hidden" }

[[steps]]
action = "snapshot_interval"
secs = 15

[[steps]]
action = "capture"

[[steps]]
action = "wait"
delay_ms = 1000

[[steps]]
action = "submit"
"#,
        )
        .unwrap();

        assert_eq!(script.steps.len(), 10);
        assert!(matches!(
            &script.steps[0].action,
            Action::Answer { value: AnswerValue::Text(v), .. } if v == "4"
        ));
        assert!(matches!(
            &script.steps[1].action,
            Action::Answer { value: AnswerValue::Choices(set), .. } if set.len() == 2
        ));
        assert_eq!(script.steps[4].delay_ms, 250);
        assert!(matches!(
            &script.steps[4].action,
            Action::Signal { signal: EnvironmentSignal::Key(combo) } if *combo == KeyCombo::new("c").ctrl()
        ));
        assert!(matches!(script.steps[9].action, Action::Submit { reason: None }));
    }

    #[test]
    fn unknown_action_is_rejected() {
        let result = Script::parse(
            r#"
[[steps]]
action = "teleport"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_script_is_valid() {
        assert!(Script::parse("").unwrap().steps.is_empty());
    }
}
