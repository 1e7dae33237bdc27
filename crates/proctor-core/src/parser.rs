//! TOML exam definition parser.
//!
//! Loads exams from TOML files and directories, and validates them.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::model::{Exam, Question, QuestionKind};

/// Intermediate TOML structure for parsing exam files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    title: String,
    #[serde(default)]
    duration_secs: u64,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    prompt: String,
    #[serde(default = "default_points")]
    points: f64,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    left: Vec<String>,
    #[serde(default)]
    right: Vec<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    starter: Option<String>,
    #[serde(default)]
    max_words: Option<u32>,
}

fn default_points() -> f64 {
    1.0
}

impl TomlQuestion {
    fn into_question(self) -> Result<Question> {
        let kind = match self.kind.as_str() {
            "multiple_choice" => QuestionKind::MultipleChoice {
                options: self.options,
            },
            "multiple_select" => QuestionKind::MultipleSelect {
                options: self.options,
            },
            "true_false" => QuestionKind::TrueFalse,
            "short_answer" => QuestionKind::ShortAnswer,
            "essay" => QuestionKind::Essay {
                max_words: self.max_words,
            },
            "ordering" => QuestionKind::Ordering { items: self.items },
            "matching" => QuestionKind::Matching {
                left: self.left,
                right: self.right,
            },
            "hotspot" => QuestionKind::Hotspot {
                image: self
                    .image
                    .with_context(|| format!("question {}: hotspot requires `image`", self.id))?,
            },
            "code" => QuestionKind::Code {
                language: self
                    .language
                    .with_context(|| format!("question {}: code requires `language`", self.id))?,
                starter: self.starter,
            },
            other => bail!("question {}: unknown question type: {other}", self.id),
        };

        Ok(Question {
            id: self.id,
            prompt: self.prompt,
            points: self.points,
            kind,
        })
    }
}

/// Parse a single TOML file into an `Exam`.
pub fn parse_exam(path: &Path) -> Result<Exam> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse a TOML string into an `Exam` (useful for testing).
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<Exam> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(TomlQuestion::into_question)
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("invalid question in {}", source_path.display()))?;

    Ok(Exam {
        id: parsed.exam.id,
        title: parsed.exam.title,
        duration_secs: parsed.exam.duration_secs,
        questions,
    })
}

/// Recursively load all `.toml` exam files from a directory.
pub fn load_exam_directory(dir: &Path) -> Result<Vec<Exam>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            exams.extend(load_exam_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    exams.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(exams)
}

/// A warning from exam validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question ID (if applicable).
    pub question_id: Option<String>,
    pub message: String,
}

/// Validate an exam for common authoring mistakes.
pub fn validate_exam(exam: &Exam) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if exam.questions.is_empty() {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "exam has no questions".into(),
        });
    }

    let mut seen_ids = std::collections::HashSet::new();
    for question in &exam.questions {
        let warn = |message: String| ValidationWarning {
            question_id: Some(question.id.clone()),
            message,
        };

        if !seen_ids.insert(&question.id) {
            warnings.push(warn(format!("duplicate question ID: {}", question.id)));
        }
        if question.prompt.trim().is_empty() {
            warnings.push(warn("prompt is empty".into()));
        }
        if question.points.is_nan() || question.points <= 0.0 {
            warnings.push(warn(format!("points must be positive, got {}", question.points)));
        }

        match &question.kind {
            QuestionKind::MultipleChoice { options } | QuestionKind::MultipleSelect { options }
                if options.len() < 2 =>
            {
                warnings.push(warn(format!(
                    "{} question needs at least two options",
                    question.kind.type_name()
                )));
            }
            QuestionKind::Ordering { items } if items.len() < 2 => {
                warnings.push(warn("ordering question needs at least two items".into()));
            }
            QuestionKind::Matching { left, right } if left.is_empty() || right.len() < left.len() => {
                warnings.push(warn(
                    "matching question needs at least as many right items as left items".into(),
                ));
            }
            _ => {}
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const VALID_TOML: &str = r#"
[exam]
id = "algebra-midterm"
title = "Algebra Midterm"
duration_secs = 1800

[[questions]]
id = "q1"
type = "multiple_choice"
prompt = "What is 2 + 2?"
points = 2
options = ["3", "4", "5"]

[[questions]]
id = "q2"
type = "true_false"
prompt = "Zero is an even number."

[[questions]]
id = "q3"
type = "code"
prompt = "Implement gcd."
language = "rust"
starter = """
fn gcd(a: u64, b: u64) -> u64 {
    todo!()
}
"""
"#;

    #[test]
    fn parse_valid_toml() {
        let exam = parse_exam_str(VALID_TOML, &PathBuf::from("test.toml")).unwrap();
        assert_eq!(exam.id, "algebra-midterm");
        assert_eq!(exam.duration_secs, 1800);
        assert_eq!(exam.questions.len(), 3);
        assert_eq!(exam.questions[0].points, 2.0);
        assert_eq!(exam.questions[1].points, 1.0);
        assert_eq!(exam.total_points(), 4.0);
        assert!(matches!(
            &exam.questions[2].kind,
            QuestionKind::Code { language, starter: Some(_) } if language == "rust"
        ));
        assert!(validate_exam(&exam).is_empty());
    }

    #[test]
    fn parse_missing_optional_fields() {
        let toml = r#"
[exam]
id = "minimal"
title = "Minimal"

[[questions]]
id = "q1"
type = "short_answer"
prompt = "Name a prime."
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("test.toml")).unwrap();
        assert_eq!(exam.duration_secs, 0);
        assert_eq!(exam.questions[0].kind, QuestionKind::ShortAnswer);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let toml = r#"
[exam]
id = "bad"
title = "Bad"

[[questions]]
id = "q1"
type = "drawing"
prompt = "Draw a cat."
"#;
        let err = parse_exam_str(toml, &PathBuf::from("bad.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("unknown question type"));
    }

    #[test]
    fn hotspot_without_image_is_an_error() {
        let toml = r#"
[exam]
id = "bad"
title = "Bad"

[[questions]]
id = "q1"
type = "hotspot"
prompt = "Click the mitochondria."
"#;
        assert!(parse_exam_str(toml, &PathBuf::from("bad.toml")).is_err());
    }

    #[test]
    fn validate_reports_authoring_mistakes() {
        let toml = r#"
[exam]
id = "sloppy"
title = "Sloppy"

[[questions]]
id = "same"
type = "multiple_choice"
prompt = "Pick"
options = ["only"]

[[questions]]
id = "same"
type = "essay"
prompt = "   "
points = 0
"#;
        let exam = parse_exam_str(toml, &PathBuf::from("test.toml")).unwrap();
        let warnings = validate_exam(&exam);
        assert!(warnings.iter().any(|w| w.message.contains("duplicate")));
        assert!(warnings.iter().any(|w| w.message.contains("two options")));
        assert!(warnings.iter().any(|w| w.message.contains("prompt is empty")));
        assert!(warnings.iter().any(|w| w.message.contains("points must be positive")));
    }

    #[test]
    fn parse_malformed_toml() {
        let bad = "this is not [valid toml }{";
        assert!(parse_exam_str(bad, &PathBuf::from("bad.toml")).is_err());
    }

    #[test]
    fn load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("midterm.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not toml [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let exams = load_exam_directory(dir.path()).unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0].id, "algebra-midterm");
    }
}
