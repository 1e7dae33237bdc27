//! Exam and answer types.
//!
//! Question descriptors are produced once by the authoring layer and are
//! read-only for the lifetime of a session. Answer values are a tagged
//! variant with one shape per question type.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a question within an exam.
pub type QuestionId = String;

/// An exam as handed to the engine at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exam {
    /// Exam identifier; the recovery index is keyed by it.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Countdown length in seconds (0 = untimed).
    #[serde(default)]
    pub duration_secs: u64,
    /// Question descriptors in presentation order.
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Exam {
    /// Look up a question by id.
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Total points available.
    pub fn total_points(&self) -> f64 {
        self.questions.iter().map(|q| q.points).sum()
    }
}

/// A single question descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    #[serde(default = "default_points")]
    pub points: f64,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

fn default_points() -> f64 {
    1.0
}

impl Question {
    /// Check that `value` has the shape this question type expects.
    ///
    /// This is the question-type boundary: callers validate here before
    /// handing the value to the session controller, which stores whatever it
    /// is given.
    pub fn accepts(&self, value: &AnswerValue) -> bool {
        self.kind.accepts(value)
    }
}

/// Question type plus its type-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    MultipleChoice {
        options: Vec<String>,
    },
    MultipleSelect {
        options: Vec<String>,
    },
    TrueFalse,
    ShortAnswer,
    Essay {
        #[serde(default)]
        max_words: Option<u32>,
    },
    Ordering {
        items: Vec<String>,
    },
    Matching {
        left: Vec<String>,
        right: Vec<String>,
    },
    Hotspot {
        image: String,
    },
    Code {
        language: String,
        #[serde(default)]
        starter: Option<String>,
    },
}

impl QuestionKind {
    pub fn accepts(&self, value: &AnswerValue) -> bool {
        match (self, value) {
            (QuestionKind::MultipleChoice { options }, AnswerValue::Text(choice)) => {
                options.contains(choice)
            }
            (QuestionKind::MultipleSelect { options }, AnswerValue::Choices(chosen)) => {
                chosen.iter().all(|c| options.contains(c))
            }
            (QuestionKind::TrueFalse, AnswerValue::Boolean(_)) => true,
            (QuestionKind::ShortAnswer, AnswerValue::Text(_)) => true,
            (QuestionKind::Essay { max_words }, AnswerValue::Text(text)) => match max_words {
                Some(limit) => text.split_whitespace().count() <= *limit as usize,
                None => true,
            },
            (QuestionKind::Ordering { items }, AnswerValue::Sequence(order)) => {
                let mut expected = items.clone();
                let mut given = order.clone();
                expected.sort();
                given.sort();
                expected == given
            }
            (QuestionKind::Matching { left, right }, AnswerValue::Sequence(pairs)) => {
                pairs.len() == left.len() && pairs.iter().all(|p| right.contains(p))
            }
            (QuestionKind::Hotspot { .. }, AnswerValue::Point { x, y }) => {
                x.is_finite() && y.is_finite()
            }
            (QuestionKind::Code { language, .. }, AnswerValue::Code(result)) => {
                result.language.eq_ignore_ascii_case(language)
            }
            _ => false,
        }
    }

    /// The snake_case type name used in exam files.
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::MultipleSelect { .. } => "multiple_select",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::ShortAnswer => "short_answer",
            QuestionKind::Essay { .. } => "essay",
            QuestionKind::Ordering { .. } => "ordering",
            QuestionKind::Matching { .. } => "matching",
            QuestionKind::Hotspot { .. } => "hotspot",
            QuestionKind::Code { .. } => "code",
        }
    }
}

/// The current value of an answer. One variant per question shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Boolean(bool),
    Choices(BTreeSet<String>),
    Sequence(Vec<String>),
    Point {
        #[serde(with = "lossless_f64")]
        x: f64,
        #[serde(with = "lossless_f64")]
        y: f64,
    },
    Code(CodeResult),
}

impl AnswerValue {
    /// Short human-readable rendering for tables and logs.
    pub fn summary(&self) -> String {
        match self {
            AnswerValue::Text(s) => {
                if s.chars().count() > 32 {
                    let head: String = s.chars().take(29).collect();
                    format!("{head}...")
                } else {
                    s.clone()
                }
            }
            AnswerValue::Boolean(b) => b.to_string(),
            AnswerValue::Choices(set) => {
                let items: Vec<&str> = set.iter().map(String::as_str).collect();
                format!("{{{}}}", items.join(", "))
            }
            AnswerValue::Sequence(items) => format!("[{}]", items.join(", ")),
            AnswerValue::Point { x, y } => format!("({x:.1}, {y:.1})"),
            AnswerValue::Code(result) => format!(
                "{} code, {} lines{}",
                result.language,
                result.source.lines().count(),
                match result.passed {
                    Some(true) => ", passed",
                    Some(false) => ", failed",
                    None => "",
                }
            ),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(s: &str) -> Self {
        AnswerValue::Text(s.to_string())
    }
}

impl From<bool> for AnswerValue {
    fn from(b: bool) -> Self {
        AnswerValue::Boolean(b)
    }
}

/// JSON has no NaN or infinity; those are written as strings so a session
/// holding such an answer still loads back.
mod lossless_f64 {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(F64Visitor)
    }

    struct F64Visitor;

    impl de::Visitor<'_> for F64Visitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, \"NaN\", \"inf\" or \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }
}

/// A code answer together with the result of running it in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeResult {
    pub language: String,
    pub source: String,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Why a session was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitReason {
    User,
    Timeout,
    Security,
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitReason::User => write!(f, "user"),
            SubmitReason::Timeout => write!(f, "timeout"),
            SubmitReason::Security => write!(f, "security"),
        }
    }
}

impl FromStr for SubmitReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SubmitReason::User),
            "timeout" => Ok(SubmitReason::Timeout),
            "security" => Ok(SubmitReason::Security),
            other => Err(format!("unknown submit reason: {other}")),
        }
    }
}
