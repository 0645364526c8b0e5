use std::fmt::Write;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum SheetError {
    #[error("Cannot load page image {}", .0.display())]
    ImageLoad(PathBuf),
    #[error("Cannot decode page image from memory")]
    ImageDecode,
    #[error("OpenCV Error: {} (errno {})", .0.message, .0.code)]
    OpenCv(#[from] opencv::Error),
    #[error("Expected {expected} bubbles per question, got {got}")]
    WrongAlternativeCount { expected: usize, got: usize },
    #[error("Cannot score page: {0}")]
    Scoring(#[from] ScoringError),
}

/// Raised while loading or saving an answer key. A key is never partially
/// accepted.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    #[error("Cannot open/write key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed JSON key: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed CSV key: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid question number {0:?}")]
    InvalidQuestion(String),
    #[error("Invalid answer {answer:?} for question {question}")]
    InvalidLetter { question: u32, answer: String },
    #[error("Question {0} appears more than once")]
    DuplicateQuestion(u32),
    #[error("Unrecognised line {line}: {content:?}")]
    UnrecognisedLine { line: usize, content: String },
    #[error("Invalid weight for question {0}")]
    InvalidWeight(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum ScoringError {
    #[error("No answer key loaded (load an official key before scoring)")]
    MissingAnswerKey,
}

/// Failure of a whole batch input (as opposed to a single bad record).
#[derive(thiserror::Error, Debug)]
pub enum BatchError {
    #[error("Cannot open batch file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Batch JSON is not a list of records: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Batch CSV cannot be read: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// A single batch record that could not be scored. The batch continues past it.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Record #{index} skipped: {reason}")]
pub struct RecordError {
    pub index: usize,
    pub reason: String,
}

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Cannot open/write file: {0}")]
    FileOperationFailed(#[from] std::io::Error),
    #[error("Failed to serialize CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

impl serde::Serialize for RecordError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

pub fn fmt_error_chain_of(mut err: &dyn std::error::Error) -> String {
    let mut str = err.to_string();
    while let Some(src) = err.source() {
        _ = write!(str, "\n  -> Caused by {src}");
        err = src;
    }
    str
}

#[macro_export]
macro_rules! err_log {
    ($error: expr) => {
        log::error!("{}", $crate::errors::fmt_error_chain_of($error))
    };
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = KeyError::from(inner);
        let chain = fmt_error_chain_of(&err);
        assert!(chain.starts_with("Cannot open/write key file: gone"));
    }

    #[test]
    fn test_record_error_serializes_as_message() {
        let err = RecordError {
            index: 3,
            reason: "missing field `respostas`".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Record #3 skipped: missing field `respostas`\"");
    }
}
