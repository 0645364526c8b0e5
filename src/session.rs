use std::collections::HashMap;
use std::path::{Path, PathBuf};

use opencv::core::Mat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ReaderConfig;
use crate::err_log;
use crate::errors::{ConfigError, ScoringError, SheetError};
use crate::identity::IdentityExtractor;
use crate::image::{decode_from_bytes, read_from_path};
use crate::key::{AnswerKey, QuestionWeights};
use crate::reader::read_sheet;
use crate::scoring::{scalar_text, score, Identification, Responses, ScoreResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(rename = "nome", default, deserialize_with = "scalar_text")]
    pub name: String,
    #[serde(rename = "turma", default, deserialize_with = "scalar_text")]
    pub class_name: String,
}

/// Student identifier (as printed in the sheet's code) to student.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(HashMap<String, RosterEntry>);

impl Roster {
    pub fn new(entries: HashMap<String, RosterEntry>) -> Self {
        Self(entries)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn get(&self, identifier: &str) -> Option<&RosterEntry> {
        self.0.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedPage {
    pub source: PathBuf,
    pub identifier: Option<String>,
    pub result: ScoreResult,
    pub ambiguous: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// Pages in input order, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub graded: Vec<GradedPage>,
    pub failures: Vec<PageFailure>,
}

impl BatchOutcome {
    pub fn results(&self) -> Vec<ScoreResult> {
        self.graded.iter().map(|page| page.result.clone()).collect()
    }
}

pub struct GradingSession {
    key: AnswerKey,
    weights: Option<QuestionWeights>,
    roster: Roster,
    config: ReaderConfig,
}

impl GradingSession {
    pub fn new(key: AnswerKey, config: ReaderConfig) -> Self {
        Self {
            key,
            weights: None,
            roster: Roster::default(),
            config,
        }
    }

    pub fn with_weights(mut self, weights: QuestionWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn key(&self) -> &AnswerKey {
        &self.key
    }

    /// Names the student behind a page: the roster entry when the identifier is
    /// known, otherwise the file stem.
    pub fn resolve_identity(&self, source: &Path, identifier: Option<&str>) -> Identification {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match identifier {
            Some(id) => match self.roster.get(id) {
                Some(entry) => Identification {
                    name: entry.name.clone(),
                    registration_id: id.to_string(),
                    class_name: entry.class_name.clone(),
                },
                None => Identification {
                    name: stem,
                    registration_id: id.to_string(),
                    class_name: String::new(),
                },
            },
            None => Identification {
                name: stem,
                ..Default::default()
            },
        }
    }

    fn identify(&self, gray: &Mat) -> Option<String> {
        match IdentityExtractor::new(&self.config.identity) {
            Ok(extractor) => extractor.extract(gray),
            Err(e) => {
                log::warn!("identity extraction failed: {}", e.message);
                None
            }
        }
    }

    fn grade_image(&self, source: &Path, gray: Mat) -> Result<GradedPage, SheetError> {
        let reading = read_sheet(&gray, &self.config)?;
        let identifier = self.identify(&gray);
        drop(gray);

        let identification = self.resolve_identity(source, identifier.as_deref());
        let responses = Responses::from_letters(&reading.answers);
        let result = score(&self.key, &responses, identification, self.weights.as_ref())?;
        log::info!(
            "{}: {}/{} correct, grade {}",
            source.display(),
            result.correct_count(),
            result.total_questions,
            result.grade
        );

        Ok(GradedPage {
            source: source.to_path_buf(),
            identifier,
            result,
            ambiguous: reading.ambiguous,
        })
    }

    pub fn grade_page(&self, path: &Path) -> Result<GradedPage, SheetError> {
        self.grade_image(path, read_from_path(path)?)
    }

    /// Grades a page that is already in memory as an encoded image. `source`
    /// names the page in the result and provides the fallback student name.
    pub fn grade_encoded(&self, source: &Path, bytes: &[u8]) -> Result<GradedPage, SheetError> {
        self.grade_image(source, decode_from_bytes(bytes)?)
    }

    /// Grades every page in parallel. A page that fails is reported in
    /// `failures` and does not stop the others; only an empty key aborts.
    pub fn grade_pages(&self, paths: &[PathBuf]) -> Result<BatchOutcome, ScoringError> {
        if self.key.is_empty() {
            return Err(ScoringError::MissingAnswerKey);
        }

        let outcomes: Vec<(&PathBuf, Result<GradedPage, SheetError>)> = paths
            .par_iter()
            .map(|path| (path, self.grade_page(path)))
            .collect();

        let mut batch = BatchOutcome::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(page) => batch.graded.push(page),
                Err(e) => {
                    err_log!(&e);
                    batch.failures.push(PageFailure {
                        source: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        log::info!(
            "graded {} pages, {} failed",
            batch.graded.len(),
            batch.failures.len()
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::config::DEFAULT_ALTERNATIVES;

    fn session() -> GradingSession {
        let key = AnswerKey::from_pairs([(1, "A"), (2, "B")], &DEFAULT_ALTERNATIVES).unwrap();
        let roster = Roster::new(HashMap::from([(
            "2024000123".to_string(),
            RosterEntry {
                name: "Maria Souza".into(),
                class_name: "3B".into(),
            },
        )]));
        GradingSession::new(key, ReaderConfig::default()).with_roster(roster)
    }

    #[test]
    fn test_identity_from_roster() {
        let id = session().resolve_identity(Path::new("scans/page_01.png"), Some("2024000123"));
        assert_eq!(id.name, "Maria Souza");
        assert_eq!(id.registration_id, "2024000123");
        assert_eq!(id.class_name, "3B");
    }

    #[test]
    fn test_identity_unknown_identifier_uses_file_stem() {
        let id = session().resolve_identity(Path::new("scans/page_01.png"), Some("9999999999"));
        assert_eq!(id.name, "page_01");
        assert_eq!(id.registration_id, "9999999999");
        assert!(id.class_name.is_empty());
    }

    #[test]
    fn test_identity_without_identifier() {
        let id = session().resolve_identity(Path::new("scans/page_02.jpg"), None);
        assert_eq!(
            id,
            Identification {
                name: "page_02".into(),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_unreadable_pages_are_failures_in_order() {
        let paths = vec![PathBuf::from("missing_a.png"), PathBuf::from("missing_b.png")];
        let outcome = session().grade_pages(&paths).unwrap();
        assert!(outcome.graded.is_empty());
        assert_eq!(
            outcome.failures.iter().map(|f| f.source.clone()).collect::<Vec<_>>(),
            paths
        );
        assert!(outcome.failures[0].reason.contains("missing_a.png"));
    }

    #[test]
    fn test_empty_key_aborts() {
        let session = GradingSession::new(AnswerKey::default(), ReaderConfig::default());
        assert!(matches!(
            session.grade_pages(&[PathBuf::from("a.png")]),
            Err(ScoringError::MissingAnswerKey)
        ));
    }

    #[test]
    fn test_roster_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        std::fs::write(&path, r#"{"2024000123": {"nome": "Maria Souza", "turma": "3B"}, "2024000124": {"nome": "João"}}"#)
            .unwrap();
        let roster = Roster::from_path(&path).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.get("2024000124").map(|e| e.class_name.as_str()), Some(""));
    }

    #[test]
    fn test_roster_accepts_numeric_class() {
        let roster: Roster = serde_json::from_str(r#"{"2024000125": {"nome": "Caio", "turma": 3}}"#).unwrap();
        assert_eq!(roster.get("2024000125").map(|e| e.class_name.as_str()), Some("3"));
    }

    #[test]
    fn test_grade_encoded_page() {
        use opencv::core::{self, Vector};
        use opencv::imgcodecs;
        use opencv::prelude::*;

        let page = Mat::new_rows_cols_with_default(400, 300, core::CV_8UC1, core::Scalar::all(255.0)).unwrap();
        let mut png: Vector<u8> = Vector::new();
        assert!(imgcodecs::imencode_def(".png", &page, &mut png).unwrap());

        let graded = session()
            .grade_encoded(Path::new("upload/aluno_12.png"), &png.to_vec())
            .unwrap();
        assert_eq!(graded.source, PathBuf::from("upload/aluno_12.png"));
        assert_eq!(graded.result.identification.name, "aluno_12");
        assert_eq!(graded.result.blank_count(), 2);
    }

    #[test]
    fn test_grade_encoded_rejects_garbage() {
        assert!(matches!(
            session().grade_encoded(Path::new("x.png"), b"not an image"),
            Err(SheetError::ImageDecode)
        ));
    }
}
