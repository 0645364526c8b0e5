use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{BatchError, RecordError, ScoringError};
use crate::key::{AnswerKey, QuestionWeights};
use crate::scoring::{score, Identification, Responses, ScoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// A list of `{"identificacao": {..}, "respostas": {"1": "A", ..}}`.
    Json,
    /// Header `nome,matricula,turma,q1,q2,..`.
    Csv,
}

impl RecordFormat {
    /// `.csv` is CSV, anything else JSON.
    pub fn from_path(path: &Path) -> RecordFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => RecordFormat::Csv,
            _ => RecordFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerRecord {
    pub identification: Identification,
    pub responses: Responses,
}

#[derive(Deserialize)]
struct JsonRecord {
    #[serde(rename = "identificacao", default)]
    identification: Identification,
    #[serde(rename = "respostas")]
    responses: BTreeMap<String, Option<String>>,
}

/// Records are numbered from 1, in input order.
type ParsedRecord = Result<AnswerRecord, RecordError>;

fn question_number(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|&q| q > 0)
}

fn from_json_record(record: JsonRecord) -> Result<AnswerRecord, String> {
    let answers = record
        .responses
        .into_iter()
        .map(|(q, answer)| {
            question_number(&q)
                .map(|q| (q, answer.unwrap_or_default()))
                .ok_or_else(|| format!("invalid question number {q:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AnswerRecord {
        identification: record.identification,
        responses: Responses::new(answers),
    })
}

/// Fails as a whole only when `text` is not a JSON list.
pub fn parse_json_records(text: &str) -> Result<Vec<ParsedRecord>, BatchError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(text)?;
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| {
            serde_json::from_value::<JsonRecord>(value)
                .map_err(|e| e.to_string())
                .and_then(from_json_record)
                .map_err(|reason| RecordError {
                    index: idx + 1,
                    reason,
                })
        })
        .collect())
}

/// Fails as a whole only when the header row cannot be read.
pub fn parse_csv_records<R: Read>(input: R) -> Result<Vec<ParsedRecord>, BatchError> {
    let mut reader = csv::Reader::from_reader(input);
    let headers = reader.headers()?.clone();

    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let (name_col, id_col, class_col) = (column("nome"), column("matricula"), column("turma"));
    let question_cols: Vec<(usize, u32)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| {
            h.trim()
                .strip_prefix('q')
                .and_then(question_number)
                .map(|q| (idx, q))
        })
        .collect();

    Ok(reader
        .records()
        .enumerate()
        .map(|(idx, row)| -> ParsedRecord {
            let row = row.map_err(|e| RecordError {
                index: idx + 1,
                reason: e.to_string(),
            })?;
            let field = |col: Option<usize>| {
                col.and_then(|c| row.get(c))
                    .unwrap_or_default()
                    .trim()
                    .to_string()
            };
            Ok(AnswerRecord {
                identification: Identification {
                    name: field(name_col),
                    registration_id: field(id_col),
                    class_name: field(class_col),
                },
                responses: Responses::new(
                    question_cols
                        .iter()
                        .map(|&(col, q)| (q, row.get(col).unwrap_or_default())),
                ),
            })
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: Vec<ScoreResult>,
    pub skipped: Vec<RecordError>,
}

/// Scores every parsed record. Skipped records keep their parse error.
pub fn score_records(
    key: &AnswerKey,
    records: Vec<ParsedRecord>,
    weights: Option<&QuestionWeights>,
) -> Result<BatchReport, BatchError> {
    if key.is_empty() {
        return Err(ScoringError::MissingAnswerKey.into());
    }
    let mut report = BatchReport::default();
    for record in records {
        match record {
            Ok(record) => {
                let result = score(key, &record.responses, record.identification, weights)?;
                report.results.push(result);
            }
            Err(skip) => {
                log::warn!("{skip}");
                report.skipped.push(skip);
            }
        }
    }
    log::info!(
        "batch scored: {} sheets, {} records skipped",
        report.results.len(),
        report.skipped.len()
    );
    Ok(report)
}

pub fn score_file(
    key: &AnswerKey,
    path: &Path,
    format: RecordFormat,
    weights: Option<&QuestionWeights>,
) -> Result<BatchReport, BatchError> {
    let records = match format {
        RecordFormat::Json => parse_json_records(&std::fs::read_to_string(path)?)?,
        RecordFormat::Csv => parse_csv_records(std::fs::File::open(path)?)?,
    };
    score_records(key, records, weights)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::config::DEFAULT_ALTERNATIVES;

    fn key() -> AnswerKey {
        AnswerKey::from_pairs([(1, "A"), (2, "B"), (3, "C")], &DEFAULT_ALTERNATIVES).unwrap()
    }

    #[test]
    fn test_json_batch_skips_malformed_record() {
        let text = r#"[
            {"identificacao": {"nome": "Ana", "matricula": "1"}, "respostas": {"1": "A", "2": "B", "3": "C"}},
            {"identificacao": {"nome": "Bruno"}, "respostas": {"1": "a", "2": "", "3": "D"}},
            {"identificacao": {"nome": "Sem respostas"}},
            {"identificacao": {"nome": "Carla"}, "respostas": {"1": null, "2": "B"}}
        ]"#;
        let report = score_records(&key(), parse_json_records(text).unwrap(), None).unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 3);

        assert_eq!(report.results[0].grade, 10.0);
        assert_eq!(report.results[1].correct, vec![1]);
        assert_eq!(report.results[1].blank, vec![2]);
        assert_eq!(report.results[2].blank, vec![1, 3]);
        assert_eq!(report.results[2].identification.name, "Carla");
    }

    #[test]
    fn test_json_bad_question_number_is_skipped() {
        let text = r#"[{"respostas": {"um": "A"}}, {"respostas": {"1": "A"}}]"#;
        let records = parse_json_records(text).unwrap();
        assert!(records[0].as_ref().is_err_and(|e| e.reason.contains("\"um\"")));
        assert!(records[1].is_ok());
    }

    #[test]
    fn test_json_numeric_registration_id() {
        let text = r#"[{"identificacao": {"nome": "Ana", "matricula": 2023001234, "turma": 3},
                        "respostas": {"1": "A"}}]"#;
        let report = score_records(&key(), parse_json_records(text).unwrap(), None).unwrap();
        assert!(report.skipped.is_empty());
        let id = &report.results[0].identification;
        assert_eq!(id.registration_id, "2023001234");
        assert_eq!(id.class_name, "3");
    }

    #[test]
    fn test_json_not_a_list_fails_whole_batch() {
        assert!(matches!(
            parse_json_records(r#"{"respostas": {}}"#),
            Err(BatchError::Json(_))
        ));
    }

    #[test]
    fn test_csv_batch() {
        let text = "nome,matricula,turma,q1,q2,q3\n\
                    Ana,1,A,A,B,C\n\
                    Bruno,2,A,B,,c\n\
                    Quebrado,3\n\
                    Dora,4,B,A,A,A\n";
        let report = score_records(&key(), parse_csv_records(text.as_bytes()).unwrap(), None).unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 3);

        let bruno = &report.results[1];
        assert_eq!(bruno.identification.registration_id, "2");
        assert_eq!(bruno.correct, vec![3]);
        assert_eq!(bruno.blank, vec![2]);
        assert_eq!(bruno.wrong_count(), 1);
        assert_eq!(report.results[2].identification.class_name, "B");
    }

    #[test]
    fn test_empty_key_aborts_batch() {
        let records = parse_json_records(r#"[{"respostas": {"1": "A"}}]"#).unwrap();
        assert!(matches!(
            score_records(&AnswerKey::default(), records, None),
            Err(BatchError::Scoring(ScoringError::MissingAnswerKey))
        ));
    }

    #[test]
    fn test_score_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turma.csv");
        std::fs::write(&path, "nome,q1,q2,q3\nAna,A,B,C\n").unwrap();
        let report = score_file(&key(), &path, RecordFormat::from_path(&path), None).unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].correct_count(), 3);
    }
}
