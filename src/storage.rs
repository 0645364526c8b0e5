use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::errors::StorageError;
use crate::scoring::ScoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    Csv,
}

impl ResultFormat {
    /// `.csv` is CSV, anything else JSON.
    pub fn from_path(path: &Path) -> ResultFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ResultFormat::Csv,
            _ => ResultFormat::Json,
        }
    }
}

/// One line of the spreadsheet export.
#[derive(Debug, Serialize)]
pub struct ResultRow<'a> {
    #[serde(rename = "Nome")]
    pub name: &'a str,
    #[serde(rename = "Matrícula")]
    pub registration_id: &'a str,
    #[serde(rename = "Turma")]
    pub class_name: &'a str,
    #[serde(rename = "Total Questões")]
    pub total_questions: usize,
    #[serde(rename = "Acertos")]
    pub correct: usize,
    #[serde(rename = "Erros")]
    pub wrong: usize,
    #[serde(rename = "Em Branco")]
    pub blank: usize,
    #[serde(rename = "Pontuação")]
    pub score_points: f64,
    #[serde(rename = "Pontuação Máxima")]
    pub max_points: f64,
    #[serde(rename = "Percentual")]
    pub percentage: f64,
    #[serde(rename = "Nota")]
    pub grade: f64,
}

impl<'a> From<&'a ScoreResult> for ResultRow<'a> {
    fn from(r: &'a ScoreResult) -> Self {
        ResultRow {
            name: &r.identification.name,
            registration_id: &r.identification.registration_id,
            class_name: &r.identification.class_name,
            total_questions: r.total_questions,
            correct: r.correct_count(),
            wrong: r.wrong_count(),
            blank: r.blank_count(),
            score_points: r.score_points,
            max_points: r.max_points,
            percentage: r.percentage,
            grade: r.grade,
        }
    }
}

pub fn write_csv<W: Write>(results: &[ScoreResult], out: W) -> Result<(), StorageError> {
    let mut wtr = csv::Writer::from_writer(out);
    for row in results.iter().map(ResultRow::from) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(results: &[ScoreResult], out: W) -> Result<(), StorageError> {
    serde_json::to_writer_pretty(out, results)?;
    Ok(())
}

/// Writes `results` to `path`, replacing any existing file.
pub fn export_results(results: &[ScoreResult], path: &Path, format: ResultFormat) -> Result<(), StorageError> {
    let mut out = BufWriter::new(File::create(path)?);
    match format {
        ResultFormat::Json => write_json(results, &mut out)?,
        ResultFormat::Csv => write_csv(results, &mut out)?,
    }
    out.flush()?;
    log::info!("exported {} results to {}", results.len(), path.display());
    Ok(())
}
