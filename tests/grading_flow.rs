use std::path::PathBuf;

use opencv::core::{self, Mat, Vector};
use opencv::imgcodecs;
use opencv::prelude::*;

use sheetscore::batch::{score_file, RecordFormat};
use sheetscore::report::ClassSummary;
use sheetscore::storage::{export_results, ResultFormat};
use sheetscore::{AnswerKey, GradingSession, KeyFormat, QuestionWeights, ReaderConfig};

fn write_key(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("gabarito.csv");
    std::fs::write(&path, "question,answer\n1,A\n2,B\n3,C\n4,D\n5,E\n").unwrap();
    path
}

#[test]
fn blank_scan_grades_as_all_blank() {
    let dir = tempfile::tempdir().unwrap();
    let key = AnswerKey::load(&write_key(dir.path()), KeyFormat::Csv).unwrap();

    let page = Mat::new_rows_cols_with_default(400, 300, core::CV_8UC1, core::Scalar::all(255.0)).unwrap();
    let page_path = dir.path().join("aluno_07.png");
    assert!(imgcodecs::imwrite(page_path.to_str().unwrap(), &page, &Vector::new()).unwrap());

    let session = GradingSession::new(key, ReaderConfig::default());
    let outcome = session
        .grade_pages(&[page_path.clone(), dir.path().join("nao_existe.png")])
        .unwrap();

    assert_eq!(outcome.graded.len(), 1);
    assert_eq!(outcome.failures.len(), 1);
    let graded = &outcome.graded[0];
    assert_eq!(graded.source, page_path);
    assert_eq!(graded.identifier, None);
    assert_eq!(graded.result.identification.name, "aluno_07");
    assert_eq!(graded.result.blank_count(), 5);
    assert_eq!(graded.result.grade, 0.0);
}

#[test]
fn weighted_batch_to_class_summary_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let key = AnswerKey::load(&write_key(dir.path()), KeyFormat::Csv).unwrap();
    let weights_path = dir.path().join("pesos.json");
    std::fs::write(&weights_path, r#"{"5": 2.0}"#).unwrap();
    let weights = QuestionWeights::load(&weights_path).unwrap();

    let records = dir.path().join("respostas.json");
    std::fs::write(
        &records,
        r#"[
            {"identificacao": {"nome": "Ana", "matricula": "1", "turma": "A"},
             "respostas": {"1": "A", "2": "B", "3": "C", "4": "D", "5": "E"}},
            {"identificacao": {"nome": "Bruno"}, "respostas": {"1": "A", "5": "E"}},
            "not a record",
            {"identificacao": {"nome": "Carla"}, "respostas": {"1": "B", "2": "B"}}
        ]"#,
    )
    .unwrap();

    let report = score_file(&key, &records, RecordFormat::Json, Some(&weights)).unwrap();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].index, 3);

    let bruno = &report.results[1];
    assert_eq!(bruno.score_points, 3.0);
    assert_eq!(bruno.max_points, 6.0);
    assert_eq!(bruno.grade, 5.0);

    let summary = ClassSummary::from_results(&report.results, 2).unwrap();
    assert_eq!(summary.students, 3);
    assert_eq!(summary.highest_grade, 10.0);
    assert_eq!(summary.ranking.len(), 2);
    assert_eq!(summary.ranking[1].name, "Bruno");

    let out = dir.path().join("resultados.csv");
    export_results(&report.results, &out, ResultFormat::Csv).unwrap();
    let exported = std::fs::read_to_string(&out).unwrap();
    assert_eq!(exported.lines().count(), 4);
}
