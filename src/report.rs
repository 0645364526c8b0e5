use std::collections::BTreeMap;
use std::fmt::Write;

use itertools::Itertools;
use serde::Serialize;

use crate::scoring::{round2, ScoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn from_hit_rate(percentage: f64) -> Difficulty {
        if percentage >= 80.0 {
            Difficulty::Easy
        } else if percentage >= 50.0 {
            Difficulty::Medium
        } else {
            Difficulty::Hard
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionStats {
    pub question: u32,
    pub correct: usize,
    pub percentage: f64,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankEntry {
    pub position: usize,
    pub name: String,
    pub grade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassSummary {
    pub students: usize,
    pub mean_correct: f64,
    pub mean_grade: f64,
    pub highest_grade: f64,
    pub lowest_grade: f64,
    pub questions: Vec<QuestionStats>,
    pub ranking: Vec<RankEntry>,
}

impl ClassSummary {
    /// `None` for an empty class. Questions are the union of every sheet's
    /// key questions; the ranking keeps the `top_n` best grades, ties in input
    /// order.
    pub fn from_results(results: &[ScoreResult], top_n: usize) -> Option<ClassSummary> {
        if results.is_empty() {
            return None;
        }
        let students = results.len();
        let n = students as f64;

        let grades = results.iter().map(|r| r.grade);
        let highest_grade = grades.clone().fold(f64::NEG_INFINITY, f64::max);
        let lowest_grade = grades.clone().fold(f64::INFINITY, f64::min);
        let mean_grade = grades.sum::<f64>() / n;
        let mean_correct = results.iter().map(|r| r.correct_count() as f64).sum::<f64>() / n;

        let mut hits: BTreeMap<u32, usize> = BTreeMap::new();
        for r in results {
            for q in r.key_questions() {
                hits.entry(q).or_default();
            }
            for &q in &r.correct {
                *hits.entry(q).or_default() += 1;
            }
        }
        let questions = hits
            .into_iter()
            .map(|(question, correct)| {
                let percentage = round2(correct as f64 / n * 100.0);
                QuestionStats {
                    question,
                    correct,
                    percentage,
                    difficulty: Difficulty::from_hit_rate(percentage),
                }
            })
            .collect();

        let ranking = results
            .iter()
            .sorted_by(|a, b| b.grade.total_cmp(&a.grade))
            .take(top_n)
            .enumerate()
            .map(|(idx, r)| RankEntry {
                position: idx + 1,
                name: r.identification.name.clone(),
                grade: r.grade,
            })
            .collect();

        Some(ClassSummary {
            students,
            mean_correct: round2(mean_correct),
            mean_grade: round2(mean_grade),
            highest_grade,
            lowest_grade,
            questions,
            ranking,
        })
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(70);
        let mut out = String::new();
        _ = writeln!(out, "{rule}\nCLASS SUMMARY\n{rule}\n");
        _ = writeln!(out, "Students:       {}", self.students);
        _ = writeln!(out, "Mean correct:   {:.2}", self.mean_correct);
        _ = writeln!(out, "Mean grade:     {:.2}", self.mean_grade);
        _ = writeln!(out, "Highest grade:  {:.2}", self.highest_grade);
        _ = writeln!(out, "Lowest grade:   {:.2}\n", self.lowest_grade);

        _ = writeln!(out, "{:<10} {:<10} {:<10} Difficulty", "Question", "Correct", "%");
        _ = writeln!(out, "{}", "-".repeat(70));
        for q in &self.questions {
            _ = writeln!(
                out,
                "{:<10} {:<10} {:>6.1}%    {}",
                q.question,
                q.correct,
                q.percentage,
                q.difficulty.label()
            );
        }

        _ = writeln!(out, "\n{:<10} {:<30} Grade", "Position", "Name");
        _ = writeln!(out, "{}", "-".repeat(70));
        for entry in &self.ranking {
            _ = writeln!(out, "{:<10} {:<30} {:.2}", entry.position, entry.name, entry.grade);
        }
        _ = write!(out, "\n{rule}");
        out
    }
}

impl ScoreResult {
    /// Every question of the key this sheet was scored against.
    fn key_questions(&self) -> impl Iterator<Item = u32> + '_ {
        self.correct
            .iter()
            .copied()
            .chain(self.wrong.iter().map(|w| w.question))
            .chain(self.blank.iter().copied())
    }
}

/// Plain-text report for one sheet.
pub fn render_sheet(result: &ScoreResult) -> String {
    let rule = "=".repeat(70);
    let id = &result.identification;
    let mut out = String::new();
    _ = writeln!(out, "{rule}\nSHEET REPORT\n{rule}\n");
    _ = writeln!(out, "Name:           {}", id.name);
    _ = writeln!(out, "Registration:   {}", id.registration_id);
    _ = writeln!(out, "Class:          {}\n", id.class_name);
    _ = writeln!(out, "Questions:      {}", result.total_questions);
    _ = writeln!(out, "Correct:        {}", result.correct_count());
    _ = writeln!(out, "Wrong:          {}", result.wrong_count());
    _ = writeln!(out, "Blank:          {}", result.blank_count());
    _ = writeln!(out, "Points:         {}/{}", result.score_points, result.max_points);
    _ = writeln!(out, "Percentage:     {:.2}%", result.percentage);
    _ = writeln!(out, "Grade:          {:.2}", result.grade);

    if !result.wrong.is_empty() {
        _ = writeln!(out, "\nWrong answers:");
        for w in &result.wrong {
            _ = writeln!(
                out,
                "  Question {:02}: marked '{}' (correct: '{}')",
                w.question, w.given, w.expected
            );
        }
    }
    if !result.blank.is_empty() {
        _ = writeln!(out, "\nBlank: {}", result.blank.iter().join(", "));
    }
    _ = write!(out, "{rule}");
    out
}
