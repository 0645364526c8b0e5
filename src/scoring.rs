use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ScoringError;
use crate::key::{AnswerKey, QuestionWeights};

/// Who the sheet belongs to. Passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    #[serde(rename = "nome", default, deserialize_with = "scalar_text")]
    pub name: String,
    #[serde(rename = "matricula", default, deserialize_with = "scalar_text")]
    pub registration_id: String,
    #[serde(rename = "turma", default, deserialize_with = "scalar_text")]
    pub class_name: String,
}

/// Reads any JSON scalar as text, so `"matricula": 2023001234` is kept as
/// `"2023001234"`. `null` reads as an empty string.
pub(crate) fn scalar_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Option::<Scalar>::deserialize(deserializer)? {
        None => String::new(),
        Some(Scalar::Text(text)) => text,
        Some(Scalar::Unsigned(n)) => n.to_string(),
        Some(Scalar::Signed(n)) => n.to_string(),
        Some(Scalar::Float(n)) => n.to_string(),
        Some(Scalar::Bool(b)) => b.to_string(),
    })
}

/// The answers given on one sheet. Values are trimmed and upper-cased; an
/// empty value is the same as a missing one (blank).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Responses(BTreeMap<u32, String>);

impl Responses {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: AsRef<str>,
    {
        Self(
            answers
                .into_iter()
                .map(|(q, a)| (q, a.as_ref().trim().to_uppercase()))
                .collect(),
        )
    }

    pub fn from_letters(letters: &BTreeMap<u32, char>) -> Self {
        Self::new(letters.iter().map(|(&q, a)| (q, a.to_string())))
    }

    /// `None` for blank questions.
    pub fn get(&self, question: u32) -> Option<&str> {
        self.0
            .get(&question)
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckedAnswer {
    Correct,
    Incorrect,
    Missing,
}

impl CheckedAnswer {
    pub fn check_with(given: Option<&str>, expected: char) -> CheckedAnswer {
        match given {
            None => CheckedAnswer::Missing,
            Some(given) if given.eq_ignore_ascii_case(expected.encode_utf8(&mut [0; 4])) => {
                CheckedAnswer::Correct
            }
            Some(_) => CheckedAnswer::Incorrect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrongAnswer {
    #[serde(rename = "questao")]
    pub question: u32,
    #[serde(rename = "resposta_aluno")]
    pub given: String,
    #[serde(rename = "resposta_correta")]
    pub expected: char,
}

/// Outcome of scoring one sheet. `correct`, `wrong` and `blank` partition
/// the questions of the key.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub identification: Identification,
    pub total_questions: usize,
    pub correct: Vec<u32>,
    pub wrong: Vec<WrongAnswer>,
    pub blank: Vec<u32>,
    pub score_points: f64,
    pub max_points: f64,
    pub percentage: f64,
    /// 0 to 10.
    pub grade: f64,
    pub responses: Responses,
}

impl ScoreResult {
    pub fn correct_count(&self) -> usize {
        self.correct.len()
    }

    pub fn wrong_count(&self) -> usize {
        self.wrong.len()
    }

    pub fn blank_count(&self) -> usize {
        self.blank.len()
    }
}

// Field names are the contract with the reporting layer.
impl Serialize for ScoreResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut st = serializer.serialize_struct("ScoreResult", 13)?;
        st.serialize_field("identificacao", &self.identification)?;
        st.serialize_field("total_questoes", &self.total_questions)?;
        st.serialize_field("acertos", &self.correct_count())?;
        st.serialize_field("erros", &self.wrong_count())?;
        st.serialize_field("em_branco", &self.blank_count())?;
        st.serialize_field("pontuacao", &self.score_points)?;
        st.serialize_field("pontuacao_maxima", &self.max_points)?;
        st.serialize_field("percentual", &self.percentage)?;
        st.serialize_field("nota", &self.grade)?;
        st.serialize_field("questoes_certas", &self.correct)?;
        st.serialize_field("questoes_erradas", &self.wrong)?;
        st.serialize_field("questoes_branco", &self.blank)?;
        st.serialize_field("respostas_completas", &self.responses)?;
        st.end()
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Scores one sheet against `key`. Every question of the key is classified
/// exactly once as correct, wrong or blank; answers to questions that are not
/// in the key are ignored.
pub fn score(
    key: &AnswerKey,
    responses: &Responses,
    identification: Identification,
    weights: Option<&QuestionWeights>,
) -> Result<ScoreResult, ScoringError> {
    if key.is_empty() {
        return Err(ScoringError::MissingAnswerKey);
    }

    let (mut correct, mut wrong, mut blank) = (vec![], vec![], vec![]);
    let (mut points, mut max_points) = (0.0, 0.0);

    for (question, expected) in key.iter() {
        let weight = weights.map_or(1.0, |w| w.weight(question));
        max_points += weight;
        let given = responses.get(question);
        match CheckedAnswer::check_with(given, expected) {
            CheckedAnswer::Missing => blank.push(question),
            CheckedAnswer::Correct => {
                correct.push(question);
                points += weight;
            }
            CheckedAnswer::Incorrect => wrong.push(WrongAnswer {
                question,
                given: given.unwrap_or_default().to_string(),
                expected,
            }),
        }
    }

    let percentage = if max_points > 0.0 {
        points / max_points * 100.0
    } else {
        0.0
    };

    Ok(ScoreResult {
        identification,
        total_questions: key.len(),
        correct,
        wrong,
        blank,
        score_points: round2(points),
        max_points: round2(max_points),
        percentage: round2(percentage),
        grade: round2(percentage / 10.0),
        responses: responses.clone(),
    })
}
