//! The official answer key and the file formats it is stored in.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_ALTERNATIVES;
use crate::errors::KeyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    Json,
    Csv,
    Text,
}

impl KeyFormat {
    /// Extension-based guess for callers that only have a file name;
    /// anything that is not `.json` or `.csv` is treated as text.
    pub fn from_path(path: &Path) -> KeyFormat {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") => KeyFormat::Json,
            Some("csv") => KeyFormat::Csv,
            _ => KeyFormat::Text,
        }
    }
}

/// Question number to correct letter. Built once per grading session and
/// never modified afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerKey {
    answers: BTreeMap<u32, char>,
}

fn parse_question(raw: &str) -> Result<u32, KeyError> {
    match raw.trim().parse::<u32>() {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(KeyError::InvalidQuestion(raw.trim().to_string())),
    }
}

fn parse_letter(question: u32, raw: &str, alphabet: &[char]) -> Result<char, KeyError> {
    let upper = raw.trim().to_uppercase();
    let mut chars = upper.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if alphabet.contains(&c) => Ok(c),
        _ => Err(KeyError::InvalidLetter {
            question,
            answer: raw.trim().to_string(),
        }),
    }
}

impl AnswerKey {
    /// Validates every entry against `alphabet`; letters are upper-cased.
    pub fn from_pairs<I, S>(pairs: I, alphabet: &[char]) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: AsRef<str>,
    {
        let mut answers = BTreeMap::new();
        for (question, answer) in pairs {
            if question == 0 {
                return Err(KeyError::InvalidQuestion(question.to_string()));
            }
            let letter = parse_letter(question, answer.as_ref(), alphabet)?;
            if answers.insert(question, letter).is_some() {
                return Err(KeyError::DuplicateQuestion(question));
            }
        }
        Ok(Self { answers })
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn get(&self, question: u32) -> Option<char> {
        self.answers.get(&question).copied()
    }

    /// Entries in ascending question order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, char)> + '_ {
        self.answers.iter().map(|(&q, &a)| (q, a))
    }

    pub fn parse(text: &str, format: KeyFormat, alphabet: &[char]) -> Result<Self, KeyError> {
        match format {
            KeyFormat::Json => parse_json(text, alphabet),
            KeyFormat::Csv => parse_csv(text, alphabet),
            KeyFormat::Text => parse_text(text, alphabet),
        }
    }

    pub fn load(path: &Path, format: KeyFormat) -> Result<Self, KeyError> {
        Self::load_with_alphabet(path, format, &DEFAULT_ALTERNATIVES)
    }

    pub fn load_with_alphabet(path: &Path, format: KeyFormat, alphabet: &[char]) -> Result<Self, KeyError> {
        let text = std::fs::read_to_string(path)?;
        let key = Self::parse(&text, format, alphabet)?;
        log::info!("answer key loaded from {}: {} questions", path.display(), key.len());
        Ok(key)
    }

    pub fn serialize(&self, format: KeyFormat) -> Result<String, KeyError> {
        match format {
            KeyFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            KeyFormat::Csv => self.to_csv(),
            KeyFormat::Text => Ok(self.to_text()),
        }
    }

    pub fn save(&self, path: &Path, format: KeyFormat) -> Result<(), KeyError> {
        std::fs::write(path, self.serialize(format)?)?;
        Ok(())
    }

    fn to_csv(&self) -> Result<String, KeyError> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(["question", "answer"])?;
        for (q, a) in self.iter() {
            wtr.write_record([q.to_string(), a.to_string()])?;
        }
        let bytes = wtr.into_inner().map_err(|e| KeyError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn to_text(&self) -> String {
        let mut out = String::from("# Answer key\n# Format: question: answer\n\n");
        for (q, a) in self.iter() {
            _ = writeln!(out, "{q}: {a}");
        }
        out
    }
}

fn parse_json(text: &str, alphabet: &[char]) -> Result<AnswerKey, KeyError> {
    let raw: BTreeMap<String, String> = serde_json::from_str(text)?;
    let pairs = raw
        .iter()
        .map(|(q, a)| Ok((parse_question(q)?, a.as_str())))
        .collect::<Result<Vec<_>, KeyError>>()?;
    AnswerKey::from_pairs(pairs, alphabet)
}

fn parse_csv(text: &str, alphabet: &[char]) -> Result<AnswerKey, KeyError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut pairs = Vec::new();
    for record in rdr.records() {
        let record = record?;
        match (record.get(0), record.get(1)) {
            (Some(q), Some(a)) => pairs.push((parse_question(q)?, a.to_string())),
            // blank trailing lines
            (Some(q), None) if q.trim().is_empty() => continue,
            _ => {
                return Err(KeyError::UnrecognisedLine {
                    line: record.position().map_or(0, |p| p.line() as usize),
                    content: record.iter().collect::<Vec<_>>().join(","),
                })
            }
        }
    }
    AnswerKey::from_pairs(pairs, alphabet)
}

fn parse_text(text: &str, alphabet: &[char]) -> Result<AnswerKey, KeyError> {
    let mut pairs = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let split = if line.contains(':') {
            line.split_once(':')
        } else if line.contains(char::is_whitespace) {
            line.split_once(char::is_whitespace)
        } else {
            line.split_once(',')
        };
        let Some((q, a)) = split else {
            return Err(KeyError::UnrecognisedLine {
                line: idx + 1,
                content: line.to_string(),
            });
        };
        pairs.push((parse_question(q)?, a.trim().to_string()));
    }
    AnswerKey::from_pairs(pairs, alphabet)
}

/// Per-question weights; questions without an entry weigh 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QuestionWeights(BTreeMap<u32, f64>);

impl QuestionWeights {
    pub fn new(weights: BTreeMap<u32, f64>) -> Result<Self, KeyError> {
        if let Some((&q, _)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(KeyError::InvalidWeight(q));
        }
        Ok(Self(weights))
    }

    pub fn weight(&self, question: u32) -> f64 {
        self.0.get(&question).copied().unwrap_or(1.0)
    }

    pub fn load(path: &Path) -> Result<Self, KeyError> {
        let text = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, f64> = serde_json::from_str(&text)?;
        let weights = raw
            .into_iter()
            .map(|(q, w)| Ok((parse_question(&q)?, w)))
            .collect::<Result<BTreeMap<_, _>, KeyError>>()?;
        Self::new(weights)
    }
}
