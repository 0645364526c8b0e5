pub mod batch;
pub mod bubbles;
pub mod classify;
pub mod commands;
pub mod config;
pub mod errors;
pub mod grid;
pub mod identity;
pub mod image;
pub mod key;
pub mod reader;
pub mod report;
pub mod scoring;
pub mod session;
pub mod storage;

pub use config::ReaderConfig;
pub use key::{AnswerKey, KeyFormat, QuestionWeights};
pub use reader::{read_sheet, SheetReading};
pub use scoring::{score, Identification, Responses, ScoreResult};
pub use session::{BatchOutcome, GradedPage, GradingSession, Roster};
