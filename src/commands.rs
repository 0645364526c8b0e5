use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::batch::{score_file, RecordFormat};
use crate::config::ReaderConfig;
use crate::identity::IdentityExtractor;
use crate::image::read_from_path;
use crate::key::{AnswerKey, KeyFormat, QuestionWeights};
use crate::reader::{read_sheet, SheetReading};
use crate::report::{render_sheet, ClassSummary};
use crate::scoring::ScoreResult;
use crate::session::{GradingSession, Roster};
use crate::storage::{export_results, ResultFormat};

#[derive(Debug, Parser)]
#[command(version, about = "Read scanned multiple-choice answer sheets and score them")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the answers detected on one page as JSON
    Read {
        image: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Grade scanned pages against an answer key
    Grade {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        config: Option<PathBuf>,
        /// JSON object of student identifier to {"nome", "turma"}
        #[arg(long)]
        roster: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Score transcribed answer records (JSON list or CSV table)
    Batch {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        records: PathBuf,
        /// Reader config whose `grid.alternatives` validate the key
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Rewrite an answer key in another format
    ConvertKey {
        input: PathBuf,
        output: PathBuf,
        /// Defaults to the input extension
        #[arg(long)]
        from: Option<KeyFormatArg>,
        /// Defaults to the output extension
        #[arg(long)]
        to: Option<KeyFormatArg>,
        /// Reader config whose `grid.alternatives` validate the key
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    #[arg(long)]
    key: PathBuf,
    /// Defaults to the key file extension
    #[arg(long)]
    key_format: Option<KeyFormatArg>,
    /// JSON object of question number to weight
    #[arg(long)]
    weights: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Export results to a .json or .csv file
    #[arg(long)]
    out: Option<PathBuf>,
    /// Students listed in the ranking
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KeyFormatArg {
    Json,
    Csv,
    Text,
}

impl From<KeyFormatArg> for KeyFormat {
    fn from(arg: KeyFormatArg) -> Self {
        match arg {
            KeyFormatArg::Json => KeyFormat::Json,
            KeyFormatArg::Csv => KeyFormat::Csv,
            KeyFormatArg::Text => KeyFormat::Text,
        }
    }
}

fn format_for(path: &Path, arg: Option<KeyFormatArg>) -> KeyFormat {
    arg.map_or_else(|| KeyFormat::from_path(path), KeyFormat::from)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReaderConfig> {
    match path {
        Some(path) => ReaderConfig::from_path(path)
            .with_context(|| format!("loading reader config {}", path.display())),
        None => Ok(ReaderConfig::default()),
    }
}

impl KeyArgs {
    fn load(&self, alphabet: &[char]) -> anyhow::Result<(AnswerKey, Option<QuestionWeights>)> {
        let format = format_for(&self.key, self.key_format);
        let key = AnswerKey::load_with_alphabet(&self.key, format, alphabet)
            .with_context(|| format!("loading answer key {}", self.key.display()))?;
        if key.is_empty() {
            bail!("answer key {} has no questions", self.key.display());
        }
        let weights = self
            .weights
            .as_deref()
            .map(|path| {
                QuestionWeights::load(path).with_context(|| format!("loading weights {}", path.display()))
            })
            .transpose()?;
        Ok((key, weights))
    }
}

impl OutputArgs {
    fn finish(&self, results: &[ScoreResult]) -> anyhow::Result<()> {
        match ClassSummary::from_results(results, self.top) {
            Some(summary) => println!("{}", summary.render()),
            None => println!("No sheet was scored."),
        }
        if let Some(out) = &self.out {
            export_results(results, out, ResultFormat::from_path(out))
                .with_context(|| format!("exporting results to {}", out.display()))?;
            println!("Results written to {}", out.display());
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PageReading {
    #[serde(flatten)]
    reading: SheetReading,
    identifier: Option<String>,
}

fn read(image: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let gray = read_from_path(image)?;
    let reading = read_sheet(&gray, &config)?;
    let identifier = IdentityExtractor::new(&config.identity)
        .context("creating code detectors")?
        .extract(&gray);
    println!(
        "{}",
        serde_json::to_string_pretty(&PageReading { reading, identifier })?
    );
    Ok(())
}

fn grade(
    key_args: &KeyArgs,
    config: Option<&Path>,
    roster: Option<&Path>,
    output: &OutputArgs,
    images: &[PathBuf],
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let (key, weights) = key_args.load(&config.grid.alternatives)?;
    let mut session = GradingSession::new(key, config);
    if let Some(weights) = weights {
        session = session.with_weights(weights);
    }
    if let Some(path) = roster {
        let roster = Roster::from_path(path).with_context(|| format!("loading roster {}", path.display()))?;
        session = session.with_roster(roster);
    }

    let outcome = session.grade_pages(images)?;
    for page in &outcome.graded {
        println!("{}: {}", page.source.display(), render_sheet(&page.result));
        if !page.ambiguous.is_empty() {
            println!("  ambiguous questions left blank: {:?}", page.ambiguous);
        }
    }
    for failure in &outcome.failures {
        eprintln!("{}: {}", failure.source.display(), failure.reason);
    }
    output.finish(&outcome.results())?;
    if outcome.graded.is_empty() {
        bail!("none of the {} pages could be graded", images.len());
    }
    Ok(())
}

fn batch(
    key_args: &KeyArgs,
    records: &Path,
    config: Option<&Path>,
    output: &OutputArgs,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let (key, weights) = key_args.load(&config.grid.alternatives)?;
    let report = score_file(&key, records, RecordFormat::from_path(records), weights.as_ref())
        .with_context(|| format!("scoring records from {}", records.display()))?;
    for skip in &report.skipped {
        eprintln!("{skip}");
    }
    println!(
        "{} sheets scored, {} records skipped",
        report.results.len(),
        report.skipped.len()
    );
    output.finish(&report.results)
}

fn convert_key(
    input: &Path,
    output: &Path,
    from: Option<KeyFormatArg>,
    to: Option<KeyFormatArg>,
    config: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let key = AnswerKey::load_with_alphabet(input, format_for(input, from), &config.grid.alternatives)
        .with_context(|| format!("loading answer key {}", input.display()))?;
    key.save(output, format_for(output, to))
        .with_context(|| format!("writing answer key {}", output.display()))?;
    println!("{} questions written to {}", key.len(), output.display());
    Ok(())
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Read { image, config } => read(image, config.as_deref()),
        Command::Grade {
            key,
            config,
            roster,
            output,
            images,
        } => grade(key, config.as_deref(), roster.as_deref(), output, images),
        Command::Batch {
            key,
            records,
            config,
            output,
        } => batch(key, records, config.as_deref(), output),
        Command::ConvertKey {
            input,
            output,
            from,
            to,
            config,
        } => convert_key(input, output, *from, *to, config.as_deref()),
    }
}
