//! Weighted fill scores per bubble and the marked/blank decision.

use std::collections::BTreeMap;

use opencv::core::{Mat, Rect};
use opencv::prelude::*;
use serde::Serialize;

use crate::bubbles::Circle;
use crate::config::{EnsembleConfig, EnsembleWeights};
use crate::errors::SheetError;
use crate::grid::QuestionGroup;
use crate::image::{binarize, invert};

/// Independent fill indicators measured on one bubble's region of interest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillMetrics {
    pub dark_fraction: f64,
    pub binary_fraction: f64,
    pub inverted_fraction: f64,
    pub deviation: f64,
    pub darkness: f64,
}

impl FillMetrics {
    /// `gray`, `binary` and `inverted` are the same region taken from the three
    /// page variants. Returns `None` for an empty region.
    pub fn measure(gray: &[u8], binary: &[u8], inverted: &[u8], cfg: &EnsembleConfig) -> Option<Self> {
        if gray.is_empty() || binary.is_empty() || inverted.is_empty() {
            return None;
        }
        let fraction = |px: &[u8], pred: &dyn Fn(u8) -> bool| {
            px.iter().filter(|&&p| pred(p)).count() as f64 / px.len() as f64
        };

        let n = gray.len() as f64;
        let mean = gray.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let variance = gray
            .iter()
            .map(|&p| (f64::from(p) - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(FillMetrics {
            dark_fraction: fraction(gray, &|p| p < cfg.dark_threshold),
            binary_fraction: fraction(binary, &|p| p == 0),
            inverted_fraction: fraction(inverted, &|p| p > cfg.inverted_threshold),
            deviation: (variance.sqrt() / cfg.deviation_scale).min(1.0),
            darkness: 1.0 - mean / 255.0,
        })
    }

    pub fn score(&self, w: &EnsembleWeights) -> f64 {
        self.dark_fraction * w.dark_fraction
            + self.binary_fraction * w.binary_fraction
            + self.inverted_fraction * w.inverted_fraction
            + self.deviation * w.deviation
            + self.darkness * w.darkness
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Index of the chosen alternative.
    Marked(usize),
    /// Nothing dark enough to be a mark.
    Faint,
    /// Best and runner-up too close: double mark or erasure.
    Ambiguous,
}

/// A best score under `min_fill` is faint, a lead under `min_margin` is
/// ambiguous. Ties on the best score go to the earliest alternative.
pub fn decide(scores: &[f64], cfg: &EnsembleConfig) -> Decision {
    let Some((best_idx, best)) = scores
        .iter()
        .copied()
        .enumerate()
        .fold(None, |acc: Option<(usize, f64)>, (idx, s)| match acc {
            Some((_, top)) if top >= s => acc,
            _ => Some((idx, s)),
        })
    else {
        return Decision::Faint;
    };
    if best < cfg.min_fill {
        return Decision::Faint;
    }
    let runner_up = scores
        .iter()
        .enumerate()
        .filter(|&(idx, _)| idx != best_idx)
        .map(|(_, &s)| s)
        .fold(f64::NEG_INFINITY, f64::max);
    if runner_up.is_finite() && best - runner_up < cfg.min_margin {
        return Decision::Ambiguous;
    }
    Decision::Marked(best_idx)
}

/// The three page variants sampled by the voter.
pub struct PageImages {
    pub gray: Mat,
    pub binary: Mat,
    pub inverted: Mat,
}

impl PageImages {
    pub fn new(gray: Mat, cfg: &EnsembleConfig) -> opencv::Result<Self> {
        let binary = binarize(&gray, cfg.binary_threshold)?;
        let inverted = invert(&gray)?;
        Ok(Self {
            gray,
            binary,
            inverted,
        })
    }

    fn roi_rect(&self, circle: &Circle, margin: i32) -> Option<Rect> {
        let reach = circle.radius + margin;
        let x1 = (circle.x - reach).max(0);
        let y1 = (circle.y - reach).max(0);
        let x2 = (circle.x + reach).min(self.gray.cols());
        let y2 = (circle.y + reach).min(self.gray.rows());
        (x2 > x1 && y2 > y1).then(|| Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn metrics(&self, circle: &Circle, cfg: &EnsembleConfig) -> opencv::Result<Option<FillMetrics>> {
        let Some(rect) = self.roi_rect(circle, cfg.roi_margin) else {
            return Ok(None);
        };
        let gray = roi_pixels(&self.gray, rect)?;
        let binary = roi_pixels(&self.binary, rect)?;
        let inverted = roi_pixels(&self.inverted, rect)?;
        Ok(FillMetrics::measure(&gray, &binary, &inverted, cfg))
    }
}

fn roi_pixels(mat: &Mat, rect: Rect) -> opencv::Result<Vec<u8>> {
    // the clone makes the region continuous
    let roi = Mat::roi(mat, rect)?.try_clone()?;
    Ok(roi.data_bytes()?.to_vec())
}

/// Scores each bubble of one question, in alternative order.
pub fn fill_scores(images: &PageImages, circles: &[Circle], cfg: &EnsembleConfig) -> opencv::Result<Vec<f64>> {
    circles
        .iter()
        .map(|circle| {
            Ok(images
                .metrics(circle, cfg)?
                .map_or(0.0, |m| m.score(&cfg.weights)))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classification {
    pub answers: BTreeMap<u32, char>,
    /// Questions left blank because two alternatives scored too close.
    pub ambiguous: Vec<u32>,
}

pub fn classify_groups(
    images: &PageImages,
    groups: &[QuestionGroup],
    alternatives: &[char],
    cfg: &EnsembleConfig,
) -> Result<Classification, SheetError> {
    let mut out = Classification::default();
    for group in groups {
        if group.circles.len() != alternatives.len() {
            return Err(SheetError::WrongAlternativeCount {
                expected: alternatives.len(),
                got: group.circles.len(),
            });
        }
        let scores = fill_scores(images, &group.circles, cfg)?;
        match decide(&scores, cfg) {
            Decision::Marked(idx) => {
                out.answers.insert(group.question, alternatives[idx]);
            }
            Decision::Ambiguous => {
                log::debug!("question {}: ambiguous scores {scores:.3?}", group.question);
                out.ambiguous.push(group.question);
            }
            Decision::Faint => (),
        }
    }
    Ok(out)
}
