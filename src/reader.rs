use std::collections::BTreeMap;

use opencv::core::Mat;
use serde::Serialize;

use crate::bubbles::detect_circles;
use crate::classify::{classify_groups, PageImages};
use crate::config::ReaderConfig;
use crate::errors::SheetError;
use crate::grid::{assign_questions, organize_rows};
use crate::image::preprocess;

/// What the bubble pipeline saw on one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SheetReading {
    pub answers: BTreeMap<u32, char>,
    pub ambiguous: Vec<u32>,
    pub circles_found: usize,
}

/// Reads the answer bubbles of a grayscale page. A page without any detected
/// bubble yields an empty reading, so every question scores as blank.
pub fn read_sheet(gray: &Mat, cfg: &ReaderConfig) -> Result<SheetReading, SheetError> {
    let prepared = preprocess(gray, &cfg.preprocess)?;
    let circles = detect_circles(&prepared, &cfg.hough)?;
    if circles.is_empty() {
        return Ok(SheetReading::default());
    }

    let rows = organize_rows(&circles, cfg.grid.row_tolerance);
    let groups = assign_questions(&rows, &cfg.grid);
    log::debug!(
        "{} circles in {} rows, {} question groups",
        circles.len(),
        rows.len(),
        groups.len()
    );

    let images = PageImages::new(prepared, &cfg.ensemble)?;
    let classification = classify_groups(&images, &groups, &cfg.grid.alternatives, &cfg.ensemble)?;

    Ok(SheetReading {
        answers: classification.answers,
        ambiguous: classification.ambiguous,
        circles_found: circles.len(),
    })
}
