//! Student identifier from a QR code or linear barcode on the page.

use std::collections::HashMap;

use itertools::{iproduct, Itertools};
use opencv::core::{self, Mat, Point2f, Size, Vec4i, Vector};
use opencv::imgproc::{self, ADAPTIVE_THRESH_GAUSSIAN_C, THRESH_BINARY, THRESH_OTSU};
use opencv::objdetect::{BarcodeDetector, QRCodeDetector};
use opencv::prelude::*;

use crate::config::IdentityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    None,
    Clockwise90,
    Half,
    Clockwise270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::None,
        Rotation::Clockwise90,
        Rotation::Half,
        Rotation::Clockwise270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Half => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    fn apply(self, src: &Mat) -> opencv::Result<Mat> {
        let code = match self {
            Rotation::None => return src.try_clone(),
            Rotation::Clockwise90 => core::ROTATE_90_CLOCKWISE,
            Rotation::Half => core::ROTATE_180,
            Rotation::Clockwise270 => core::ROTATE_90_COUNTERCLOCKWISE,
        };
        let mut dst = Mat::default();
        core::rotate(src, &mut dst, code)?;
        Ok(dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Original,
    Contrast,
    Otsu,
    Adaptive,
}

impl Variant {
    pub const ALL: [Variant; 4] = [
        Variant::Original,
        Variant::Contrast,
        Variant::Otsu,
        Variant::Adaptive,
    ];

    fn apply(self, src: &Mat, cfg: &IdentityConfig) -> opencv::Result<Mat> {
        let mut dst = Mat::default();
        match self {
            Variant::Original => return src.try_clone(),
            Variant::Contrast => {
                let tiles = Size::new(cfg.contrast_tile_grid, cfg.contrast_tile_grid);
                let mut clahe = imgproc::create_clahe(cfg.contrast_clip_limit, tiles)?;
                clahe.apply(src, &mut dst)?;
            }
            Variant::Otsu => {
                _ = imgproc::threshold(src, &mut dst, 0.0, 255.0, THRESH_BINARY | THRESH_OTSU)?;
            }
            Variant::Adaptive => {
                imgproc::adaptive_threshold(
                    src,
                    &mut dst,
                    255.0,
                    ADAPTIVE_THRESH_GAUSSIAN_C,
                    THRESH_BINARY,
                    cfg.adaptive_block_size,
                    cfg.adaptive_c,
                )?;
            }
        }
        Ok(dst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeKind {
    Qr,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attempt {
    pub rotation: Rotation,
    pub deskewed: bool,
    pub decoder: CodeKind,
    pub variant: Variant,
}

/// Every attempt in evaluation order: the upright page first (QR before
/// barcode, each across all preprocessing variants), then its deskewed form,
/// then the same for each quarter turn.
pub fn attempt_plan() -> impl Iterator<Item = Attempt> {
    iproduct!(
        Rotation::ALL,
        [false, true],
        [CodeKind::Qr, CodeKind::Linear],
        Variant::ALL
    )
    .map(|(rotation, deskewed, decoder, variant)| Attempt {
        rotation,
        deskewed,
        decoder,
        variant,
    })
}

/// A decoder for one kind of printed code.
pub trait CodeReader {
    fn kind(&self) -> CodeKind;
    /// Returns the decoded text, or `None` if nothing was found.
    fn read(&self, img: &Mat) -> opencv::Result<Option<String>>;
}

fn non_empty_text(raw: impl AsRef<[u8]>) -> Option<String> {
    let text = String::from_utf8_lossy(raw.as_ref()).trim().to_string();
    (!text.is_empty()).then_some(text)
}

pub struct QrReader(QRCodeDetector);

impl QrReader {
    pub fn new() -> opencv::Result<Self> {
        Ok(Self(QRCodeDetector::default()?))
    }
}

impl CodeReader for QrReader {
    fn kind(&self) -> CodeKind {
        CodeKind::Qr
    }
    fn read(&self, img: &Mat) -> opencv::Result<Option<String>> {
        Ok(non_empty_text(self.0.detect_and_decode_def(img)?))
    }
}

pub struct BarcodeReader(BarcodeDetector);

impl BarcodeReader {
    pub fn new() -> opencv::Result<Self> {
        Ok(Self(BarcodeDetector::default()?))
    }
}

impl CodeReader for BarcodeReader {
    fn kind(&self) -> CodeKind {
        CodeKind::Linear
    }
    fn read(&self, img: &Mat) -> opencv::Result<Option<String>> {
        Ok(non_empty_text(self.0.detect_and_decode_def(img)?))
    }
}

/// Identifiers are purely numeric with a length in `min_len..=max_len`.
pub fn accept_identifier(text: &str, cfg: &IdentityConfig) -> Option<String> {
    let text = text.trim();
    let ok = (cfg.min_len..=cfg.max_len).contains(&text.len())
        && text.bytes().all(|b| b.is_ascii_digit());
    ok.then(|| text.to_string())
}

/// Median angle (degrees) of the near-horizontal segments, if there are any.
pub fn median_skew(segments: &[[i32; 4]], max_skew_deg: f64) -> Option<f64> {
    let mut angles: Vec<f64> = segments
        .iter()
        .filter(|[x1, y1, x2, y2]| x1 != x2 || y1 != y2)
        .map(|&[x1, y1, x2, y2]| {
            let (dx, dy) = (f64::from(x2 - x1), f64::from(y2 - y1));
            let mut angle = dy.atan2(dx).to_degrees();
            // segment direction does not matter
            if angle > 90.0 {
                angle -= 180.0;
            } else if angle < -90.0 {
                angle += 180.0;
            }
            angle
        })
        .filter(|a| a.abs() < max_skew_deg)
        .collect();
    if angles.is_empty() {
        return None;
    }
    angles.sort_by(f64::total_cmp);
    let mid = angles.len() / 2;
    Some(if angles.len() % 2 == 0 {
        (angles[mid - 1] + angles[mid]) / 2.0
    } else {
        angles[mid]
    })
}

fn line_segments(gray: &Mat, cfg: &IdentityConfig) -> opencv::Result<Vec<[i32; 4]>> {
    let mut edges = Mat::default();
    imgproc::canny_def(gray, &mut edges, cfg.canny_low, cfg.canny_high)?;
    let mut lines: Vector<Vec4i> = Vector::new();
    let min_len = f64::from(gray.cols().min(gray.rows())) * cfg.min_line_fraction;
    imgproc::hough_lines_p(
        &edges,
        &mut lines,
        1.0,
        std::f64::consts::PI / 180.0,
        cfg.line_votes,
        min_len,
        cfg.max_line_gap,
    )?;
    Ok(lines.iter().map(|l| [l[0], l[1], l[2], l[3]]).collect())
}

fn estimate_skew(gray: &Mat, cfg: &IdentityConfig) -> opencv::Result<Option<f64>> {
    Ok(median_skew(&line_segments(gray, cfg)?, cfg.max_skew_deg))
}

/// Skew angle above the correction threshold, if any.
fn correction_angle(segments: &[[i32; 4]], cfg: &IdentityConfig) -> Option<f64> {
    median_skew(segments, cfg.max_skew_deg).filter(|angle| angle.abs() > cfg.skew_threshold_deg)
}

/// Straightens the page, or returns `None` when the skew is negligible.
fn deskew(gray: &Mat, cfg: &IdentityConfig) -> opencv::Result<Option<Mat>> {
    let Some(angle) = correction_angle(&line_segments(gray, cfg)?, cfg) else {
        return Ok(None);
    };
    log::debug!("correcting skew of {angle:.2} degrees");
    let center = Point2f::new(gray.cols() as f32 / 2.0, gray.rows() as f32 / 2.0);
    let matrix = imgproc::get_rotation_matrix_2d(center, angle, 1.0)?;
    let mut dst = Mat::default();
    imgproc::warp_affine(
        gray,
        &mut dst,
        &matrix,
        gray.size()?,
        imgproc::INTER_LINEAR,
        core::BORDER_REPLICATE,
        core::Scalar::default(),
    )?;
    Ok(Some(dst))
}

pub struct IdentityExtractor<'a> {
    readers: Vec<Box<dyn CodeReader + 'a>>,
    cfg: &'a IdentityConfig,
}

impl<'a> IdentityExtractor<'a> {
    /// Extractor backed by the OpenCV QR and barcode detectors.
    pub fn new(cfg: &'a IdentityConfig) -> opencv::Result<Self> {
        Ok(Self::with_readers(
            vec![Box::new(QrReader::new()?), Box::new(BarcodeReader::new()?)],
            cfg,
        ))
    }

    pub fn with_readers(readers: Vec<Box<dyn CodeReader + 'a>>, cfg: &'a IdentityConfig) -> Self {
        Self { readers, cfg }
    }

    /// Runs the attempt plan against a grayscale page and returns the first
    /// accepted identifier. A failing OpenCV step only skips the attempts
    /// that depend on it.
    pub fn extract(&self, page: &Mat) -> Option<String> {
        // the upright page of the current rotation, kept until it is deskewed
        let mut upright: Option<Mat> = None;

        for ((rotation, deskewed), attempts) in &attempt_plan().chunk_by(|a| (a.rotation, a.deskewed)) {
            let base = if deskewed {
                let Some(straight) = upright.take() else {
                    continue;
                };
                match deskew(&straight, self.cfg) {
                    Ok(Some(m)) => m,
                    Ok(None) => continue,
                    Err(e) => {
                        log::debug!("deskew failed at {} degrees: {}", rotation.degrees(), e.message);
                        continue;
                    }
                }
            } else {
                match rotation.apply(page) {
                    Ok(m) => m,
                    Err(e) => {
                        log::debug!("rotation by {} degrees failed: {}", rotation.degrees(), e.message);
                        continue;
                    }
                }
            };

            if let Some(id) = self.decode_form(&base, attempts) {
                return Some(id);
            }
            if !deskewed {
                upright = Some(base);
            }
        }
        log::warn!("no identifier found on page");
        None
    }

    /// Tries one oriented page with every decoder and variant. Variant images
    /// live only as long as this form is being tried.
    fn decode_form(&self, base: &Mat, attempts: impl Iterator<Item = Attempt>) -> Option<String> {
        let mut variants: HashMap<Variant, Option<Mat>> = HashMap::new();
        for attempt in attempts {
            let Some(reader) = self.readers.iter().find(|r| r.kind() == attempt.decoder) else {
                continue;
            };
            let image = variants.entry(attempt.variant).or_insert_with(|| {
                attempt
                    .variant
                    .apply(base, self.cfg)
                    .map_err(|e| log::debug!("{:?} variant failed: {}", attempt.variant, e.message))
                    .ok()
            });
            let Some(img) = image.as_ref() else {
                continue;
            };

            match reader.read(img) {
                Ok(Some(text)) => match accept_identifier(&text, self.cfg) {
                    Some(id) => {
                        log::debug!("identifier found with {attempt:?}");
                        return Some(id);
                    }
                    None => log::debug!("rejected decoded text {text:?} ({attempt:?})"),
                },
                Ok(None) => (),
                Err(e) => log::debug!("decoder error on {attempt:?}: {}", e.message),
            }
        }
        None
    }
}
