use std::path::Path;

use opencv::core::{self, Mat, Size, Vector};
use opencv::imgcodecs::{imdecode, imread, ImreadModes};
use opencv::imgproc::{self, THRESH_BINARY};
use opencv::prelude::*;

use crate::config::PreprocessConfig;
use crate::errors::SheetError;

/// Reads a page raster as a single-channel grayscale image.
pub fn read_from_path(path: &Path) -> Result<Mat, SheetError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| SheetError::ImageLoad(path.to_path_buf()))?;
    imread(path_str, ImreadModes::IMREAD_GRAYSCALE.into())
        .map_err(|_| SheetError::ImageLoad(path.to_path_buf()))
        .and_then(|mat| {
            if mat.empty() {
                Err(SheetError::ImageLoad(path.to_path_buf()))
            } else {
                Ok(mat)
            }
        })
}

/// Decodes an encoded (PNG, JPEG, ...) page held in memory.
pub fn decode_from_bytes(bytes: &[u8]) -> Result<Mat, SheetError> {
    let buf: Vector<u8> = Vector::from_slice(bytes);
    imdecode(&buf, ImreadModes::IMREAD_GRAYSCALE.into())
        .map_err(|_| SheetError::ImageDecode)
        .and_then(|mat| {
            if mat.empty() {
                Err(SheetError::ImageDecode)
            } else {
                Ok(mat)
            }
        })
}

pub fn mean_luminance(gray: &Mat) -> opencv::Result<f64> {
    Ok(core::mean_def(gray)?[0])
}

/// Darker pages get a wider local-contrast boost, very bright ones a mild one.
pub fn clip_limit_for(mean: f64, cfg: &PreprocessConfig) -> f64 {
    if mean < cfg.dark_mean {
        cfg.dark_clip_limit
    } else if mean > cfg.bright_mean {
        cfg.bright_clip_limit
    } else {
        cfg.normal_clip_limit
    }
}

/// Normalizes contrast and scan noise. The output keeps the input size and is
/// reused for pixel sampling, so nothing is thresholded away here.
pub fn preprocess(gray: &Mat, cfg: &PreprocessConfig) -> Result<Mat, SheetError> {
    let mean = mean_luminance(gray)?;
    let clip = clip_limit_for(mean, cfg);
    log::debug!("page mean luminance {mean:.1}, CLAHE clip limit {clip}");

    // contrast
    let equalized = {
        let mut clahe = imgproc::create_clahe(clip, Size::new(cfg.tile_grid, cfg.tile_grid))?;
        let mut dst = Mat::default();
        clahe.apply(gray, &mut dst)?;
        dst
    };
    // edge-preserving smoothing
    let smoothed = {
        let mut dst = Mat::default();
        imgproc::bilateral_filter_def(
            &equalized,
            &mut dst,
            cfg.bilateral_diameter,
            cfg.bilateral_sigma_color,
            cfg.bilateral_sigma_space,
        )?;
        dst
    };
    // stretch to full range
    let mut normalized = Mat::default();
    core::normalize(
        &smoothed,
        &mut normalized,
        0.0,
        255.0,
        core::NORM_MINMAX,
        -1,
        &core::no_array(),
    )?;
    Ok(normalized)
}

pub fn binarize(gray: &Mat, threshold: f64) -> opencv::Result<Mat> {
    let mut dst = Mat::default();
    _ = imgproc::threshold(gray, &mut dst, threshold, 255.0, THRESH_BINARY)?;
    Ok(dst)
}

pub fn invert(gray: &Mat) -> opencv::Result<Mat> {
    let mut dst = Mat::default();
    core::bitwise_not_def(gray, &mut dst)?;
    Ok(dst)
}
