use opencv::core::{Mat, Size, Vec3f, Vector};
use opencv::imgproc::{self, HOUGH_GRADIENT};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{HoughConfig, HoughParams};
use crate::errors::SheetError;

/// A circular mark found on the page, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Circle {
    pub x: i32,
    pub y: i32,
    pub radius: i32,
}

impl Circle {
    pub const fn new(x: i32, y: i32, radius: i32) -> Self {
        Self { x, y, radius }
    }
}

impl From<Vec3f> for Circle {
    fn from(v: Vec3f) -> Self {
        // truncation, matching how the centers are later used as pixel indices
        Circle::new(v[0] as i32, v[1] as i32, v[2] as i32)
    }
}

fn hough_with(blurred: &Mat, params: &HoughParams) -> opencv::Result<Vec<Circle>> {
    let mut circles: Vector<Vec3f> = Vector::new();
    imgproc::hough_circles(
        blurred,
        &mut circles,
        HOUGH_GRADIENT,
        1.0,
        params.min_dist,
        params.param1,
        params.param2,
        params.min_radius,
        params.max_radius,
    )?;
    Ok(circles.iter().map(Circle::from).collect())
}

/// Picks the run with the most detections; the earliest run wins ties.
pub fn most_detections<I>(runs: I) -> Vec<Circle>
where
    I: IntoIterator<Item = Vec<Circle>>,
{
    runs.into_iter().fold(Vec::new(), |best, run| {
        if run.len() > best.len() {
            run
        } else {
            best
        }
    })
}

/// Runs the circle transform under every configured parameter set and keeps
/// the densest result. An empty vector means the page is unreadable, which is
/// not an error.
pub fn detect_circles(preprocessed: &Mat, cfg: &HoughConfig) -> Result<Vec<Circle>, SheetError> {
    let blurred = {
        let mut dst = Mat::default();
        imgproc::gaussian_blur_def(
            preprocessed,
            &mut dst,
            Size::new(cfg.blur_kernel, cfg.blur_kernel),
            cfg.blur_sigma,
        )?;
        dst
    };

    let runs = cfg
        .sweeps
        .iter()
        .map(|params| {
            let found = hough_with(&blurred, params)?;
            log::debug!("hough {params:?}: {} circles", found.len());
            Ok(found)
        })
        .collect::<opencv::Result<Vec<_>>>()?;

    let best = most_detections(runs);
    if best.is_empty() {
        log::warn!("no bubbles detected on page");
    }
    Ok(best)
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use opencv::core;

    #[test]
    fn test_most_detections_prefers_larger_and_earlier() {
        let a = vec![Circle::new(1, 1, 1)];
        let b = vec![Circle::new(2, 2, 2), Circle::new(3, 3, 3)];
        let c = vec![Circle::new(4, 4, 4), Circle::new(5, 5, 5)];
        let best = most_detections([a, b.clone(), c]);
        assert_eq!(best, b);
        assert!(most_detections(Vec::<Vec<Circle>>::new()).is_empty());
    }

    #[test]
    fn test_circle_from_float_truncates() {
        let c = Circle::from(Vec3f::from_array([10.9, 20.2, 8.7]));
        assert_eq!(c, Circle::new(10, 20, 8));
    }

    #[test]
    fn test_blank_page_yields_no_circles() {
        let mat =
            Mat::new_rows_cols_with_default(200, 200, core::CV_8UC1, core::Scalar::all(255.0))
                .unwrap();
        let circles = detect_circles(&mat, &HoughConfig::default()).unwrap();
        assert!(circles.is_empty());
    }

    #[test]
    fn test_detects_drawn_rings() {
        let mut mat =
            Mat::new_rows_cols_with_default(200, 300, core::CV_8UC1, core::Scalar::all(255.0))
                .unwrap();
        for i in 0..5 {
            imgproc::circle(
                &mut mat,
                core::Point::new(50 + i * 50, 100),
                14,
                core::Scalar::all(0.0),
                2,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
        let circles = detect_circles(&mat, &HoughConfig::default()).unwrap();
        assert!(!circles.is_empty());
        for c in &circles {
            assert!((c.y - 100).abs() <= 5, "unexpected circle {c:?}");
        }
    }
}
