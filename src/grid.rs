use std::collections::BTreeMap;

use itertools::Itertools;

use crate::bubbles::Circle;
use crate::config::GridConfig;

/// Row key (the y of the circle that opened the row) to its circles, unique
/// and sorted by x.
pub type Rows = BTreeMap<i32, Vec<Circle>>;

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionGroup {
    pub question: u32,
    /// One circle per alternative, in alternative order.
    pub circles: Vec<Circle>,
}

/// Greedy row clustering in ascending y. A circle joins the last row opened
/// when it lies within `row_tolerance` of that row's key, otherwise it opens a
/// row of its own. Every earlier key is at least `row_tolerance` smaller than the
/// last one, so no other row can be in reach.
pub fn organize_rows(circles: &[Circle], row_tolerance: i32) -> Rows {
    let mut rows: Rows = BTreeMap::new();
    for &circle in circles.iter().sorted_by_key(|c| c.y) {
        let open = rows
            .keys()
            .next_back()
            .copied()
            .filter(|&key| circle.y - key < row_tolerance);
        match open {
            Some(key) => rows.entry(key).or_default().push(circle),
            None => {
                rows.insert(circle.y, vec![circle]);
            }
        }
    }
    for row in rows.values_mut() {
        row.sort_by_key(|c| (c.x, c.y, c.radius));
        row.dedup();
    }
    rows
}

/// Index of the first circle of the right-hand column: the one after the
/// widest x gap, or `fallback` when no gap stands out from the others.
fn column_break(row: &[Circle], gap_factor: f64, fallback: usize) -> usize {
    let gaps: Vec<i32> = row.iter().tuple_windows().map(|(a, b)| b.x - a.x).collect();
    let Some((widest_idx, &widest)) = gaps
        .iter()
        .enumerate()
        .max_by_key(|&(idx, gap)| (*gap, std::cmp::Reverse(idx)))
    else {
        return fallback;
    };
    let median = {
        let sorted: Vec<i32> = gaps.iter().copied().sorted().collect();
        sorted[sorted.len() / 2]
    };
    if f64::from(widest) > f64::from(median) * gap_factor {
        widest_idx + 1
    } else {
        fallback
    }
}

/// Maps valid rows to question groups: the left column takes questions
/// `1..=rows_per_column`, the right column the following block.
pub fn assign_questions(rows: &Rows, cfg: &GridConfig) -> Vec<QuestionGroup> {
    let per_question = cfg.alternatives.len();
    let mut groups = Vec::new();

    let valid_rows = rows
        .values()
        .filter(|row| row.len() >= per_question)
        .take(cfg.rows_per_column);

    for (row_idx, row) in valid_rows.enumerate() {
        groups.push(QuestionGroup {
            question: row_idx as u32 + 1,
            circles: row[..per_question].to_vec(),
        });

        if row.len() >= 2 * per_question {
            let start = column_break(row, cfg.column_gap_factor, per_question);
            let right: Vec<Circle> = row.iter().skip(start).take(per_question).copied().collect();
            if right.len() == per_question {
                groups.push(QuestionGroup {
                    question: (row_idx + cfg.rows_per_column) as u32 + 1,
                    circles: right,
                });
            } else {
                log::debug!("row {row_idx}: right column has only {} circles", right.len());
            }
        }
    }

    groups.sort_by_key(|g| g.question);
    groups
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    const RADIUS: i32 = 10;

    /// Two columns of 20 rows with 5 alternatives each, 40 px apart inside a
    /// column and 240 px from the last bubble of a row to the next column.
    fn perfect_sheet() -> Vec<Circle> {
        let mut circles = Vec::new();
        for row in 0..20 {
            let y = 300 + row * 45;
            for col in 0..2 {
                let base_x = 100 + col * 400;
                for alt in 0..5 {
                    circles.push(Circle::new(base_x + alt * 40, y, RADIUS));
                }
            }
        }
        // scramble the order deterministically
        circles.reverse();
        circles.rotate_left(37);
        circles
    }

    #[test]
    fn test_perfect_grid_yields_forty_groups() {
        let circles = perfect_sheet();
        assert_eq!(circles.len(), 200);
        let rows = organize_rows(&circles, 22);
        assert_eq!(rows.len(), 20);

        let groups = assign_questions(&rows, &GridConfig::default());
        assert_eq!(groups.len(), 40);
        for (idx, group) in groups.iter().enumerate() {
            assert_eq!(group.question, idx as u32 + 1);
            assert_eq!(group.circles.len(), 5);
            assert!(group.circles.windows(2).all(|w| w[0].x < w[1].x));
        }
        // question 21 is the first row of the right column
        assert_eq!(groups[20].circles[0].x, 500);
        assert_eq!(groups[20].circles[0].y, 300);
        assert_eq!(groups[0].circles[0].x, 100);
    }

    #[test]
    fn test_rows_absorb_vertical_jitter() {
        let circles = vec![
            Circle::new(10, 100, 9),
            Circle::new(50, 108, 9),
            Circle::new(90, 95, 9),
            Circle::new(10, 200, 9),
        ];
        let rows = organize_rows(&circles, 22);
        assert_eq!(rows.len(), 2);
        // the row is keyed by the first (smallest y) circle
        assert_eq!(rows[&95].iter().map(|c| c.x).collect::<Vec<_>>(), vec![10, 50, 90]);
        assert_eq!(rows[&200].len(), 1);
    }

    #[test]
    fn test_tolerance_is_exclusive() {
        let circles = vec![Circle::new(10, 100, 9), Circle::new(20, 122, 9)];
        assert_eq!(organize_rows(&circles, 22).len(), 2);
        let circles = vec![Circle::new(10, 100, 9), Circle::new(20, 121, 9)];
        assert_eq!(organize_rows(&circles, 22).len(), 1);
    }

    #[test]
    fn test_rows_open_in_ascending_order() {
        // 115 and 118 are reached before a row at 130 exists, so they join
        // the row at 100; 130 is then 30 away and opens the next row
        let circles = vec![
            Circle::new(10, 130, 9),
            Circle::new(20, 118, 9),
            Circle::new(30, 115, 9),
            Circle::new(40, 100, 9),
            Circle::new(50, 152, 9),
        ];
        let rows = organize_rows(&circles, 22);
        // 152 is exactly 22 past 130 and the tolerance is exclusive
        assert_eq!(rows.keys().copied().collect::<Vec<_>>(), vec![100, 130, 152]);
        assert_eq!(rows[&100].iter().map(|c| c.x).collect::<Vec<_>>(), vec![20, 30, 40]);
        assert_eq!(rows[&130].len(), 1);

        let rows = organize_rows(&circles, 23);
        assert_eq!(rows.keys().copied().collect::<Vec<_>>(), vec![100, 130]);
        assert_eq!(rows[&130].iter().map(|c| c.y).collect::<Vec<_>>(), vec![130, 152]);
    }

    #[test]
    fn test_duplicates_removed() {
        let c = Circle::new(40, 100, 10);
        let rows = organize_rows(&[c, c, Circle::new(80, 100, 10)], 22);
        assert_eq!(rows[&100].len(), 2);
    }

    #[test]
    fn test_short_rows_are_skipped() {
        let mut circles: Vec<Circle> = (0..3).map(|i| Circle::new(100 + i * 40, 50, 10)).collect();
        circles.extend((0..5).map(|i| Circle::new(100 + i * 40, 120, 10)));
        let rows = organize_rows(&circles, 22);
        let groups = assign_questions(&rows, &GridConfig::default());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].question, 1);
        assert_eq!(groups[0].circles[0].y, 120);
    }

    #[test]
    fn test_right_column_after_widest_gap() {
        // a stray mark in the gutter shifts the right column by one
        let mut row: Vec<Circle> = (0..5).map(|i| Circle::new(100 + i * 40, 300, 10)).collect();
        row.push(Circle::new(300, 300, 10));
        row.extend((0..5).map(|i| Circle::new(500 + i * 40, 300, 10)));
        let rows = organize_rows(&row, 22);
        let groups = assign_questions(&rows, &GridConfig::default());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].question, 21);
        assert_eq!(
            groups[1].circles.iter().map(|c| c.x).collect::<Vec<_>>(),
            vec![500, 540, 580, 620, 660]
        );
    }

    #[test]
    fn test_right_column_falls_back_to_positions_six_to_ten() {
        let row: Vec<Circle> = (0..10).map(|i| Circle::new(100 + i * 40, 300, 10)).collect();
        let rows = organize_rows(&row, 22);
        let groups = assign_questions(&rows, &GridConfig::default());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].circles[0].x, 300);
    }

    #[test]
    fn test_only_first_rows_per_column_used() {
        let circles: Vec<Circle> = (0..25)
            .flat_map(|row| (0..5).map(move |alt| Circle::new(100 + alt * 40, 100 + row * 45, 10)))
            .collect();
        let rows = organize_rows(&circles, 22);
        assert_eq!(rows.len(), 25);
        let groups = assign_questions(&rows, &GridConfig::default());
        assert_eq!(groups.len(), 20);
        assert_eq!(groups.last().map(|g| g.question), Some(20));
    }
}
