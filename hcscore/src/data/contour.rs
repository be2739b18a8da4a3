//! Two dimensional density maps and their level-set outlines.

use nalgebra::DMatrix;

/// Joint histogram of two scaled columns over `objects`.
///
/// Both columns are scaled by `bins - 1` and truncated, so only values of
/// exactly 1.0 reach the last row or column. Rows follow `x`, columns follow `y`.
pub fn joint_histogram(x: &[f32], y: &[f32], objects: &[usize], bins: usize) -> DMatrix<u64> {
    let bins = bins.max(2);
    let levels = bins - 1;
    let level = |v: f32| ((v * levels as f32) as usize).min(levels);

    let mut counts = DMatrix::<u64>::zeros(bins, bins);
    for &object in objects {
        counts[(level(x[object]), level(y[object]))] += 1;
    }
    counts
}

/// Log-dampened density level, `trunc(ln(count) / 2 + 1)` for non-empty cells.
pub fn density_level(count: u64) -> i32 {
    if count == 0 {
        0
    } else {
        ((count as f64).ln() / 2.0 + 1.0) as i32
    }
}

pub fn density_levels(counts: &DMatrix<u64>) -> DMatrix<i32> {
    counts.map(density_level)
}

/// Grey-scale erosion with a 3×3 all-ones footprint; cells outside the grid count as 0.
pub fn grey_erosion(levels: &DMatrix<i32>) -> DMatrix<i32> {
    let (rows, cols) = levels.shape();
    DMatrix::from_fn(rows, cols, |r, c| {
        let mut min = i32::MAX;
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let (nr, nc) = (r as i64 + dr, c as i64 + dc);
                let value = if nr < 0 || nc < 0 || nr >= rows as i64 || nc >= cols as i64 {
                    0
                } else {
                    levels[(nr as usize, nc as usize)]
                };
                min = min.min(value);
            }
        }
        min
    })
}

/// Keep only the cells on the boundary of their level set, carrying the level.
pub fn level_outlines(levels: &DMatrix<i32>) -> DMatrix<i32> {
    let eroded = grey_erosion(levels);
    levels.zip_map(&eroded, |level, low| (level - low).signum() * level)
}

/// Density contour map of one feature pair for one population.
pub fn contour_map(x: &[f32], y: &[f32], objects: &[usize], bins: usize, outline: bool) -> DMatrix<i32> {
    let levels = density_levels(&joint_histogram(x, y, objects, bins));
    if outline {
        level_outlines(&levels)
    } else {
        levels
    }
}

/// Row-major nested rows, the layout clients render from.
pub fn to_rows(grid: &DMatrix<i32>) -> Vec<Vec<i32>> {
    grid.row_iter().map(|row| row.iter().copied().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_levels() {
        assert_eq!(density_level(0), 0);
        assert_eq!(density_level(1), 1);
        // ln(8) / 2 + 1 = 2.04
        assert_eq!(density_level(8), 2);
        // ln(1000) / 2 + 1 = 4.45
        assert_eq!(density_level(1000), 4);
    }

    #[test]
    fn test_joint_histogram_orientation() {
        let x = vec![0.0, 1.0, 1.0];
        let y = vec![1.0, 0.0, 0.0];
        let counts = joint_histogram(&x, &y, &[0, 1, 2], 5);
        assert_eq!(counts.shape(), (5, 5));
        assert_eq!(counts[(0, 4)], 1);
        assert_eq!(counts[(4, 0)], 2);
        assert_eq!(counts.sum(), 3);
    }

    #[test]
    fn test_erosion_outlines_a_plateau() {
        let mut levels = DMatrix::<i32>::zeros(7, 7);
        for r in 1..6 {
            for c in 1..6 {
                levels[(r, c)] = 2;
            }
        }
        let outlines = level_outlines(&levels);
        // interior of the plateau erodes to itself and disappears
        assert_eq!(outlines[(3, 3)], 0);
        assert_eq!(outlines[(2, 2)], 0);
        // the ring keeps its level
        assert_eq!(outlines[(1, 1)], 2);
        assert_eq!(outlines[(1, 3)], 2);
        assert_eq!(outlines[(5, 4)], 2);
        assert_eq!(outlines[(0, 0)], 0);
    }

    #[test]
    fn test_border_cells_always_outline() {
        let levels = DMatrix::<i32>::from_element(3, 3, 1);
        let eroded = grey_erosion(&levels);
        assert_eq!(eroded[(1, 1)], 1);
        assert_eq!(eroded[(0, 1)], 0);
        assert_eq!(level_outlines(&levels)[(1, 1)], 0);
        assert_eq!(level_outlines(&levels)[(0, 2)], 1);
    }

    #[test]
    fn test_contour_transpose_law() {
        let x: Vec<f32> = (0..500).map(|i| ((i * 37) % 500) as f32 / 500.0).collect();
        let y: Vec<f32> = (0..500).map(|i| (i as f32 / 500.0).powi(2)).collect();
        let objects: Vec<usize> = (0..500).collect();

        let xy = contour_map(&x, &y, &objects, 20, true);
        let yx = contour_map(&y, &x, &objects, 20, true);
        assert_eq!(xy, yx.transpose());
        assert_eq!(to_rows(&xy).len(), 20);
    }
}
