use itertools::Itertools;
use nalgebra::DMatrix;
use rayon::prelude::*;
use statrs::statistics::Statistics;

/// Pearson correlation of two equally long columns.
///
/// NaN when either column has no variance.
pub fn pearson(x: &[f32], y: &[f32]) -> f64 {
    let mean_x = Statistics::mean(x.iter().map(|v| *v as f64));
    let mean_y = Statistics::mean(y.iter().map(|v| *v as f64));

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let dx = *a as f64 - mean_x;
        let dy = *b as f64 - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= 0.0 || var_y <= 0.0 {
        return f64::NAN;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Feature by feature correlation matrix, one column per feature.
pub fn correlation_matrix(columns: &[Vec<f32>]) -> DMatrix<f64> {
    let n = columns.len();
    let pairs: Vec<(usize, usize)> = (0..n).tuple_combinations().collect();

    let values: Vec<((usize, usize), f64)> = pairs
        .par_iter()
        .map(|&(i, j)| ((i, j), pearson(&columns[i], &columns[j])))
        .collect();

    let mut corr = DMatrix::<f64>::identity(n, n);
    for ((i, j), c) in values {
        corr[(i, j)] = c;
        corr[(j, i)] = c;
    }
    corr
}

/// `1 - |corr|`, with undefined correlations treated as unrelated (distance 1).
pub fn correlation_distance(corr: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(corr.nrows(), corr.ncols(), |i, j| {
        if i == j {
            0.0
        } else if corr[(i, j)].is_nan() {
            1.0
        } else {
            (1.0 - corr[(i, j)].abs()).max(0.0)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pearson_signs() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let y = vec![2.0, 4.0, 6.0, 8.0];
        let z = vec![4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-9);
        assert!((pearson(&x, &z) + 1.0).abs() < 1e-9);
        assert!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]).is_nan());
    }

    #[test]
    fn test_distance_matrix() {
        let columns = vec![
            vec![1.0, 2.0, 3.0, 4.0],
            vec![4.0, 3.0, 2.0, 1.0],
            vec![5.0, 5.0, 5.0, 5.0],
        ];
        let distance = correlation_distance(&correlation_matrix(&columns));
        assert_eq!(distance.shape(), (3, 3));
        assert!(distance[(0, 1)].abs() < 1e-9);
        assert_eq!(distance[(0, 2)], 1.0);
        assert_eq!(distance[(2, 2)], 0.0);
        assert_eq!(distance, distance.transpose());
    }
}
