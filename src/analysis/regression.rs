//! Ordinary least squares price model: price ~ area_sqft + beds + baths

use crate::analysis::types::Comparable;

/// Number of explanatory features
const FEATURES: usize = 3;

/// Relative pivot tolerance below which a feature is treated as redundant
const PIVOT_TOLERANCE: f64 = 1e-9;

/// A fitted linear price model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearModel {
    pub intercept: f64,
    /// Coefficients for area_sqft, beds, baths
    pub coefficients: [f64; FEATURES],
}

impl LinearModel {
    /// Fit on comparables. Non-positive feature values count as missing and are
    /// replaced by the column median. Returns None for an empty training set.
    pub fn fit(comps: &[Comparable]) -> Option<Self> {
        if comps.is_empty() {
            return None;
        }

        let rows: Vec<[Option<f64>; FEATURES]> = comps
            .iter()
            .map(|c| {
                [
                    positive(c.area_sqft as f64),
                    positive(c.beds as f64),
                    positive(c.baths as f64),
                ]
            })
            .collect();
        let targets: Vec<f64> = comps.iter().map(|c| c.price as f64).collect();

        Self::fit_rows(&rows, &targets)
    }

    /// Fit on raw feature rows with optional (missing) values
    pub fn fit_rows(rows: &[[Option<f64>; FEATURES]], targets: &[f64]) -> Option<Self> {
        if rows.is_empty() || rows.len() != targets.len() {
            return None;
        }

        let x = impute_medians(rows);
        let n = x.len() as f64;

        let mut x_mean = [0.0; FEATURES];
        for row in &x {
            for (j, v) in row.iter().enumerate() {
                x_mean[j] += v / n;
            }
        }
        let y_mean = targets.iter().sum::<f64>() / n;

        // Centered normal equations: (Xc' Xc) b = Xc' yc
        let mut xtx = [[0.0; FEATURES]; FEATURES];
        let mut xty = [0.0; FEATURES];
        for (row, y) in x.iter().zip(targets) {
            let yc = y - y_mean;
            for i in 0..FEATURES {
                let xi = row[i] - x_mean[i];
                xty[i] += xi * yc;
                for j in 0..FEATURES {
                    xtx[i][j] += xi * (row[j] - x_mean[j]);
                }
            }
        }

        let coefficients = solve_with_feature_dropping(&xtx, &xty);
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(x_mean.iter())
                .map(|(b, m)| b * m)
                .sum::<f64>();

        Some(Self {
            intercept,
            coefficients,
        })
    }

    pub fn predict(&self, area_sqft: f64, beds: f64, baths: f64) -> f64 {
        self.intercept
            + self.coefficients[0] * area_sqft
            + self.coefficients[1] * beds
            + self.coefficients[2] * baths
    }
}

fn positive(v: f64) -> Option<f64> {
    (v.is_finite() && v > 0.0).then_some(v)
}

/// Median of a slice, or None when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Replace missing feature values with the column median (0.0 if the column is empty)
fn impute_medians(rows: &[[Option<f64>; FEATURES]]) -> Vec<[f64; FEATURES]> {
    let mut medians = [0.0; FEATURES];
    for (j, slot) in medians.iter_mut().enumerate() {
        let present: Vec<f64> = rows.iter().filter_map(|r| r[j]).collect();
        *slot = median(&present).unwrap_or(0.0);
    }

    rows.iter()
        .map(|r| {
            let mut out = [0.0; FEATURES];
            for j in 0..FEATURES {
                out[j] = r[j].unwrap_or(medians[j]);
            }
            out
        })
        .collect()
}

/// Solve the normal equations, dropping features that are constant or
/// collinear with earlier ones. Dropped features get a zero coefficient.
fn solve_with_feature_dropping(
    xtx: &[[f64; FEATURES]; FEATURES],
    xty: &[f64; FEATURES],
) -> [f64; FEATURES] {
    let scale = (0..FEATURES).map(|i| xtx[i][i].abs()).fold(0.0, f64::max);
    let tolerance = scale.max(1.0) * PIVOT_TOLERANCE;

    let mut active: Vec<usize> = (0..FEATURES)
        .filter(|&i| xtx[i][i].abs() > tolerance)
        .collect();

    loop {
        if active.is_empty() {
            return [0.0; FEATURES];
        }

        let a: Vec<Vec<f64>> = active
            .iter()
            .map(|&i| active.iter().map(|&j| xtx[i][j]).collect())
            .collect();
        let b: Vec<f64> = active.iter().map(|&i| xty[i]).collect();

        match gaussian_solve(a, b, tolerance) {
            Ok(solution) => {
                let mut coefficients = [0.0; FEATURES];
                for (k, &i) in active.iter().enumerate() {
                    coefficients[i] = solution[k];
                }
                return coefficients;
            }
            Err(singular_col) => {
                active.remove(singular_col);
            }
        }
    }
}

/// Gaussian elimination with partial pivoting.
/// On a vanishing pivot returns the index of the offending column.
fn gaussian_solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>, tolerance: f64) -> Result<Vec<f64>, usize> {
    let n = b.len();

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() <= tolerance {
            return Err(col);
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(price: i64, area_sqft: i64, beds: i32, baths: i32) -> Comparable {
        Comparable {
            price,
            area_sqft,
            beds,
            baths,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_fit_recovers_exact_linear_relationship() {
        // price = 50_000 + 300 * sqft + 20_000 * beds + 10_000 * baths
        let comps: Vec<Comparable> = (0..12)
            .map(|i| {
                let sqft = 900 + i * 40;
                let beds = 1 + (i % 3) as i32;
                let baths = 1 + ((i / 2) % 2) as i32;
                let price =
                    50_000 + 300 * sqft + 20_000 * beds as i64 + 10_000 * baths as i64;
                comp(price, sqft, beds, baths)
            })
            .collect();

        let model = LinearModel::fit(&comps).unwrap();
        let predicted = model.predict(1_200.0, 2.0, 2.0);
        let expected = 50_000.0 + 300.0 * 1_200.0 + 40_000.0 + 20_000.0;

        assert!((predicted - expected).abs() < 1.0, "predicted {predicted}");
    }

    #[test]
    fn test_fit_handles_constant_feature() {
        // Every comparable has 2 beds and 2 baths; only sqft varies
        let comps: Vec<Comparable> = (0..10)
            .map(|i| comp(200_000 + 250 * (1_000 + i * 50), 1_000 + i * 50, 2, 2))
            .collect();

        let model = LinearModel::fit(&comps).unwrap();
        assert_eq!(model.coefficients[1], 0.0);
        assert_eq!(model.coefficients[2], 0.0);
        assert!((model.predict(1_100.0, 2.0, 2.0) - 475_000.0).abs() < 1.0);
    }

    #[test]
    fn test_missing_features_are_median_imputed() {
        let rows = vec![
            [Some(1_000.0), Some(2.0), Some(1.0)],
            [Some(1_200.0), None, Some(2.0)],
            [Some(1_400.0), Some(3.0), None],
        ];
        let imputed = impute_medians(&rows);
        assert_eq!(imputed[1][1], 2.5);
        assert_eq!(imputed[2][2], 1.5);
    }

    #[test]
    fn test_fit_empty_is_none() {
        assert!(LinearModel::fit(&[]).is_none());
    }
}
