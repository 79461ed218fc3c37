//! End-of-scan optimum extractors.
//!
//! Both extractors borrow a finished [`ResultsTable`] and compute a new
//! target position; neither mutates the table nor touches hardware. Moving
//! the stage is a separate, optional step ([`move_to_discrete_max`],
//! [`move_to_parabolic_max`]).
//!
//! - [`discrete_max`]: position of the sampled maximum.
//! - [`parabolic_max`]: vertex of a least-squares parabola along one axis.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ScanError, ScanResult};
use crate::hardware::Stage;
use crate::measurement::{Axis, Position, ResultsTable};

/// Singular values below this are treated as zero when solving the fit.
const SVD_EPSILON: f64 = 1e-12;

// =============================================================================
// Discrete maximum
// =============================================================================

/// Outcome of [`discrete_max`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscreteOptimum {
    /// Position to move to
    pub position: Position,
    /// False when no signal was found and `position` is the initial position
    pub found: bool,
}

/// Finds the position of the largest quantity in `results`.
///
/// Ties resolve to the first row in visitation order. If the maximum is
/// exactly zero there is no real signal and `initial_position` is returned
/// with `found == false`. A table whose quantities are all NaN fails with
/// [`ScanError::DegenerateFit`].
pub fn discrete_max(
    results: &ResultsTable,
    initial_position: Position,
) -> ScanResult<DiscreteOptimum> {
    if results.is_empty() {
        return Err(ScanError::EmptyResults);
    }
    let best = argmax(&results.quantities())
        .ok_or_else(|| ScanError::DegenerateFit("no finite quantity".into()))?;
    let row = &results.rows()[best];

    if row.quantity == 0.0 {
        warn!(%initial_position, "No maximum detected, keeping original position");
        return Ok(DiscreteOptimum {
            position: initial_position,
            found: false,
        });
    }

    info!(position = %row.position, quantity = row.quantity, "Discrete maximum");
    Ok(DiscreteOptimum {
        position: row.position,
        found: true,
    })
}

/// Runs [`discrete_max`] and commands `stage` to the result.
pub fn move_to_discrete_max<S: Stage + ?Sized>(
    stage: &mut S,
    results: &ResultsTable,
    initial_position: Position,
) -> ScanResult<DiscreteOptimum> {
    let optimum = discrete_max(results, initial_position)?;
    stage.move_to_pos(optimum.position)?;
    info!(position = %optimum.position, "Moved to discrete maximum");
    Ok(optimum)
}

/// Index of the first maximum; NaNs never win.
fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some(b) if v <= values[b] || v.is_nan() => {}
            Some(_) => best = Some(i),
            None if !v.is_nan() => best = Some(i),
            None => {}
        }
    }
    best
}

// =============================================================================
// Parabolic maximum
// =============================================================================

/// Quadratic `a x^2 + b x + c`, coefficients stored highest order first.
///
/// Fits keep the polynomial in a centred, scaled variable
/// `u = (x - centre) / scale` as well. Evaluation and the vertex go through
/// that form, which stays well conditioned far from the origin;
/// `coefficients` is the expanded form for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadratic {
    pub coefficients: [f64; 3],
    pub centre: f64,
    pub scale: f64,
    /// Coefficients in `u`, highest order first
    pub scaled_coefficients: [f64; 3],
}

impl Quadratic {
    /// Polynomial in `x` directly.
    pub fn new(coefficients: [f64; 3]) -> Self {
        Self {
            coefficients,
            centre: 0.0,
            scale: 1.0,
            scaled_coefficients: coefficients,
        }
    }

    /// Polynomial `A u^2 + B u + C` with `u = (x - centre) / scale`.
    pub fn from_scaled(scaled_coefficients: [f64; 3], centre: f64, scale: f64) -> Self {
        let [a, b, c] = scaled_coefficients;
        let s2 = scale * scale;
        let coefficients = [
            a / s2,
            b / scale - 2.0 * a * centre / s2,
            a * centre * centre / s2 - b * centre / scale + c,
        ];
        Self {
            coefficients,
            centre,
            scale,
            scaled_coefficients,
        }
    }

    /// Evaluates the polynomial at `x` using Horner's method.
    pub fn eval(&self, x: f64) -> f64 {
        let [a, b, c] = self.scaled_coefficients;
        let u = (x - self.centre) / self.scale;
        (a * u + b) * u + c
    }

    /// Stationary point `-b / 2a`.
    pub fn vertex(&self) -> f64 {
        let [a, b, _] = self.scaled_coefficients;
        self.centre + self.scale * (-b / (2.0 * a))
    }

    /// True when the parabola opens downwards.
    pub fn is_maximum(&self) -> bool {
        self.scaled_coefficients[0] < 0.0
    }
}

/// Outcome of [`parabolic_max`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParabolicFit {
    /// Axis the fit was made along
    pub axis: Axis,
    /// First row's position with the fitted axis replaced by the vertex
    pub position: Position,
    /// Quantity predicted at the vertex
    pub predicted_peak: f64,
    /// Sampled `(min, max)` along the axis
    pub axis_range: (f64, f64),
    /// Sum of squared residuals of the fit
    pub residual: f64,
    /// Fitted polynomial
    pub fit: Quadratic,
}

/// Least-squares fit of a degree-2 polynomial to `(xs, ys)`.
///
/// Returns the polynomial and the sum of squared residuals. Needs at least
/// three distinct abscissae.
pub fn polyfit2(xs: &[f64], ys: &[f64]) -> ScanResult<(Quadratic, f64)> {
    if xs.len() != ys.len() {
        return Err(ScanError::DegenerateFit(format!(
            "{} positions but {} quantities",
            xs.len(),
            ys.len()
        )));
    }
    let mut distinct: Vec<f64> = xs.to_vec();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    if distinct.len() < 3 {
        return Err(ScanError::DegenerateFit(format!(
            "need at least 3 distinct positions, got {}",
            distinct.len()
        )));
    }

    // Centre and scale the abscissae so the columns of the Vandermonde
    // matrix stay comparable in size wherever the axis sits.
    let centre = xs.iter().sum::<f64>() / xs.len() as f64;
    let scale = xs
        .iter()
        .map(|x| (x - centre).abs())
        .fold(0.0, f64::max);
    let us: Vec<f64> = xs.iter().map(|x| (x - centre) / scale).collect();

    // Vandermonde matrix in u, highest power first
    let vander = DMatrix::from_fn(us.len(), 3, |r, c| us[r].powi(2 - c as i32));
    let y = DVector::from_column_slice(ys);
    let solution = vander
        .clone()
        .svd(true, true)
        .solve(&y, SVD_EPSILON)
        .map_err(|e| ScanError::DegenerateFit(e.to_string()))?;

    let fit = Quadratic::from_scaled([solution[0], solution[1], solution[2]], centre, scale);
    let residual = (vander * solution - y).norm_squared();
    Ok((fit, residual))
}

/// Fits the quantity against `axis` and returns the parabola's vertex.
///
/// Fails with [`ScanError::Extrapolation`] when the sampled maximum sits at
/// either end of the axis range: the vertex would then lie outside the
/// measured region.
pub fn parabolic_max(results: &ResultsTable, axis: Axis) -> ScanResult<ParabolicFit> {
    let first = results.rows().first().ok_or(ScanError::EmptyResults)?;
    let xs = results.axis_values(axis);
    let ys = results.quantities();

    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let best = argmax(&ys).ok_or_else(|| ScanError::DegenerateFit("no finite quantity".into()))?;
    let peak_at = xs[best];
    if peak_at <= min || peak_at >= max {
        warn!(%axis, peak_at, min, max, "Extrapolation occurred");
        return Err(ScanError::Extrapolation {
            value: peak_at,
            min,
            max,
        });
    }

    let (fit, residual) = polyfit2(&xs, &ys)?;
    let x_stat = fit.vertex();
    if !x_stat.is_finite() {
        return Err(ScanError::DegenerateFit(format!(
            "vertex is not finite (coefficients {:?})",
            fit.coefficients
        )));
    }
    let predicted_peak = fit.eval(x_stat);
    let position = first.position.with(axis, x_stat);

    info!(
        %axis,
        %position,
        predicted_peak,
        residual,
        "Parabolic maximum"
    );
    Ok(ParabolicFit {
        axis,
        position,
        predicted_peak,
        axis_range: (min, max),
        residual,
        fit,
    })
}

/// [`parabolic_max`] along the axis detected by [`ResultsTable::scan_axis`].
pub fn parabolic_max_auto(results: &ResultsTable) -> ScanResult<ParabolicFit> {
    parabolic_max(results, results.scan_axis()?)
}

/// Runs [`parabolic_max`] and commands `stage` to the vertex.
pub fn move_to_parabolic_max<S: Stage + ?Sized>(
    stage: &mut S,
    results: &ResultsTable,
    axis: Axis,
) -> ScanResult<ParabolicFit> {
    let fit = parabolic_max(results, axis)?;
    stage.move_to_pos(fit.position)?;
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ResultsRow;

    fn table(rows: &[(f64, f64, f64, f64)]) -> ResultsTable {
        rows.iter()
            .map(|&(x, y, z, q)| ResultsRow::new(Position::new(x, y, z), q))
            .collect()
    }

    #[derive(Default)]
    struct RecordingStage {
        moves: Vec<Position>,
    }

    impl Stage for RecordingStage {
        fn move_to_pos(&mut self, position: Position) -> ScanResult<()> {
            self.moves.push(position);
            Ok(())
        }
    }

    #[test]
    fn test_discrete_max_first_tie_wins() {
        let results = table(&[
            (0.0, 0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0, 5.0),
            (2.0, 0.0, 0.0, 5.0),
        ]);
        let optimum = discrete_max(&results, Position::new(9.0, 9.0, 9.0)).unwrap();
        assert!(optimum.found);
        assert_eq!(optimum.position, Position::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_discrete_max_all_zero() {
        let results = table(&[(0.0, 0.0, 0.0, 0.0), (1.0, 0.0, 0.0, 0.0)]);
        let initial = Position::new(0.5, 0.5, 0.5);
        let optimum = discrete_max(&results, initial).unwrap();
        assert!(!optimum.found);
        assert_eq!(optimum.position, initial);
    }

    #[test]
    fn test_discrete_max_negative_values() {
        let results = table(&[(0.0, 0.0, 0.0, -3.0), (1.0, 0.0, 0.0, -1.0)]);
        let optimum = discrete_max(&results, Position::default()).unwrap();
        assert!(optimum.found);
        assert_eq!(optimum.position.x, 1.0);
    }

    #[test]
    fn test_discrete_max_empty() {
        assert!(matches!(
            discrete_max(&ResultsTable::new(), Position::default()),
            Err(ScanError::EmptyResults)
        ));
    }

    #[test]
    fn test_discrete_max_all_nan() {
        let results = table(&[(0.0, 0.0, 0.0, f64::NAN), (1.0, 0.0, 0.0, f64::NAN)]);
        assert!(matches!(
            discrete_max(&results, Position::default()),
            Err(ScanError::DegenerateFit(_))
        ));
    }

    #[test]
    fn test_move_to_discrete_max() {
        let results = table(&[(0.0, 1.0, 0.0, 2.0), (0.0, 2.0, 0.0, 7.0)]);
        let mut stage = RecordingStage::default();
        move_to_discrete_max(&mut stage, &results, Position::default()).unwrap();
        assert_eq!(stage.moves, vec![Position::new(0.0, 2.0, 0.0)]);
    }

    #[test]
    fn test_argmax_skips_nan() {
        assert_eq!(argmax(&[f64::NAN, 1.0, 3.0, f64::NAN, 3.0]), Some(2));
        assert_eq!(argmax(&[]), None);
    }

    fn synthetic_parabola() -> ResultsTable {
        // quantity = -(x - 2)^2 + 10, y and z fixed
        let rows: Vec<_> = (0..5)
            .map(|i| {
                let x = i as f64;
                (x, 3.0, -1.0, -(x - 2.0).powi(2) + 10.0)
            })
            .collect();
        table(&rows)
    }

    #[test]
    fn test_parabolic_max_recovers_vertex() {
        let fit = parabolic_max(&synthetic_parabola(), Axis::X).unwrap();
        assert!((fit.position.x - 2.0).abs() < 1e-9);
        assert_eq!(fit.position.y, 3.0);
        assert_eq!(fit.position.z, -1.0);
        assert!((fit.predicted_peak - 10.0).abs() < 1e-9);
        assert!(fit.residual < 1e-12);
        assert_eq!(fit.axis_range, (0.0, 4.0));
        assert!(fit.fit.is_maximum());
        assert!((fit.fit.coefficients[0] + 1.0).abs() < 1e-9);
        assert!((fit.fit.coefficients[1] - 4.0).abs() < 1e-9);
        assert!((fit.fit.coefficients[2] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_parabolic_max_far_from_origin() {
        for offset in [1.0e4, 1.0e5, -3.0e6] {
            let rows: Vec<_> = (0..5)
                .map(|i| {
                    let u = i as f64 - 2.0;
                    (offset + i as f64, 7.0, 0.0, -u * u + 10.0)
                })
                .collect();
            let fit = parabolic_max(&table(&rows), Axis::X).unwrap();
            assert!(
                (fit.position.x - (offset + 2.0)).abs() < 1e-6,
                "offset {}: vertex at {}",
                offset,
                fit.position.x
            );
            assert!((fit.predicted_peak - 10.0).abs() < 1e-9);
            assert!(fit.residual < 1e-9);
            assert_eq!(fit.axis_range, (offset, offset + 4.0));
            assert!(fit.fit.is_maximum());
        }
    }

    #[test]
    fn test_quadratic_scaled_form_matches_expanded() {
        let q = Quadratic::from_scaled([-4.0, 2.0, 1.0], 3.0, 2.0);
        let direct = Quadratic::new(q.coefficients);
        for x in [-1.0, 0.0, 2.5, 3.0, 6.0] {
            assert!((q.eval(x) - direct.eval(x)).abs() < 1e-9);
        }
        assert!((q.vertex() - direct.vertex()).abs() < 1e-12);
        assert!((q.vertex() - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_parabolic_max_auto_detects_axis() {
        let rows: Vec<_> = (0..5)
            .map(|i| {
                let z = 0.5 * i as f64;
                (1.0, 1.0, z, -(z - 1.2).powi(2) + 4.0)
            })
            .collect();
        let fit = parabolic_max_auto(&table(&rows)).unwrap();
        assert_eq!(fit.axis, Axis::Z);
        assert!((fit.position.z - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_parabolic_max_edge_is_extrapolation() {
        let rising = table(&[
            (0.0, 0.0, 0.0, 1.0),
            (1.0, 0.0, 0.0, 2.0),
            (2.0, 0.0, 0.0, 3.0),
        ]);
        assert!(matches!(
            parabolic_max(&rising, Axis::X),
            Err(ScanError::Extrapolation { value, .. }) if value == 2.0
        ));

        let falling = table(&[
            (0.0, 0.0, 0.0, 3.0),
            (1.0, 0.0, 0.0, 2.0),
            (2.0, 0.0, 0.0, 1.0),
        ]);
        assert!(matches!(
            parabolic_max(&falling, Axis::X),
            Err(ScanError::Extrapolation { value, .. }) if value == 0.0
        ));
    }

    #[test]
    fn test_parabolic_max_noisy_residual() {
        let results = table(&[
            (0.0, 0.0, 0.0, 6.1),
            (1.0, 0.0, 0.0, 8.9),
            (2.0, 0.0, 0.0, 10.2),
            (3.0, 0.0, 0.0, 8.8),
            (4.0, 0.0, 0.0, 6.0),
        ]);
        let fit = parabolic_max(&results, Axis::X).unwrap();
        assert!((fit.position.x - 2.0).abs() < 0.1);
        assert!(fit.residual > 0.0);
    }

    #[test]
    fn test_parabolic_max_needs_three_positions() {
        let results = table(&[
            (0.0, 0.0, 0.0, 1.0),
            (1.0, 0.0, 0.0, 2.0),
            (1.0, 0.0, 0.0, 3.0),
            (2.0, 0.0, 0.0, 1.0),
        ]);
        // Three distinct x values, interior maximum: fit succeeds.
        assert!(parabolic_max(&results, Axis::X).is_ok());

        let flat_axis = table(&[(1.0, 0.0, 0.0, 1.0), (1.0, 0.0, 0.0, 2.0)]);
        assert!(matches!(
            parabolic_max(&flat_axis, Axis::X),
            Err(ScanError::Extrapolation { .. })
        ));
        assert!(matches!(
            polyfit2(&[0.0, 1.0], &[1.0, 2.0]),
            Err(ScanError::DegenerateFit(_))
        ));
    }

    #[test]
    fn test_move_to_parabolic_max() {
        let mut stage = RecordingStage::default();
        let fit = move_to_parabolic_max(&mut stage, &synthetic_parabola(), Axis::X).unwrap();
        assert_eq!(stage.moves, vec![fit.position]);
    }
}
