use crate::error::ValidationError;

/// Distance between floating-point scores and their integer counterparts.
/// Relative error is `|f - q| / max(|f|, 1)` so that near-zero scores do not
/// dominate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ErrorStats {
    pub count: usize,
    pub mean_abs: f64,
    pub max_abs: f64,
    pub mean_rel: f64,
    pub max_rel: f64,
}

impl ErrorStats {
    pub fn from_scores(float: &[f32], quantized: &[i32]) -> Self {
        let mut stats = ErrorStats::default();
        for (&f, &q) in float.iter().zip(quantized) {
            let abs = (f as f64 - q as f64).abs();
            let rel = abs / (f as f64).abs().max(1.0);

            stats.count += 1;
            stats.mean_abs += abs;
            stats.mean_rel += rel;
            stats.max_abs = stats.max_abs.max(abs);
            stats.max_rel = stats.max_rel.max(rel);
        }

        if stats.count > 0 {
            stats.mean_abs /= stats.count as f64;
            stats.mean_rel /= stats.count as f64;
        }
        stats
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConsistencyReport {
    pub positions: usize,
    /// Positions checked against an external evaluator, all of which matched.
    pub external_checked: usize,
    pub errors: ErrorStats,
    pub error_bound: f64,
    /// Saturated values in the exported network.
    pub overflow: usize,
    pub passed: bool,
}

impl ConsistencyReport {
    pub fn log(&self) {
        log::info!(
            "Consistency over {} positions: mean abs {:.3}, max abs {:.3}, mean rel {:.4}, max rel {:.4}",
            self.positions,
            self.errors.mean_abs,
            self.errors.max_abs,
            self.errors.mean_rel,
            self.errors.max_rel,
        );
        if self.external_checked > 0 {
            log::info!(
                "External evaluator matched the replica on all {} positions",
                self.external_checked
            );
        }
        if self.overflow > 0 {
            log::warn!("{} values saturated during export", self.overflow);
        }
        if !self.passed {
            log::warn!(
                "Mean absolute error {:.3} exceeds the bound {:.3}",
                self.errors.mean_abs,
                self.error_bound
            );
        }
    }
}

/// The two integer paths must agree bit for bit.
pub fn check_exact(
    fens: &[String],
    external: &[i32],
    replica: &[i32],
) -> Result<(), ValidationError> {
    for ((fen, &e), &r) in fens.iter().zip(external).zip(replica) {
        if e != r {
            return Err(ValidationError::Mismatch {
                fen: fen.clone(),
                external: e,
                replica: r,
            });
        }
    }
    Ok(())
}

/// Builds the report. A mismatch between external and replica scores is an
/// error; exceeding the float error bound only fails the report.
pub fn compare(
    fens: &[String],
    float: &[f32],
    replica: &[i32],
    external: Option<&[i32]>,
    error_bound: f64,
    overflow: usize,
) -> Result<ConsistencyReport, ValidationError> {
    if let Some(external) = external {
        check_exact(fens, external, replica)?;
    }

    let errors = ErrorStats::from_scores(float, replica);
    let passed = errors.mean_abs <= error_bound;
    if !passed {
        log::warn!(
            "Quantization error {:.3} exceeds the bound {:.3}",
            errors.mean_abs,
            error_bound
        );
    }

    Ok(ConsistencyReport {
        positions: fens.len(),
        external_checked: external.map_or(0, <[i32]>::len),
        errors,
        error_bound,
        overflow,
        passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fens(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("fen {}", i)).collect()
    }

    #[test]
    fn test_error_stats() {
        let stats = ErrorStats::from_scores(&[100.0, -0.5, 10.0], &[98, 0, 10]);

        assert_eq!(stats.count, 3);
        assert!((stats.mean_abs - 2.5 / 3.0).abs() < 1e-9);
        assert_eq!(stats.max_abs, 2.0);
        // -0.5 vs 0 is measured against 1, not 0.5
        assert_eq!(stats.max_rel, 0.5);
    }

    #[test]
    fn test_mismatch_names_the_position() {
        let err = compare(&fens(3), &[0.0; 3], &[1, 2, 3], Some(&[1, 2, 4]), 8.0, 0).unwrap_err();
        match err {
            ValidationError::Mismatch {
                fen,
                external,
                replica,
            } => {
                assert_eq!(fen, "fen 2");
                assert_eq!((external, replica), (4, 3));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bound_failure_is_not_an_error() {
        let report = compare(&fens(2), &[0.0, 0.0], &[20, -20], None, 8.0, 0).unwrap();
        assert!(!report.passed);
        assert_eq!(report.errors.mean_abs, 20.0);

        let report = compare(&fens(2), &[1.0, 2.0], &[1, 2], Some(&[1, 2]), 8.0, 0).unwrap();
        assert!(report.passed);
        assert_eq!(report.external_checked, 2);
    }
}
