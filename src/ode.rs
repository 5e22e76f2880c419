//! Dormand-Prince integration that keeps every accepted step.

use crate::config::FlowConfig;
use anyhow::{Result, anyhow, bail};
use ode_solvers::{Dopri5, SVector, System, dop_shared::OutputType};

/// Accepted steps `(x, y)` from `x_start` to `x_end`, both ends included.
///
/// Sparse output records the integrator's own step states, so every entry
/// is a solution point and the last one sits at `x_end`.
pub fn integrate<S, const N: usize>(
    system: S,
    x_start: f64,
    x_end: f64,
    y_start: SVector<f64, N>,
    cfg: &FlowConfig,
) -> Result<Vec<(f64, SVector<f64, N>)>>
where
    S: System<f64, SVector<f64, N>>,
{
    if x_end <= x_start {
        return Ok(vec![(x_start, y_start)]);
    }

    let span = x_end - x_start;
    let mut stepper = Dopri5::from_param(
        system,
        x_start,
        x_end,
        span,
        y_start,
        cfg.rel_tol,
        cfg.abs_tol,
        0.9,
        0.04,
        0.2,
        10.0,
        span,
        0.0,
        100_000,
        1000,
        OutputType::Sparse,
    );
    stepper
        .integrate()
        .map_err(|err| anyhow!("failed to integrate from {x_start} to {x_end}: {err:?}"))?;

    let mut steps: Vec<(f64, SVector<f64, N>)> = stepper
        .x_out()
        .iter()
        .copied()
        .zip(stepper.y_out().iter().copied())
        .collect();
    if steps.first().is_none_or(|&(x, _)| x != x_start) {
        steps.insert(0, (x_start, y_start));
    }

    match steps.last() {
        Some(&(x, _)) if (x - x_end).abs() <= 1e-9 * x_end.abs().max(1.0) => Ok(steps),
        Some(&(x, _)) => bail!("integration stopped early at {x} (expected {x_end})"),
        None => bail!("integration took no steps from {x_start} to {x_end}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct Decay;

    impl System<f64, SVector<f64, 1>> for Decay {
        fn system(&self, _x: f64, y: &SVector<f64, 1>, dy: &mut SVector<f64, 1>) {
            dy[0] = -y[0];
        }
    }

    #[test]
    fn every_step_is_on_the_solution() {
        let cfg = FlowConfig::default();
        let steps = integrate(Decay, 0.0, 5.0, SVector::from([1.0]), &cfg).unwrap();
        assert!(steps.len() > 2);
        assert_eq!(steps[0].0, 0.0);
        assert_abs_diff_eq!(steps.last().unwrap().0, 5.0, epsilon = 1e-9);
        assert!(steps.windows(2).all(|pair| pair[0].0 < pair[1].0));
        for (x, y) in &steps {
            assert_abs_diff_eq!(y[0], (-x).exp(), epsilon = 1e-8);
        }
    }

    #[test]
    fn empty_span_returns_the_start() {
        let cfg = FlowConfig::default();
        let steps = integrate(Decay, 1.0, 1.0, SVector::from([2.0]), &cfg).unwrap();
        assert_eq!(steps, vec![(1.0, SVector::from([2.0]))]);
    }
}
