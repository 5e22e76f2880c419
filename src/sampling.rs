use anyhow::{Context, Result};
use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Draw an exponentially distributed waiting time with the given total rate.
pub fn exponential_waiting_time<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> Result<f64> {
    let dist = Exp::new(rate).with_context(|| format!("invalid waiting time rate {rate}"))?;
    Ok(dist.sample(rng))
}

/// Arrival times of a homogeneous Poisson process on `(0, duration]`.
pub fn poisson_times<R: Rng + ?Sized>(rate: f64, duration: f64, rng: &mut R) -> Result<Vec<f64>> {
    let mut times = Vec::new();
    if rate == 0.0 {
        return Ok(times);
    }
    let dist = Exp::new(rate).with_context(|| format!("invalid Poisson rate {rate}"))?;
    let mut time = 0.0;
    loop {
        time += dist.sample(rng);
        if time > duration {
            return Ok(times);
        }
        times.push(time);
    }
}
