use crate::config::EngineConfig;
use crate::model::Model;
use crate::params::Params;
use crate::sampling::exponential_waiting_time;
use anyhow::{Context, Result, bail};
use rand::Rng;
use rand_distr::{Distribution, weighted::WeightedIndex};

/// A unit of stochastic change.
///
/// An event has a rate, evaluated against the current state and parameters,
/// and an effect, applied to the state in place when the event fires.
pub trait Event {
    type State;

    /// Frequency at which the event occurs. Must be non-negative;
    /// an event with rate zero never fires.
    fn rate(&self, state: &Self::State, params: &Params) -> Result<f64>;

    /// Mutate the state as if the event occurred.
    fn apply<R: Rng + ?Sized>(&self, state: &mut Self::State, rng: &mut R);
}

/// Event-driven stochastic simulation engine (Gillespie algorithm).
#[derive(Debug, Clone)]
pub struct EventModel<E> {
    name: String,
    events: Vec<E>,
    max_steps: usize,
}

impl<E: Event> EventModel<E>
where
    E::State: Clone,
{
    pub fn new(name: impl Into<String>, events: Vec<E>) -> Self {
        Self {
            name: name.into(),
            events,
            max_steps: EngineConfig::default().max_steps,
        }
    }

    /// Apply the step ceiling from the configuration.
    pub fn with_config(mut self, cfg: &EngineConfig) -> Self {
        self.max_steps = cfg.max_steps;
        self
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    fn evaluate_rates(&self, state: &E::State, params: &Params, rates: &mut Vec<f64>) -> Result<()> {
        rates.clear();
        for (i_event, event) in self.events.iter().enumerate() {
            let rate = event
                .rate(state, params)
                .with_context(|| format!("failed to evaluate rate of event {i_event}"))?;
            if !(rate >= 0.0) {
                bail!("event {i_event} must have a non-negative rate, but has {rate}");
            }
            rates.push(rate);
        }
        Ok(())
    }
}

impl<E: Event> Model for EventModel<E>
where
    E::State: Clone,
{
    type State = E::State;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn run<R: Rng + ?Sized>(
        &self,
        params: &Params,
        initial_state: &E::State,
        duration: f64,
        rng: &mut R,
    ) -> Result<E::State> {
        if !(duration >= 0.0) {
            bail!("duration must be non-negative, but is {duration}");
        }

        let mut state = initial_state.clone();
        let mut rates = Vec::with_capacity(self.events.len());
        let mut time = 0.0;
        let mut n_steps = 0;

        loop {
            self.evaluate_rates(&state, params, &mut rates)?;

            // No event can fire: the state is absorbing.
            let total_rate: f64 = rates.iter().sum();
            if total_rate == 0.0 {
                break;
            }

            time += exponential_waiting_time(total_rate, rng)?;
            if time > duration {
                break;
            }

            n_steps += 1;
            if n_steps > self.max_steps {
                bail!(
                    "maximum number of steps ({}) exceeded in a single run",
                    self.max_steps
                );
            }

            let event_dist = WeightedIndex::new(&rates).context("failed to select event")?;
            let i_event = event_dist.sample(rng);
            self.events[i_event].apply(&mut state, rng);
        }

        log::trace!("{}: {n_steps} events in {duration} time units", self.name);

        Ok(state)
    }
}
