//! Stochastic and deterministic models of DNA methylation in populations.
//!
//! Models are built from rate-driven events and simulated with the Gillespie
//! algorithm ([`engine`]). Linear models ([`linear`]) additionally admit an
//! exact expected-count companion, long-term growth and extinction
//! probabilities; finite-state models ([`finite`]) a stationary
//! distribution. The three-class hybrid process in [`pdmp`] follows a
//! deterministic flow between random cell divisions.

pub mod config;
pub mod engine;
pub mod finite;
pub mod io;
pub mod linear;
pub mod manager;
pub mod methylation;
pub mod model;
pub mod ode;
pub mod params;
pub mod pdmp;
pub mod sampling;
pub mod stats;
