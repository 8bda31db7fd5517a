// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use rand::Rng;

/// Source of uniform random draws used for sampling decisions.
///
/// Implementations return values in the half-open range `[0.0, 1.0)`, one
/// per call. The default used by `StatsdClient` is `ThreadRngSource`; tests
/// and callers needing reproducible behavior can inject their own source
/// via `StatsdClientBuilder::with_random_source`.
pub trait RandomSource {
    fn next_f64(&self) -> f64;
}

/// Default random source backed by the thread-local generator from `rand`.
#[derive(Debug, Clone, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Decide whether a single event sampled at `rate` should be sent given
/// one uniform draw from `[0.0, 1.0)`.
///
/// The comparison is strict, so a rate of `0.5` accepts draws in
/// `[0.0, 0.5)` and a rate of `0.0` or below accepts nothing. Callers are
/// expected to short-circuit rates of `1.0` and above without consuming a
/// draw at all.
pub(crate) fn accept(rate: f64, draw: f64) -> bool {
    draw < rate
}
