// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Export commonly used parts of Downbeat for easy glob imports
//!
//! # Example
//!
//! ```
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, NopMetricSink};
//!
//! let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
//!
//! client.count("some.counter", 1);
//! client.incr("some.counter");
//! client.time("some.timer", 23);
//! client.gauge("some.gauge", 45);
//! client.gauge_delta("some.gauge", -3);
//! ```

pub use crate::client::{Counted, CountedExt, Gauged, GaugedExt, MetricClient, Timed, TimedExt};
