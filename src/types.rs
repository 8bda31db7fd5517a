// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::{MetricFormatter, MetricValue};
use std::error;
use std::fmt;
use std::io;

/// Trait for metrics that are in their final Statsd wire representation.
///
/// Implementations of this trait hold the complete line sent to the server,
/// including the client prefix, any tags, and any sampling rate suffix.
pub trait Metric {
    fn as_metric_str(&self) -> &str;
}

/// Counters are simple values incremented or decremented by a client.
///
/// See the `Counted` and `CountedExt` traits for more information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    repr: String,
}

impl Counter {
    pub fn new(prefix: &str, key: &str, count: i64) -> Counter {
        MetricFormatter::counter(prefix, key, MetricValue::Signed(count))
            .format()
            .into()
    }
}

impl From<String> for Counter {
    fn from(s: String) -> Self {
        Counter { repr: s }
    }
}

impl Metric for Counter {
    fn as_metric_str(&self) -> &str {
        &self.repr
    }
}

/// Timers are a positive number of milliseconds between a start and end point.
///
/// See the `Timed` and `TimedExt` traits for more information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    repr: String,
}

impl Timer {
    pub fn new(prefix: &str, key: &str, time: u64) -> Timer {
        MetricFormatter::timer(prefix, key, MetricValue::Unsigned(time))
            .format()
            .into()
    }
}

impl From<String> for Timer {
    fn from(s: String) -> Self {
        Timer { repr: s }
    }
}

impl Metric for Timer {
    fn as_metric_str(&self) -> &str {
        &self.repr
    }
}

/// Gauges are an instantaneous measurement of a value determined by the client.
///
/// See the `Gauged` and `GaugedExt` traits for more information.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    repr: String,
}

impl Gauge {
    pub fn new(prefix: &str, key: &str, value: u64) -> Gauge {
        MetricFormatter::gauge(prefix, key, MetricValue::Unsigned(value))
            .format()
            .into()
    }

    pub fn new_f64(prefix: &str, key: &str, value: f64) -> Gauge {
        MetricFormatter::gauge(prefix, key, MetricValue::Float(value))
            .format()
            .into()
    }

    /// Create a gauge holding a relative change (`+N` or `-N`) instead of
    /// an absolute value.
    pub fn new_delta(prefix: &str, key: &str, delta: i64) -> Gauge {
        MetricFormatter::gauge(prefix, key, MetricValue::Delta(delta))
            .format()
            .into()
    }
}

impl From<String> for Gauge {
    fn from(s: String) -> Self {
        Gauge { repr: s }
    }
}

impl Metric for Gauge {
    fn as_metric_str(&self) -> &str {
        &self.repr
    }
}

/// Potential categories an error from this library falls into.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    InvalidInput,
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrorKind::InvalidInput => "InvalidInput".fmt(f),
            ErrorKind::IoError => "IoError".fmt(f),
        }
    }
}

/// Error generated by this library potentially wrapping another
/// type of error (exposed via the `Error` trait).
#[derive(Debug)]
pub struct MetricError {
    repr: ErrorRepr,
}

#[derive(Debug)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    IoError(io::Error),
}

impl MetricError {
    /// Return the kind of the error
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::IoError(_) => ErrorKind::IoError,
            ErrorRepr::WithDescription(kind, _) => kind,
        }
    }
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.repr {
            ErrorRepr::IoError(ref err) => err.fmt(f),
            ErrorRepr::WithDescription(_, desc) => desc.fmt(f),
        }
    }
}

impl error::Error for MetricError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.repr {
            ErrorRepr::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for MetricError {
    fn from(err: io::Error) -> MetricError {
        MetricError {
            repr: ErrorRepr::IoError(err),
        }
    }
}

impl From<(ErrorKind, &'static str)> for MetricError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> MetricError {
        MetricError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

pub type MetricResult<T> = Result<T, MetricError>;

#[cfg(test)]
mod tests {
    use super::{Counter, ErrorKind, Gauge, Metric, MetricError, Timer};
    use std::error::Error;
    use std::io;

    #[test]
    fn test_counter_to_metric_string() {
        let counter = Counter::new("my.app.", "test.counter", 4);
        assert_eq!("my.app.test.counter:4|c", counter.as_metric_str());
    }

    #[test]
    fn test_counter_to_metric_string_negative() {
        let counter = Counter::new("my.app.", "test.counter", -1);
        assert_eq!("my.app.test.counter:-1|c", counter.as_metric_str());
    }

    #[test]
    fn test_timer_to_metric_string() {
        let timer = Timer::new("my.app.", "test.timer", 34);
        assert_eq!("my.app.test.timer:34|ms", timer.as_metric_str());
    }

    #[test]
    fn test_gauge_to_metric_string() {
        let gauge = Gauge::new("my.app.", "test.gauge", 2);
        assert_eq!("my.app.test.gauge:2|g", gauge.as_metric_str());
    }

    #[test]
    fn test_gauge_f64_to_metric_string() {
        let gauge = Gauge::new_f64("my.app.", "test.gauge", 2.5);
        assert_eq!("my.app.test.gauge:2.5|g", gauge.as_metric_str());
    }

    #[test]
    fn test_gauge_delta_to_metric_string() {
        let gauge = Gauge::new_delta("my.app.", "test.gauge", 7);
        assert_eq!("my.app.test.gauge:+7|g", gauge.as_metric_str());
    }

    #[test]
    fn test_metric_error_kind_io_error() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout!");
        let our_err = MetricError::from(io_err);
        assert_eq!(ErrorKind::IoError, our_err.kind());
    }

    #[test]
    fn test_metric_error_kind_invalid_input() {
        let our_err = MetricError::from((ErrorKind::InvalidInput, "bad!"));
        assert_eq!(ErrorKind::InvalidInput, our_err.kind());
    }

    #[test]
    fn test_metric_error_source_io_error() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout!");
        let our_err = MetricError::from(io_err);
        assert!(our_err.source().is_some());
    }

    #[test]
    fn test_metric_error_source_invalid_input() {
        let our_err = MetricError::from((ErrorKind::InvalidInput, "bad!"));
        assert!(our_err.source().is_none());
    }
}
