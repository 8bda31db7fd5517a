// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::client::{MetricBackend, StatsdClient};
use crate::types::{Metric, MetricError, MetricResult};
use std::fmt::{self, Write};
use std::marker::PhantomData;

/// Type of metric that knows its Statsd wire suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Timer,
    Gauge,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricType::Counter => "c".fmt(f),
            MetricType::Timer => "ms".fmt(f),
            MetricType::Gauge => "g".fmt(f),
        }
    }
}

/// Holder for primitive metric values that knows how to display itself
///
/// This struct is internal to how the various types that are valid for each
/// kind of metric (types for which `ToCounterValue`, `ToTimerValue`, etc.
/// are implemented) work but is exposed for documentation purposes and
/// advanced use cases.
///
/// Typical use of Downbeat shouldn't require interacting with this type.
#[derive(Debug, Clone, Copy)]
pub enum MetricValue {
    Signed(i64),
    Unsigned(u64),
    Float(f64),

    /// A relative gauge change, rendered with a forced sign (`+5`, `-3`).
    ///
    /// Statsd gauge receivers treat an unsigned value as an absolute set
    /// and a signed value as a relative adjustment, so the sign must be
    /// written even for non-negative deltas (zero renders as `+0`).
    Delta(i64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MetricValue::Signed(v) => v.fmt(f),
            MetricValue::Unsigned(v) => v.fmt(f),
            MetricValue::Float(v) => v.fmt(f),
            MetricValue::Delta(v) => write!(f, "{:+}", v),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MetricFormatter<'a> {
    prefix: &'a str,
    key: &'a str,
    val: MetricValue,
    type_: MetricType,
    tags: Vec<(&'a str, &'a str)>,
    sample_rate: Option<f64>,
    base_size: usize,
    kv_size: usize,
}

impl<'a> MetricFormatter<'a> {
    // "|@0.123456"
    const SAMPLE_RATE_SIZE: usize = 10;

    pub(crate) fn counter(prefix: &'a str, key: &'a str, val: MetricValue) -> Self {
        Self::from_val(prefix, key, val, MetricType::Counter)
    }

    pub(crate) fn timer(prefix: &'a str, key: &'a str, val: MetricValue) -> Self {
        Self::from_val(prefix, key, val, MetricType::Timer)
    }

    pub(crate) fn gauge(prefix: &'a str, key: &'a str, val: MetricValue) -> Self {
        Self::from_val(prefix, key, val, MetricType::Gauge)
    }

    #[rustfmt::skip]
    fn from_val(prefix: &'a str, key: &'a str, val: MetricValue, type_: MetricType) -> Self {
        MetricFormatter {
            prefix,
            key,
            type_,
            val,
            tags: Vec::new(),
            sample_rate: None,
            // keep track of the number of bytes we expect to use for both the
            // key-value part of the tags for this metric as well as the base
            // metric (name, value, and type). Incrementing these counters when
            // tags are added saves us from having to loop through the tags to
            // count the expected number of bytes to allocate.
            kv_size: 0,
            base_size: prefix.len() + key.len() + 1 /* : */ + 10 /* value */ + 1 /* | */ + 2, /* type */
        }
    }

    pub(crate) fn with_tag(&mut self, key: &'a str, value: &'a str) {
        self.tags.push((key, value));
        self.kv_size += 1 /* , */ + key.len() + 1 /* = */ + value.len();
    }

    pub(crate) fn with_sample_rate(&mut self, rate: f64) {
        self.sample_rate = Some(rate);
    }

    /// Sampling rate to use when deciding whether to send this metric, or
    /// `None` when no rate was set or the rate doesn't apply to this kind
    /// of metric. Gauges are always sent at a rate of 1.0, only counters
    /// and timers may be sampled.
    pub(crate) fn effective_sample_rate(&self) -> Option<f64> {
        match self.type_ {
            MetricType::Counter | MetricType::Timer => self.sample_rate,
            MetricType::Gauge => None,
        }
    }

    fn write_base_metric(&self, out: &mut String) {
        out.push_str(self.prefix);
        out.push_str(self.key);
        self.write_tags(out);
        let _ = write!(out, ":{}|{}", self.val, self.type_);
    }

    // Tags are part of the metric name: a single leading comma when there
    // are any tags at all, `key=value` pairs joined by commas. Keys and
    // values are written verbatim, delimiter characters are not escaped.
    fn write_tags(&self, out: &mut String) {
        for &(key, value) in self.tags.iter() {
            out.push(',');
            out.push_str(key);
            out.push('=');
            out.push_str(value);
        }
    }

    // The `|@rate` suffix is only written for rates that actually reduce
    // the volume of sent metrics. Receivers parse the rate with a fixed
    // six-digit `%f` format so it is rendered exactly that way here.
    fn write_sample_rate(&self, out: &mut String) {
        if let Some(rate) = self.effective_sample_rate() {
            if rate < 1.0 {
                let _ = write!(out, "|@{:.6}", rate);
            }
        }
    }

    fn size_hint(&self) -> usize {
        let mut size = self.base_size + self.kv_size;
        if self.sample_rate.is_some() {
            size += Self::SAMPLE_RATE_SIZE;
        }
        size
    }

    pub(crate) fn format(&self) -> String {
        let mut metric_string = String::with_capacity(self.size_hint());
        self.write_base_metric(&mut metric_string);
        self.write_sample_rate(&mut metric_string);
        metric_string
    }
}

/// Internal state of a `MetricBuilder`
///
/// The builder can either be in the process of formatting a metric to send
/// via a client or it can be simply holding on to an error that it will be
/// dealt with when `.try_send()` or `.send()` is finally invoked.
#[derive(Debug)]
enum BuilderRepr<'m, 'c> {
    Success(MetricFormatter<'m>, &'c StatsdClient),
    Error(MetricError, &'c StatsdClient),
}

/// Builder for adding tags and a sampling rate to in-progress metrics.
///
/// This builder adds `key=value` tags and an optional sampling rate to a
/// metric that was previously constructed by a call to a method on
/// `StatsdClient`. The metric is sent via the client when
/// `MetricBuilder::send()` or `MetricBuilder::try_send()` is invoked.
/// Any errors encountered constructing or sending the metric will be
/// propagated and returned when those methods are finally invoked.
///
/// Tags are written into the metric name segment of the emitted line and
/// so appear in the order they were added. Adding tags to a metric via
/// this builder will typically result in one or more extra heap
/// allocations.
///
/// NOTE: The only way to instantiate an instance of this builder is via
/// methods on the `StatsdClient` client.
///
/// # Examples
///
/// ## `.try_send()`
///
/// An example of how the metric builder is used with a `StatsdClient`
/// instance is given below.
///
/// ```
/// use downbeat::prelude::*;
/// use downbeat::{StatsdClient, NopMetricSink, Metric};
///
/// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
/// let res = client.count_with_tags("some.key", 1)
///    .with_tag("host", "app11.example.com")
///    .with_tag("segment", "23")
///    .try_send();
///
/// assert_eq!(
///     "some.prefix.some.key,host=app11.example.com,segment=23:1|c",
///     res.unwrap().as_metric_str()
/// );
/// ```
///
/// ## `.send()`
///
/// The "quiet" method consumes any error via the client's error handler
/// instead of returning it. This is how the fire-and-forget convenience
/// methods on the client send metrics.
///
/// ```
/// use downbeat::prelude::*;
/// use downbeat::{StatsdClient, NopMetricSink, Metric};
///
/// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
/// client.count_with_tags("some.key", 1)
///    .with_tag("host", "app11.example.com")
///    .with_sample_rate(0.5)
///    .send();
/// ```
///
/// Note that nothing is returned from the `.send()` method. Any errors
/// encountered in this case will be passed to the error handler the client
/// was built with (by default, logged at warning level).
#[must_use = "Did you forget to call .send() after adding tags?"]
#[derive(Debug)]
pub struct MetricBuilder<'m, 'c, T>
where
    T: Metric + From<String>,
{
    repr: BuilderRepr<'m, 'c>,
    type_: PhantomData<T>,
}

impl<'m, 'c, T> MetricBuilder<'m, 'c, T>
where
    T: Metric + From<String>,
{
    pub(crate) fn from_fmt(formatter: MetricFormatter<'m>, client: &'c StatsdClient) -> Self {
        MetricBuilder {
            repr: BuilderRepr::Success(formatter, client),
            type_: PhantomData,
        }
    }

    pub(crate) fn from_error(err: MetricError, client: &'c StatsdClient) -> Self {
        MetricBuilder {
            repr: BuilderRepr::Error(err, client),
            type_: PhantomData,
        }
    }

    pub(crate) fn with_tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (&'m str, &'m str)>,
    {
        if let BuilderRepr::Success(ref mut formatter, _) = self.repr {
            for (key, value) in tags {
                formatter.with_tag(key, value);
            }
        }
        self
    }

    /// Add a `key=value` tag to this metric.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink, Metric};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    /// let res = client.count_with_tags("some.key", 1)
    ///    .with_tag("user", "authenticated")
    ///    .try_send();
    ///
    /// assert_eq!(
    ///    "some.prefix.some.key,user=authenticated:1|c",
    ///    res.unwrap().as_metric_str()
    /// );
    /// ```
    pub fn with_tag(mut self, key: &'m str, value: &'m str) -> Self {
        if let BuilderRepr::Success(ref mut formatter, _) = self.repr {
            formatter.with_tag(key, value);
        }
        self
    }

    /// Set the rate at which this metric should be sampled, a probability
    /// in the range `(0.0, 1.0)`.
    ///
    /// Rates of `1.0` and above mean the metric is always sent and no
    /// `|@rate` annotation is written. Sampling only applies to counters
    /// and timers; for gauges the rate is ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink, Metric};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    /// let res = client.count_with_tags("some.key", 1)
    ///    .with_sample_rate(0.25)
    ///    .try_send();
    ///
    /// assert_eq!(
    ///    "some.prefix.some.key:1|c|@0.250000",
    ///    res.unwrap().as_metric_str()
    /// );
    /// ```
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        if let BuilderRepr::Success(ref mut formatter, _) = self.repr {
            formatter.with_sample_rate(rate);
        }
        self
    }

    /// Send a metric using the client that created this builder.
    ///
    /// The returned metric is always fully formatted, even when the sampling
    /// decision for this particular call went against actually emitting it
    /// to the underlying sink.
    ///
    /// Note that the builder is consumed by this method and thus `.try_send()`
    /// can only be called a single time per builder.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink, Metric};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    /// let res = client.gauge_with_tags("some.key", 7)
    ///    .with_tag("segment", "12345")
    ///    .try_send();
    ///
    /// assert_eq!(
    ///    "some.prefix.some.key,segment=12345:7|g",
    ///    res.unwrap().as_metric_str()
    /// );
    /// ```
    pub fn try_send(self) -> MetricResult<T> {
        match self.repr {
            BuilderRepr::Error(err, _) => Err(err),
            BuilderRepr::Success(ref formatter, client) => {
                let metric = T::from(formatter.format());
                if client.should_send(formatter.effective_sample_rate()) {
                    client.send_metric(&metric)?;
                }
                Ok(metric)
            }
        }
    }

    /// Send a metric using the client that created this builder, discarding
    /// successful results and invoking the client's error handler for error
    /// results.
    ///
    /// This is the fault-isolated path: no error ever reaches the caller.
    /// By default the error handler logs a single warning per failed send.
    ///
    /// Note that the builder is consumed by this method and thus `.send()`
    /// can only be called a single time per builder.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    ///
    /// client.gauge_with_tags("some.key", 7)
    ///    .with_tag("region", "us-west-1")
    ///    .send();
    /// ```
    pub fn send(self) {
        match self.repr {
            BuilderRepr::Error(err, client) => client.consume_error(err),
            BuilderRepr::Success(_, client) => {
                if let Err(e) = self.try_send() {
                    client.consume_error(e);
                }
            }
        }
    }
}
