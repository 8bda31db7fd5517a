// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::{MetricBuilder, MetricFormatter, MetricValue};
use crate::sampler::{self, RandomSource, ThreadRngSource};
use crate::sealed::Sealed;
use crate::sinks::MetricSink;
use crate::types::{Counter, ErrorKind, Gauge, Metric, MetricError, MetricResult, Timer};
use log::warn;
use std::fmt;
use std::panic::RefUnwindSafe;
use std::time::{Duration, Instant};

/// Conversion trait for valid values for counters
///
/// This trait must be implemented for any types that are used as counter
/// values (currently only `i64`). This trait is internal to how values are
/// formatted as part of metrics but is exposed publicly for documentation
/// purposes.
///
/// Typical use of Downbeat shouldn't require interacting with this trait.
pub trait ToCounterValue {
    fn try_to_value(self) -> MetricResult<MetricValue>;
}

impl ToCounterValue for i64 {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(MetricValue::Signed(self))
    }
}

/// Conversion trait for valid values for timers
///
/// This trait must be implemented for any types that are used as timer
/// values (currently `u64` and `Duration`). This trait is internal to how
/// values are formatted as part of metrics but is exposed publicly for
/// documentation purposes.
///
/// Typical use of Downbeat shouldn't require interacting with this trait.
pub trait ToTimerValue {
    fn try_to_value(self) -> MetricResult<MetricValue>;
}

impl ToTimerValue for u64 {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(MetricValue::Unsigned(self))
    }
}

impl ToTimerValue for Duration {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        let as_millis = self.as_millis();
        if as_millis > u64::MAX as u128 {
            Err(MetricError::from((ErrorKind::InvalidInput, "u64 overflow")))
        } else {
            Ok(MetricValue::Unsigned(as_millis as u64))
        }
    }
}

/// Conversion trait for valid values for gauges
///
/// This trait must be implemented for any types that are used as gauge
/// values (currently `u64`, `f64`, and `GaugeDelta`). This trait is
/// internal to how values are formatted as part of metrics but is exposed
/// publicly for documentation purposes.
///
/// Typical use of Downbeat shouldn't require interacting with this trait.
pub trait ToGaugeValue {
    fn try_to_value(self) -> MetricResult<MetricValue>;
}

impl ToGaugeValue for u64 {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(MetricValue::Unsigned(self))
    }
}

impl ToGaugeValue for f64 {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(MetricValue::Float(self))
    }
}

/// Relative change to apply to a gauge, emitted with a forced sign.
///
/// A gauge recorded with a `GaugeDelta` value adjusts the server-side gauge
/// instead of replacing it: `GaugeDelta(5)` emits `+5`, `GaugeDelta(-5)`
/// emits `-5`, and `GaugeDelta(0)` emits `+0` (a valid no-op adjustment,
/// distinct from setting the gauge to zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GaugeDelta(pub i64);

impl ToGaugeValue for GaugeDelta {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(MetricValue::Delta(self.0))
    }
}

/// Trait for incrementing and decrementing counters.
///
/// Counters are simple values incremented or decremented by a client. The
/// rates at which these events occur or average values will be determined
/// by the server receiving them. Examples of counter uses include number
/// of logins to a system or requests received.
///
/// The following types are valid for counters:
/// * `i64`
///
/// See the [Statsd spec](https://github.com/b/statsd_spec) for more
/// information.
pub trait Counted<T>
where
    T: ToCounterValue,
{
    /// Increment or decrement the counter by the given amount.
    ///
    /// This method is fire-and-forget: any error encountered while sending
    /// is routed to the client's error handler, never to the caller.
    fn count(&self, key: &str, count: T) {
        self.count_with_tags(key, count).send()
    }

    /// Increment or decrement the counter by the given amount and return
    /// a `MetricBuilder` that can be used to add tags and a sampling rate
    /// to the metric.
    fn count_with_tags<'a>(&'a self, key: &'a str, count: T) -> MetricBuilder<'_, '_, Counter>;
}

/// Trait for convenience methods for counters
///
/// This trait specifically implements increment and decrement convenience
/// methods for counters with `i64` types.
pub trait CountedExt: Counted<i64> {
    /// Increment the counter by 1
    fn incr(&self, key: &str) {
        self.incr_with_tags(key).send()
    }

    /// Increment the counter by 1 and return a `MetricBuilder` that can
    /// be used to add tags to the metric.
    fn incr_with_tags<'a>(&'a self, key: &'a str) -> MetricBuilder<'_, '_, Counter> {
        self.count_with_tags(key, 1)
    }

    /// Decrement the counter by 1
    fn decr(&self, key: &str) {
        self.decr_with_tags(key).send()
    }

    /// Decrement the counter by 1 and return a `MetricBuilder` that can
    /// be used to add tags to the metric.
    fn decr_with_tags<'a>(&'a self, key: &'a str) -> MetricBuilder<'_, '_, Counter> {
        self.count_with_tags(key, -1)
    }
}

/// Trait for recording timings in milliseconds.
///
/// Timings are a positive number of milliseconds between a start and end
/// time. Examples include time taken to render a web page or time taken
/// for a database call to return. `Duration` values are converted to
/// milliseconds before being recorded.
///
/// The following types are valid for timers:
/// * `u64`
/// * `Duration`
///
/// See the [Statsd spec](https://github.com/b/statsd_spec) for more
/// information.
pub trait Timed<T>
where
    T: ToTimerValue,
{
    /// Record a timing in milliseconds with the given key.
    ///
    /// This method is fire-and-forget: any error encountered while sending
    /// is routed to the client's error handler, never to the caller.
    fn time(&self, key: &str, time: T) {
        self.time_with_tags(key, time).send()
    }

    /// Record a timing in milliseconds with the given key and return a
    /// `MetricBuilder` that can be used to add tags and a sampling rate
    /// to the metric.
    fn time_with_tags<'a>(&'a self, key: &'a str, time: T) -> MetricBuilder<'_, '_, Timer>;
}

/// Trait for timing a block of code directly.
///
/// The block is run to completion and its result returned unchanged while
/// the elapsed wall-clock time is recorded as a timer metric in integer
/// milliseconds. Panics from the block propagate to the caller without a
/// timing being emitted; only the metric emission itself is shielded from
/// errors.
pub trait TimedExt: Timed<u64> {
    /// Run `body`, record its elapsed time under `key`, and return its result.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    /// let rows = client.time_fn("db.query", || {
    ///     // query the database
    ///     42
    /// });
    ///
    /// assert_eq!(42, rows);
    /// ```
    fn time_fn<F, R>(&self, key: &str, body: F) -> R
    where
        F: FnOnce() -> R,
        Self: Sized,
    {
        let start = Instant::now();
        let result = body();
        self.time_with_tags(key, start.elapsed().as_millis() as u64).send();
        result
    }

    /// Run `body` and return its result along with a `MetricBuilder` holding
    /// the elapsed time, so tags and a sampling rate can be added before the
    /// timing is sent.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, NopMetricSink};
    ///
    /// let client = StatsdClient::from_sink("some.prefix", NopMetricSink);
    /// let (rows, timing) = client.time_fn_with_tags("db.query", || 42);
    /// timing.with_tag("table", "users").send();
    ///
    /// assert_eq!(42, rows);
    /// ```
    fn time_fn_with_tags<'a, F, R>(&'a self, key: &'a str, body: F) -> (R, MetricBuilder<'a, 'a, Timer>)
    where
        F: FnOnce() -> R,
        Self: Sized,
    {
        let start = Instant::now();
        let result = body();
        (result, self.time_with_tags(key, start.elapsed().as_millis() as u64))
    }
}

/// Trait for recording gauge values.
///
/// Gauge values are an instantaneous measurement of a value determined
/// by the client. They do not change unless changed by the client. Examples
/// include things like load average or how many connections are active.
///
/// The following types are valid for gauges:
/// * `u64`
/// * `f64`
/// * `GaugeDelta`
///
/// Gauges are never sampled, a sampling rate set on a gauge is ignored.
///
/// See the [Statsd spec](https://github.com/b/statsd_spec) for more
/// information.
pub trait Gauged<T>
where
    T: ToGaugeValue,
{
    /// Record a gauge value with the given key.
    ///
    /// This method is fire-and-forget: any error encountered while sending
    /// is routed to the client's error handler, never to the caller.
    fn gauge(&self, key: &str, value: T) {
        self.gauge_with_tags(key, value).send()
    }

    /// Record a gauge value with the given key and return a `MetricBuilder`
    /// that can be used to add tags to the metric.
    fn gauge_with_tags<'a>(&'a self, key: &'a str, value: T) -> MetricBuilder<'_, '_, Gauge>;
}

/// Trait for convenience methods for relative gauge changes.
pub trait GaugedExt: Gauged<GaugeDelta> {
    /// Adjust the gauge by the given amount, emitting a signed value
    /// (`+5`, `-5`, `+0` for zero).
    fn gauge_delta(&self, key: &str, delta: i64) {
        self.gauge_delta_with_tags(key, delta).send()
    }

    /// Adjust the gauge by the given amount and return a `MetricBuilder`
    /// that can be used to add tags to the metric.
    fn gauge_delta_with_tags<'a>(&'a self, key: &'a str, delta: i64) -> MetricBuilder<'_, '_, Gauge> {
        self.gauge_with_tags(key, GaugeDelta(delta))
    }
}

/// Trait that encompasses all other traits for sending metrics.
///
/// If you wish to use `StatsdClient` with a generic type or place a
/// `StatsdClient` instance behind a pointer (such as a `Box`) this will allow
/// you to reference all the implemented methods for recording metrics, while
/// using a single trait. An example of this is shown below.
///
/// ```
/// use std::time::Duration;
/// use downbeat::{MetricClient, StatsdClient, NopMetricSink};
///
/// let client: Box<dyn MetricClient> = Box::new(StatsdClient::from_sink(
///     "prefix", NopMetricSink));
///
/// client.count("some.counter", 1);
/// client.incr("some.counter");
/// client.time("some.timer", 42);
/// client.time("some.timer", Duration::from_millis(42));
/// client.gauge("some.gauge", 8);
/// client.gauge("some.gauge", 8.5);
/// client.gauge_delta("some.gauge", -2);
/// ```
pub trait MetricClient:
    Counted<i64>
    + CountedExt
    + Timed<u64>
    + Timed<Duration>
    + TimedExt
    + Gauged<u64>
    + Gauged<f64>
    + Gauged<GaugeDelta>
    + GaugedExt
{
}

/// Typically internal client methods for sending metrics and handling errors.
///
/// This trait exposes methods of the client that would normally be internal
/// but may be useful for consumers of the library to extend it in unforseen
/// ways. Most consumers of the library shouldn't need to make use of this
/// extension point.
///
/// This trait is not exposed in the `prelude` module since it isn't required
/// to use the client for sending metrics. It is only exposed in the `ext`
/// module which is used to encompass advanced extension points for the library.
///
/// NOTE: This is a sealed trait and so it cannot be implemented outside of the
/// library.
///
/// # Example
///
/// ```
/// use downbeat::{Metric, MetricResult, StatsdClient, NopMetricSink};
/// use downbeat::ext::MetricBackend;
///
/// struct CustomMetric {
///     repr: String,
/// }
///
/// impl Metric for CustomMetric {
///     fn as_metric_str(&self) -> &str {
///         &self.repr
///     }
/// }
///
/// impl From<String> for CustomMetric {
///     fn from(v: String) -> Self {
///         CustomMetric { repr: v }
///     }
/// }
///
/// struct MyCustomClient {
///     prefix: String,
///     wrapped: StatsdClient,
/// }
///
/// impl MyCustomClient {
///     fn new(prefix: &str, client: StatsdClient) -> Self {
///         MyCustomClient {
///             prefix: prefix.to_string(),
///             wrapped: client,
///         }
///     }
///
///     fn send_event(&self, key: &str, val: i64) -> MetricResult<CustomMetric> {
///         let metric = CustomMetric::from(format!("{}.{}:{}|e", self.prefix, key, val));
///         self.wrapped.send_metric(&metric)?;
///         Ok(metric)
///     }
///
///     fn send_event_quietly(&self, key: &str, val: i64) {
///         if let Err(e) = self.send_event(key, val) {
///             self.wrapped.consume_error(e);
///         }
///     }
/// }
///
/// let prefix = "some.prefix";
/// let inner = StatsdClient::from_sink(prefix, NopMetricSink);
/// let custom = MyCustomClient::new(prefix, inner);
///
/// custom.send_event("some.event", 123).unwrap();
/// custom.send_event_quietly("some.event", 456);
/// ```
pub trait MetricBackend: Sealed {
    /// Send a full formed `Metric` implementation via the underlying `MetricSink`
    ///
    /// Obtain a `&str` representation of a metric, encode it as UTF-8 bytes, and
    /// send it to the underlying `MetricSink`, verbatim. Note that the metric is
    /// expected to be full formed already, including any prefix or tags.
    ///
    /// Note that if you simply want to emit standard metrics, you don't need to
    /// use this method. This is only useful if you are extending Downbeat with a
    /// custom metric type or something similar.
    fn send_metric<M>(&self, metric: &M) -> MetricResult<()>
    where
        M: Metric;

    /// Consume a possible error from attempting to send a metric.
    ///
    /// When callers have elected to quietly send metrics via the `MetricBuilder::send()`
    /// method, this method will be invoked if an error is encountered. By default the
    /// handler logs the error at warning level via the `log` crate.
    ///
    /// Note that if you simply want to emit standard metrics, you don't need to
    /// use this method. This is only useful if you are extending Downbeat with a
    /// custom metric type or something similar.
    fn consume_error(&self, err: MetricError);
}

/// Builder for creating and customizing `StatsdClient` instances.
///
/// Instances of the builder should be created by calling the `::builder()`
/// method on the `StatsdClient` struct.
///
/// # Example
///
/// ```
/// use downbeat::prelude::*;
/// use downbeat::{MetricError, StatsdClient, NopMetricSink};
///
/// fn my_error_handler(err: MetricError) {
///     eprintln!("Metric error! {}", err);
/// }
///
/// let client = StatsdClient::builder("prefix", NopMetricSink)
///     .with_error_handler(my_error_handler)
///     .with_tag("environment", "production")
///     .build();
///
/// client.count("something", 123);
/// client.count_with_tags("some.counter", 42)
///     .with_tag("region", "us-east-2")
///     .send();
/// ```
pub struct StatsdClientBuilder {
    prefix: String,
    sink: Box<dyn MetricSink + Sync + Send + RefUnwindSafe>,
    errors: Box<dyn Fn(MetricError) + Sync + Send + RefUnwindSafe>,
    random: Box<dyn RandomSource + Sync + Send + RefUnwindSafe>,
    tags: Vec<(String, String)>,
}

impl StatsdClientBuilder {
    // Set the required fields and defaults for optional fields
    fn new<T>(prefix: &str, sink: T) -> Self
    where
        T: MetricSink + Sync + Send + RefUnwindSafe + 'static,
    {
        StatsdClientBuilder {
            // required
            prefix: Self::formatted_prefix(prefix),
            sink: Box::new(sink),

            // optional with defaults
            errors: Box::new(default_error_handler),
            random: Box::new(ThreadRngSource),
            tags: Vec::new(),
        }
    }

    /// Set an error handler to use for metrics sent via `MetricBuilder::send()`
    ///
    /// The error handler is only invoked when metrics are not able to be sent
    /// correctly. Either due to invalid input, I/O errors encountered when trying
    /// to send them via a `MetricSink`, or some other reason. It replaces the
    /// default handler which logs each error at warning level.
    ///
    /// The error handler should consume the error without panicking. The error
    /// may be logged, printed to stderr, discarded, etc. - this is up to the
    /// implementation.
    pub fn with_error_handler<F>(mut self, errors: F) -> Self
    where
        F: Fn(MetricError) + Sync + Send + RefUnwindSafe + 'static,
    {
        self.errors = Box::new(errors);
        self
    }

    /// Set the source of random draws used for sampling decisions.
    ///
    /// The default source draws from the thread-local generator of the `rand`
    /// crate. Supplying a deterministic source makes sampled sends reproducible,
    /// which is mainly useful in tests.
    pub fn with_random_source<R>(mut self, random: R) -> Self
    where
        R: RandomSource + Sync + Send + RefUnwindSafe + 'static,
    {
        self.random = Box::new(random);
        self
    }

    /// Add a default tag with key and value to every metric published by the
    /// built [StatsdClient]. Default tags are written before any per-metric
    /// tags, in the order they were added here.
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: ToString,
        V: ToString,
    {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    /// Construct a new `StatsdClient` instance based on current settings.
    pub fn build(self) -> StatsdClient {
        StatsdClient::from_builder(self)
    }

    fn formatted_prefix(prefix: &str) -> String {
        if prefix.is_empty() {
            String::new()
        } else {
            format!("{}.", prefix.trim_end_matches('.'))
        }
    }
}

/// Client for Statsd that implements various traits to record metrics.
///
/// # Traits
///
/// The client is the main entry point for users of this library. It supports
/// several traits for recording metrics of different types.
///
/// * `Counted` and `CountedExt` for emitting counters.
/// * `Timed` and `TimedExt` for emitting timings.
/// * `Gauged` and `GaugedExt` for emitting gauge values.
/// * `MetricClient` for a combination of all of the above.
///
/// For more information about the uses for each type of metric, see the
/// documentation for each mentioned trait.
///
/// All the convenience methods on these traits are fire-and-forget: they
/// return nothing and route any failure to the client's error handler, so
/// instrumentation can never break the code being instrumented. The
/// `*_with_tags` variants return a builder whose `.try_send()` method
/// exposes errors for callers that want them.
///
/// # Sinks
///
/// The client uses some implementation of a `MetricSink` to emit the metrics.
///
/// In simple use cases when performance isn't critical, the `UdpMetricSink`
/// is an acceptable choice since it is the simplest to use and understand.
///
/// When the cost of a syscall per metric in the calling thread matters,
/// wrap the UDP sink with a `QueuingMetricSink` to move the actual network
/// sends onto a dedicated worker thread.
///
/// # Threading
///
/// The `StatsdClient` is designed to work in a multithreaded application. All
/// parts of the client can be shared between threads (i.e. it is `Send` and
/// `Sync`). An example of how to use the client in a multithreaded environment
/// is given below.
///
/// In the following example, we create a struct `MyRequestHandler` that has a
/// single method that spawns a thread to do some work and emit a metric.
///
/// ## Wrapping With An `Arc`
///
/// In order to share a client between multiple threads, you'll need to wrap it
/// with an atomic reference counting pointer (`std::sync::Arc`). You should refer
/// to the client by the trait of all its methods for recording metrics
/// (`MetricClient`) as well as the `Send` and `Sync` traits since the idea is to
/// share this between threads.
///
/// ``` no_run
/// use std::panic::RefUnwindSafe;
/// use std::net::UdpSocket;
/// use std::sync::Arc;
/// use std::thread;
/// use downbeat::prelude::*;
/// use downbeat::{StatsdClient, UdpMetricSink, DEFAULT_PORT};
///
/// struct MyRequestHandler {
///     metrics: Arc<dyn MetricClient + Send + Sync + RefUnwindSafe>,
/// }
///
/// impl MyRequestHandler {
///     fn new() -> MyRequestHandler {
///         let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
///         let host = ("localhost", DEFAULT_PORT);
///         let sink = UdpMetricSink::from(host, socket).unwrap();
///         MyRequestHandler {
///             metrics: Arc::new(StatsdClient::from_sink("some.prefix", sink))
///         }
///     }
///
///     fn handle_some_request(&self) -> Result<(), String> {
///         let metric_ref = self.metrics.clone();
///         let _t = thread::spawn(move || {
///             println!("Hello from the thread!");
///             metric_ref.count("request.handler", 1);
///         });
///
///         Ok(())
///     }
/// }
/// ```
pub struct StatsdClient {
    prefix: String,
    sink: Box<dyn MetricSink + Sync + Send + RefUnwindSafe>,
    errors: Box<dyn Fn(MetricError) + Sync + Send + RefUnwindSafe>,
    random: Box<dyn RandomSource + Sync + Send + RefUnwindSafe>,
    tags: Vec<(String, String)>,
}

impl StatsdClient {
    /// Create a new client instance that will use the given prefix for
    /// all metrics emitted to the given `MetricSink` implementation.
    ///
    /// Note that this client will log errors encountered when sending
    /// metrics via the `MetricBuilder::send()` method at warning level.
    ///
    /// # No-op Example
    ///
    /// ```
    /// use downbeat::{StatsdClient, NopMetricSink};
    ///
    /// let prefix = "my.stats";
    /// let client = StatsdClient::from_sink(prefix, NopMetricSink);
    /// ```
    ///
    /// # UDP Socket Example
    ///
    /// ```
    /// use std::net::UdpSocket;
    /// use downbeat::{StatsdClient, UdpMetricSink, DEFAULT_PORT};
    ///
    /// let prefix = "my.stats";
    /// let host = ("127.0.0.1", DEFAULT_PORT);
    ///
    /// let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
    /// socket.set_nonblocking(true).unwrap();
    ///
    /// let sink = UdpMetricSink::from(host, socket).unwrap();
    /// let client = StatsdClient::from_sink(prefix, sink);
    /// ```
    pub fn from_sink<T>(prefix: &str, sink: T) -> Self
    where
        T: MetricSink + Sync + Send + RefUnwindSafe + 'static,
    {
        Self::builder(prefix, sink).build()
    }

    /// Create a new builder with the provided prefix and metric sink.
    ///
    /// A prefix and a metric sink are required to create a new client
    /// instance. All other optional customizations can be set by calling
    /// methods on the returned builder. Any customizations that aren't
    /// set by the caller will use defaults.
    ///
    /// Note, though a metric prefix is required, you may pass an empty
    /// string as a prefix. In this case, the metrics emitted will use only
    /// the bare keys supplied when you call the various methods to emit
    /// metrics.
    ///
    /// General defaults:
    ///
    /// * Errors encountered when using the `MetricBuilder::send()` method
    ///   (as opposed to `.try_send()`) are logged at warning level.
    /// * Sampling decisions draw from the thread-local generator of the
    ///   `rand` crate.
    ///
    /// # Example
    ///
    /// ```
    /// use downbeat::prelude::*;
    /// use downbeat::{StatsdClient, MetricError, NopMetricSink};
    ///
    /// fn my_handler(err: MetricError) {
    ///     eprintln!("Metric error: {}", err);
    /// }
    ///
    /// let client = StatsdClient::builder("some.prefix", NopMetricSink)
    ///     .with_error_handler(my_handler)
    ///     .build();
    ///
    /// client.gauge_with_tags("some.key", 7)
    ///    .with_tag("region", "us-west-1")
    ///    .send();
    /// ```
    pub fn builder<T>(prefix: &str, sink: T) -> StatsdClientBuilder
    where
        T: MetricSink + Sync + Send + RefUnwindSafe + 'static,
    {
        StatsdClientBuilder::new(prefix, sink)
    }

    // Create a new StatsdClient by consuming the builder
    fn from_builder(builder: StatsdClientBuilder) -> Self {
        StatsdClient {
            prefix: builder.prefix,
            sink: builder.sink,
            errors: builder.errors,
            random: builder.random,
            tags: builder.tags,
        }
    }

    /// Decide whether a metric with the given effective sampling rate
    /// should be emitted. Rates of 1.0 and above (and no rate at all)
    /// always send without consuming a random draw.
    pub(crate) fn should_send(&self, rate: Option<f64>) -> bool {
        match rate {
            Some(rate) if rate < 1.0 => sampler::accept(rate, self.random.next_f64()),
            _ => true,
        }
    }

    fn tags(&self) -> impl IntoIterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Sealed for StatsdClient {}

impl MetricBackend for StatsdClient {
    fn send_metric<M>(&self, metric: &M) -> MetricResult<()>
    where
        M: Metric,
    {
        let metric_string = metric.as_metric_str();
        self.sink.emit(metric_string)?;
        Ok(())
    }

    fn consume_error(&self, err: MetricError) {
        (self.errors)(err);
    }
}

impl fmt::Debug for StatsdClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StatsdClient {{ prefix: {:?}, sink: ..., errors: ..., random: ..., tags: {:?} }}",
            self.prefix, self.tags,
        )
    }
}

impl<T> Counted<T> for StatsdClient
where
    T: ToCounterValue,
{
    fn count_with_tags<'a>(&'a self, key: &'a str, value: T) -> MetricBuilder<'_, '_, Counter> {
        match value.try_to_value() {
            Ok(v) => {
                MetricBuilder::from_fmt(MetricFormatter::counter(&self.prefix, key, v), self).with_tags(self.tags())
            }
            Err(e) => MetricBuilder::from_error(e, self),
        }
    }
}

impl CountedExt for StatsdClient {}

impl<T> Timed<T> for StatsdClient
where
    T: ToTimerValue,
{
    fn time_with_tags<'a>(&'a self, key: &'a str, time: T) -> MetricBuilder<'_, '_, Timer> {
        match time.try_to_value() {
            Ok(v) => MetricBuilder::from_fmt(MetricFormatter::timer(&self.prefix, key, v), self).with_tags(self.tags()),
            Err(e) => MetricBuilder::from_error(e, self),
        }
    }
}

impl TimedExt for StatsdClient {}

impl<T> Gauged<T> for StatsdClient
where
    T: ToGaugeValue,
{
    fn gauge_with_tags<'a>(&'a self, key: &'a str, value: T) -> MetricBuilder<'_, '_, Gauge> {
        match value.try_to_value() {
            Ok(v) => MetricBuilder::from_fmt(MetricFormatter::gauge(&self.prefix, key, v), self).with_tags(self.tags()),
            Err(e) => MetricBuilder::from_error(e, self),
        }
    }
}

impl GaugedExt for StatsdClient {}

impl MetricClient for StatsdClient {}

fn default_error_handler(err: MetricError) {
    warn!("Unhandled error sending stat: {}", err);
}

#[cfg(test)]
mod tests {
    use super::{Counted, CountedExt, Gauged, GaugedExt, MetricClient, StatsdClient, Timed, TimedExt};
    use crate::sinks::{NopMetricSink, QueuingMetricSink, SpyMetricSink};
    use crate::test::{ErrorMetricSink, FixedRandomSource};
    use crate::types::{ErrorKind, Metric, MetricError};
    use std::panic::RefUnwindSafe;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_statsd_client_empty_prefix() {
        let client = StatsdClient::from_sink("", NopMetricSink);
        let res = client.count_with_tags("some.method", 1).try_send();

        assert_eq!("some.method:1|c", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_prefix_trailing_dot_normalized() {
        let client = StatsdClient::from_sink("prefix.", NopMetricSink);
        let res = client.count_with_tags("some.method", 1).try_send();

        assert_eq!("prefix.some.method:1|c", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_merging_default_tags_with_tags() {
        let client = StatsdClient::builder("prefix", NopMetricSink)
            .with_tag("hello", "world")
            .build();
        let res = client
            .count_with_tags("some.counter", 3)
            .with_tag("foo", "bar")
            .with_tag("bucket", "123")
            .try_send();

        assert_eq!(
            "prefix.some.counter,hello=world,foo=bar,bucket=123:3|c",
            res.unwrap().as_metric_str()
        );
    }

    #[test]
    fn test_statsd_client_count_with_tags() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client
            .count_with_tags("some.counter", 3)
            .with_tag("foo", "bar")
            .try_send();

        assert_eq!("prefix.some.counter,foo=bar:3|c", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_incr_with_tags() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.incr_with_tags("some.counter").with_tag("foo", "bar").try_send();

        assert_eq!("prefix.some.counter,foo=bar:1|c", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_decr_with_tags() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.decr_with_tags("some.counter").with_tag("foo", "bar").try_send();

        assert_eq!("prefix.some.counter,foo=bar:-1|c", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_gauge_with_tags() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client
            .gauge_with_tags("some.gauge", 4)
            .with_tag("bucket", "A")
            .try_send();

        assert_eq!("prefix.some.gauge,bucket=A:4|g", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_gauge_delta_positive() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.gauge_delta_with_tags("some.gauge", 5).try_send();

        assert_eq!("prefix.some.gauge:+5|g", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_gauge_delta_negative() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.gauge_delta_with_tags("some.gauge", -5).try_send();

        assert_eq!("prefix.some.gauge:-5|g", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_gauge_delta_zero() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.gauge_delta_with_tags("some.gauge", 0).try_send();

        assert_eq!("prefix.some.gauge:+0|g", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_time_duration() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.time_with_tags("key", Duration::from_millis(157)).try_send();

        assert_eq!("prefix.key:157|ms", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_time_duration_with_overflow() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.time_with_tags("key", Duration::from_secs(u64::MAX)).try_send();

        assert_eq!(ErrorKind::InvalidInput, res.unwrap_err().kind())
    }

    #[test]
    fn test_statsd_client_time_duration_overflow_quiet_path() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_ref = count.clone();

        let client = StatsdClient::builder("prefix", NopMetricSink)
            .with_error_handler(move |_err: MetricError| {
                count_ref.fetch_add(1, Ordering::Release);
            })
            .build();

        client.time("key", Duration::from_secs(u64::MAX));

        assert_eq!(1, count.load(Ordering::Acquire));
    }

    #[test]
    fn test_statsd_client_time_duration_with_tags() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client
            .time_with_tags("key", Duration::from_millis(157))
            .with_tag("foo", "bar")
            .try_send();

        assert_eq!("prefix.key,foo=bar:157|ms", res.unwrap().as_metric_str());
    }

    #[test]
    fn test_statsd_client_time_fn_returns_block_result() {
        let client = StatsdClient::from_sink("prefix", NopMetricSink);
        let res = client.time_fn("some.timer", || "badger");

        assert_eq!("badger", res);
    }

    #[test]
    fn test_statsd_client_time_fn_emits_timer() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::from_sink("prefix", sink);

        let _ = client.time_fn("some.timer", || 13);
        let sent = String::from_utf8(rx.recv().unwrap()).unwrap();

        assert!(sent.starts_with("prefix.some.timer:"), "unexpected line: {}", sent);
        assert!(sent.ends_with("|ms"), "unexpected line: {}", sent);
    }

    #[test]
    fn test_statsd_client_time_fn_with_tags() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::from_sink("prefix", sink);

        let (res, timing) = client.time_fn_with_tags("some.timer", || 42);
        timing.with_tag("table", "users").send();

        assert_eq!(42, res);
        let sent = String::from_utf8(rx.recv().unwrap()).unwrap();
        assert!(sent.starts_with("prefix.some.timer,table=users:"), "unexpected line: {}", sent);
    }

    #[test]
    fn test_statsd_client_sampled_counter_always_sent_at_full_rate() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::from_sink("prefix", sink);

        client.count_with_tags("some.key", 1).with_sample_rate(1.0).send();

        let sent = rx.recv().unwrap();
        assert_eq!("prefix.some.key:1|c", String::from_utf8(sent).unwrap());
    }

    #[test]
    fn test_statsd_client_sampled_counter_sent_when_draw_below_rate() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::builder("prefix", sink)
            .with_random_source(FixedRandomSource::new(0.0))
            .build();

        client.count_with_tags("some.key", 1).with_sample_rate(0.1).send();

        let sent = rx.recv().unwrap();
        assert_eq!("prefix.some.key:1|c|@0.100000", String::from_utf8(sent).unwrap());
    }

    #[test]
    fn test_statsd_client_sampled_counter_dropped_when_draw_above_rate() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::builder("prefix", sink)
            .with_random_source(FixedRandomSource::new(0.99))
            .build();

        client.count_with_tags("some.key", 1).with_sample_rate(0.1).send();

        assert!(rx.try_recv().is_err(), "expected no metric to be emitted");
    }

    #[test]
    fn test_statsd_client_sampled_out_try_send_still_returns_metric() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::builder("prefix", sink)
            .with_random_source(FixedRandomSource::new(0.99))
            .build();

        let res = client.count_with_tags("some.key", 1).with_sample_rate(0.1).try_send();

        assert_eq!("prefix.some.key:1|c|@0.100000", res.unwrap().as_metric_str());
        assert!(rx.try_recv().is_err(), "expected no metric to be emitted");
    }

    #[test]
    fn test_statsd_client_gauge_ignores_sample_rate() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::builder("prefix", sink)
            .with_random_source(FixedRandomSource::new(0.99))
            .build();

        client.gauge_with_tags("some.gauge", 8).with_sample_rate(0.1).send();

        let sent = rx.recv().unwrap();
        assert_eq!("prefix.some.gauge:8|g", String::from_utf8(sent).unwrap());
    }

    #[test]
    fn test_statsd_client_with_tags_send_success() {
        let (rx, sink) = SpyMetricSink::new();
        let client = StatsdClient::from_sink("prefix", sink);

        client.count_with_tags("some.key", 1).with_tag("test", "a").send();
        let sent = rx.recv().unwrap();

        assert_eq!("prefix.some.key,test=a:1|c", String::from_utf8(sent).unwrap());
    }

    #[test]
    fn test_statsd_client_with_tags_send_error() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_ref = count.clone();

        let handler = move |_err: MetricError| {
            count_ref.fetch_add(1, Ordering::Release);
        };

        let client = StatsdClient::builder("prefix", ErrorMetricSink::always())
            .with_error_handler(handler)
            .build();

        client.count_with_tags("some.key", 1).with_tag("tier", "web").send();

        assert_eq!(1, count.load(Ordering::Acquire));
    }

    #[test]
    fn test_statsd_client_convenience_methods_never_fail() {
        // every fire-and-forget method against a sink that always errors
        let client = StatsdClient::from_sink("prefix", ErrorMetricSink::always());

        client.count("some.counter", 5);
        client.incr("some.counter");
        client.decr("some.counter");
        client.time("some.timer", 20);
        client.time("some.timer", Duration::from_millis(20));
        client.gauge("some.gauge", 4);
        client.gauge("some.gauge", 4.5);
        client.gauge_delta("some.gauge", -2);
        let _ = client.time_fn("some.timer", || 1);
    }

    // The following tests really just ensure that we've actually
    // implemented all the traits we're supposed to correctly. If
    // we hadn't, this wouldn't compile.

    #[test]
    fn test_statsd_client_as_counted() {
        let client: Box<dyn Counted<i64>> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.count("some.counter", 5);
    }

    #[test]
    fn test_statsd_client_as_countedext() {
        let client: Box<dyn CountedExt> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.incr("some.counter");
    }

    #[test]
    fn test_statsd_client_as_timed_u64() {
        let client: Box<dyn Timed<u64>> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.time("some.timer", 20);
    }

    #[test]
    fn test_statsd_client_as_timed_duration() {
        let client: Box<dyn Timed<Duration>> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.time("some.timer", Duration::from_millis(20));
    }

    #[test]
    fn test_statsd_client_as_gauged_u64() {
        let client: Box<dyn Gauged<u64>> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.gauge("some.gauge", 32);
    }

    #[test]
    fn test_statsd_client_as_gauged_f64() {
        let client: Box<dyn Gauged<f64>> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.gauge("some.gauge", 3.2);
    }

    #[test]
    fn test_statsd_client_as_gaugedext() {
        let client: Box<dyn GaugedExt> = Box::new(StatsdClient::from_sink("prefix", NopMetricSink));

        client.gauge_delta("some.gauge", 2);
    }

    #[test]
    fn test_statsd_client_as_thread_and_panic_safe() {
        let client: Box<dyn MetricClient + Send + Sync + RefUnwindSafe> = Box::new(StatsdClient::from_sink(
            "prefix",
            QueuingMetricSink::from(NopMetricSink),
        ));

        client.count("some.counter", 3);
        client.time("some.timer", 198);
        client.time("some.timer", Duration::from_millis(198));
        client.gauge("some.gauge", 4);
        client.gauge("some.gauge", 4.0);
        client.gauge_delta("some.gauge", -1);
    }
}
