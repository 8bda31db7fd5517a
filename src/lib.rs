// Downbeat - A lightweight Statsd client for Rust!
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A lightweight Statsd client for Rust!
//!
//! Downbeat is a fast and simple way to emit Statsd metrics from your
//! application, built around three guarantees: a compact line encoder with
//! tag support, probabilistic sampling to cap metric volume, and strict
//! fault isolation so that emitting a metric can never break the code
//! being instrumented.
//!
//! ## Features
//!
//! * Support for emitting counters, timers, and gauges (including relative
//!   gauge adjustments) to Statsd over UDP.
//! * Support for `key=value` metric tags, written into the metric name.
//! * Probabilistic sampling of counters and timers with an injectable
//!   random source.
//! * Fire-and-forget sending: failures are routed to an error handler
//!   (logged at warning level by default) and never surface to callers.
//! * Support for alternate backends via the `MetricSink` trait.
//!
//! ## Install
//!
//! To make use of `downbeat` in your project, add it as a dependency in your
//! `Cargo.toml` file.
//!
//! ```toml
//! [dependencies]
//! downbeat = "x.y.z"
//! ```
//!
//! That's all you need!
//!
//! ## Usage
//!
//! Some examples of how to use Downbeat are shown below. The examples start
//! simple and work up to how you should be using Downbeat in a production
//! application.
//!
//! ### Simple Use
//!
//! In this example, we just import the client, create an instance that will
//! write to some imaginary metrics server, and send a few metrics.
//!
//! ```rust,no_run
//! use std::net::UdpSocket;
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, UdpMetricSink, DEFAULT_PORT};
//!
//! // Create client that will write to the given host over UDP.
//! //
//! // Note that you'll probably want to actually handle any errors creating
//! // the client when you use it for real in your application. We're just
//! // using .unwrap() here since this is an example!
//! let host = ("metrics.example.com", DEFAULT_PORT);
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! let sink = UdpMetricSink::from(host, socket).unwrap();
//! let client = StatsdClient::from_sink("my.metrics", sink);
//!
//! // Emit metrics!
//! client.incr("some.counter");
//! client.time("some.methodCall", 42);
//! client.gauge("some.thing", 7);
//! client.gauge_delta("some.thing", -2);
//! ```
//!
//! ### Queuing Asynchronous Metric Sink
//!
//! To make sure emitting metrics doesn't interfere with the performance
//! of your application (even though emitting metrics is generally quite
//! fast), it's probably a good idea to make sure metrics are emitted in
//! a different thread than your application thread.
//!
//! To allow you to do this, there is `QueuingMetricSink`. This sink allows
//! you to wrap any other metric sink and send metrics to it via a queue,
//! as it emits metrics in another thread, asynchronously from the flow of
//! your application. Note that each stat is still sent to the server as
//! its own datagram, queuing only moves the send off the caller's thread.
//!
//! The requirements for the wrapped metric sink are that it is thread
//! safe, meaning that it implements the `Send` and `Sync` traits. If
//! you're using the `QueuingMetricSink` with another sink from Downbeat,
//! you don't need to worry: they are all thread safe.
//!
//! ```rust,no_run
//! use std::net::UdpSocket;
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, QueuingMetricSink, UdpMetricSink, DEFAULT_PORT};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! socket.set_nonblocking(true).unwrap();
//!
//! let host = ("metrics.example.com", DEFAULT_PORT);
//! let udp_sink = UdpMetricSink::from(host, socket).unwrap();
//! let queuing_sink = QueuingMetricSink::from(udp_sink);
//! let client = StatsdClient::from_sink("my.prefix", queuing_sink);
//!
//! client.count("my.counter.thing", 29);
//! client.time("my.service.call", 214);
//! client.incr("some.event");
//! ```
//!
//! In the example above, we use the default constructor for the queuing
//! sink which creates an **unbounded** queue, with no maximum size, to connect
//! the main thread where the client sends metrics to the background thread
//! in which the wrapped sink is running. If instead, you want to create a
//! **bounded** queue with a maximum size, you can use the `with_capacity`
//! constructor. When the queue is full, attempts to emit metrics will fail
//! (and, on the fire-and-forget paths, be routed to the error handler)
//! instead of using up more and more memory.
//!
//! ### Use With Tags
//!
//! Adding tags to metrics is accomplished via the use of each of the `_with_tags`
//! methods that are part of the Downbeat `StatsdClient` struct. Tags are
//! written as `key=value` pairs into the name segment of the metric line,
//! in the order they were added. An example of using these methods is
//! given below.
//!
//! ```rust,no_run
//! use downbeat::prelude::*;
//! use downbeat::{Metric, StatsdClient, NopMetricSink};
//!
//! let client = StatsdClient::from_sink("my.prefix", NopMetricSink);
//!
//! let res = client.count_with_tags("my.counter", 29)
//!     .with_tag("host", "web03.example.com")
//!     .with_tag("stage", "beta")
//!     .try_send();
//!
//! assert_eq!(
//!     concat!(
//!         "my.prefix.my.counter,",
//!         "host=web03.example.com,",
//!         "stage=beta:29|c"
//!     ),
//!     res.unwrap().as_metric_str()
//! );
//! ```
//!
//! ### Sampling
//!
//! High-volume counters and timers can be sampled so that only a fraction
//! of events result in a datagram. The emitted line carries a `|@rate`
//! annotation so the server can scale the received values back up. Gauges
//! are never sampled since each value is an absolute (or relative)
//! measurement.
//!
//! ```rust,no_run
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, NopMetricSink};
//!
//! let client = StatsdClient::from_sink("my.prefix", NopMetricSink);
//!
//! // Sent roughly one time in ten, as "my.prefix.requests:1|c|@0.100000"
//! client.count_with_tags("requests", 1)
//!     .with_sample_rate(0.1)
//!     .send();
//! ```
//!
//! ### Implemented Traits
//!
//! Each of the methods that the Downbeat `StatsdClient` struct uses to send
//! metrics are implemented as a trait. There is also a trait that combines
//! all of these other traits. If we want, we can just use one of the trait
//! types to refer to the client instance. This might be useful to you if
//! you'd like to swap out the actual Downbeat client with a dummy version
//! when you are unit testing your code or want to abstract away all the
//! implementation details of the client being used behind a trait and
//! pointer.
//!
//! Each of these traits are exported in the prelude module. They are also
//! available in the main module but aren't typically used like that.
//!
//! ```rust,no_run
//! use std::net::UdpSocket;
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, UdpMetricSink, DEFAULT_PORT};
//!
//! pub struct User {
//!     id: u64,
//!     username: String,
//!     email: String
//! }
//!
//!
//! // Here's a simple DAO (Data Access Object) that doesn't do anything but
//! // uses a metric client to keep track of the number of times the
//! // 'getUserById' method gets called.
//! pub struct MyUserDao {
//!     metrics: Box<dyn MetricClient>
//! }
//!
//!
//! impl MyUserDao {
//!     // Create a new instance that will use the StatsdClient
//!     pub fn new<T: MetricClient + 'static>(metrics: T) -> MyUserDao {
//!         MyUserDao { metrics: Box::new(metrics) }
//!     }
//!
//!     /// Get a new user by their ID
//!     pub fn get_user_by_id(&self, id: u64) -> Option<User> {
//!         self.metrics.incr("getUserById");
//!         None
//!     }
//! }
//!
//!
//! // Create a new Statsd client that writes to "metrics.example.com"
//! let host = ("metrics.example.com", DEFAULT_PORT);
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! let sink = UdpMetricSink::from(host, socket).unwrap();
//! let metrics = StatsdClient::from_sink("counter.example", sink);
//!
//! // Create a new instance of the DAO that will use the client
//! let dao = MyUserDao::new(metrics);
//!
//! // Try to lookup a user by ID!
//! match dao.get_user_by_id(123) {
//!     Some(u) => println!("Found a user!"),
//!     None => println!("No user!")
//! };
//! ```
//!
//! ### Error Handling
//!
//! The convenience methods for sending metrics don't return a `Result`:
//! failures are passed to the client's error handler, which by default
//! logs a single warning per failed send via the `log` crate. You can
//! install your own handler when building the client.
//!
//! ```rust,no_run
//! use downbeat::prelude::*;
//! use downbeat::{MetricError, StatsdClient, NopMetricSink};
//!
//! fn my_error_handler(err: MetricError) {
//!     eprintln!("Metric error! {}", err);
//! }
//!
//! let client = StatsdClient::builder("prefix", NopMetricSink)
//!     .with_error_handler(my_error_handler)
//!     .build();
//!
//! // When sending metrics via the `MetricBuilder` used for assembling tags,
//! // callers may opt into sending metrics quietly via the `.send()` method
//! // as opposed to the `.try_send()` method
//! client.count_with_tags("some.counter", 42)
//!     .with_tag("region", "us-east-2")
//!     .send();
//! ```
//!
//! ### Custom Metric Sinks
//!
//! The Downbeat `StatsdClient` uses implementations of the `MetricSink`
//! trait to send metrics to a metric server. Maybe you want to do
//! something not covered by an existing sink. An example of creating a
//! custom sink is below.
//!
//! ```rust,no_run
//! use std::io;
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, MetricSink, DEFAULT_PORT};
//!
//! pub struct MyMetricSink;
//!
//!
//! impl MetricSink for MyMetricSink {
//!     fn emit(&self, metric: &str) -> io::Result<usize> {
//!         // Your custom metric sink implementation goes here!
//!         Ok(0)
//!     }
//! }
//!
//!
//! let sink = MyMetricSink;
//! let client = StatsdClient::from_sink("my.prefix", sink);
//!
//! client.count("my.counter.thing", 42);
//! client.time("my.method.time", 25);
//! client.incr("some.other.counter");
//! ```
//!
//! ### Custom UDP Socket
//!
//! Most users of the Downbeat `StatsdClient` will be using it to send metrics
//! over a UDP socket. If you need to customize the socket, for example you
//! want to use the socket in blocking mode but set a write timeout, you can
//! do that as demonstrated below.
//!
//! ```rust,no_run
//! use std::net::UdpSocket;
//! use std::time::Duration;
//! use downbeat::prelude::*;
//! use downbeat::{StatsdClient, UdpMetricSink, DEFAULT_PORT};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! socket.set_write_timeout(Some(Duration::from_millis(1))).unwrap();
//!
//! let host = ("metrics.example.com", DEFAULT_PORT);
//! let sink = UdpMetricSink::from(host, socket).unwrap();
//! let client = StatsdClient::from_sink("my.prefix", sink);
//!
//! client.count("my.counter.thing", 29);
//! client.time("my.service.call", 214);
//! client.incr("some.event");
//! ```

#![forbid(unsafe_code)]

/// Default port that a Statsd server listens on
pub const DEFAULT_PORT: u16 = 8125;

pub use self::builder::MetricBuilder;

pub use self::client::{
    Counted, CountedExt, GaugeDelta, Gauged, GaugedExt, MetricClient, StatsdClient, StatsdClientBuilder, Timed,
    TimedExt,
};

pub use self::sampler::{RandomSource, ThreadRngSource};

pub use self::sinks::{MetricSink, NopMetricSink, QueuingMetricSink, SinkStats, SpyMetricSink, UdpMetricSink};

pub use self::types::{Counter, ErrorKind, Gauge, Metric, MetricError, MetricResult, Timer};

mod builder;
mod client;
pub mod ext;
pub mod prelude;
mod sampler;
mod sinks;
mod types;

mod sealed {
    pub trait Sealed {}
}
