//! Pool metrics.
//!
//! Gauges are kept as plain atomics so [`PoolStatus`](crate::pool::PoolStatus)
//! is always available; with the `otel` feature they are additionally
//! emitted as OpenTelemetry up-down counters and histograms following the
//! database client semantic conventions, tagged with `pool.name`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Metric names following OpenTelemetry semantic conventions.
pub mod metric_names {
    /// Up-down counter: connections in the pool, tagged `state=idle|used`.
    pub const CONNECTIONS_USAGE: &str = "db.client.connections.usage";
    /// Up-down counter: configured minimum idle connections.
    pub const CONNECTIONS_IDLE_MIN: &str = "db.client.connections.idle.min";
    /// Up-down counter: configured maximum idle connections.
    pub const CONNECTIONS_IDLE_MAX: &str = "db.client.connections.idle.max";
    /// Up-down counter: configured maximum connections.
    pub const CONNECTIONS_MAX: &str = "db.client.connections.max";
    /// Up-down counter: callers currently waiting for a session.
    pub const CONNECTIONS_PENDING_REQUESTS: &str = "db.client.connections.pending_requests";
    /// Histogram: time to create a new session, in milliseconds.
    pub const CONNECTIONS_CREATE_TIME: &str = "db.client.connections.create_time";
    /// Histogram: time a caller waited for a session, in milliseconds.
    pub const CONNECTIONS_WAIT_TIME: &str = "db.client.connections.wait_time";
}

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::metrics::{Histogram, UpDownCounter};
    use opentelemetry::{global, KeyValue};

    use super::metric_names;

    pub(super) struct Instruments {
        usage: UpDownCounter<i64>,
        idle_min: UpDownCounter<i64>,
        idle_max: UpDownCounter<i64>,
        max: UpDownCounter<i64>,
        pending: UpDownCounter<i64>,
        create_time: Histogram<f64>,
        wait_time: Histogram<f64>,
        pool_attributes: Vec<KeyValue>,
        idle_attributes: Vec<KeyValue>,
        used_attributes: Vec<KeyValue>,
    }

    impl Instruments {
        pub(super) fn new(pool_name: &str) -> Self {
            let meter = global::meter("mysql-driver-pool");

            let usage = meter
                .i64_up_down_counter(metric_names::CONNECTIONS_USAGE)
                .with_description("The number of connections that are currently in the pool")
                .with_unit("{connection}")
                .build();
            let idle_min = meter
                .i64_up_down_counter(metric_names::CONNECTIONS_IDLE_MIN)
                .with_description("The minimum number of idle open connections allowed")
                .with_unit("{connection}")
                .build();
            let idle_max = meter
                .i64_up_down_counter(metric_names::CONNECTIONS_IDLE_MAX)
                .with_description("The maximum number of idle open connections allowed")
                .with_unit("{connection}")
                .build();
            let max = meter
                .i64_up_down_counter(metric_names::CONNECTIONS_MAX)
                .with_description("The maximum number of open connections allowed")
                .with_unit("{connection}")
                .build();
            let pending = meter
                .i64_up_down_counter(metric_names::CONNECTIONS_PENDING_REQUESTS)
                .with_description("The number of pending requests for an open connection")
                .with_unit("{request}")
                .build();
            let create_time = meter
                .f64_histogram(metric_names::CONNECTIONS_CREATE_TIME)
                .with_description("The time it took to create a new connection")
                .with_unit("ms")
                .build();
            let wait_time = meter
                .f64_histogram(metric_names::CONNECTIONS_WAIT_TIME)
                .with_description("The time it took to obtain an open connection from the pool")
                .with_unit("ms")
                .build();

            let pool_attributes = vec![KeyValue::new("pool.name", pool_name.to_string())];
            let mut idle_attributes = pool_attributes.clone();
            idle_attributes.push(KeyValue::new("state", "idle"));
            let mut used_attributes = pool_attributes.clone();
            used_attributes.push(KeyValue::new("state", "used"));

            Self {
                usage,
                idle_min,
                idle_max,
                max,
                pending,
                create_time,
                wait_time,
                pool_attributes,
                idle_attributes,
                used_attributes,
            }
        }

        pub(super) fn add_idle(&self, delta: i64) {
            self.usage.add(delta, &self.idle_attributes);
        }

        pub(super) fn add_used(&self, delta: i64) {
            self.usage.add(delta, &self.used_attributes);
        }

        pub(super) fn add_pending(&self, delta: i64) {
            self.pending.add(delta, &self.pool_attributes);
        }

        pub(super) fn add_limits(&self, minimum: i64, maximum: i64) {
            self.idle_min.add(minimum, &self.pool_attributes);
            self.idle_max.add(maximum, &self.pool_attributes);
            self.max.add(maximum, &self.pool_attributes);
        }

        pub(super) fn record_create_time(&self, millis: f64) {
            self.create_time.record(millis, &self.pool_attributes);
        }

        pub(super) fn record_wait_time(&self, millis: f64) {
            self.wait_time.record(millis, &self.pool_attributes);
        }
    }
}

/// Per-pool metric sink.
pub(crate) struct PoolMetrics {
    idle: AtomicI64,
    used: AtomicI64,
    pending: AtomicI64,
    #[cfg(feature = "otel")]
    otel: otel::Instruments,
}

impl PoolMetrics {
    pub(crate) fn new(pool_name: &str) -> Self {
        #[cfg(not(feature = "otel"))]
        let _ = pool_name;
        Self {
            idle: AtomicI64::new(0),
            used: AtomicI64::new(0),
            pending: AtomicI64::new(0),
            #[cfg(feature = "otel")]
            otel: otel::Instruments::new(pool_name),
        }
    }

    pub(crate) fn add_idle(&self, delta: i64) {
        self.idle.fetch_add(delta, Ordering::AcqRel);
        #[cfg(feature = "otel")]
        self.otel.add_idle(delta);
    }

    pub(crate) fn add_used(&self, delta: i64) {
        self.used.fetch_add(delta, Ordering::AcqRel);
        #[cfg(feature = "otel")]
        self.otel.add_used(delta);
    }

    pub(crate) fn add_pending(&self, delta: i64) {
        self.pending.fetch_add(delta, Ordering::AcqRel);
        #[cfg(feature = "otel")]
        self.otel.add_pending(delta);
    }

    /// Publish (or retract, with negative values) the configured limits.
    pub(crate) fn add_limits(&self, minimum: i64, maximum: i64) {
        #[cfg(feature = "otel")]
        self.otel.add_limits(minimum, maximum);
        #[cfg(not(feature = "otel"))]
        let _ = (minimum, maximum);
    }

    pub(crate) fn record_create_time(&self, elapsed: Duration) {
        #[cfg(feature = "otel")]
        self.otel.record_create_time(elapsed.as_secs_f64() * 1000.0);
        #[cfg(not(feature = "otel"))]
        let _ = elapsed;
    }

    pub(crate) fn record_wait_time(&self, elapsed: Duration) {
        #[cfg(feature = "otel")]
        self.otel.record_wait_time(elapsed.as_secs_f64() * 1000.0);
        #[cfg(not(feature = "otel"))]
        let _ = elapsed;
    }

    pub(crate) fn idle(&self) -> i64 {
        self.idle.load(Ordering::Acquire)
    }

    pub(crate) fn used(&self) -> i64 {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_track_deltas() {
        let metrics = PoolMetrics::new("test");
        metrics.add_idle(2);
        metrics.add_used(1);
        metrics.add_idle(-1);
        metrics.add_pending(3);
        metrics.add_pending(-3);

        assert_eq!(metrics.idle(), 1);
        assert_eq!(metrics.used(), 1);
        assert_eq!(metrics.pending(), 0);
    }
}
