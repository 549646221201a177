//! Batch request options parsed from the query string.

use crate::error::{BatchError, BatchResult};
use crate::index_wait::IndexWaitOptions;
use crate::replication::ReplicaCount;
use std::time::Duration;
use tokio::time::Instant;

const WAIT_FOR_INDEXES_TIMEOUT: &str = "waitForIndexesTimeout";
const WAIT_FOR_SPECIFIC_INDEXES: &str = "waitForSpecificIndexs";
const WAIT_FOR_INDEX_THROW: &str = "waitForIndexThrow";
const WAIT_FOR_REPLICAS_TIMEOUT: &str = "waitForReplicasTimeout";
const NUMBER_OF_REPLICAS: &str = "numberOfReplicasToWaitFor";
const THROW_ON_REPLICA_TIMEOUT: &str = "throwOnTimeoutInWaitForReplicas";

/// How to wait for replicas after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationWaitOptions {
    /// Time allowed for the replicas to acknowledge.
    pub timeout: Duration,
    /// How many replicas must acknowledge.
    pub replicas: ReplicaCount,
    /// Fail when the deadline passes.
    pub throw_on_timeout: bool,
}

impl ReplicationWaitOptions {
    /// Waits for one replica and throws on timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            replicas: ReplicaCount::default(),
            throw_on_timeout: true,
        }
    }

    /// Sets the replica count.
    #[must_use]
    pub fn replicas(mut self, replicas: ReplicaCount) -> Self {
        self.replicas = replicas;
        self
    }

    /// Sets whether a timeout fails the request.
    #[must_use]
    pub fn throw_on_timeout(mut self, throw: bool) -> Self {
        self.throw_on_timeout = throw;
        self
    }
}

/// Post-commit behavior requested for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Wait for indexes when set.
    pub index_wait: Option<IndexWaitOptions>,
    /// Wait for replicas when set.
    pub replication_wait: Option<ReplicationWaitOptions>,
}

impl BatchOptions {
    /// Options without any post-commit wait.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an index wait.
    #[must_use]
    pub fn wait_for_indexes(mut self, options: IndexWaitOptions) -> Self {
        self.index_wait = Some(options);
        self
    }

    /// Requests a replication wait.
    #[must_use]
    pub fn wait_for_replicas(mut self, options: ReplicationWaitOptions) -> Self {
        self.replication_wait = Some(options);
        self
    }

    /// Parses query string pairs. Parameter names match case-insensitively;
    /// unknown parameters are ignored.
    pub fn from_query<I, K, V>(pairs: I) -> BatchResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut index_timeout = None;
        let mut specific_indexes = Vec::new();
        let mut index_throw = true;
        let mut replicas_timeout = None;
        let mut replicas = ReplicaCount::default();
        let mut replicas_throw = true;

        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            if name.eq_ignore_ascii_case(WAIT_FOR_INDEXES_TIMEOUT) {
                index_timeout = Some(parse_duration(name, value)?);
            } else if name.eq_ignore_ascii_case(WAIT_FOR_SPECIFIC_INDEXES) {
                specific_indexes.push(value.to_string());
            } else if name.eq_ignore_ascii_case(WAIT_FOR_INDEX_THROW) {
                index_throw = parse_bool(name, value)?;
            } else if name.eq_ignore_ascii_case(WAIT_FOR_REPLICAS_TIMEOUT) {
                replicas_timeout = Some(parse_duration(name, value)?);
            } else if name.eq_ignore_ascii_case(NUMBER_OF_REPLICAS) {
                replicas = value.parse()?;
            } else if name.eq_ignore_ascii_case(THROW_ON_REPLICA_TIMEOUT) {
                replicas_throw = parse_bool(name, value)?;
            }
        }

        Ok(Self {
            index_wait: index_timeout.map(|timeout| IndexWaitOptions {
                timeout,
                throw_on_timeout: index_throw,
                specific_indexes,
            }),
            replication_wait: replicas_timeout.map(|timeout| ReplicationWaitOptions {
                timeout,
                replicas,
                throw_on_timeout: replicas_throw,
            }),
        })
    }
}

fn parse_bool(name: &str, value: &str) -> BatchResult<bool> {
    if value.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(BatchError::malformed(format!(
            "invalid boolean for {name}: '{value}'"
        )))
    }
}

fn parse_duration(name: &str, value: &str) -> BatchResult<Duration> {
    parse_time_span(value.trim())
        .ok_or_else(|| BatchError::malformed(format!("invalid time span for {name}: '{value}'")))
}

/// Deadline offset used when `timeout` would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `started + timeout`, saturating to a far-future deadline.
pub(crate) fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}

/// Parses `[d.]hh:mm:ss[.fraction]` or a plain number of seconds.
pub fn parse_time_span(value: &str) -> Option<Duration> {
    let Some(first_colon) = value.find(':') else {
        let seconds: f64 = value.parse().ok()?;
        return Duration::try_from_secs_f64(seconds).ok();
    };

    let (days, clock) = match value[..first_colon].find('.') {
        Some(dot) => (value[..dot].parse::<u64>().ok()?, &value[dot + 1..]),
        None => (0, value),
    };

    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() || hours > 23 || minutes > 59 {
        return None;
    }

    let (whole, fraction) = match seconds_part.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds_part, None),
    };
    let seconds: u64 = whole.parse().ok()?;
    if seconds > 59 {
        return None;
    }
    let nanos = match fraction {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            // Keep nanosecond precision, ignore anything finer
            let padded = format!("{digits:0<9}");
            padded[..9].parse::<u32>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    let total = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + seconds)?;
    Some(Duration::new(total, nanos))
}
