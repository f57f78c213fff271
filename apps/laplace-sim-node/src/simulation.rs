//! Example simulation loop feeding random snapshots to the gated publisher.

use std::thread;
use std::time::Duration;

use laplace_middleware::{GatedPublisher, Snapshot};
use laplace_transport::{CancelToken, ReplyChannel};
use rand::Rng;
use tracing::{debug, info, warn};

const KEY_ALPHABET: &[u8] = b"abcdefhikjlmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSettings {
    pub tick_interval: Duration,
    pub retry_backoff: Duration,
    pub max_iterations: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub keys_per_snapshot: usize,
    pub max_key_length: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::ZERO,
            retry_backoff: Duration::from_millis(250),
            max_iterations: None,
            max_consecutive_failures: None,
            keys_per_snapshot: 5,
            max_key_length: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    IterationLimit,
    TooManyFailures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationReport {
    /// Snapshots the publisher accepted, including the first-contact call.
    pub iterations: u64,
    pub peer_replies: u64,
    pub failures: u64,
    pub stop: StopReason,
}

/// Random snapshot: `keys` entries with alphabetic keys mapped to their index.
///
/// Keys are drawn independently, so a repeated key keeps the later index.
pub fn random_snapshot<R: Rng>(rng: &mut R, keys: usize, max_key_length: usize) -> Snapshot {
    let max_len = max_key_length.max(1);
    let mut snapshot = Snapshot::new();
    for index in 0..keys {
        let len = rng.gen_range(1..=max_len);
        let key: String = (0..len)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect();
        snapshot.insert(key, index as i64);
    }
    snapshot
}

pub fn run_simulation<C, R>(
    publisher: &mut GatedPublisher<C>,
    settings: &SimulationSettings,
    rng: &mut R,
    shutdown: &CancelToken,
) -> SimulationReport
where
    C: ReplyChannel,
    R: Rng,
{
    info!("starting simulation");
    let mut iterations = 0_u64;
    let mut peer_replies = 0_u64;
    let mut failures = 0_u64;
    let mut consecutive_failures = 0_u32;
    let mut pending: Option<Snapshot> = None;

    let stop = loop {
        if shutdown.is_cancelled() {
            break StopReason::Cancelled;
        }
        if settings.max_iterations.is_some_and(|max| iterations >= max) {
            break StopReason::IterationLimit;
        }

        let snapshot = pending.take().unwrap_or_else(|| {
            random_snapshot(rng, settings.keys_per_snapshot, settings.max_key_length)
        });

        match publisher.publish_cancellable(&snapshot, shutdown) {
            Ok(reply) => {
                iterations += 1;
                consecutive_failures = 0;
                match reply {
                    Some(message) => {
                        peer_replies += 1;
                        info!("got a result from peer: {}", message.as_text());
                    }
                    None => debug!("peer contact established"),
                }
                if !settings.tick_interval.is_zero() {
                    thread::sleep(settings.tick_interval);
                }
            }
            Err(err) if err.is_cancelled() => break StopReason::Cancelled,
            Err(err) => {
                failures += 1;
                consecutive_failures = consecutive_failures.saturating_add(1);
                warn!("publish failed: {}", err);
                if settings
                    .max_consecutive_failures
                    .is_some_and(|max| consecutive_failures >= max)
                {
                    break StopReason::TooManyFailures;
                }
                if err.is_recoverable() {
                    pending = Some(snapshot);
                }
                if !settings.retry_backoff.is_zero() {
                    thread::sleep(settings.retry_backoff);
                }
            }
        }
    };

    info!(
        "simulation stopped ({:?}) after {} iterations, {} peer replies, {} failures",
        stop, iterations, peer_replies, failures
    );
    SimulationReport {
        iterations,
        peer_replies,
        failures,
        stop,
    }
}
