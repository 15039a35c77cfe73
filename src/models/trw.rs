//! Threshold Random Walk: a sequential hypothesis test over the TCP flows
//! of an event.
//!
//! Each new destination IP is an observation: present in the preloaded
//! internal set is a hit, a bare-SYN probe of an unknown address is a miss,
//! and anything else to an unknown address is exempted back to a hit. The
//! walk's likelihood ratio is recomputed from scratch on every transition
//! and compared against the Wald thresholds once every flow so far has been
//! a bare SYN.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use crate::config::ScanConfig;
use crate::event::EventBatch;
use crate::flow::{is_backscatter_pattern, tcp_flags};
use crate::ipset::IpSet;
use crate::metrics::{EventClass, ScanModel, calculate_shared_metrics};
use crate::verbose::Verbose;

/// Bound on false positives.
pub const ALPHA: f64 = 0.01;
/// Detection probability.
pub const BETA: f64 = 0.99;

/// Lower decision threshold.
pub const ETA0: f64 = (1.0 - BETA) / (1.0 - ALPHA);
/// Upper decision threshold.
pub const ETA1: f64 = BETA / ALPHA;

/// Probability a connection succeeds given the source is benign.
pub const DEFAULT_THETA0: f64 = 0.8;
/// Probability a connection succeeds given the source is malicious.
pub const DEFAULT_THETA1: f64 = 0.2;

/// The walk gives up after this many flows of a single event.
pub const FLOW_CUTOFF: u32 = 100_000;

/// Classification verdicts about source IPs, shared across workers.
///
/// `existing` is loaded before the first worker starts and never mutated
/// afterward; `benign` and `scanners` only grow. One mutex guards all
/// three, including read-side `existing` lookups.
#[derive(Debug, Default)]
pub struct TrwSets {
    pub existing: IpSet,
    pub benign: HashSet<Ipv4Addr>,
    pub scanners: HashSet<Ipv4Addr>,
}

#[derive(Debug, Default)]
pub struct TrwState {
    inner: Mutex<TrwSets>,
}

impl TrwState {
    pub fn new(existing: IpSet) -> Self {
        Self {
            inner: Mutex::new(TrwSets {
                existing,
                benign: HashSet::new(),
                scanners: HashSet::new(),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TrwSets> {
        self.inner.lock().unwrap()
    }
}

/// Per-event scratch counters for the walk.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TrwCounters {
    pub flows: u32,
    /// Distinct destination IPs visited so far.
    pub dips: u32,
    pub hits: u32,
    pub misses: u32,
    /// Flows whose state flags are exactly a bare SYN.
    pub syns: u32,
    /// Flows whose flag byte matches a backscatter response.
    pub bs: u32,
    /// Flows whose flag byte matches a flood response.
    pub floodresponse: u32,
    pub likelihood: f64,
}

fn is_flood_response(flags: u8) -> bool {
    flags == tcp_flags::RST
        || flags == (tcp_flags::SYN | tcp_flags::RST)
        || flags == (tcp_flags::RST | tcp_flags::ACK)
}

/// Run the walk over a TCP event. Flows must arrive in destination-IP
/// order, which the pre-sorted input guarantees.
pub fn classify(
    state: &TrwState,
    config: &ScanConfig,
    verbose: &Verbose,
    batch: &mut EventBatch,
    counters: &mut TrwCounters,
) -> EventClass {
    let metrics = &mut batch.metrics;
    metrics.model = ScanModel::Trw;

    let mut dip_prev = u32::MAX;

    for (i, rec) in batch.flows.iter().enumerate() {
        let dip_curr = rec.dip_u32();
        verbose.flow(i as u32 + 1, metrics.event_size, rec);
        counters.flows += 1;

        if dip_curr != dip_prev {
            let sets = state.lock();
            if sets.existing.contains(rec.dip) {
                counters.hits += 1;
            } else if rec.flags & tcp_flags::STATE_MASK == tcp_flags::SYN {
                counters.misses += 1;
            } else {
                counters.hits += 1;
            }
            counters.dips += 1;
            counters.likelihood = 1.0;
            for _ in 0..counters.hits {
                counters.likelihood *= config.trw_theta1 / config.trw_theta0;
            }
            for _ in 0..counters.misses {
                counters.likelihood *=
                    (1.0 - config.trw_theta1) / (1.0 - config.trw_theta0);
            }
            debug_assert_eq!(counters.hits + counters.misses, counters.dips);
            drop(sets);
        }

        if rec.flags & tcp_flags::STATE_MASK == tcp_flags::SYN {
            counters.syns += 1;
        }
        if is_backscatter_pattern(rec.flags) {
            counters.bs += 1;
        }
        if is_flood_response(rec.flags) {
            counters.floodresponse += 1;
        }

        if i as u32 > FLOW_CUTOFF {
            verbose.progress(&format!(
                "warning:  TRW giving up after {FLOW_CUTOFF} flows\n"
            ));
            break;
        }

        if counters.syns == counters.flows {
            if counters.likelihood > ETA1 {
                state.lock().scanners.insert(metrics.sip);
                metrics.scan_probability = counters.likelihood;
                calculate_shared_metrics(&batch.flows, metrics);
                verbose.result(
                    metrics.event_size,
                    &format!("\ttrw: scan ({:.6})", counters.likelihood),
                );
                metrics.event_class = EventClass::Scan;
                return metrics.event_class;
            } else if counters.likelihood < ETA0 {
                state.lock().benign.insert(metrics.sip);
                metrics.scan_probability = counters.likelihood;
                verbose.result(
                    metrics.event_size,
                    &format!("\ttrw: benign ({:.6})", counters.likelihood),
                );
                metrics.event_class = EventClass::Benign;
                return metrics.event_class;
            }
        }

        dip_prev = dip_curr;
    }

    if counters.bs == counters.flows && counters.dips > 3 && counters.flows > 100 {
        verbose.result(metrics.event_size, "\ttrw: backscatter");
        metrics.event_class = EventClass::Backscatter;
        return metrics.event_class;
    }
    if counters.dips == 1
        && f64::from(counters.syns) >= f64::from(counters.flows) * 0.5
        && counters.syns + counters.floodresponse == counters.flows
        && counters.flows > 10
    {
        verbose.result(metrics.event_size, "\ttrw: flood");
        metrics.event_class = EventClass::Flood;
        return metrics.event_class;
    }
    verbose.result(
        metrics.event_size,
        &format!("\ttrw: unknown ({:.6})", counters.likelihood),
    );
    metrics.event_class = EventClass::Unknown;
    metrics.event_class
}
