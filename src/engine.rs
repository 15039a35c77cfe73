//! The classification engine: one producer grouping flows into events, a
//! pool of workers draining them through the classifier chain, and the
//! shared state both sides touch.
//!
//! Shared mutable state is confined to the engine context: the TRW verdict
//! sets, the summary totals, the output writer, the work queue, and the
//! verbose stream, each behind its own lock. No lock is held while another
//! is acquired.

use log::warn;

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::ScanError;
use crate::config::ScanConfig;
use crate::event::{EventBatch, EventGrouper};
use crate::flow::compare_proto_stime;
use crate::ipset::IpSet;
use crate::metrics::EventClass;
use crate::models::blr;
use crate::models::trw::{self, TrwCounters, TrwState};
use crate::output::{ScanRecord, ScanWriter};
use crate::protocol::FlowProtocol;
use crate::reader::FlowReader;
use crate::summary::{SummaryMetrics, SummarySnapshot};
use crate::verbose::Verbose;
use crate::workqueue::WorkQueue;

struct EngineContext {
    config: ScanConfig,
    trw: TrwState,
    summary: SummaryMetrics,
    writer: ScanWriter,
    queue: WorkQueue<EventBatch>,
    verbose: Verbose,
}

/// Owns a run end to end: construct, start workers, feed streams, finish.
pub struct ScanEngine {
    ctx: Arc<EngineContext>,
    workers: Vec<JoinHandle<()>>,
}

impl ScanEngine {
    /// Build an engine. `existing` is the preloaded internal set the TRW
    /// model probes; it may be empty. The titles row is written here,
    /// before any worker starts.
    pub fn new(
        config: ScanConfig,
        existing: IpSet,
        out: Box<dyn Write + Send>,
    ) -> Result<Self, ScanError> {
        if config.worker_threads > 1 && config.verbose_results != 0 {
            warn!(
                "verbose results mode enabled; this will have an adverse \
                 effect on multi-threaded performance"
            );
        }

        let writer = ScanWriter::new(out, &config);
        if !config.no_titles {
            writer.write_header().map_err(|source| ScanError::Io {
                context: "cannot write output header".to_string(),
                source,
            })?;
        }

        let verbose = Verbose::from_config(&config);
        let queue = WorkQueue::new(config.work_queue_depth as usize);

        Ok(Self {
            ctx: Arc::new(EngineContext {
                config,
                trw: TrwState::new(existing),
                summary: SummaryMetrics::new(),
                writer,
                queue,
                verbose,
            }),
            workers: Vec::new(),
        })
    }

    /// Spawn the worker pool.
    pub fn start_workers(&mut self) {
        for threadnum in 1..=self.ctx.config.worker_threads {
            let ctx = Arc::clone(&self.ctx);
            self.workers
                .push(std::thread::spawn(move || worker_loop(ctx, threadnum)));
            self.ctx
                .verbose
                .progress(&format!("created worker thread {threadnum}\n"));
        }
    }

    /// Group one flowpack stream into events and enqueue them.
    ///
    /// On a read error mid-stream, events already grouped stay enqueued,
    /// the partial event buffered at the failure point is finalized and
    /// enqueued too, and the error is returned for the caller to report.
    pub fn process_stream<R: Read>(&self, name: &str, input: R) -> Result<(), ScanError> {
        self.ctx.verbose.progress(&format!("processing: {name}\n"));

        let reader = FlowReader::new(input)?;
        let mut grouper = EventGrouper::new();
        let mut last_sip: u32 = 0;
        let mut result = Ok(());

        for item in reader {
            let rec = match item {
                Ok(rec) => rec,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            self.ctx.summary.record_flow();

            let proto = match rec.protocol() {
                Ok(proto) => proto,
                Err(_) => {
                    self.ctx.summary.record_ignored();
                    continue;
                }
            };

            if let Some(batch) = grouper.push(proto, rec) {
                self.progress_line(last_sip, rec.sip_u32());
                self.ctx.queue.put(batch);
            }
            last_sip = rec.sip_u32();
        }

        if let Some(batch) = grouper.finish() {
            self.ctx.queue.put(batch);
        }
        result
    }

    /// Progress is reported once per CIDR block of the configured width,
    /// evaluated at event boundaries against the boundary-opening record.
    fn progress_line(&self, last_sip: u32, new_sip: u32) {
        let mask = self.ctx.verbose.progress_mask();
        let prog_ip = new_sip & mask;
        if last_sip & mask != prog_ip {
            self.ctx
                .verbose
                .progress(&format!("progress: {}\n", Ipv4Addr::from(prog_ip)));
        }
    }

    /// Drain the queue, deactivate it, join the workers, and return the
    /// run totals. The engine stays queryable afterwards.
    pub fn finish(&mut self) -> Result<SummarySnapshot, ScanError> {
        let depth = self.ctx.queue.depth();
        if depth > 0 {
            self.ctx.verbose.progress(&format!(
                "waiting for {depth} worker thread{} to finish...\n",
                if depth > 1 { "s" } else { "" }
            ));
        }
        self.ctx.queue.wait_drained();
        self.ctx.queue.deactivate();

        self.ctx.verbose.progress("joining threads...\n");
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }

        self.ctx.writer.flush().map_err(|source| ScanError::Io {
            context: "cannot flush output".to_string(),
            source,
        })?;

        let snap = self.ctx.summary.snapshot();
        if self.ctx.verbose.progress_enabled() {
            self.ctx.verbose.progress(&format!(
                "Read {} flows\n\t{} scanners\n\t{} benign\n\t{} unknown\n\
                 \t\t{} backscatter\n\t\t{} SYN flooders\n",
                snap.total_flows,
                snap.scanners,
                snap.benign,
                snap.unknown,
                snap.backscatter,
                snap.flooders
            ));
        }
        Ok(snap)
    }

    /// Current run totals.
    pub fn summary(&self) -> SummarySnapshot {
        self.ctx.summary.snapshot()
    }

    /// Source IPs the TRW model has judged to be scanners, sorted.
    pub fn trw_scanners(&self) -> Vec<Ipv4Addr> {
        let mut ips: Vec<_> = self.ctx.trw.lock().scanners.iter().copied().collect();
        ips.sort();
        ips
    }

    /// Source IPs the TRW model has judged to be benign, sorted.
    pub fn trw_benign(&self) -> Vec<Ipv4Addr> {
        let mut ips: Vec<_> = self.ctx.trw.lock().benign.iter().copied().collect();
        ips.sort();
        ips
    }
}

fn worker_loop(ctx: Arc<EngineContext>, threadnum: u32) {
    while let Some(mut batch) = ctx.queue.pop() {
        process_event(&ctx, threadnum, &mut batch);
        drop(batch);
        ctx.queue.complete();
    }
    ctx.verbose.progress("work queue deactivated\n");
    ctx.verbose
        .progress(&format!("thread {threadnum} shutting down...\n"));
}

/// The classifier chain for one event, then the terminal-class bookkeeping.
fn process_event(ctx: &EngineContext, threadnum: u32, batch: &mut EventBatch) {
    ctx.verbose.result(
        batch.metrics.event_size,
        &format!(
            "{}. {} [{}] ({}) ",
            threadnum,
            batch.metrics.sip,
            batch.metrics.protocol.number(),
            batch.metrics.event_size
        ),
    );

    if batch.metrics.protocol == FlowProtocol::Tcp && ctx.config.trw_enabled() {
        let mut counters = TrwCounters::default();
        trw::classify(&ctx.trw, &ctx.config, &ctx.verbose, batch, &mut counters);
    }
    if !matches!(
        batch.metrics.event_class,
        EventClass::Scan | EventClass::Flood | EventClass::Backscatter
    ) && ctx.config.blr_enabled()
    {
        batch.flows.sort_by(compare_proto_stime);
        blr::classify(&ctx.verbose, batch);
    }

    let metrics = &batch.metrics;
    match metrics.event_class {
        EventClass::Scan => {
            ctx.verbose.result(
                metrics.event_size,
                &format!("\tscan ({:.3})\n", metrics.scan_probability),
            );
            ctx.summary.record_class(EventClass::Scan);
            let rec = ScanRecord::from(metrics);
            debug_assert!(rec.scan_prob > 0.0);
            if let Err(e) = ctx.writer.write_record(&rec) {
                warn!("failed to write scanner record: {e}");
            }
        }
        EventClass::Benign => {
            ctx.verbose.result(
                metrics.event_size,
                &format!("\tbenign ({:.3})\n", metrics.scan_probability),
            );
            ctx.summary.record_class(EventClass::Benign);
        }
        EventClass::Backscatter => {
            ctx.verbose.result(metrics.event_size, "\tbackscatter\n");
            ctx.summary.record_class(EventClass::Backscatter);
        }
        EventClass::Flood => {
            ctx.verbose.result(metrics.event_size, "\tflood\n");
            ctx.summary.record_class(EventClass::Flood);
        }
        EventClass::Unknown => {
            ctx.verbose.result(
                metrics.event_size,
                &format!("\tunknown ({:.3})\n", metrics.scan_probability),
            );
            ctx.summary.record_class(EventClass::Unknown);
        }
    }
}
