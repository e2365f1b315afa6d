use std::collections::HashMap;
use std::ops::AddAssign;

use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;

use crate::timeq::Tick;
use crate::traffic::config::TrafficConfig;
use crate::traffic::patterns::{PatternEngine, PatternOp};
use crate::xbar::{LinkId, RejectReason, RejectWith, RequestId, RetryNotice, Transaction};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RequesterStats {
    pub issued: u64,
    pub completed: u64,
    pub posted: u64,
    pub rejected_busy: u64,
    pub rejected_no_credit: u64,
    pub rejected_queue_full: u64,
    pub total_latency: u64,
    pub max_latency: u64,
}

impl RequesterStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_busy + self.rejected_no_credit + self.rejected_queue_full
    }

    pub fn avg_latency(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.completed as f64
        }
    }
}

impl AddAssign<&RequesterStats> for RequesterStats {
    fn add_assign(&mut self, other: &RequesterStats) {
        self.issued += other.issued;
        self.completed += other.completed;
        self.posted += other.posted;
        self.rejected_busy += other.rejected_busy;
        self.rejected_no_credit += other.rejected_no_credit;
        self.rejected_queue_full += other.rejected_queue_full;
        self.total_latency += other.total_latency;
        self.max_latency = self.max_latency.max(other.max_latency);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Blocked {
    /// Waiting for a retry notice.
    Notice,
    /// Retry on our own at the given tick.
    Until(Tick),
}

/// Traffic source attached to one upstream link of the controller.
pub struct Requester {
    link: LinkId,
    engine: PatternEngine,
    total: u32,
    generated: u32,
    max_outstanding: usize,
    /// Rejected transaction waiting to be re-sent.
    held: Option<Transaction>,
    blocked: Option<Blocked>,
    inflight: HashMap<RequestId, Tick>,
    stats: RequesterStats,
}

impl Requester {
    pub fn new(config: &TrafficConfig, link: LinkId) -> Self {
        Self {
            link,
            engine: PatternEngine::new(config, link),
            total: config.requests_per_requester,
            generated: 0,
            max_outstanding: config.max_outstanding,
            held: None,
            blocked: None,
            inflight: HashMap::new(),
            stats: RequesterStats::default(),
        }
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn stats(&self) -> &RequesterStats {
        &self.stats
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_done(&self) -> bool {
        self.generated == self.total && self.held.is_none() && self.inflight.is_empty()
    }

    /// Next transaction to offer at `now`, if any.  A held transaction always goes first.
    pub fn next_request(&mut self, now: Tick) -> Option<Transaction> {
        match self.blocked {
            Some(Blocked::Notice) => return None,
            Some(Blocked::Until(at)) if now < at => return None,
            _ => self.blocked = None,
        }
        if let Some(tx) = self.held.take() {
            return Some(tx);
        }
        if self.generated == self.total || self.inflight.len() >= self.max_outstanding {
            return None;
        }
        let tx = self.generate(now);
        self.generated += 1;
        Some(tx)
    }

    fn generate(&mut self, now: Tick) -> Transaction {
        let seq = self.generated;
        let id = RequestId(((self.link as u64) << 40) | seq as u64);
        let addr = self.engine.addr(seq);
        let bytes = self.engine.req_bytes();
        let fill = seq as u8;
        let mut tx = match self.engine.op() {
            PatternOp::Read => Transaction::read(id, addr, bytes),
            PatternOp::Writeback => Transaction::writeback(id, addr, vec![fill; bytes as usize]),
            PatternOp::Partial => {
                let part = (bytes / 4).max(1) as usize;
                Transaction::write_partial(id, addr, vec![fill; part])
            }
            PatternOp::Evict => Transaction::clean_evict(id, addr, bytes),
        };
        tx.issued_at = now;
        tx
    }

    pub fn on_accepted(&mut self, id: RequestId, needs_response: bool, issued_at: Tick) {
        self.stats.issued += 1;
        if needs_response {
            self.inflight.insert(id, issued_at);
        } else {
            self.stats.posted += 1;
        }
    }

    pub fn on_rejected(&mut self, reject: RejectWith<Transaction>) {
        match reject.reason {
            RejectReason::Busy => self.stats.rejected_busy += 1,
            RejectReason::NoCredit => self.stats.rejected_no_credit += 1,
            RejectReason::QueueFull => self.stats.rejected_queue_full += 1,
        }
        self.blocked = Some(match reject.retry_at {
            Some(at) => Blocked::Until(at),
            None => Blocked::Notice,
        });
        self.held = Some(reject.payload);
    }

    pub fn on_notice(&mut self, notice: &RetryNotice) {
        debug!(
            "requester {}: {:?} retry at {}",
            self.link, notice.cause, notice.at
        );
        if self.held.is_some() {
            self.blocked = None;
        }
    }

    pub fn on_response(&mut self, now: Tick, tx: Transaction) -> Result<()> {
        let Some(issued_at) = self.inflight.remove(&tx.id) else {
            bail!(
                "requester {}: unexpected {} for {} at {}",
                self.link,
                tx.cmd,
                tx.id,
                now
            );
        };
        if !tx.cmd.is_response() || tx.is_encoded() {
            bail!(
                "requester {}: {} for {} is not a plain response",
                self.link,
                tx.cmd,
                tx.id
            );
        }
        let latency = now.saturating_sub(issued_at);
        self.stats.completed += 1;
        self.stats.total_latency += latency;
        self.stats.max_latency = self.stats.max_latency.max(latency);
        Ok(())
    }
}
