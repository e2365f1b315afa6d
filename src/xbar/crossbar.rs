use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info};

use crate::timeq::{ClockDomain, Tick, Ticket};
use crate::xbar::codec::{FlitCodec, FlitRole};
use crate::xbar::combiner::{self, Combined};
use crate::xbar::config::{Capabilities, XbarConfig};
use crate::xbar::credit::{CreditClass, CreditLedger, Notified};
use crate::xbar::layer::ArbitrationLayer;
use crate::xbar::link::{AddrMap, Link};
use crate::xbar::packet::{MemCmd, Transaction};
use crate::xbar::route::RouteTable;
use crate::xbar::stats::XbarStats;
use crate::xbar::types::{
    LinkId, RejectReason, RejectWith, RetryCause, RetryNotice, Side,
};

/// Outcome of a timing access that the crossbar took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Queued on an outbound link.
    Forwarded(Ticket),
    /// Folded into a unit that is already queued.
    Absorbed,
}

impl Accepted {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Self::Forwarded(ticket) => Some(*ticket),
            Self::Absorbed => None,
        }
    }
}

/// A timing handler either takes the transaction or hands it back with the reason it could not.
pub type Admit = Result<Accepted, RejectWith<Transaction>>;

/// Whatever sits behind the downstream links, for accesses that bypass the timing path.
pub trait MemSidePeer {
    /// Perform `tx` immediately and return its latency.
    fn send_atomic(&mut self, link: LinkId, tx: &mut Transaction) -> Result<Tick>;
    fn send_functional(&mut self, link: LinkId, tx: &mut Transaction) -> Result<()>;
}

pub struct Crossbar {
    name: String,
    config: Arc<XbarConfig>,
    caps: Capabilities,
    clock: ClockDomain,
    upstream: Vec<Link>,
    downstream: Vec<Link>,
    addr_map: AddrMap,
    /// One per downstream link.
    req_layers: Vec<ArbitrationLayer>,
    /// One per upstream link.
    resp_layers: Vec<ArbitrationLayer>,
    credits: CreditLedger,
    codec: Option<FlitCodec>,
    routes: RouteTable,
    notices: VecDeque<RetryNotice>,
    stats: XbarStats,
}

impl Crossbar {
    pub fn new(config: XbarConfig) -> Self {
        config.ensure_valid();
        let name = config.name.clone();
        let caps = config.capabilities();
        let clock = ClockDomain::new(config.clock_period);
        let num_down = config.total_downstream();

        let upstream = (0..config.num_upstream)
            .map(|i| Link::new(i, format!("{name}.cpu_side_port[{i}]"), config.queue_capacity))
            .collect();
        let downstream = (0..num_down)
            .map(|i| {
                let port = if i == config.num_downstream {
                    format!("{name}.default")
                } else {
                    format!("{name}.mem_side_port[{i}]")
                };
                Link::new(i, port, config.queue_capacity)
            })
            .collect();

        let mut addr_map = AddrMap::new(config.default_downstream.then_some(config.num_downstream));
        for (link, range) in config.downstream_ranges.iter().enumerate() {
            addr_map.add(*range, link);
        }

        let req_layers = (0..num_down)
            .map(|i| ArbitrationLayer::new(format!("{name}.reqLayer{i}"), clock.period()))
            .collect();
        let resp_layers = (0..config.num_upstream)
            .map(|i| ArbitrationLayer::new(format!("{name}.respLayer{i}"), clock.period()))
            .collect();

        info!(
            "{name}: {:?} crossbar, {} upstream / {} downstream links, {:?}",
            config.variant, config.num_upstream, num_down, caps
        );

        Self {
            credits: CreditLedger::new(&name, num_down, config.credits),
            codec: caps.codec.map(|role| FlitCodec::new(role, config.flit_size)),
            routes: RouteTable::new(&name),
            stats: XbarStats::new(config.num_upstream, num_down),
            notices: VecDeque::new(),
            name,
            caps,
            clock,
            upstream,
            downstream,
            addr_map,
            req_layers,
            resp_layers,
            config: Arc::new(config),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &XbarConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn clock(&self) -> ClockDomain {
        self.clock
    }

    pub fn num_upstream(&self) -> usize {
        self.upstream.len()
    }

    pub fn num_downstream(&self) -> usize {
        self.downstream.len()
    }

    pub fn credits(&self) -> &CreditLedger {
        &self.credits
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn codec(&self) -> Option<&FlitCodec> {
        self.codec.as_ref()
    }

    pub fn stats(&self) -> &XbarStats {
        &self.stats
    }

    pub fn req_layer(&self, link: LinkId) -> &ArbitrationLayer {
        &self.req_layers[link]
    }

    pub fn resp_layer(&self, link: LinkId) -> &ArbitrationLayer {
        &self.resp_layers[link]
    }

    pub fn resolve(&self, addr: u64, src: LinkId) -> Result<LinkId> {
        self.addr_map.resolve(&self.name, addr, src)
    }

    /// Timing request arriving on upstream link `src`.
    pub fn handle_request(&mut self, now: Tick, src: LinkId, mut tx: Transaction) -> Result<Admit> {
        let dst = self.addr_map.resolve(&self.name, tx.addr, src)?;

        if !self.req_layers[dst].try_timing(src, now) {
            debug!(
                "{}: recvTimingReq: src {} {} {} {:#x} BUSY",
                self.name,
                self.upstream[src].name(),
                tx.cmd,
                tx.id,
                tx.addr
            );
            self.stats.record_busy_reject();
            return Ok(Err(RejectWith::new(tx, None, RejectReason::Busy)));
        }

        let expects_response = tx.needs_response();
        let consumes_credit = self.caps.credit_admission && expects_response;
        if consumes_credit && self.credits.remote(dst).is_exhausted(CreditClass::Response) {
            self.credits
                .remote_mut(dst)
                .wait_for(CreditClass::Response, src);
            self.req_layers[dst].cancel(src);
            debug!(
                "{}: recvTimingReq: src {} {} {} {:#x} NO CREDIT on {}",
                self.name,
                self.upstream[src].name(),
                tx.cmd,
                tx.id,
                tx.addr,
                self.downstream[dst].name()
            );
            self.stats.record_credit_stall();
            return Ok(Err(RejectWith::new(tx, None, RejectReason::NoCredit)));
        }

        if self.downstream[dst].outbound.is_full() {
            let deadline = self.clock.clock_edge(now, 1);
            self.req_layers[dst].failed_timing(src, deadline);
            debug!(
                "{}: recvTimingReq: src {} {} {} {:#x} RETRY at {}",
                self.name,
                self.upstream[src].name(),
                tx.cmd,
                tx.id,
                tx.addr,
                deadline
            );
            self.stats.record_queue_full_retry();
            return Ok(Err(RejectWith::new(
                tx,
                Some(deadline),
                RejectReason::QueueFull,
            )));
        }

        if consumes_credit && self.credits.remote_mut(dst).try_consume(CreditClass::Response) {
            self.stats.record_credits_consumed(1);
        }

        let mut data_flit = false;
        if let Some(codec) = self.codec.as_mut() {
            match codec.role() {
                FlitRole::Host => {
                    let grant = self.credits.local().grant();
                    data_flit = codec.encode(&mut tx, grant)?.data_flit;
                }
                FlitRole::Device => codec.decode(&mut tx)?,
            }
        }

        if expects_response {
            self.routes.insert(tx.id, src)?;
        }

        let delay = self
            .clock
            .cycles(self.config.frontend_latency + self.config.forward_latency);
        let finish = self.clock.clock_edge(now, 1)
            + self.clock.payload_delay(tx.size, self.config.width);
        let (cmd, size, id, addr) = (tx.cmd, tx.size, tx.id, tx.addr);

        // capacity was checked above
        let ticket = self.downstream[dst]
            .outbound
            .force_schedule(now, tx, now + delay, size);
        self.req_layers[dst].succeeded_timing(finish);

        self.stats.record_packet(src, dst, cmd, size);
        if data_flit {
            self.stats
                .record_packet(src, dst, MemCmd::DataFlit, self.config.flit_size);
            self.stats.record_data_flit();
        }
        debug!(
            "{}: recvTimingReq: src {} {} {} {:#x} -> {} ready at {}",
            self.name,
            self.upstream[src].name(),
            cmd,
            id,
            addr,
            self.downstream[dst].name(),
            ticket.ready_at()
        );
        Ok(Ok(Accepted::Forwarded(ticket)))
    }

    /// Timing response arriving on downstream link `src`.
    pub fn handle_response(
        &mut self,
        now: Tick,
        src: LinkId,
        mut tx: Transaction,
    ) -> Result<Admit> {
        let dst = self.routes.lookup(tx.id, tx.cmd, src)?;

        if !self.resp_layers[dst].try_timing(src, now) {
            debug!(
                "{}: recvTimingResp: src {} {} {} BUSY",
                self.name,
                self.downstream[src].name(),
                tx.cmd,
                tx.id
            );
            self.stats.record_busy_reject();
            return Ok(Err(RejectWith::new(tx, None, RejectReason::Busy)));
        }

        let ready_at = now + self.clock.cycles(self.config.response_latency);
        let release = if self.caps.credit_admission {
            tx.credit_release()
        } else {
            0
        };
        let (id, src_cmd) = (tx.id, tx.cmd);

        let mut carried = Vec::new();
        let outcome = match self.codec.as_mut() {
            Some(codec) if codec.role() == FlitRole::Host => {
                unbundle(&mut tx, &mut carried);
                codec.decode(&mut tx)?;
                for unit in carried.iter_mut() {
                    codec.decode(unit)?;
                }
                Combined::Standalone(tx)
            }
            Some(codec) => {
                let grant = self.credits.local().grant();
                codec.encode(&mut tx, grant)?;
                if self.caps.response_combining {
                    combiner::combine(&mut self.upstream[dst].outbound, tx)
                } else {
                    Combined::Standalone(tx)
                }
            }
            None => {
                unbundle(&mut tx, &mut carried);
                Combined::Standalone(tx)
            }
        };

        self.routes.remove(id, src_cmd, src)?;
        self.stats.record_bundled(carried.len());
        for unit in carried {
            let link = self.routes.remove(unit.id, unit.cmd, src)?;
            let size = unit.size;
            self.stats.record_packet(link, src, unit.cmd, 0);
            self.upstream[link]
                .outbound
                .force_schedule(now, unit, ready_at, size);
        }

        if let Combined::Inherited { removed_completion, .. } = &outcome {
            self.stats.record_combined();
            if *removed_completion {
                self.stats.record_bundled(1);
            }
        }
        let (accepted, size) = match outcome {
            Combined::Absorbed { carrier } => {
                debug!(
                    "{}: recvTimingResp: {} {} rides with {}",
                    self.name, src_cmd, id, carrier
                );
                self.stats.record_absorbed();
                (Accepted::Absorbed, 0)
            }
            Combined::Standalone(tx) | Combined::Inherited { tx, .. } => {
                let (cmd, size) = (tx.cmd, tx.size);
                let ticket = self.upstream[dst]
                    .outbound
                    .force_schedule(now, tx, ready_at, size);
                self.stats.record_packet(dst, src, cmd, size);
                debug!(
                    "{}: recvTimingResp: src {} {} {} -> {} ready at {}",
                    self.name,
                    self.downstream[src].name(),
                    cmd,
                    id,
                    self.upstream[dst].name(),
                    ticket.ready_at()
                );
                (Accepted::Forwarded(ticket), size)
            }
        };

        let finish =
            self.clock.clock_edge(now, 1) + self.clock.payload_delay(size, self.config.width);
        self.resp_layers[dst].succeeded_timing(finish);

        if release > 0 {
            let notified = self
                .credits
                .remote_mut(src)
                .release(CreditClass::Response, release)?;
            self.stats.record_credits_released(release);
            self.notify(Side::Upstream, notified, RetryCause::CreditReturned, now);
        }
        Ok(Ok(accepted))
    }

    /// Untimed access: forwarded straight through to the peer.  Returns the peer's latency.
    pub fn handle_atomic(
        &mut self,
        src: LinkId,
        tx: &mut Transaction,
        peer: &mut dyn MemSidePeer,
    ) -> Result<Tick> {
        let dst = self.addr_map.resolve(&self.name, tx.addr, src)?;
        let req_bytes = if tx.cmd.has_data() { tx.size } else { 0 };
        self.stats.record_packet(src, dst, tx.cmd, req_bytes);

        let latency = peer.send_atomic(dst, tx)?;

        if tx.cmd.is_response() {
            let resp_bytes = if tx.cmd.has_data() { tx.size } else { 0 };
            self.stats.record_packet(src, dst, tx.cmd, resp_bytes);
        }
        self.stats.record_atomic();
        Ok(latency)
    }

    /// Debug access.  Queued responses are checked first, newest first, so a functional read sees
    /// data that has not reached the requester yet.
    pub fn handle_functional(
        &mut self,
        src: LinkId,
        tx: &mut Transaction,
        peer: &mut dyn MemSidePeer,
    ) -> Result<()> {
        for link in self.upstream.iter_mut() {
            for queued in link.outbound.iter_mut().rev() {
                if queued.try_satisfy_functional(tx) {
                    tx.make_response();
                    self.stats.record_functional(true);
                    return Ok(());
                }
                queued.patch_functional(tx);
            }
        }
        let dst = self.addr_map.resolve(&self.name, tx.addr, src)?;
        self.stats.record_functional(false);
        peer.send_functional(dst, tx)
    }

    /// Advance layer state to `now`.  Freed layers are handed to their oldest waiter, and spare
    /// credits to senders still parked on a pool.
    pub fn tick(&mut self, now: Tick) {
        for layer in self.req_layers.iter_mut() {
            if let Some(port) = layer.release(now) {
                debug!("{}: {} retry for {}", self.name, layer.name(), port);
                self.stats.record_retry_notice();
                self.notices.push_back(RetryNotice {
                    side: Side::Upstream,
                    link: port,
                    cause: RetryCause::LayerFree,
                    at: now,
                });
            }
        }
        for layer in self.resp_layers.iter_mut() {
            if let Some(port) = layer.release(now) {
                debug!("{}: {} retry for {}", self.name, layer.name(), port);
                self.stats.record_retry_notice();
                self.notices.push_back(RetryNotice {
                    side: Side::Downstream,
                    link: port,
                    cause: RetryCause::LayerFree,
                    at: now,
                });
            }
        }
        for link in 0..self.downstream.len() {
            let woken = self
                .credits
                .remote_mut(link)
                .wake_waiters(CreditClass::Response);
            self.notify(Side::Upstream, woken, RetryCause::CreditReturned, now);
        }
    }

    pub fn pop_notice(&mut self) -> Option<RetryNotice> {
        self.notices.pop_front()
    }

    pub fn peek_ready_request(&self, link: LinkId, now: Tick) -> Option<&Transaction> {
        self.downstream[link].outbound.peek_ready(now)
    }

    pub fn take_ready_request(&mut self, link: LinkId, now: Tick) -> Option<Transaction> {
        self.downstream[link].outbound.pop_ready(now)
    }

    pub fn peek_ready_response(&self, link: LinkId, now: Tick) -> Option<&Transaction> {
        self.upstream[link].outbound.peek_ready(now)
    }

    pub fn take_ready_response(&mut self, link: LinkId, now: Tick) -> Option<Transaction> {
        self.upstream[link].outbound.pop_ready(now)
    }

    pub fn outstanding(&self, side: Side, link: LinkId) -> usize {
        match side {
            Side::Upstream => self.upstream[link].outstanding(),
            Side::Downstream => self.downstream[link].outstanding(),
        }
    }

    /// True when nothing is queued, routed or waiting for a notice.
    pub fn is_quiescent(&self) -> bool {
        self.routes.is_empty()
            && self.notices.is_empty()
            && self.upstream.iter().all(|l| l.outbound.is_empty())
            && self.downstream.iter().all(|l| l.outbound.is_empty())
    }

    pub fn reset(&mut self) {
        self.credits.reset();
        self.routes.clear();
        self.req_layers.iter_mut().for_each(ArbitrationLayer::reset);
        self.resp_layers.iter_mut().for_each(ArbitrationLayer::reset);
        self.upstream.iter_mut().for_each(|l| l.outbound.clear());
        self.downstream.iter_mut().for_each(|l| l.outbound.clear());
        self.notices.clear();
        if let Some(codec) = self.codec.as_mut() {
            codec.reset();
        }
    }

    fn notify(&mut self, side: Side, links: Notified, cause: RetryCause, at: Tick) {
        for link in links {
            debug!("{}: notify {:?} link {} ({:?})", self.name, side, link, cause);
            self.stats.record_retry_notice();
            self.notices.push_back(RetryNotice {
                side,
                link,
                cause,
                at,
            });
        }
    }
}

// Pull every completion carried by `tx` (and by those completions) out into `out`.
fn unbundle(tx: &mut Transaction, out: &mut Vec<Transaction>) {
    for mut unit in tx.bundled.drain(..) {
        unbundle(&mut unit, out);
        out.push(unit);
    }
}
