use std::collections::BTreeMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::xbar::packet::MemCmd;
use crate::xbar::types::LinkId;

#[derive(Debug, Clone, Default, Serialize)]
pub struct XbarStats {
    /// Packets per (upstream, downstream) link pair.
    pkt_count: Vec<Vec<u64>>,
    /// Bytes per (upstream, downstream) link pair.
    pkt_size: Vec<Vec<u64>>,
    trans_dist: BTreeMap<&'static str, u64>,
    busy_rejects: u64,
    credit_stalls: u64,
    queue_full_retries: u64,
    data_flits: u64,
    combined_pkts: u64,
    absorbed_completions: u64,
    bundled_completions: u64,
    credits_consumed: u64,
    credits_released: u64,
    retry_notices: u64,
    atomic_accesses: u64,
    functional_accesses: u64,
    functional_hits: u64,
}

impl XbarStats {
    pub fn new(num_upstream: usize, num_downstream: usize) -> Self {
        Self {
            pkt_count: vec![vec![0; num_downstream]; num_upstream],
            pkt_size: vec![vec![0; num_downstream]; num_upstream],
            ..Self::default()
        }
    }

    pub fn pkt_count(&self, up: LinkId, down: LinkId) -> u64 {
        self.pkt_count[up][down]
    }

    pub fn pkt_size(&self, up: LinkId, down: LinkId) -> u64 {
        self.pkt_size[up][down]
    }

    pub fn trans_dist(&self, cmd: MemCmd) -> u64 {
        self.trans_dist.get(cmd.name()).copied().unwrap_or(0)
    }

    pub fn busy_rejects(&self) -> u64 {
        self.busy_rejects
    }

    pub fn credit_stalls(&self) -> u64 {
        self.credit_stalls
    }

    pub fn queue_full_retries(&self) -> u64 {
        self.queue_full_retries
    }

    pub fn data_flits(&self) -> u64 {
        self.data_flits
    }

    pub fn combined_pkts(&self) -> u64 {
        self.combined_pkts
    }

    pub fn absorbed_completions(&self) -> u64 {
        self.absorbed_completions
    }

    pub fn bundled_completions(&self) -> u64 {
        self.bundled_completions
    }

    pub fn credits_consumed(&self) -> u64 {
        self.credits_consumed
    }

    pub fn credits_released(&self) -> u64 {
        self.credits_released
    }

    pub fn retry_notices(&self) -> u64 {
        self.retry_notices
    }

    pub fn atomic_accesses(&self) -> u64 {
        self.atomic_accesses
    }

    pub fn functional_hits(&self) -> u64 {
        self.functional_hits
    }

    pub fn record_packet(&mut self, up: LinkId, down: LinkId, cmd: MemCmd, bytes: u32) {
        self.pkt_count[up][down] = self.pkt_count[up][down].saturating_add(1);
        self.pkt_size[up][down] = self.pkt_size[up][down].saturating_add(bytes as u64);
        *self.trans_dist.entry(cmd.name()).or_insert(0) += 1;
    }

    pub fn record_busy_reject(&mut self) {
        self.busy_rejects = self.busy_rejects.saturating_add(1);
    }

    pub fn record_credit_stall(&mut self) {
        self.credit_stalls = self.credit_stalls.saturating_add(1);
    }

    pub fn record_queue_full_retry(&mut self) {
        self.queue_full_retries = self.queue_full_retries.saturating_add(1);
    }

    pub fn record_data_flit(&mut self) {
        self.data_flits = self.data_flits.saturating_add(1);
    }

    pub fn record_combined(&mut self) {
        self.combined_pkts = self.combined_pkts.saturating_add(1);
    }

    pub fn record_absorbed(&mut self) {
        self.absorbed_completions = self.absorbed_completions.saturating_add(1);
        self.record_combined();
    }

    pub fn record_bundled(&mut self, count: usize) {
        self.bundled_completions = self.bundled_completions.saturating_add(count as u64);
    }

    pub fn record_credits_consumed(&mut self, count: u32) {
        self.credits_consumed = self.credits_consumed.saturating_add(count as u64);
    }

    pub fn record_credits_released(&mut self, count: u32) {
        self.credits_released = self.credits_released.saturating_add(count as u64);
    }

    pub fn record_retry_notice(&mut self) {
        self.retry_notices = self.retry_notices.saturating_add(1);
    }

    pub fn record_atomic(&mut self) {
        self.atomic_accesses = self.atomic_accesses.saturating_add(1);
    }

    pub fn record_functional(&mut self, hit: bool) {
        self.functional_accesses = self.functional_accesses.saturating_add(1);
        if hit {
            self.functional_hits = self.functional_hits.saturating_add(1);
        }
    }
}

impl AddAssign<&XbarStats> for XbarStats {
    fn add_assign(&mut self, other: &XbarStats) {
        let grow = |rows: &mut Vec<Vec<u64>>, like: &Vec<Vec<u64>>| {
            if rows.len() < like.len() {
                rows.resize(like.len(), Vec::new());
            }
            for (row, other_row) in rows.iter_mut().zip(like) {
                if row.len() < other_row.len() {
                    row.resize(other_row.len(), 0);
                }
            }
        };
        grow(&mut self.pkt_count, &other.pkt_count);
        grow(&mut self.pkt_size, &other.pkt_size);
        for (up, row) in other.pkt_count.iter().enumerate() {
            for (down, count) in row.iter().enumerate() {
                self.pkt_count[up][down] = self.pkt_count[up][down].saturating_add(*count);
                self.pkt_size[up][down] =
                    self.pkt_size[up][down].saturating_add(other.pkt_size[up][down]);
            }
        }
        for (cmd, count) in &other.trans_dist {
            *self.trans_dist.entry(*cmd).or_insert(0) += count;
        }
        self.busy_rejects = self.busy_rejects.saturating_add(other.busy_rejects);
        self.credit_stalls = self.credit_stalls.saturating_add(other.credit_stalls);
        self.queue_full_retries = self.queue_full_retries.saturating_add(other.queue_full_retries);
        self.data_flits = self.data_flits.saturating_add(other.data_flits);
        self.combined_pkts = self.combined_pkts.saturating_add(other.combined_pkts);
        self.absorbed_completions = self
            .absorbed_completions
            .saturating_add(other.absorbed_completions);
        self.bundled_completions = self
            .bundled_completions
            .saturating_add(other.bundled_completions);
        self.credits_consumed = self.credits_consumed.saturating_add(other.credits_consumed);
        self.credits_released = self.credits_released.saturating_add(other.credits_released);
        self.retry_notices = self.retry_notices.saturating_add(other.retry_notices);
        self.atomic_accesses = self.atomic_accesses.saturating_add(other.atomic_accesses);
        self.functional_accesses = self
            .functional_accesses
            .saturating_add(other.functional_accesses);
        self.functional_hits = self.functional_hits.saturating_add(other.functional_hits);
    }
}
