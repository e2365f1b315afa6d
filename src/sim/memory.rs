use std::ops::AddAssign;

use anyhow::{bail, Result};
use log::debug;
use serde::Serialize;

use crate::base::mem::{HasMemory, SparseMemory};
use crate::sim::config::MemoryConfig;
use crate::timeq::{Backpressure, PacketQueue, Tick, Ticket};
use crate::xbar::{LinkId, MemCmd, MemSidePeer, ProtocolViolation, Transaction};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub reads: u64,
    pub writebacks: u64,
    pub partial_writes: u64,
    pub evicts: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub full_rejects: u64,
}

impl AddAssign<&MemoryStats> for MemoryStats {
    fn add_assign(&mut self, other: &MemoryStats) {
        self.reads += other.reads;
        self.writebacks += other.writebacks;
        self.partial_writes += other.partial_writes;
        self.evicts += other.evicts;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.full_rejects += other.full_rejects;
    }
}

/// Fixed-latency memory at the far end of a device crossbar.
pub struct MemoryEndpoint {
    name: String,
    config: MemoryConfig,
    store: SparseMemory,
    responses: PacketQueue<Transaction>,
    stats: MemoryStats,
}

impl MemoryEndpoint {
    pub fn new(name: impl Into<String>, config: MemoryConfig) -> Self {
        Self {
            name: name.into(),
            responses: PacketQueue::new(config.queue_capacity),
            config,
            store: SparseMemory::default(),
            stats: MemoryStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    pub fn store(&self) -> &SparseMemory {
        &self.store
    }

    pub fn is_idle(&self) -> bool {
        self.responses.is_empty()
    }

    /// Timing request.  Answered requests wait `latency` for their response slot; posted writes
    /// finish on arrival.  A full response queue hands the request back untouched.
    pub fn recv_request(
        &mut self,
        now: Tick,
        mut tx: Transaction,
    ) -> Result<Result<Option<Ticket>, Backpressure<Transaction>>> {
        if !tx.needs_response() {
            self.access(&mut tx)?;
            debug!("{}: {} {} {:#x} done", self.name, tx.cmd, tx.id, tx.addr);
            return Ok(Ok(None));
        }
        let size = tx.size;
        let ticket = match self
            .responses
            .schedule(now, tx, now + self.config.latency, size)
        {
            Ok(ticket) => ticket,
            Err(full) => {
                self.stats.full_rejects += 1;
                return Ok(Err(full));
            }
        };
        // fixed latency: the entry just scheduled is the last to become ready
        let Some(queued) = self.responses.back_mut() else {
            bail!("{}: response slot vanished after scheduling", self.name);
        };
        perform(&mut self.store, &mut self.stats, &self.name, queued)?;
        Ok(Ok(Some(ticket)))
    }

    pub fn peek_response(&self, now: Tick) -> Option<&Transaction> {
        self.responses.peek_ready(now)
    }

    pub fn take_response(&mut self, now: Tick) -> Option<Transaction> {
        self.responses.pop_ready(now)
    }

    /// Perform `tx` against the backing store and turn it into its response in place.
    pub fn access(&mut self, tx: &mut Transaction) -> Result<()> {
        perform(&mut self.store, &mut self.stats, &self.name, tx)
    }

    pub fn reset(&mut self) {
        self.responses.clear();
        self.store.reset();
    }
}

fn perform(
    store: &mut SparseMemory,
    stats: &mut MemoryStats,
    name: &str,
    tx: &mut Transaction,
) -> Result<()> {
    if tx.is_encoded() {
        return Err(ProtocolViolation::UnsupportedCommand {
            stage: "memory",
            id: tx.id,
            cmd: tx.cmd,
        }
        .into());
    }
    match tx.cmd {
        MemCmd::ReadReq => {
            tx.data = Some(store.read(tx.addr, tx.size as usize)?);
            stats.reads += 1;
            stats.bytes_read += tx.size as u64;
        }
        MemCmd::Writeback | MemCmd::WritePartial => {
            let Some(data) = tx.data.as_deref() else {
                bail!("{}: {} {} @ {:#x} carries no data", name, tx.cmd, tx.id, tx.addr);
            };
            store.write(tx.addr, data)?;
            stats.bytes_written += data.len() as u64;
            if tx.cmd == MemCmd::Writeback {
                stats.writebacks += 1;
            } else {
                stats.partial_writes += 1;
            }
        }
        MemCmd::CleanEvict => stats.evicts += 1,
        cmd => {
            return Err(ProtocolViolation::UnsupportedCommand {
                stage: "memory",
                id: tx.id,
                cmd,
            }
            .into())
        }
    }
    tx.make_response();
    Ok(())
}

impl MemSidePeer for MemoryEndpoint {
    fn send_atomic(&mut self, _link: LinkId, tx: &mut Transaction) -> Result<Tick> {
        self.access(tx)?;
        Ok(self.config.latency)
    }

    fn send_functional(&mut self, _link: LinkId, tx: &mut Transaction) -> Result<()> {
        self.access(tx)
    }
}
