use std::fmt;

use serde::Serialize;

use crate::timeq::Tick;
use crate::xbar::codec::{DRS_SLOTS, FLIT_SLOTS, NDR_SLOTS};
use crate::xbar::types::RequestId;

/// Commands seen by the crossbar.  The first group is the logical vocabulary spoken by
/// requesters and memories; the second is the link-level flit vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemCmd {
    ReadReq,
    ReadResp,
    Writeback,
    WritePartial,
    CleanEvict,
    WriteResp,
    MemRd,
    MemWr,
    MemWrPtl,
    MemClnEvct,
    MemData,
    Cmp,
    DataFlit,
}

impl MemCmd {
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadReq => "ReadReq",
            Self::ReadResp => "ReadResp",
            Self::Writeback => "Writeback",
            Self::WritePartial => "WritePartial",
            Self::CleanEvict => "CleanEvict",
            Self::WriteResp => "WriteResp",
            Self::MemRd => "MemRd",
            Self::MemWr => "MemWr",
            Self::MemWrPtl => "MemWrPtl",
            Self::MemClnEvct => "MemClnEvct",
            Self::MemData => "MemData",
            Self::Cmp => "Cmp",
            Self::DataFlit => "DataFlit",
        }
    }

    pub fn is_wire(self) -> bool {
        matches!(
            self,
            Self::MemRd
                | Self::MemWr
                | Self::MemWrPtl
                | Self::MemClnEvct
                | Self::MemData
                | Self::Cmp
                | Self::DataFlit
        )
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::ReadReq | Self::MemRd)
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::Writeback | Self::WritePartial | Self::MemWr | Self::MemWrPtl
        )
    }

    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::ReadResp | Self::WriteResp | Self::MemData | Self::Cmp
        )
    }

    pub fn is_completion(self) -> bool {
        matches!(self, Self::WriteResp | Self::Cmp)
    }

    pub fn has_data(self) -> bool {
        matches!(
            self,
            Self::ReadResp
                | Self::Writeback
                | Self::WritePartial
                | Self::MemWr
                | Self::MemWrPtl
                | Self::MemData
                | Self::DataFlit
        )
    }

    /// Reads and completed write-backs are answered; partial writes and evictions are posted.
    pub fn needs_response(self) -> bool {
        matches!(
            self,
            Self::ReadReq | Self::Writeback | Self::MemRd | Self::MemWr
        )
    }

    pub fn response_cmd(self) -> Option<MemCmd> {
        match self {
            Self::ReadReq => Some(Self::ReadResp),
            Self::Writeback => Some(Self::WriteResp),
            _ => None,
        }
    }
}

impl fmt::Display for MemCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logical command and size saved while a transaction travels in wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shadow {
    pub cmd: MemCmd,
    pub size: u32,
}

/// Credits piggy-backed in a flit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CreditGrant {
    pub request: u32,
    pub response: u32,
    pub data: u32,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: RequestId,
    pub cmd: MemCmd,
    pub addr: u64,
    pub size: u32,
    pub rollover: u8,
    pub shadow: Option<Shadow>,
    pub wire_cmd: Option<MemCmd>,
    pub wire_size: u32,
    pub reserved_for_more_drs: u8,
    pub reserved_for_more_ndr: u8,
    /// The flit this unit opened continues in a later unit, which returns its credits.
    pub flit_continued: bool,
    pub advertised: CreditGrant,
    pub data: Option<Vec<u8>>,
    /// Completions riding in the same flit as this unit.
    pub bundled: Vec<Transaction>,
    pub issued_at: Tick,
}

impl Transaction {
    pub fn new(id: RequestId, cmd: MemCmd, addr: u64, size: u32) -> Self {
        Self {
            id,
            cmd,
            addr,
            size,
            rollover: 0,
            shadow: None,
            wire_cmd: None,
            wire_size: 0,
            reserved_for_more_drs: DRS_SLOTS,
            reserved_for_more_ndr: NDR_SLOTS,
            flit_continued: false,
            advertised: CreditGrant::default(),
            data: None,
            bundled: Vec::new(),
            issued_at: 0,
        }
    }

    pub fn read(id: RequestId, addr: u64, size: u32) -> Self {
        Self::new(id, MemCmd::ReadReq, addr, size)
    }

    pub fn writeback(id: RequestId, addr: u64, data: Vec<u8>) -> Self {
        let mut tx = Self::new(id, MemCmd::Writeback, addr, data.len() as u32);
        tx.data = Some(data);
        tx
    }

    pub fn write_partial(id: RequestId, addr: u64, data: Vec<u8>) -> Self {
        let mut tx = Self::new(id, MemCmd::WritePartial, addr, data.len() as u32);
        tx.data = Some(data);
        tx
    }

    pub fn clean_evict(id: RequestId, addr: u64, size: u32) -> Self {
        Self::new(id, MemCmd::CleanEvict, addr, size)
    }

    pub fn needs_response(&self) -> bool {
        self.cmd.needs_response()
    }

    pub fn logical_size(&self) -> u32 {
        self.shadow.map(|s| s.size).unwrap_or(self.size)
    }

    pub fn is_encoded(&self) -> bool {
        self.shadow.is_some()
    }

    /// Turn a logical request into its logical response in place.
    pub fn make_response(&mut self) {
        if let Some(cmd) = self.cmd.response_cmd() {
            if cmd.is_completion() {
                self.data = None;
            }
            self.cmd = cmd;
        }
    }

    pub fn reset_reservations(&mut self) {
        self.reserved_for_more_drs = DRS_SLOTS;
        self.reserved_for_more_ndr = NDR_SLOTS;
        self.flit_continued = false;
    }

    /// Response credits returned when this unit reaches the credit owner: one per logical unit
    /// carried in its flit.
    pub fn credit_release(&self) -> u32 {
        if self.flit_continued {
            return 0;
        }
        let reserved = self.reserved_for_more_drs as i32 + self.reserved_for_more_ndr as i32;
        (FLIT_SLOTS as i32 - reserved).max(0) as u32
    }

    fn end(&self) -> u64 {
        self.addr.saturating_add(self.logical_size() as u64)
    }

    /// Check a functional access against this queued unit.  Reads copy out covered data and
    /// report success; writes patch any overlap and keep searching.
    pub fn try_satisfy_functional(&self, functional: &mut Transaction) -> bool {
        let Some(queued) = self.data.as_ref() else {
            return false;
        };
        if functional.cmd.is_read() {
            let covered = functional.addr >= self.addr
                && functional.end() <= self.end()
                && queued.len() as u64 >= self.end() - self.addr;
            if covered {
                let start = (functional.addr - self.addr) as usize;
                let len = functional.logical_size() as usize;
                functional.data = Some(queued[start..start + len].to_vec());
            }
            return covered;
        }
        false
    }

    pub fn patch_functional(&mut self, functional: &Transaction) {
        if !functional.cmd.is_write() {
            return;
        }
        let (Some(incoming), start, end) = (
            functional.data.as_ref(),
            functional.addr.max(self.addr),
            functional.end().min(self.end()),
        ) else {
            return;
        };
        let self_addr = self.addr;
        let Some(queued) = self.data.as_mut() else {
            return;
        };
        if start >= end {
            return;
        }
        let src = (start - functional.addr) as usize;
        let dst = (start - self_addr) as usize;
        let len = (end - start) as usize;
        if dst + len <= queued.len() && src + len <= incoming.len() {
            queued[dst..dst + len].copy_from_slice(&incoming[src..src + len]);
        }
    }
}
