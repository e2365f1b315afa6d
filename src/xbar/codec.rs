//! Flit packing between the logical transaction vocabulary and the link-level one.

use anyhow::Result;
use serde::Deserialize;

use crate::xbar::packet::{CreditGrant, MemCmd, Shadow, Transaction};
use crate::xbar::types::ProtocolViolation;

/// Size of one flit on the wire, in bytes (528 bits).
pub const FLIT_SIZE: u32 = 528 / 8;
/// Logical units one flit can carry: the unit that opens it plus the reserved slots.
pub const FLIT_SLOTS: u8 = 5;
/// Data-response slots a freshly opened flit still reserves.
pub const DRS_SLOTS: u8 = 3;
/// Non-data-response slots a freshly opened flit still reserves.
pub const NDR_SLOTS: u8 = 1;
/// Consecutive write/data units after which a combined data flit is emitted.
pub const ROLLOVER_THRESHOLD: u8 = 4;

/// Which end of the link this codec sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlitRole {
    /// Packs requests and unpacks responses.
    Host,
    /// Unpacks requests and packs responses.
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Encoded {
    /// A combined data flit follows this unit.
    pub data_flit: bool,
}

#[derive(Debug, Clone)]
pub struct FlitCodec {
    role: FlitRole,
    flit_size: u32,
    last_rollover: u8,
}

impl FlitCodec {
    pub fn new(role: FlitRole, flit_size: u32) -> Self {
        assert!(flit_size > 0, "flit_size must be > 0");
        Self {
            role,
            flit_size,
            last_rollover: 0,
        }
    }

    pub fn role(&self) -> FlitRole {
        self.role
    }

    pub fn last_rollover(&self) -> u8 {
        self.last_rollover
    }

    pub fn reset(&mut self) {
        self.last_rollover = 0;
    }

    pub fn encode(&mut self, tx: &mut Transaction, advertised: CreditGrant) -> Result<Encoded> {
        if tx.shadow.is_some() {
            return Err(ProtocolViolation::ShadowAlreadySet {
                id: tx.id,
                cmd: tx.cmd,
            }
            .into());
        }

        let mut encoded = Encoded::default();
        let wire_cmd = match tx.cmd {
            MemCmd::ReadReq => {
                tx.rollover = 0;
                self.last_rollover = 0;
                MemCmd::MemRd
            }
            MemCmd::Writeback => {
                encoded.data_flit = self.advance(tx);
                MemCmd::MemWr
            }
            MemCmd::WritePartial => {
                tx.rollover = 0;
                MemCmd::MemWrPtl
            }
            MemCmd::CleanEvict => {
                tx.rollover = 0;
                MemCmd::MemClnEvct
            }
            MemCmd::ReadResp => {
                encoded.data_flit = self.advance(tx);
                tx.reset_reservations();
                MemCmd::MemData
            }
            MemCmd::WriteResp => {
                tx.rollover = 0;
                self.last_rollover = 0;
                tx.reset_reservations();
                MemCmd::Cmp
            }
            cmd => {
                return Err(ProtocolViolation::UnsupportedCommand {
                    stage: "encode",
                    id: tx.id,
                    cmd,
                }
                .into())
            }
        };

        tx.shadow = Some(Shadow {
            cmd: tx.cmd,
            size: tx.size,
        });
        let wire_size = if encoded.data_flit {
            self.flit_size * 2
        } else {
            self.flit_size
        };
        tx.cmd = wire_cmd;
        tx.size = wire_size;
        tx.wire_cmd = Some(wire_cmd);
        tx.wire_size = wire_size;
        tx.advertised = advertised;
        Ok(encoded)
    }

    pub fn decode(&self, tx: &mut Transaction) -> Result<()> {
        if !tx.cmd.is_wire() || tx.cmd == MemCmd::DataFlit {
            return Err(ProtocolViolation::UnsupportedCommand {
                stage: "decode",
                id: tx.id,
                cmd: tx.cmd,
            }
            .into());
        }
        let Some(shadow) = tx.shadow.take() else {
            return Err(ProtocolViolation::MissingShadow {
                id: tx.id,
                cmd: tx.cmd,
            }
            .into());
        };
        tx.cmd = shadow.cmd;
        tx.size = shadow.size;
        Ok(())
    }

    // Tag the unit with its position in the window and move the counter along.  Only the host
    // emits the combined data flit; the device just wraps.
    fn advance(&mut self, tx: &mut Transaction) -> bool {
        tx.rollover = self.last_rollover;
        self.last_rollover = (self.last_rollover + 4) - 3;
        if self.last_rollover < ROLLOVER_THRESHOLD {
            return false;
        }
        self.last_rollover = 0;
        self.role == FlitRole::Host
    }
}
