pub mod codec;
pub mod combiner;
pub mod config;
pub mod credit;
mod crossbar;
pub mod layer;
pub mod link;
pub mod packet;
pub mod route;
mod stats;
pub mod types;

#[cfg(test)]
mod tests;

pub use codec::{FlitCodec, FlitRole, FLIT_SIZE};
pub use config::{Capabilities, XbarConfig, XbarVariant};
pub use credit::{CreditClass, CreditLedger, CreditLimits, CreditPool};
pub use crossbar::{Accepted, Admit, Crossbar, MemSidePeer};
pub use layer::{ArbitrationLayer, LayerState};
pub use link::{AddrMap, AddrRange, Link};
pub use packet::{CreditGrant, MemCmd, Shadow, Transaction};
pub use route::RouteTable;
pub use stats::XbarStats;
pub use types::{
    LinkId, ProtocolViolation, RejectReason, RejectWith, RequestId, RetryCause, RetryNotice, Side,
};
