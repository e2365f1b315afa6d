use std::fmt;

use serde::{Deserialize, Serialize};

use crate::timeq::Tick;
use crate::xbar::credit::CreditClass;
use crate::xbar::packet::MemCmd;

pub type LinkId = usize;

/// Opaque identity used to correlate a response with the request that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Which side of a crossbar a link sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Requester-facing; requests arrive here and responses leave here.
    Upstream,
    /// Memory-facing; requests leave here and responses arrive here.
    Downstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Busy,
    QueueFull,
    NoCredit,
}

/// Backpressure carrying the rejected transaction back to the sender.
#[derive(Debug, Clone)]
pub struct RejectWith<T> {
    /// `None` means the sender must wait for a retry notice.
    pub retry_at: Option<Tick>,
    pub reason: RejectReason,
    pub payload: T,
}

impl<T> RejectWith<T> {
    pub fn new(payload: T, retry_at: Option<Tick>, reason: RejectReason) -> Self {
        Self {
            payload,
            retry_at,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryCause {
    /// The arbitration layer became free and this source is at the head of its queue.
    LayerFree,
    /// Credits were returned to a pool this source was waiting on.
    CreditReturned,
}

/// Retry notification for a source that was previously turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNotice {
    pub side: Side,
    pub link: LinkId,
    pub cause: RetryCause,
    pub at: Tick,
}

/// Conditions that mean the model itself is broken.  None of these are recoverable; the run
/// must stop and report the offending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    UnroutedResponse {
        xbar: String,
        id: RequestId,
        cmd: MemCmd,
        link: LinkId,
    },
    DuplicateRoute {
        xbar: String,
        id: RequestId,
        existing: LinkId,
        link: LinkId,
    },
    CreditOverflow {
        pool: String,
        class: CreditClass,
        available: u32,
        released: u32,
        max: u32,
    },
    UnsupportedCommand {
        stage: &'static str,
        id: RequestId,
        cmd: MemCmd,
    },
    ShadowAlreadySet {
        id: RequestId,
        cmd: MemCmd,
    },
    MissingShadow {
        id: RequestId,
        cmd: MemCmd,
    },
    NoDestination {
        xbar: String,
        addr: u64,
        link: LinkId,
    },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnroutedResponse { xbar, id, cmd, link } => write!(
                f,
                "{xbar}: response {cmd} {id} from downstream link {link} has no route entry"
            ),
            Self::DuplicateRoute {
                xbar,
                id,
                existing,
                link,
            } => write!(
                f,
                "{xbar}: {id} from upstream link {link} is already routed to upstream link {existing}"
            ),
            Self::CreditOverflow {
                pool,
                class,
                available,
                released,
                max,
            } => write!(
                f,
                "{pool}: releasing {released} {class:?} credits onto {available} exceeds maximum {max}"
            ),
            Self::UnsupportedCommand { stage, id, cmd } => {
                write!(f, "flit {stage}: unsupported command {cmd} for {id}")
            }
            Self::ShadowAlreadySet { id, cmd } => {
                write!(f, "flit encode: {cmd} {id} is already in wire form")
            }
            Self::MissingShadow { id, cmd } => {
                write!(f, "flit decode: {cmd} {id} was never encoded")
            }
            Self::NoDestination { xbar, addr, link } => write!(
                f,
                "{xbar}: no downstream link covers {addr:#x} (from link {link}) and no default link exists"
            ),
        }
    }
}

impl std::error::Error for ProtocolViolation {}
