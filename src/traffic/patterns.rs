use crate::traffic::config::{OpMix, PatternKind, TrafficConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Read,
    Writeback,
    Partial,
    Evict,
}

impl PatternOp {
    pub fn short(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Writeback => "w",
            Self::Partial => "p",
            Self::Evict => "e",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Walk {
    Strided { stride: u64 },
    Random { slots: u64 },
}

/// Address and operation stream of one requester.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    requester: usize,
    requesters: usize,
    req_bytes: u32,
    base: u64,
    slots: u64,
    walk: Walk,
    mix: OpMix,
    rng: StdRng,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig, requester: usize) -> Self {
        let req_bytes = config.req_bytes.max(1);
        let slots = (config.span / req_bytes as u64).max(1);
        let walk = match config.pattern {
            PatternKind::Strided => Walk::Strided {
                stride: config.stride.max(1),
            },
            PatternKind::Random => Walk::Random { slots },
        };
        Self {
            requester,
            requesters: config.num_requesters.max(1),
            req_bytes,
            base: config.base,
            slots,
            walk,
            mix: config.mix,
            rng: StdRng::seed_from_u64(mix64(config.seed ^ requester as u64)),
        }
    }

    pub fn name(&self) -> String {
        match self.walk {
            Walk::Strided { stride } => format!("strided({})@{}", stride, self.req_bytes),
            Walk::Random { slots } => format!("random({})@{}", slots, self.req_bytes),
        }
    }

    pub fn req_bytes(&self) -> u32 {
        self.req_bytes
    }

    /// Address of this requester's `req_idx`-th request.  Strided streams interleave requesters
    /// slot by slot.
    pub fn addr(&mut self, req_idx: u32) -> u64 {
        let slot = match self.walk {
            Walk::Strided { stride } => {
                let lane = req_idx as u64 * self.requesters as u64 + self.requester as u64;
                lane.wrapping_mul(stride) % self.slots
            }
            Walk::Random { slots } => self.rng.gen_range(0..slots),
        };
        self.base
            .saturating_add(slot.saturating_mul(self.req_bytes as u64))
    }

    pub fn op(&mut self) -> PatternOp {
        let total = self.mix.total().max(1);
        let mut pick = self.rng.gen_range(0..total);
        for (weight, op) in [
            (self.mix.read, PatternOp::Read),
            (self.mix.writeback, PatternOp::Writeback),
            (self.mix.partial, PatternOp::Partial),
        ] {
            if pick < weight {
                return op;
            }
            pick -= weight;
        }
        if self.mix.evict > 0 {
            PatternOp::Evict
        } else {
            PatternOp::Read
        }
    }
}

fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
