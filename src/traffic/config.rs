use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    #[default]
    Strided,
    Random,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub num_requesters: usize,
    pub requests_per_requester: u32,
    /// Requests awaiting a response, per requester.
    pub max_outstanding: usize,
    pub pattern: PatternKind,
    pub req_bytes: u32,
    /// Distance between consecutive strided requests, in units of `req_bytes`.
    pub stride: u64,
    pub base: u64,
    pub span: u64,
    pub mix: OpMix,
    pub seed: u64,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            num_requesters: 2,
            requests_per_requester: 256,
            max_outstanding: 16,
            pattern: PatternKind::Strided,
            req_bytes: 64,
            stride: 1,
            base: 0x1_0000_0000,
            span: 1 << 20,
            mix: OpMix::default(),
            seed: 0,
        }
    }
}

impl TrafficConfig {
    pub fn ensure_valid(&self) {
        assert!(self.num_requesters > 0, "num_requesters must be > 0");
        assert!(self.max_outstanding > 0, "max_outstanding must be > 0");
        assert!(self.req_bytes > 0, "req_bytes must be > 0");
        assert!(
            self.span >= self.req_bytes as u64,
            "span {:#x} smaller than one request",
            self.span
        );
        assert!(self.mix.total() > 0, "operation mix is empty");
    }
}

/// Relative weights of the operations a requester issues.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct OpMix {
    pub read: u32,
    pub writeback: u32,
    pub partial: u32,
    pub evict: u32,
}

impl Default for OpMix {
    fn default() -> Self {
        Self {
            read: 6,
            writeback: 3,
            partial: 1,
            evict: 0,
        }
    }
}

impl OpMix {
    pub fn total(&self) -> u32 {
        self.read + self.writeback + self.partial + self.evict
    }
}
