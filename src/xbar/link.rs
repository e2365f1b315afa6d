use anyhow::Result;
use serde::Deserialize;

use crate::timeq::PacketQueue;
use crate::xbar::packet::Transaction;
use crate::xbar::types::{LinkId, ProtocolViolation};

/// Half-open address window `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AddrRange {
    pub start: u64,
    pub size: u64,
}

impl AddrRange {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn intersects(&self, other: &AddrRange) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A crossbar endpoint and the units waiting to leave through it.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    name: String,
    pub outbound: PacketQueue<Transaction>,
}

impl Link {
    pub fn new(id: LinkId, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            id,
            name: name.into(),
            outbound: PacketQueue::new(capacity),
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outstanding(&self) -> usize {
        self.outbound.len()
    }
}

/// Address-range routing over the downstream links.
#[derive(Debug, Clone, Default)]
pub struct AddrMap {
    ranges: Vec<(AddrRange, LinkId)>,
    default_link: Option<LinkId>,
}

impl AddrMap {
    pub fn new(default_link: Option<LinkId>) -> Self {
        Self {
            ranges: Vec::new(),
            default_link,
        }
    }

    pub fn add(&mut self, range: AddrRange, link: LinkId) {
        assert!(
            self.ranges.iter().all(|(r, _)| !r.intersects(&range)),
            "address range {:#x}..{:#x} overlaps an existing range",
            range.start,
            range.end()
        );
        self.ranges.push((range, link));
    }

    pub fn default_link(&self) -> Option<LinkId> {
        self.default_link
    }

    pub fn ranges(&self) -> impl Iterator<Item = &(AddrRange, LinkId)> {
        self.ranges.iter()
    }

    pub fn resolve(&self, xbar: &str, addr: u64, src: LinkId) -> Result<LinkId> {
        self.ranges
            .iter()
            .find(|(range, _)| range.contains(addr))
            .map(|&(_, link)| link)
            .or(self.default_link)
            .ok_or_else(|| {
                ProtocolViolation::NoDestination {
                    xbar: xbar.to_string(),
                    addr,
                    link: src,
                }
                .into()
            })
    }
}
