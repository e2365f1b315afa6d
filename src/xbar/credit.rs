use std::collections::VecDeque;

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::xbar::packet::CreditGrant;
use crate::xbar::types::{LinkId, ProtocolViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditClass {
    Request,
    Response,
    Data,
}

impl CreditClass {
    pub const ALL: [CreditClass; 3] = [Self::Request, Self::Response, Self::Data];

    fn index(self) -> usize {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::Data => 2,
        }
    }
}

/// Provisioned credit maximum per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CreditLimits {
    pub request: u32,
    pub response: u32,
    pub data: u32,
}

impl Default for CreditLimits {
    fn default() -> Self {
        Self {
            request: 64,
            response: 64,
            data: 64,
        }
    }
}

impl CreditLimits {
    fn get(&self, class: CreditClass) -> u32 {
        match class {
            CreditClass::Request => self.request,
            CreditClass::Response => self.response,
            CreditClass::Data => self.data,
        }
    }
}

pub type Notified = SmallVec<[LinkId; 4]>;

/// Credit counts for one link, with a FIFO of senders waiting on each class.
#[derive(Debug, Clone)]
pub struct CreditPool {
    name: String,
    limits: CreditLimits,
    available: [u32; 3],
    waiting: [VecDeque<LinkId>; 3],
}

impl CreditPool {
    pub fn new(name: impl Into<String>, limits: CreditLimits) -> Self {
        let available = CreditClass::ALL.map(|class| limits.get(class));
        Self {
            name: name.into(),
            limits,
            available,
            waiting: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn available(&self, class: CreditClass) -> u32 {
        self.available[class.index()]
    }

    pub fn max(&self, class: CreditClass) -> u32 {
        self.limits.get(class)
    }

    pub fn is_exhausted(&self, class: CreditClass) -> bool {
        self.available(class) == 0
    }

    pub fn waiting(&self, class: CreditClass) -> impl Iterator<Item = &LinkId> {
        self.waiting[class.index()].iter()
    }

    pub fn grant(&self) -> CreditGrant {
        CreditGrant {
            request: self.available(CreditClass::Request),
            response: self.available(CreditClass::Response),
            data: self.available(CreditClass::Data),
        }
    }

    /// Take one credit.  An empty pool refuses rather than clamping.
    pub fn try_consume(&mut self, class: CreditClass) -> bool {
        let slot = &mut self.available[class.index()];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Queue `link` for a notification once `class` is replenished.
    pub fn wait_for(&mut self, class: CreditClass, link: LinkId) {
        let queue = &mut self.waiting[class.index()];
        if !queue.contains(&link) {
            queue.push_back(link);
        }
    }

    /// Return `count` credits.  When the pool was empty, up to `count` waiters are popped in
    /// arrival order and handed back for notification.
    pub fn release(&mut self, class: CreditClass, count: u32) -> Result<Notified> {
        let idx = class.index();
        let max = self.limits.get(class);
        let available = self.available[idx];
        if available.saturating_add(count) > max {
            return Err(ProtocolViolation::CreditOverflow {
                pool: self.name.clone(),
                class,
                available,
                released: count,
                max,
            }
            .into());
        }

        let notified = if available == 0 {
            self.pop_waiters(idx, count)
        } else {
            Notified::new()
        };
        self.available[idx] = available + count;
        if count > 0 {
            debug!(
                "{}: released {} {:?} credits ({} available, {} notified)",
                self.name,
                count,
                class,
                self.available[idx],
                notified.len()
            );
        }
        Ok(notified)
    }

    /// Pop at most one waiter per credit currently available.
    pub fn wake_waiters(&mut self, class: CreditClass) -> Notified {
        let idx = class.index();
        self.pop_waiters(idx, self.available[idx])
    }

    fn pop_waiters(&mut self, idx: usize, count: u32) -> Notified {
        let queue = &mut self.waiting[idx];
        let take = queue.len().min(count as usize);
        queue.drain(..take).collect()
    }

    pub fn reset(&mut self) {
        self.available = CreditClass::ALL.map(|class| self.limits.get(class));
        self.waiting.iter_mut().for_each(VecDeque::clear);
    }
}

/// All credit pools owned by one crossbar: one per downstream link plus the local pool that
/// describes this crossbar's own receive buffers.
#[derive(Debug, Clone)]
pub struct CreditLedger {
    remote: Vec<CreditPool>,
    local: CreditPool,
}

impl CreditLedger {
    pub fn new(xbar: &str, num_remote: usize, limits: CreditLimits) -> Self {
        Self {
            remote: (0..num_remote)
                .map(|id| CreditPool::new(format!("{xbar}.credits[{id}]"), limits))
                .collect(),
            local: CreditPool::new(format!("{xbar}.credits.local"), limits),
        }
    }

    pub fn remote(&self, link: LinkId) -> &CreditPool {
        &self.remote[link]
    }

    pub fn remote_mut(&mut self, link: LinkId) -> &mut CreditPool {
        &mut self.remote[link]
    }

    pub fn local(&self) -> &CreditPool {
        &self.local
    }

    pub fn reset(&mut self) {
        self.remote.iter_mut().for_each(CreditPool::reset);
        self.local.reset();
    }
}
