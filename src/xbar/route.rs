use std::collections::HashMap;

use anyhow::Result;

use crate::xbar::packet::MemCmd;
use crate::xbar::types::{LinkId, ProtocolViolation, RequestId};

/// Outstanding request identity -> upstream link that must see the response.
#[derive(Debug, Default)]
pub struct RouteTable {
    xbar: String,
    routes: HashMap<RequestId, LinkId>,
}

impl RouteTable {
    pub fn new(xbar: impl Into<String>) -> Self {
        Self {
            xbar: xbar.into(),
            routes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.routes.contains_key(&id)
    }

    pub fn insert(&mut self, id: RequestId, link: LinkId) -> Result<()> {
        if let Some(&existing) = self.routes.get(&id) {
            return Err(ProtocolViolation::DuplicateRoute {
                xbar: self.xbar.clone(),
                id,
                existing,
                link,
            }
            .into());
        }
        self.routes.insert(id, link);
        Ok(())
    }

    /// `src` and `cmd` only feed the diagnostic when the entry is missing.
    pub fn lookup(&self, id: RequestId, cmd: MemCmd, src: LinkId) -> Result<LinkId> {
        self.routes
            .get(&id)
            .copied()
            .ok_or_else(|| self.unrouted(id, cmd, src))
    }

    pub fn remove(&mut self, id: RequestId, cmd: MemCmd, src: LinkId) -> Result<LinkId> {
        match self.routes.remove(&id) {
            Some(link) => Ok(link),
            None => Err(self.unrouted(id, cmd, src)),
        }
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    fn unrouted(&self, id: RequestId, cmd: MemCmd, link: LinkId) -> anyhow::Error {
        ProtocolViolation::UnroutedResponse {
            xbar: self.xbar.clone(),
            id,
            cmd,
            link,
        }
        .into()
    }
}
