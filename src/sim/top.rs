use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use toml::Table;

use crate::sim::config::{Config, MemoryConfig, SimConfig};
use crate::sim::memory::{MemoryEndpoint, MemoryStats};
use crate::timeq::Tick;
use crate::traffic::config::TrafficConfig;
use crate::traffic::driver::{Requester, RequesterStats};
use crate::xbar::{
    AddrRange, CreditClass, Crossbar, LinkId, MemSidePeer, Side, Transaction, XbarConfig,
    XbarStats,
};

#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub sim: SimConfig,
    pub controller: XbarConfig,
    pub device: XbarConfig,
    pub memory: MemoryConfig,
    pub traffic: TrafficConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sim: SimConfig::default(),
            controller: XbarConfig::controller(),
            device: XbarConfig::device(),
            memory: MemoryConfig::default(),
            traffic: TrafficConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn from_table(table: &Table) -> Self {
        Self {
            sim: SimConfig::from_section(table.get("sim")),
            controller: XbarConfig::from_section(table.get("controller")),
            device: XbarConfig::from_section(table.get("device")),
            memory: MemoryConfig::from_section(table.get("memory")),
            traffic: TrafficConfig::from_section(table.get("traffic")),
        }
    }

    /// Fill in the wiring the sections leave implicit: one controller link per requester, the
    /// traffic window split evenly over the devices, and a catch-all link on every device.
    pub fn normalize(&mut self) {
        self.controller.num_upstream = self.traffic.num_requesters;
        if self.controller.downstream_ranges.is_empty() && !self.controller.default_downstream {
            let links = self.controller.num_downstream.max(1) as u64;
            let share = (self.traffic.span / links).max(1);
            self.controller.downstream_ranges = (0..links)
                .map(|i| {
                    let size = if i + 1 == links {
                        self.traffic.span - share * i
                    } else {
                        share
                    };
                    AddrRange::new(self.traffic.base + share * i, size)
                })
                .collect();
        }
        self.device.num_upstream = 1;
        if self.device.downstream_ranges.is_empty() && !self.device.default_downstream {
            self.device.num_downstream = 0;
            self.device.default_downstream = true;
        }
    }

    pub fn ensure_valid(&self) {
        self.sim.ensure_valid();
        self.traffic.ensure_valid();
        self.controller.ensure_valid();
        self.device.ensure_valid();
        assert_eq!(
            self.device.total_downstream(),
            1,
            "each device drives exactly one memory"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub ticks: Tick,
    pub timed_out: bool,
    pub credits_restored: bool,
    pub outstanding_routes: usize,
    pub requesters: RequesterStats,
    pub avg_latency: f64,
    pub controller: XbarStats,
    pub devices: XbarStats,
    pub memory: MemoryStats,
}

/// Requesters, one controller, and one device plus memory per controller downstream link.
pub struct CxlSystem {
    config: SystemConfig,
    controller: Crossbar,
    devices: Vec<Crossbar>,
    memories: Vec<MemoryEndpoint>,
    requesters: Vec<Requester>,
    now: Tick,
}

// Atomic and functional accesses leaving the controller: through device j into memory j.
struct DevicePeer<'a> {
    devices: &'a mut [Crossbar],
    memories: &'a mut [MemoryEndpoint],
}

impl MemSidePeer for DevicePeer<'_> {
    fn send_atomic(&mut self, link: LinkId, tx: &mut Transaction) -> Result<Tick> {
        self.devices[link].handle_atomic(0, tx, &mut self.memories[link])
    }

    fn send_functional(&mut self, link: LinkId, tx: &mut Transaction) -> Result<()> {
        self.devices[link].handle_functional(0, tx, &mut self.memories[link])
    }
}

impl CxlSystem {
    pub fn new(mut config: SystemConfig) -> Self {
        config.normalize();
        config.ensure_valid();

        let controller = Crossbar::new(config.controller.clone());
        let devices: Vec<_> = (0..controller.num_downstream())
            .map(|j| {
                Crossbar::new(XbarConfig {
                    name: format!("{}{}", config.device.name, j),
                    ..config.device.clone()
                })
            })
            .collect();
        let memories = (0..devices.len())
            .map(|j| MemoryEndpoint::new(format!("mem{j}"), config.memory))
            .collect();
        let requesters = (0..config.traffic.num_requesters)
            .map(|link| Requester::new(&config.traffic, link))
            .collect();

        Self {
            config,
            controller,
            devices,
            memories,
            requesters,
            now: 0,
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn controller(&self) -> &Crossbar {
        &self.controller
    }

    pub fn devices(&self) -> &[Crossbar] {
        &self.devices
    }

    pub fn memories(&self) -> &[MemoryEndpoint] {
        &self.memories
    }

    pub fn requesters(&self) -> &[Requester] {
        &self.requesters
    }

    pub fn finished(&self) -> bool {
        self.requesters.iter().all(Requester::is_done)
            && self.controller.is_quiescent()
            && self.devices.iter().all(Crossbar::is_quiescent)
            && self.memories.iter().all(MemoryEndpoint::is_idle)
    }

    pub fn credits_restored(&self) -> bool {
        (0..self.controller.num_downstream()).all(|j| {
            let pool = self.controller.credits().remote(j);
            CreditClass::ALL
                .iter()
                .all(|&class| pool.available(class) == pool.max(class))
        })
    }

    /// Untimed read or write through the whole hierarchy.  Returns the memory latency.
    pub fn atomic(&mut self, src: LinkId, tx: &mut Transaction) -> Result<Tick> {
        let mut peer = DevicePeer {
            devices: &mut self.devices,
            memories: &mut self.memories,
        };
        self.controller.handle_atomic(src, tx, &mut peer)
    }

    /// Debug access that sees data still queued in the crossbars.
    pub fn functional(&mut self, src: LinkId, tx: &mut Transaction) -> Result<()> {
        let mut peer = DevicePeer {
            devices: &mut self.devices,
            memories: &mut self.memories,
        };
        self.controller.handle_functional(src, tx, &mut peer)
    }

    pub fn simulate(&mut self) -> Result<SimReport> {
        let timeout = self.config.sim.timeout;
        while !self.finished() {
            if self.now >= timeout {
                warn!("timed out at tick {} with traffic still in flight", self.now);
                return Ok(self.report(true));
            }
            self.step()
                .with_context(|| format!("simulation stopped at tick {}", self.now))?;
        }
        info!(
            "all traffic drained at tick {} (credits restored: {})",
            self.now,
            self.credits_restored()
        );
        Ok(self.report(false))
    }

    /// Advance the whole system by one `tick_step`.
    pub fn step(&mut self) -> Result<()> {
        let now = self.now;
        // units become visible at the far end of a link after the wire delay
        let arrive = now.saturating_sub(self.config.sim.link_latency);

        self.controller.tick(now);
        self.devices.iter_mut().for_each(|dev| dev.tick(now));
        self.route_notices();

        for (link, requester) in self.requesters.iter_mut().enumerate() {
            let Some(tx) = requester.next_request(now) else {
                continue;
            };
            let (id, needs_response, issued_at) = (tx.id, tx.needs_response(), tx.issued_at);
            match self.controller.handle_request(now, link, tx)? {
                Ok(_) => requester.on_accepted(id, needs_response, issued_at),
                Err(reject) => requester.on_rejected(reject),
            }
        }

        for (j, dev) in self.devices.iter_mut().enumerate() {
            while let Some(tx) = self.controller.peek_ready_request(j, arrive).cloned() {
                if dev.handle_request(now, 0, tx)?.is_err() {
                    break;
                }
                self.controller.take_ready_request(j, arrive);
            }
        }

        for (dev, mem) in self.devices.iter_mut().zip(self.memories.iter_mut()) {
            while let Some(tx) = dev.peek_ready_request(0, arrive).cloned() {
                if mem.recv_request(now, tx)?.is_err() {
                    break;
                }
                dev.take_ready_request(0, arrive);
            }
            while let Some(tx) = mem.peek_response(now).cloned() {
                if dev.handle_response(now, 0, tx)?.is_err() {
                    break;
                }
                mem.take_response(now);
            }
        }

        for (j, dev) in self.devices.iter_mut().enumerate() {
            while let Some(tx) = dev.peek_ready_response(0, arrive).cloned() {
                if self.controller.handle_response(now, j, tx)?.is_err() {
                    break;
                }
                dev.take_ready_response(0, arrive);
            }
        }

        for (link, requester) in self.requesters.iter_mut().enumerate() {
            while let Some(tx) = self.controller.take_ready_response(link, arrive) {
                requester.on_response(now, tx)?;
            }
        }

        self.now = now + self.config.sim.tick_step;
        Ok(())
    }

    fn route_notices(&mut self) {
        while let Some(notice) = self.controller.pop_notice() {
            match notice.side {
                Side::Upstream => self.requesters[notice.link].on_notice(&notice),
                // device links are retried every step anyway
                Side::Downstream => {}
            }
        }
        for dev in self.devices.iter_mut() {
            while let Some(notice) = dev.pop_notice() {
                debug!("{}: dropped {:?}", dev.name(), notice);
            }
        }
    }

    pub fn report(&self, timed_out: bool) -> SimReport {
        let mut requesters = RequesterStats::default();
        for requester in &self.requesters {
            requesters += requester.stats();
        }
        let mut devices = XbarStats::default();
        for dev in &self.devices {
            devices += dev.stats();
        }
        let mut memory = MemoryStats::default();
        for mem in &self.memories {
            memory += mem.stats();
        }
        SimReport {
            ticks: self.now,
            timed_out,
            credits_restored: self.credits_restored(),
            outstanding_routes: self.controller.routes().len()
                + self.devices.iter().map(|d| d.routes().len()).sum::<usize>(),
            avg_latency: requesters.avg_latency(),
            requesters,
            controller: self.controller.stats().clone(),
            devices,
            memory,
        }
    }

    pub fn reset(&mut self) {
        self.controller.reset();
        self.devices.iter_mut().for_each(Crossbar::reset);
        self.memories.iter_mut().for_each(MemoryEndpoint::reset);
        self.requesters = (0..self.config.traffic.num_requesters)
            .map(|link| Requester::new(&self.config.traffic, link))
            .collect();
        self.now = 0;
    }
}
