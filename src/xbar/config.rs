use serde::Deserialize;

use crate::sim::config::Config;
use crate::timeq::{Cycle, Tick};
use crate::xbar::codec::{FlitRole, FLIT_SIZE};
use crate::xbar::credit::CreditLimits;
use crate::xbar::link::AddrRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum XbarVariant {
    /// Host-side controller: credit admission, packs requests, unpacks responses.
    Controller,
    /// Memory-side device: unpacks requests, packs and combines responses.
    Device,
    /// Plain non-coherent crossbar.
    #[default]
    Plain,
}

/// What a crossbar instance does on top of plain routing and arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Capabilities {
    pub credit_admission: bool,
    pub codec: Option<FlitRole>,
    pub response_combining: bool,
}

impl XbarVariant {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Controller => Capabilities {
                credit_admission: true,
                codec: Some(FlitRole::Host),
                response_combining: false,
            },
            Self::Device => Capabilities {
                credit_admission: false,
                codec: Some(FlitRole::Device),
                response_combining: true,
            },
            Self::Plain => Capabilities {
                credit_admission: false,
                codec: None,
                response_combining: false,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct XbarConfig {
    pub name: String,
    pub variant: XbarVariant,
    /// Overrides the variant's capability preset.
    pub capabilities: Option<Capabilities>,
    pub num_upstream: usize,
    pub num_downstream: usize,
    /// Adds one more downstream link that catches every unmatched address.
    pub default_downstream: bool,
    pub downstream_ranges: Vec<AddrRange>,
    pub clock_period: Tick,
    /// Datapath width in bytes per cycle.
    pub width: u32,
    pub frontend_latency: Cycle,
    pub forward_latency: Cycle,
    pub response_latency: Cycle,
    pub flit_size: u32,
    pub queue_capacity: usize,
    pub credits: CreditLimits,
}

impl Config for XbarConfig {}

impl Default for XbarConfig {
    fn default() -> Self {
        Self {
            name: "xbar".to_string(),
            variant: XbarVariant::Plain,
            capabilities: None,
            num_upstream: 1,
            num_downstream: 1,
            default_downstream: false,
            downstream_ranges: Vec::new(),
            clock_period: 1000, // 1 GHz in ps
            width: 16,
            frontend_latency: 2,
            forward_latency: 3,
            response_latency: 3,
            flit_size: FLIT_SIZE,
            queue_capacity: 64,
            credits: CreditLimits::default(),
        }
    }
}

impl XbarConfig {
    pub fn controller() -> Self {
        Self {
            name: "cxl_controller".to_string(),
            variant: XbarVariant::Controller,
            ..Self::default()
        }
    }

    pub fn device() -> Self {
        Self {
            name: "cxl_device".to_string(),
            variant: XbarVariant::Device,
            forward_latency: 2,
            response_latency: 2,
            ..Self::default()
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
            .unwrap_or_else(|| self.variant.capabilities())
    }

    pub fn total_downstream(&self) -> usize {
        self.num_downstream + usize::from(self.default_downstream)
    }

    pub fn ensure_valid(&self) {
        assert!(self.num_upstream > 0, "{}: num_upstream must be > 0", self.name);
        assert!(
            self.total_downstream() > 0,
            "{}: needs at least one downstream link",
            self.name
        );
        assert!(
            self.downstream_ranges.len() <= self.num_downstream,
            "{}: {} address ranges for {} downstream links",
            self.name,
            self.downstream_ranges.len(),
            self.num_downstream
        );
        assert!(self.clock_period > 0, "{}: clock_period must be > 0", self.name);
        assert!(self.width > 0, "{}: width must be > 0", self.name);
        assert!(self.flit_size > 0, "{}: flit_size must be > 0", self.name);
        assert!(self.queue_capacity > 0, "{}: queue_capacity must be > 0", self.name);
    }
}
