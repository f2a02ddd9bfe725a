//! Topology fixtures for fabric tests
//!
//! Provides reusable bridge configurations and wiring plans

use crate::fabric::{BridgeHandle, Fabric, FabricError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstp::{PortConfig, RstpConfig};
use rstp_types::MacAddress;
use tracing_subscriber::EnvFilter;

/// Locally administered unicast prefix for fixture addresses.
const ADDRESS_BASE: u64 = 0x0200_0000_0000;

/// Link costs drawn for random meshes.
const MESH_LINK_COSTS: [u32; 4] = [2, 4, 19, 100];

/// Installs a test-friendly subscriber honoring `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Bridge `index` with ports `1..=ports`, default timers and auto-edge.
pub fn bridge_config(priority: u16, index: u64, ports: u16) -> RstpConfig {
    RstpConfig::new(priority, MacAddress::from_u64(ADDRESS_BASE | index)).with_ports(1..=ports)
}

/// A link between `a:a_port` and `b:b_port`, by bridge position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSpec {
    pub a: usize,
    pub a_port: u16,
    pub b: usize,
    pub b_port: u16,
}

/// Bridge configurations plus the links between them.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub bridges: Vec<RstpConfig>,
    pub links: Vec<LinkSpec>,
}

impl Topology {
    /// Three bridges A (priority 0), B (1) and C (2), fully meshed:
    /// A:1-B:1, A:2-C:1, B:2-C:2. C has an unconnected port 3.
    pub fn triangle() -> Self {
        Self {
            bridges: vec![
                bridge_config(0, 0xa, 2),
                bridge_config(1, 0xb, 2),
                bridge_config(2, 0xc, 3),
            ],
            links: vec![
                LinkSpec { a: 0, a_port: 1, b: 1, b_port: 1 },
                LinkSpec { a: 0, a_port: 2, b: 2, b_port: 1 },
                LinkSpec { a: 1, a_port: 2, b: 2, b_port: 2 },
            ],
        }
    }

    /// `size` bridges with default priority in a ring; port 1 leads to the
    /// next bridge, port 2 to the previous one.
    pub fn ring(size: usize) -> Self {
        let bridges = (0..size)
            .map(|index| bridge_config(rstp_types::DEFAULT_BRIDGE_PRIORITY, index as u64 + 1, 2))
            .collect();
        let links = (0..size)
            .map(|index| LinkSpec {
                a: index,
                a_port: 1,
                b: (index + 1) % size,
                b_port: 2,
            })
            .collect();
        Self { bridges, links }
    }

    /// A connected random mesh: a random tree over `size` bridges plus
    /// `extra_links` more links, priorities and link costs drawn from `seed`.
    pub fn random_mesh(seed: u64, size: usize, extra_links: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut next_port = vec![1u16; size];
        let mut links = Vec::new();
        let mut costs = Vec::new();

        let mut add_link = |a: usize, b: usize, cost: u32, links: &mut Vec<LinkSpec>| {
            links.push(LinkSpec {
                a,
                a_port: next_port[a],
                b,
                b_port: next_port[b],
            });
            costs.push(cost);
            next_port[a] += 1;
            next_port[b] += 1;
        };

        for b in 1..size {
            let a = rng.gen_range(0..b);
            let cost = MESH_LINK_COSTS[rng.gen_range(0..MESH_LINK_COSTS.len())];
            add_link(a, b, cost, &mut links);
        }
        if size > 1 {
            for _ in 0..extra_links {
                let a = rng.gen_range(0..size);
                let mut b = rng.gen_range(0..size - 1);
                if b >= a {
                    b += 1;
                }
                let cost = MESH_LINK_COSTS[rng.gen_range(0..MESH_LINK_COSTS.len())];
                add_link(a, b, cost, &mut links);
            }
        }

        let mut bridges: Vec<RstpConfig> = (0..size)
            .map(|index| {
                let priority = rng.gen_range(0..16u16) * 4096;
                RstpConfig::new(priority, MacAddress::from_u64(ADDRESS_BASE | (index as u64 + 1)))
            })
            .collect();
        for (link, cost) in links.iter().zip(costs) {
            bridges[link.a]
                .ports
                .push(PortConfig::new(link.a_port).with_link_cost(cost));
            bridges[link.b]
                .ports
                .push(PortConfig::new(link.b_port).with_link_cost(cost));
        }

        Self { bridges, links }
    }

    /// Creates the fabric and wires it, without starting it.
    pub fn build(&self) -> Result<(Fabric, Vec<BridgeHandle>), FabricError> {
        let mut fabric = Fabric::new();
        let handles = self
            .bridges
            .iter()
            .map(|config| fabric.add_bridge(config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        for link in &self.links {
            fabric.connect(handles[link.a], link.a_port, handles[link.b], link.b_port)?;
        }
        Ok((fabric, handles))
    }

    /// Builds the fabric and starts every bridge at time zero.
    pub fn start(&self) -> Result<(Fabric, Vec<BridgeHandle>), FabricError> {
        let (mut fabric, handles) = self.build()?;
        fabric.start()?;
        Ok((fabric, handles))
    }
}
