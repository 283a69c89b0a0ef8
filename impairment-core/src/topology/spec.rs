use crate::topology::Generation;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

/// Compiled topology as handed over by the topology compiler, before validation
pub struct TopologySpec {
    pub name: String,
    pub generation: Generation,
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

pub struct NodeSpec {
    pub id: String,
    pub role: NodeRole,
    pub capabilities: Vec<Capability>,
    pub asn: Option<u32>,
}

pub struct LinkSpec {
    /// Defaults to `<source>-<target>` when absent
    pub id: Option<String>,
    pub source: LinkEndSpec,
    pub target: LinkEndSpec,
    pub capacity_bps: Option<u64>,
    pub delay: Option<Duration>,
}

pub struct LinkEndSpec {
    pub node: String,
    /// Derived as `<node>-eth<n>` when absent
    pub interface: Option<String>,
}

impl LinkEndSpec {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: None,
        }
    }

    pub fn with_interface(node: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            interface: Some(interface.into()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Switch,
    Router,
    Host,
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeRole::Switch => "switch",
            NodeRole::Router => "router",
            NodeRole::Host => "host",
        };
        f.write_str(name)
    }
}

/// Routing daemons a router may run
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Bgp,
    Ospf,
    Ospf6,
    Isis,
    Rip,
    Ripng,
    Pim,
    Ldp,
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Capability::Bgp => "bgp",
            Capability::Ospf => "ospf",
            Capability::Ospf6 => "ospf6",
            Capability::Isis => "isis",
            Capability::Rip => "rip",
            Capability::Ripng => "ripng",
            Capability::Pim => "pim",
            Capability::Ldp => "ldp",
        };
        f.write_str(name)
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let capability = match s.to_ascii_lowercase().as_str() {
            "bgp" | "bgpd" => Capability::Bgp,
            "ospf" | "ospfd" => Capability::Ospf,
            "ospf6" | "ospf6d" => Capability::Ospf6,
            "isis" | "isisd" => Capability::Isis,
            "rip" | "ripd" => Capability::Rip,
            "ripng" | "ripngd" => Capability::Ripng,
            "pim" | "pimd" => Capability::Pim,
            "ldp" | "ldpd" => Capability::Ldp,
            _ => return Err(UnknownCapability(s.to_string())),
        };
        Ok(capability)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown routing capability `{0}`")]
pub struct UnknownCapability(pub String);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_capability_accepts_daemon_names() {
        assert_eq!("bgpd".parse::<Capability>().unwrap(), Capability::Bgp);
        assert_eq!("OSPF".parse::<Capability>().unwrap(), Capability::Ospf);
        assert!("eigrp".parse::<Capability>().is_err());
    }
}
