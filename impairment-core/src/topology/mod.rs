//! Topology graph
//!
//! A [`Topology`] is immutable for the lifetime of a generation. Replacing it requires compiling a
//! new [`TopologySpec`] with a strictly newer [`Generation`].

pub mod spec;

use crate::util::string_id;
use serde::{Deserialize, Serialize};
use spec::{Capability, LinkEndSpec, NodeRole, TopologySpec};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

string_id!(NodeId);
string_id!(LinkId);
string_id!(InterfaceName);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// A concrete (node, interface) pair, the unit the data plane operates on
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub node: NodeId,
    pub interface: InterfaceName,
}

impl Endpoint {
    pub fn new(node: impl Into<NodeId>, interface: impl Into<InterfaceName>) -> Self {
        Self {
            node: node.into(),
            interface: interface.into(),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.node, self.interface)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub capabilities: BTreeSet<Capability>,
    pub asn: Option<u32>,
    /// Interfaces in declaration order
    pub interfaces: Vec<InterfaceName>,
}

impl Node {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Clone, Debug)]
pub struct LinkEnd {
    pub node: NodeId,
    pub interface: InterfaceName,
}

impl LinkEnd {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            node: self.node.clone(),
            interface: self.interface.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Link {
    pub id: LinkId,
    pub source: LinkEnd,
    pub target: LinkEnd,
    pub capacity_bps: Option<u64>,
    pub delay: Option<Duration>,
}

impl Link {
    pub fn connects(&self, a: &NodeId, b: &NodeId) -> bool {
        (&self.source.node == a && &self.target.node == b)
            || (&self.source.node == b && &self.target.node == a)
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source.node == node || &self.target.node == node
    }

    /// Returns the ends of this link, with the end owned by `node` first
    pub fn oriented_from(&self, node: &NodeId) -> Option<(&LinkEnd, &LinkEnd)> {
        if &self.source.node == node {
            Some((&self.source, &self.target))
        } else if &self.target.node == node {
            Some((&self.target, &self.source))
        } else {
            None
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("duplicate node id `{0}`")]
    DuplicateNode(String),
    #[error("duplicate link id `{0}`")]
    DuplicateLink(String),
    #[error("link `{link}` references unknown node `{node}`")]
    UnknownLinkEndpoint { link: String, node: String },
    #[error("link `{0}` connects a node to itself")]
    SelfLoop(String),
    #[error("interface `{interface}` is declared twice on node `{node}`")]
    DuplicateInterface { node: String, interface: String },
    #[error("node `{node}` is a {role} but declares routing capabilities")]
    CapabilitiesOnNonRouter { node: String, role: NodeRole },
    #[error("router `{node}` runs BGP but has no AS number")]
    MissingAsn { node: String },
}

#[derive(Debug)]
pub struct Topology {
    name: Arc<str>,
    generation: Generation,
    nodes: BTreeMap<NodeId, Node>,
    links: Vec<Link>,
    link_index: HashMap<LinkId, usize>,
}

impl Topology {
    /// Validates `spec` and builds the graph
    ///
    /// Interfaces omitted in a link spec are named after the Mininet convention `<node>-eth<n>`,
    /// where `n` counts the interfaces the node already has.
    pub fn compile(spec: TopologySpec) -> Result<Self, TopologyError> {
        let mut nodes = BTreeMap::new();
        for node in spec.nodes {
            let id = NodeId::from(node.id);
            if node.role != NodeRole::Router && !node.capabilities.is_empty() {
                return Err(TopologyError::CapabilitiesOnNonRouter {
                    node: id.to_string(),
                    role: node.role,
                });
            }
            if node.capabilities.contains(&Capability::Bgp) && node.asn.is_none() {
                return Err(TopologyError::MissingAsn { node: id.to_string() });
            }

            let node = Node {
                id: id.clone(),
                role: node.role,
                capabilities: node.capabilities.into_iter().collect(),
                asn: node.asn,
                interfaces: Vec::new(),
            };

            if nodes.insert(id.clone(), node).is_some() {
                return Err(TopologyError::DuplicateNode(id.to_string()));
            }
        }

        let mut links = Vec::with_capacity(spec.links.len());
        let mut link_index = HashMap::new();
        for link in spec.links {
            let id = LinkId::from(
                link.id
                    .unwrap_or_else(|| format!("{}-{}", link.source.node, link.target.node)),
            );
            if link.source.node == link.target.node {
                return Err(TopologyError::SelfLoop(id.to_string()));
            }

            let source = attach_interface(&mut nodes, &id, link.source)?;
            let target = attach_interface(&mut nodes, &id, link.target)?;

            if link_index.insert(id.clone(), links.len()).is_some() {
                return Err(TopologyError::DuplicateLink(id.to_string()));
            }

            links.push(Link {
                id,
                source,
                target,
                capacity_bps: link.capacity_bps,
                delay: link.delay,
            });
        }

        Ok(Self {
            name: spec.name.into_boxed_str().into(),
            generation: spec.generation,
            nodes,
            links,
            link_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn link(&self, id: &LinkId) -> Option<&Link> {
        self.link_index.get(id).map(|&index| &self.links[index])
    }

    /// Links in declaration order
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// The first declared link between the two nodes, in either direction
    pub fn link_between(&self, a: &NodeId, b: &NodeId) -> Option<&Link> {
        self.links.iter().find(|link| link.connects(a, b))
    }

    pub fn contains_endpoint(&self, endpoint: &Endpoint) -> bool {
        self.nodes
            .get(&endpoint.node)
            .is_some_and(|node| node.interfaces.contains(&endpoint.interface))
    }

    /// Nodes without any link attached
    pub fn isolated_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes
            .values()
            .filter(|node| node.interfaces.is_empty())
            .map(|node| &node.id)
    }
}

fn attach_interface(
    nodes: &mut BTreeMap<NodeId, Node>,
    link: &LinkId,
    end: LinkEndSpec,
) -> Result<LinkEnd, TopologyError> {
    let Some(node) = nodes.get_mut(end.node.as_str()) else {
        return Err(TopologyError::UnknownLinkEndpoint {
            link: link.to_string(),
            node: end.node,
        });
    };

    let interface = InterfaceName::from(
        end.interface
            .unwrap_or_else(|| format!("{}-eth{}", node.id, node.interfaces.len())),
    );
    if node.interfaces.contains(&interface) {
        return Err(TopologyError::DuplicateInterface {
            node: node.id.to_string(),
            interface: interface.to_string(),
        });
    }

    node.interfaces.push(interface.clone());
    Ok(LinkEnd {
        node: node.id.clone(),
        interface,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::spec::{LinkSpec, NodeSpec};

    fn node(id: &str, role: NodeRole) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            role,
            capabilities: Vec::new(),
            asn: None,
        }
    }

    fn link(source: LinkEndSpec, target: LinkEndSpec) -> LinkSpec {
        LinkSpec {
            id: None,
            source,
            target,
            capacity_bps: None,
            delay: None,
        }
    }

    #[test]
    fn test_compile_derives_mininet_interface_names() {
        let topology = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![
                node("h1", NodeRole::Host),
                node("r1", NodeRole::Router),
                node("h2", NodeRole::Host),
            ],
            links: vec![
                link(LinkEndSpec::new("h1"), LinkEndSpec::new("r1")),
                link(
                    LinkEndSpec::new("r1"),
                    LinkEndSpec::with_interface("h2", "uplink"),
                ),
            ],
        })
        .unwrap();

        let r1 = topology.node(&NodeId::from("r1")).unwrap();
        assert_eq!(
            r1.interfaces,
            vec![InterfaceName::from("r1-eth0"), InterfaceName::from("r1-eth1")]
        );

        let link = topology.link(&LinkId::from("r1-h2")).unwrap();
        assert_eq!(link.target.interface.as_str(), "uplink");
        assert!(topology.contains_endpoint(&Endpoint::new("h1", "h1-eth0")));
        assert!(!topology.contains_endpoint(&Endpoint::new("h1", "h1-eth1")));
    }

    #[test]
    fn test_compile_rejects_invalid_topologies() {
        let duplicate_node = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![node("h1", NodeRole::Host), node("h1", NodeRole::Host)],
            links: Vec::new(),
        });
        assert_eq!(
            duplicate_node.unwrap_err(),
            TopologyError::DuplicateNode("h1".to_string())
        );

        let unknown_endpoint = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![node("h1", NodeRole::Host)],
            links: vec![link(LinkEndSpec::new("h1"), LinkEndSpec::new("r9"))],
        });
        assert!(matches!(
            unknown_endpoint.unwrap_err(),
            TopologyError::UnknownLinkEndpoint { node, .. } if node == "r9"
        ));

        let duplicate_interface = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![
                node("h1", NodeRole::Host),
                node("r1", NodeRole::Router),
                node("r2", NodeRole::Router),
            ],
            links: vec![
                link(
                    LinkEndSpec::with_interface("h1", "eth0"),
                    LinkEndSpec::new("r1"),
                ),
                link(
                    LinkEndSpec::with_interface("h1", "eth0"),
                    LinkEndSpec::new("r2"),
                ),
            ],
        });
        assert!(matches!(
            duplicate_interface.unwrap_err(),
            TopologyError::DuplicateInterface { .. }
        ));

        let mut host = node("h1", NodeRole::Host);
        host.capabilities.push(Capability::Bgp);
        let capabilities_on_host = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![host],
            links: Vec::new(),
        });
        assert!(matches!(
            capabilities_on_host.unwrap_err(),
            TopologyError::CapabilitiesOnNonRouter { .. }
        ));

        let mut router = node("r1", NodeRole::Router);
        router.capabilities.push(Capability::Bgp);
        let bgp_without_asn = Topology::compile(TopologySpec {
            name: "lab".to_string(),
            generation: Generation(1),
            nodes: vec![router],
            links: Vec::new(),
        });
        assert_eq!(
            bgp_without_asn.unwrap_err(),
            TopologyError::MissingAsn {
                node: "r1".to_string()
            }
        );
    }
}
