//! Target selectors and their resolution to concrete endpoints
//!
//! Textual forms:
//!
//! * `link:a->b` - the first link connecting `a` and `b`, in either direction
//! * `link#id` - a link by id
//! * `path:a->b->c` - the links between consecutive hops
//! * `path#l1,l2` - consecutive links by id
//! * `node:x` - every interface owned by `x`

use crate::topology::{Endpoint, Link, LinkEnd, LinkId, Node, NodeId, Topology};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    Link(LinkSelector),
    Path(PathSelector),
    Node(NodeId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum LinkSelector {
    Id(LinkId),
    Between(NodeId, NodeId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSelector {
    Links(Vec<LinkId>),
    Hops(Vec<NodeId>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTarget {
    #[error("target `{0}` must start with `link:`, `link#`, `path:`, `path#` or `node:`")]
    UnknownForm(String),
    #[error("link target `{0}` must name exactly two distinct nodes")]
    MalformedLink(String),
    #[error("path target `{0}` needs at least two hops or one link")]
    PathTooShort(String),
    #[error("path target `{0}` repeats a hop back to back")]
    RepeatedHop(String),
    #[error("target `{0}` contains an empty identifier")]
    EmptyIdentifier(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("unknown {kind} `{id}`")]
    UnknownEntity { kind: EntityKind, id: String },
    #[error("broken path: no direct connection between `{from}` and `{to}`")]
    BrokenPath { from: String, to: String },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Link,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Node => f.write_str("node"),
            EntityKind::Link => f.write_str("link"),
        }
    }
}

impl Target {
    pub fn link(id: impl Into<LinkId>) -> Self {
        Target::Link(LinkSelector::Id(id.into()))
    }

    pub fn link_between(
        a: impl Into<NodeId>,
        b: impl Into<NodeId>,
    ) -> Result<Self, InvalidTarget> {
        let (a, b) = (a.into(), b.into());
        if a == b {
            return Err(InvalidTarget::MalformedLink(format!("{a}->{b}")));
        }
        Ok(Target::Link(LinkSelector::Between(a, b)))
    }

    pub fn path_hops(hops: Vec<NodeId>) -> Result<Self, InvalidTarget> {
        let too_short = hops.len() < 2;
        let repeated = hops.windows(2).any(|pair| pair[0] == pair[1]);

        let target = Target::Path(PathSelector::Hops(hops));
        if too_short {
            return Err(InvalidTarget::PathTooShort(target.to_string()));
        }
        if repeated {
            return Err(InvalidTarget::RepeatedHop(target.to_string()));
        }

        Ok(target)
    }

    pub fn path_links(links: Vec<LinkId>) -> Result<Self, InvalidTarget> {
        if links.is_empty() {
            return Err(InvalidTarget::PathTooShort("path#".to_string()));
        }
        Ok(Target::Path(PathSelector::Links(links)))
    }

    pub fn node(id: impl Into<NodeId>) -> Self {
        Target::Node(id.into())
    }

    /// Resolves the target against a topology snapshot
    pub fn resolve(&self, topology: &Topology) -> Result<Vec<Endpoint>, ResolutionError> {
        resolve(self, topology)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Link(LinkSelector::Id(id)) => write!(f, "link#{id}"),
            Target::Link(LinkSelector::Between(a, b)) => write!(f, "link:{a}->{b}"),
            Target::Path(PathSelector::Links(links)) => {
                f.write_str("path#")?;
                write_joined(f, links, ",")
            }
            Target::Path(PathSelector::Hops(hops)) => {
                f.write_str("path:")?;
                write_joined(f, hops, "->")
            }
            Target::Node(node) => write!(f, "node:{node}"),
        }
    }
}

fn write_joined<T: Display>(f: &mut Formatter<'_>, items: &[T], separator: &str) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(separator)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl FromStr for Target {
    type Err = InvalidTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let ids = |rest: &str, separator: &str| -> Result<Vec<String>, InvalidTarget> {
            let ids: Vec<_> = rest.split(separator).map(|id| id.trim().to_string()).collect();
            if ids.iter().any(|id| id.is_empty()) {
                return Err(InvalidTarget::EmptyIdentifier(s.to_string()));
            }
            Ok(ids)
        };

        if let Some(rest) = s.strip_prefix("link:") {
            let nodes = ids(rest, "->")?;
            let [a, b] = nodes.as_slice() else {
                return Err(InvalidTarget::MalformedLink(s.to_string()));
            };
            Target::link_between(a.as_str(), b.as_str())
        } else if let Some(rest) = s.strip_prefix("link#") {
            let id = rest.trim();
            if id.is_empty() {
                return Err(InvalidTarget::EmptyIdentifier(s.to_string()));
            }
            Ok(Target::link(id))
        } else if let Some(rest) = s.strip_prefix("path:") {
            Target::path_hops(ids(rest, "->")?.into_iter().map(NodeId::from).collect())
        } else if let Some(rest) = s.strip_prefix("path#") {
            Target::path_links(ids(rest, ",")?.into_iter().map(LinkId::from).collect())
        } else if let Some(rest) = s.strip_prefix("node:") {
            let id = rest.trim();
            if id.is_empty() {
                return Err(InvalidTarget::EmptyIdentifier(s.to_string()));
            }
            Ok(Target::node(id))
        } else {
            Err(InvalidTarget::UnknownForm(s.to_string()))
        }
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Maps a target to the ordered, de-duplicated set of endpoints it affects
///
/// Every link contributes its upstream end first. Duplicates keep their first position.
pub fn resolve(target: &Target, topology: &Topology) -> Result<Vec<Endpoint>, ResolutionError> {
    let mut ends = Vec::new();
    match target {
        Target::Link(selector) => {
            let link = select_link(selector, topology)?;
            ends.push(&link.source);
            ends.push(&link.target);
        }
        Target::Path(PathSelector::Links(ids)) => {
            let links = ids
                .iter()
                .map(|id| lookup_link(id, topology))
                .collect::<Result<Vec<_>, _>>()?;
            for (upstream, downstream) in orient_links(&links)? {
                ends.push(upstream);
                ends.push(downstream);
            }
        }
        Target::Path(PathSelector::Hops(hops)) => {
            for hop in hops {
                lookup_node(hop, topology)?;
            }

            for pair in hops.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);
                let link = topology
                    .link_between(from, to)
                    .ok_or_else(|| ResolutionError::BrokenPath {
                        from: from.to_string(),
                        to: to.to_string(),
                    })?;

                // `link_between` guarantees the link touches `from`
                if let Some((upstream, downstream)) = link.oriented_from(from) {
                    ends.push(upstream);
                    ends.push(downstream);
                }
            }
        }
        Target::Node(id) => {
            let node = lookup_node(id, topology)?;
            return Ok(node
                .interfaces
                .iter()
                .map(|interface| Endpoint {
                    node: node.id.clone(),
                    interface: interface.clone(),
                })
                .collect());
        }
    }

    let mut seen = HashSet::new();
    Ok(ends
        .into_iter()
        .map(LinkEnd::endpoint)
        .filter(|endpoint| seen.insert(endpoint.clone()))
        .collect())
}

fn select_link<'a>(
    selector: &LinkSelector,
    topology: &'a Topology,
) -> Result<&'a Link, ResolutionError> {
    match selector {
        LinkSelector::Id(id) => lookup_link(id, topology),
        LinkSelector::Between(a, b) => {
            lookup_node(a, topology)?;
            lookup_node(b, topology)?;
            topology
                .link_between(a, b)
                .ok_or_else(|| ResolutionError::UnknownEntity {
                    kind: EntityKind::Link,
                    id: format!("{a}->{b}"),
                })
        }
    }
}

fn lookup_link<'a>(id: &LinkId, topology: &'a Topology) -> Result<&'a Link, ResolutionError> {
    topology.link(id).ok_or_else(|| ResolutionError::UnknownEntity {
        kind: EntityKind::Link,
        id: id.to_string(),
    })
}

fn lookup_node<'a>(id: &NodeId, topology: &'a Topology) -> Result<&'a Node, ResolutionError> {
    topology.node(id).ok_or_else(|| ResolutionError::UnknownEntity {
        kind: EntityKind::Node,
        id: id.to_string(),
    })
}

/// Orients consecutive links so that each one starts where the previous one ended
fn orient_links<'a>(links: &[&'a Link]) -> Result<Vec<(&'a LinkEnd, &'a LinkEnd)>, ResolutionError> {
    let broken = |from: &Link, to: &Link| ResolutionError::BrokenPath {
        from: from.id.to_string(),
        to: to.id.to_string(),
    };

    let Some((&first, rest)) = links.split_first() else {
        return Ok(Vec::new());
    };

    let mut oriented = Vec::with_capacity(links.len());
    match rest.first() {
        None => oriented.push((&first.source, &first.target)),
        Some(&next) if next.touches(&first.target.node) => {
            oriented.push((&first.source, &first.target))
        }
        Some(&next) if next.touches(&first.source.node) => {
            oriented.push((&first.target, &first.source))
        }
        Some(&next) => return Err(broken(first, next)),
    }

    let mut previous = first;
    for &link in rest {
        let at = &oriented[oriented.len() - 1].1.node;
        let Some(ends) = link.oriented_from(at) else {
            return Err(broken(previous, link));
        };
        oriented.push(ends);
        previous = link;
    }

    Ok(oriented)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::default_topology;

    fn endpoints(pairs: &[(&str, &str)]) -> Vec<Endpoint> {
        pairs
            .iter()
            .map(|(node, interface)| Endpoint::new(*node, *interface))
            .collect()
    }

    #[test]
    fn test_parse_and_display() {
        for raw in [
            "link:h1->r1",
            "link#r1-r2",
            "path:h1->r1->r2->h2",
            "path#h1-r1,r1-r2",
            "node:r1",
        ] {
            let target: Target = raw.parse().unwrap();
            assert_eq!(target.to_string(), raw);
        }

        assert!(matches!(
            "path:h1".parse::<Target>(),
            Err(InvalidTarget::PathTooShort(_))
        ));
        assert!(matches!(
            "link:h1->h1".parse::<Target>(),
            Err(InvalidTarget::MalformedLink(_))
        ));
        assert!(matches!(
            "host:h1".parse::<Target>(),
            Err(InvalidTarget::UnknownForm(_))
        ));
        assert!(matches!(
            "path:h1->->h2".parse::<Target>(),
            Err(InvalidTarget::EmptyIdentifier(_))
        ));
    }

    #[test]
    fn test_resolve_link_is_undirected() {
        let topology = default_topology().call();
        let forward: Target = "link:h1->r1".parse().unwrap();
        let backward: Target = "link:r1->h1".parse().unwrap();

        let expected = endpoints(&[("h1", "h1-eth0"), ("r1", "r1-eth0")]);
        assert_eq!(forward.resolve(&topology).unwrap(), expected);
        assert_eq!(backward.resolve(&topology).unwrap(), expected);
    }

    #[test]
    fn test_resolve_path_by_hops() {
        let topology = default_topology().call();
        let target: Target = "path:h1->r1->r2->h2".parse().unwrap();

        assert_eq!(
            target.resolve(&topology).unwrap(),
            endpoints(&[
                ("h1", "h1-eth0"),
                ("r1", "r1-eth0"),
                ("r1", "r1-eth1"),
                ("r2", "r2-eth0"),
                ("r2", "r2-eth1"),
                ("h2", "h2-eth0"),
            ])
        );
    }

    #[test]
    fn test_resolve_path_by_links_orients_each_link() {
        let topology = default_topology().call();
        let target: Target = "path#r2-h2,r1-r2".parse().unwrap();

        assert_eq!(
            target.resolve(&topology).unwrap(),
            endpoints(&[
                ("h2", "h2-eth0"),
                ("r2", "r2-eth1"),
                ("r2", "r2-eth0"),
                ("r1", "r1-eth1"),
            ])
        );
    }

    #[test]
    fn test_resolve_broken_path() {
        let topology = default_topology().call();

        let hops: Target = "path:h1->r2".parse().unwrap();
        assert_eq!(
            hops.resolve(&topology).unwrap_err(),
            ResolutionError::BrokenPath {
                from: "h1".to_string(),
                to: "r2".to_string()
            }
        );

        let links: Target = "path#h1-r1,r2-h2".parse().unwrap();
        assert!(matches!(
            links.resolve(&topology).unwrap_err(),
            ResolutionError::BrokenPath { .. }
        ));
    }

    #[test]
    fn test_resolve_unknown_entity() {
        let topology = default_topology().call();

        let node: Target = "node:r9".parse().unwrap();
        assert_eq!(
            node.resolve(&topology).unwrap_err(),
            ResolutionError::UnknownEntity {
                kind: EntityKind::Node,
                id: "r9".to_string()
            }
        );

        let link: Target = "link#nope".parse().unwrap();
        assert!(matches!(
            link.resolve(&topology).unwrap_err(),
            ResolutionError::UnknownEntity {
                kind: EntityKind::Link,
                ..
            }
        ));

        let path: Target = "path:h1->r1->r9".parse().unwrap();
        assert!(matches!(
            path.resolve(&topology).unwrap_err(),
            ResolutionError::UnknownEntity {
                kind: EntityKind::Node,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_node_in_declaration_order() {
        let topology = default_topology().call();
        let target = Target::node("r1");

        assert_eq!(
            target.resolve(&topology).unwrap(),
            endpoints(&[("r1", "r1-eth0"), ("r1", "r1-eth1")])
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let topology = default_topology().call();
        let target: Target = "path:h1->r1->r2->h2".parse().unwrap();
        let first = target.resolve(&topology).unwrap();
        for _ in 0..10 {
            assert_eq!(target.resolve(&topology).unwrap(), first);
        }
    }
}
