use anyhow::Context;
use impairment_core::impairment::units::{parse_rate, parse_time};
use impairment_core::topology::spec::{
    Capability, LinkEndSpec, LinkSpec, NodeRole, NodeSpec, TopologySpec,
};
use impairment_core::topology::{Generation, Topology};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};

#[derive(Deserialize, Clone)]
pub struct TopologyJson {
    name: String,
    /// Bumped every time the topology is recompiled
    #[serde(default = "default_generation")]
    generation: u64,
    nodes: Vec<NodeJson>,
    links: Vec<LinkJson>,
}

fn default_generation() -> u64 {
    1
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct NodeJson {
    id: String,
    #[serde(rename = "type")]
    #[serde(default = "default_node_role")]
    role: NodeRole,
    asn: Option<u32>,
    /// Routing daemons, e.g. `bgp` or `ospfd`
    #[serde(default)]
    #[serde_as(as = "Vec<DisplayFromStr>")]
    daemons: Vec<Capability>,
}

fn default_node_role() -> NodeRole {
    NodeRole::Host
}

#[derive(Deserialize, Clone)]
struct LinkJson {
    id: Option<String>,
    src: String,
    dst: String,
    /// Interface on the source node, derived as `<src>-eth<n>` when absent
    src_intf: Option<String>,
    dst_intf: Option<String>,
    #[serde(default)]
    params: LinkParamsJson,
}

#[derive(Deserialize, Clone, Default)]
struct LinkParamsJson {
    /// Bandwidth in `tc` notation, e.g. `100mbit`
    bw: Option<String>,
    /// Propagation delay in `tc` notation, e.g. `10ms`
    delay: Option<String>,
}

impl TryFrom<TopologyJson> for Topology {
    type Error = anyhow::Error;

    fn try_from(json: TopologyJson) -> Result<Self, Self::Error> {
        let nodes = json
            .nodes
            .into_iter()
            .map(|n| NodeSpec {
                id: n.id,
                role: n.role,
                capabilities: n.daemons,
                asn: n.asn,
            })
            .collect();

        let links = json
            .links
            .into_iter()
            .map(|l| {
                let name = format!("{}->{}", l.src, l.dst);
                let capacity_bps = l
                    .params
                    .bw
                    .as_deref()
                    .map(parse_rate)
                    .transpose()
                    .with_context(|| format!("invalid bandwidth on link {name}"))?;
                let delay = l
                    .params
                    .delay
                    .as_deref()
                    .map(parse_time)
                    .transpose()
                    .with_context(|| format!("invalid delay on link {name}"))?;

                Ok(LinkSpec {
                    id: l.id,
                    source: LinkEndSpec {
                        node: l.src,
                        interface: l.src_intf,
                    },
                    target: LinkEndSpec {
                        node: l.dst,
                        interface: l.dst_intf,
                    },
                    capacity_bps,
                    delay,
                })
            })
            .collect::<anyhow::Result<_>>()?;

        let spec = TopologySpec {
            name: json.name,
            generation: Generation(json.generation),
            nodes,
            links,
        };

        Topology::compile(spec).context("invalid topology")
    }
}
