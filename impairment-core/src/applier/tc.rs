//! Linux traffic control data plane
//!
//! Netem parameters go into the root qdisc (handle `1:`). A queue discipline is attached below
//! netem (`parent 1:1 handle 10:`), or at the root when no netem parameter is set. Routing events
//! are driven through `ip link` and FRR's `vtysh`, and undone when they stop being effective.

use crate::applier::{ApplyError, ImpairmentApplier};
use crate::impairment::qdisc::QueueDiscipline;
use crate::impairment::routing::RoutingEvent;
use crate::impairment::units::{format_rate, format_time};
use crate::impairment::{Impairment, ImpairmentKind, ImpairmentSpec};
use crate::topology::{Endpoint, NodeId, Topology};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct TcConfig {
    /// Log the commands instead of running them
    pub dry_run: bool,
    /// Run every command inside `ip netns exec <node>`
    pub netns_exec: bool,
    pub tc_binary: String,
    pub ip_binary: String,
    pub vtysh_binary: String,
}

impl Default for TcConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            netns_exec: false,
            tc_binary: "tc".to_string(),
            ip_binary: "ip".to_string(),
            vtysh_binary: "vtysh".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    /// A "nothing to delete" failure counts as success
    pub tolerate_missing: bool,
}

impl CommandLine {
    fn new(program: &str, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            tolerate_missing: false,
        }
    }

    fn tolerating_missing(mut self) -> Self {
        self.tolerate_missing = true;
        self
    }

    fn in_namespace(self, ip_binary: &str, namespace: &NodeId) -> Self {
        let mut args = vec![
            "netns".to_string(),
            "exec".to_string(),
            namespace.to_string(),
            self.program,
        ];
        args.extend(self.args);
        Self {
            program: ip_binary.to_string(),
            args,
            tolerate_missing: self.tolerate_missing,
        }
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Applies a spec as a whole or not at all: when a step fails, the commands of the last spec
/// that went through are replayed before the error is returned
pub struct TcApplier {
    config: TcConfig,
    asn_by_node: RwLock<HashMap<NodeId, u32>>,
    /// Last spec fully enforced per endpoint, absent when the endpoint is clean
    enforced: Mutex<HashMap<Endpoint, ImpairmentSpec>>,
}

/// Everything a transition runs, rendered upfront so a rendering error never leaves half a spec
struct Transition {
    shaping: Vec<CommandLine>,
    undo_routing: Vec<CommandLine>,
    apply_routing: Vec<CommandLine>,
    restore_shaping: Vec<CommandLine>,
    restore_routing: Vec<CommandLine>,
}

impl TcApplier {
    pub fn new(config: TcConfig, topology: &Topology) -> Self {
        let applier = Self {
            config,
            asn_by_node: RwLock::default(),
            enforced: Mutex::default(),
        };
        applier.load_asns(topology);
        applier
    }

    fn load_asns(&self, topology: &Topology) {
        *self.asn_by_node.write() = topology
            .nodes()
            .filter_map(|node| Some((node.id.clone(), node.asn?)))
            .collect();
    }

    /// Commands that replace the shaping of `endpoint` with `spec`
    pub fn render_shaping(&self, endpoint: &Endpoint, spec: &ImpairmentSpec) -> Vec<CommandLine> {
        let tc = self.config.tc_binary.as_str();
        let dev = endpoint.interface.as_str();
        let netem = netem_args(spec);
        let qdisc = spec.queue_discipline();

        let mut commands = Vec::new();
        match (netem.is_empty(), qdisc) {
            (false, qdisc) => {
                commands.push(CommandLine::new(
                    tc,
                    ["qdisc", "replace", "dev", dev, "root", "handle", "1:", "netem"]
                        .into_iter()
                        .map(String::from)
                        .chain(netem),
                ));
                match qdisc {
                    Some(qdisc) => commands.extend(qdisc_commands(tc, dev, "parent 1:1", qdisc)),
                    None => commands.push(
                        CommandLine::new(
                            tc,
                            ["qdisc", "del", "dev", dev, "parent", "1:1", "handle", "10:"],
                        )
                        .tolerating_missing(),
                    ),
                }
            }
            (true, Some(qdisc)) => commands.extend(qdisc_commands(tc, dev, "root", qdisc)),
            (true, None) => commands.push(delete_root(tc, dev)),
        }

        commands
    }

    /// Commands that remove every qdisc from `endpoint`
    pub fn render_revert(&self, endpoint: &Endpoint) -> Vec<CommandLine> {
        vec![delete_root(&self.config.tc_binary, endpoint.interface.as_str())]
    }

    /// Commands that put `event` in force on `endpoint`, or undo it
    pub fn render_routing(
        &self,
        endpoint: &Endpoint,
        event: &RoutingEvent,
        undo: bool,
    ) -> Result<Vec<CommandLine>, ApplyError> {
        let dev = endpoint.interface.as_str();
        if let RoutingEvent::InterfaceDown = event {
            let state = if undo { "up" } else { "down" };
            return Ok(vec![CommandLine::new(
                &self.config.ip_binary,
                ["link", "set", "dev", dev, state],
            )]);
        }

        let no = if undo { "no " } else { "" };
        let asn = || {
            self.asn_by_node
                .read()
                .get(&endpoint.node)
                .copied()
                .ok_or_else(|| {
                    ApplyError::Unsupported(format!("node `{}` has no AS number", endpoint.node))
                })
        };
        let statements = match event {
            RoutingEvent::BgpSessionDown { neighbor: Some(neighbor) } => vec![
                format!("router bgp {}", asn()?),
                format!("{no}neighbor {neighbor} shutdown"),
            ],
            // Without a neighbor every session of the daemon goes down
            RoutingEvent::BgpSessionDown { neighbor: None } => {
                vec![format!("router bgp {}", asn()?), format!("{no}bgp shutdown")]
            }
            RoutingEvent::BgpWithdraw { prefix } => {
                let no = if undo { "" } else { "no " };
                vec![
                    format!("router bgp {}", asn()?),
                    "address-family ipv4 unicast".to_string(),
                    format!("{no}network {prefix}"),
                ]
            }
            RoutingEvent::OspfCost { cost } => {
                let statement = if undo {
                    "no ip ospf cost".to_string()
                } else {
                    format!("ip ospf cost {cost}")
                };
                vec![format!("interface {dev}"), statement]
            }
            RoutingEvent::InterfaceDown => Vec::new(),
        };

        let mut args = vec!["-c".to_string(), "configure terminal".to_string()];
        for statement in statements {
            args.push("-c".to_string());
            args.push(statement);
        }
        Ok(vec![CommandLine::new(&self.config.vtysh_binary, args)])
    }

    /// Renders a move from `previous` to `next`, along with the commands that bring `previous` back
    fn render_transition(
        &self,
        endpoint: &Endpoint,
        previous: Option<&ImpairmentSpec>,
        next: &ImpairmentSpec,
    ) -> Result<Transition, ApplyError> {
        let shaping_for = |spec: Option<&ImpairmentSpec>| match spec {
            Some(spec) if !spec.is_none() => self.render_shaping(endpoint, spec),
            _ => self.render_revert(endpoint),
        };
        let routing_for = |event: Option<&RoutingEvent>, undo: bool| {
            event
                .map(|event| self.render_routing(endpoint, event, undo))
                .transpose()
                .map(Option::unwrap_or_default)
        };

        let before = previous.and_then(ImpairmentSpec::routing_event);
        let after = next.routing_event();
        let (undo_routing, apply_routing, restore_routing) = if before == after {
            (Vec::new(), Vec::new(), Vec::new())
        } else {
            (
                routing_for(before, true)?,
                routing_for(after, false)?,
                routing_for(before, false)?,
            )
        };

        Ok(Transition {
            shaping: shaping_for(Some(next)),
            undo_routing,
            apply_routing,
            restore_shaping: shaping_for(previous),
            restore_routing,
        })
    }

    async fn run_all(&self, endpoint: &Endpoint, commands: &[CommandLine]) -> Result<(), ApplyError> {
        for command in commands {
            self.run_on(endpoint, command).await?;
        }
        Ok(())
    }

    async fn run_on(&self, endpoint: &Endpoint, command: &CommandLine) -> Result<(), ApplyError> {
        if self.config.netns_exec {
            let command = command
                .clone()
                .in_namespace(&self.config.ip_binary, &endpoint.node);
            return self.run(&command).await;
        }
        self.run(command).await
    }

    async fn run(&self, command: &CommandLine) -> Result<(), ApplyError> {
        if self.config.dry_run {
            info!(command = %command, "dry run");
            return Ok(());
        }

        debug!(command = %command, "running");
        let output = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .output()
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => {
                    ApplyError::Unsupported(format!("`{}` is not installed", command.program))
                }
                ErrorKind::PermissionDenied => {
                    ApplyError::PermissionDenied(format!("cannot run `{}`", command.program))
                }
                _ => ApplyError::Transient(format!("cannot run `{command}`: {error}")),
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        classify_failure(command, &stderr)
    }

    /// Best effort: every command runs even when an earlier one fails
    async fn roll_back<'c>(
        &self,
        endpoint: &Endpoint,
        commands: impl IntoIterator<Item = &'c CommandLine>,
    ) {
        for command in commands {
            if let Err(error) = self.run_on(endpoint, command).await {
                warn!(%endpoint, %error, "failed to restore the previous impairments");
            }
        }
    }

    async fn transition(&self, endpoint: &Endpoint, next: &ImpairmentSpec) -> Result<(), ApplyError> {
        let previous = self.enforced.lock().get(endpoint).cloned();
        let transition = self.render_transition(endpoint, previous.as_ref(), next)?;

        let shaped = async {
            self.run_all(endpoint, &transition.shaping).await?;
            self.run_all(endpoint, &transition.undo_routing).await
        };
        if let Err(error) = shaped.await {
            self.roll_back(endpoint, &transition.restore_shaping).await;
            return Err(error);
        }

        if let Err(error) = self.run_all(endpoint, &transition.apply_routing).await {
            let restore = transition
                .restore_shaping
                .iter()
                .chain(&transition.restore_routing)
                .collect::<Vec<&CommandLine>>();
            self.roll_back(endpoint, restore).await;
            return Err(error);
        }

        let mut enforced = self.enforced.lock();
        if next.is_none() {
            enforced.remove(endpoint);
        } else {
            enforced.insert(endpoint.clone(), next.clone());
        }
        Ok(())
    }
}

impl ImpairmentApplier for TcApplier {
    fn apply<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        spec: &'a ImpairmentSpec,
    ) -> BoxFuture<'a, Result<(), ApplyError>> {
        self.transition(endpoint, spec).boxed()
    }

    fn revert<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<(), ApplyError>> {
        async move { self.transition(endpoint, &ImpairmentSpec::none()).await }.boxed()
    }

    fn topology_changed(&self, topology: &Topology) {
        self.load_asns(topology);
    }
}

fn delete_root(tc: &str, dev: &str) -> CommandLine {
    CommandLine::new(tc, ["qdisc", "del", "dev", dev, "root"]).tolerating_missing()
}

fn classify_failure(command: &CommandLine, stderr: &str) -> Result<(), ApplyError> {
    let lower = stderr.to_ascii_lowercase();
    let missing = [
        "no such file or directory",
        "cannot delete qdisc with handle of zero",
        "cannot find specified qdisc",
        "invalid handle",
    ];
    if command.tolerate_missing && missing.iter().any(|m| lower.contains(m)) {
        return Ok(());
    }

    let message = format!("`{command}` failed: {stderr}");
    if lower.contains("operation not permitted") || lower.contains("permission denied") {
        Err(ApplyError::PermissionDenied(message))
    } else if lower.contains("unknown qdisc")
        || lower.contains("garbage")
        || lower.contains("illegal")
        || lower.contains("unknown command")
    {
        Err(ApplyError::Unsupported(message))
    } else {
        Err(ApplyError::Transient(message))
    }
}

/// The netem arguments of a spec, empty when it has no netem kind
fn netem_args(spec: &ImpairmentSpec) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |items: &[String]| args.extend_from_slice(items);

    let delay = match spec.get(ImpairmentKind::Delay) {
        Some(Impairment::Delay(delay)) => Some(delay),
        _ => None,
    };
    let jitter = match spec.get(ImpairmentKind::Jitter) {
        Some(Impairment::Jitter(jitter)) => Some(jitter),
        _ => None,
    };

    if delay.is_some() || jitter.is_some() {
        let latency = delay.map(|d| d.latency).unwrap_or_default();
        push(&["delay".to_string(), format_time(latency)]);
        if let Some(jitter) = jitter {
            push(&[format_time(jitter.variation)]);
            let correlation = jitter.correlation.or(delay.and_then(|d| d.correlation));
            if let Some(correlation) = correlation {
                push(&[correlation.to_string()]);
            }
            if let Some(distribution) = delay.and_then(|d| d.distribution) {
                push(&[
                    "distribution".to_string(),
                    distribution.as_tc_str().to_string(),
                ]);
            }
        }
    }

    for impairment in spec.iter() {
        let (name, ratio) = match impairment {
            Impairment::Loss(ratio) => ("loss", ratio),
            Impairment::Duplication(ratio) => ("duplicate", ratio),
            Impairment::Reordering(ratio) => ("reorder", ratio),
            Impairment::Corruption(ratio) => ("corrupt", ratio),
            Impairment::BandwidthCap { rate_bps } => {
                push(&["rate".to_string(), format_rate(*rate_bps)]);
                continue;
            }
            _ => continue,
        };
        push(&[name.to_string(), ratio.ratio.to_string()]);
        if let Some(correlation) = ratio.correlation {
            push(&[correlation.to_string()]);
        }
    }

    args
}

fn qdisc_commands(tc: &str, dev: &str, parent: &str, qdisc: &QueueDiscipline) -> Vec<CommandLine> {
    let mut args: Vec<String> = ["qdisc", "replace", "dev", dev]
        .into_iter()
        .chain(parent.split(' '))
        .chain(["handle", "10:"])
        .map(String::from)
        .collect();

    let mut class = None;
    match qdisc {
        QueueDiscipline::Tbf {
            rate_bps,
            burst_bytes,
            latency,
        } => args.extend([
            "tbf".to_string(),
            "rate".to_string(),
            format_rate(*rate_bps),
            "burst".to_string(),
            burst_bytes.to_string(),
            "latency".to_string(),
            format_time(*latency),
        ]),
        QueueDiscipline::Htb {
            rate_bps,
            ceil_bps,
            burst_bytes,
        } => {
            args.extend(["htb", "default", "10"].map(String::from));
            let mut class_args: Vec<String> = [
                "class", "replace", "dev", dev, "parent", "10:", "classid", "10:10", "htb", "rate",
            ]
            .map(String::from)
            .to_vec();
            class_args.push(format_rate(*rate_bps));
            if let Some(ceil) = ceil_bps {
                class_args.extend(["ceil".to_string(), format_rate(*ceil)]);
            }
            if let Some(burst) = burst_bytes {
                class_args.extend(["burst".to_string(), burst.to_string()]);
            }
            class = Some(CommandLine::new(tc, class_args));
        }
        QueueDiscipline::FqCodel { limit_packets } | QueueDiscipline::Pfifo { limit_packets } => {
            args.push(qdisc.name().to_string());
            if let Some(limit) = limit_packets {
                args.extend(["limit".to_string(), limit.to_string()]);
            }
        }
    }

    let mut commands = vec![CommandLine::new(tc, args)];
    commands.extend(class);
    commands
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impairment::routing::Ipv4Cidr;
    use crate::impairment::units::Percentage;
    use crate::impairment::{CorrelatedRatio, Delay, DelayDistribution, Jitter};
    use crate::test_util::default_topology;
    use std::time::Duration;

    fn applier() -> TcApplier {
        TcApplier::new(TcConfig::default(), &default_topology().call())
    }

    fn rendered(commands: &[CommandLine]) -> Vec<String> {
        commands.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_render_netem_parameters() {
        let spec = ImpairmentSpec::new([
            Impairment::Delay(Delay {
                latency: Duration::from_millis(50),
                correlation: None,
                distribution: Some(DelayDistribution::Normal),
            }),
            Impairment::Jitter(Jitter {
                variation: Duration::from_millis(10),
                correlation: Some(Percentage::new(25.0).unwrap()),
            }),
            Impairment::Loss(CorrelatedRatio {
                ratio: Percentage::new(0.3).unwrap(),
                correlation: None,
            }),
            Impairment::bandwidth_cap(10_000_000),
        ])
        .unwrap();

        let commands = applier().render_shaping(&Endpoint::new("r1", "r1-eth0"), &spec);
        assert_eq!(
            rendered(&commands),
            [
                "tc qdisc replace dev r1-eth0 root handle 1: netem delay 50ms 10ms 25% distribution normal loss 0.3% rate 10mbit",
                "tc qdisc del dev r1-eth0 parent 1:1 handle 10:",
            ]
        );
        assert!(commands[1].tolerate_missing);
    }

    #[test]
    fn test_render_qdisc_below_netem_or_at_root() {
        let tbf = Impairment::QueueDiscipline(QueueDiscipline::Tbf {
            rate_bps: 1_000_000,
            burst_bytes: 32_000,
            latency: Duration::from_millis(400),
        });
        let endpoint = Endpoint::new("r1", "r1-eth0");

        let with_netem =
            ImpairmentSpec::new([Impairment::loss(1.0).unwrap(), tbf.clone()]).unwrap();
        assert_eq!(
            rendered(&applier().render_shaping(&endpoint, &with_netem)),
            [
                "tc qdisc replace dev r1-eth0 root handle 1: netem loss 1%",
                "tc qdisc replace dev r1-eth0 parent 1:1 handle 10: tbf rate 1mbit burst 32000 latency 400ms",
            ]
        );

        let alone = ImpairmentSpec::new([Impairment::QueueDiscipline(QueueDiscipline::Htb {
            rate_bps: 5_000_000,
            ceil_bps: Some(10_000_000),
            burst_bytes: None,
        })])
        .unwrap();
        assert_eq!(
            rendered(&applier().render_shaping(&endpoint, &alone)),
            [
                "tc qdisc replace dev r1-eth0 root handle 10: htb default 10",
                "tc class replace dev r1-eth0 parent 10: classid 10:10 htb rate 5mbit ceil 10mbit",
            ]
        );
    }

    #[test]
    fn test_render_revert_and_namespace() {
        let endpoint = Endpoint::new("r1", "r1-eth0");
        let commands = applier().render_revert(&endpoint);
        assert_eq!(rendered(&commands), ["tc qdisc del dev r1-eth0 root"]);

        let namespaced = commands[0]
            .clone()
            .in_namespace("ip", &endpoint.node);
        assert_eq!(
            namespaced.to_string(),
            "ip netns exec r1 tc qdisc del dev r1-eth0 root"
        );
        assert!(namespaced.tolerate_missing);
    }

    #[test]
    fn test_render_routing_events_and_undo() {
        let applier = applier();
        let endpoint = Endpoint::new("r1", "r1-eth1");

        let withdraw = RoutingEvent::BgpWithdraw {
            prefix: "10.1.0.0/24".parse::<Ipv4Cidr>().unwrap(),
        };
        assert_eq!(
            rendered(&applier.render_routing(&endpoint, &withdraw, false).unwrap()),
            ["vtysh -c 'configure terminal' -c 'router bgp 65001' -c 'address-family ipv4 unicast' -c 'no network 10.1.0.0/24'"]
        );
        assert_eq!(
            rendered(&applier.render_routing(&endpoint, &withdraw, true).unwrap()),
            ["vtysh -c 'configure terminal' -c 'router bgp 65001' -c 'address-family ipv4 unicast' -c 'network 10.1.0.0/24'"]
        );

        assert_eq!(
            rendered(&applier.render_routing(&endpoint, &RoutingEvent::InterfaceDown, false).unwrap()),
            ["ip link set dev r1-eth1 down"]
        );
        assert_eq!(
            rendered(&applier.render_routing(&endpoint, &RoutingEvent::OspfCost { cost: 900 }, true).unwrap()),
            ["vtysh -c 'configure terminal' -c 'interface r1-eth1' -c 'no ip ospf cost'"]
        );
    }

    #[test]
    fn test_classify_failures() {
        let delete = delete_root("tc", "r1-eth0");
        assert_eq!(
            classify_failure(&delete, "Error: Cannot delete qdisc with handle of zero."),
            Ok(())
        );
        assert!(matches!(
            classify_failure(&delete, "RTNETLINK answers: Operation not permitted"),
            Err(ApplyError::PermissionDenied(_))
        ));

        let replace = CommandLine::new("tc", ["qdisc", "replace"]);
        assert!(matches!(
            classify_failure(&replace, "Error: Cannot find specified qdisc"),
            Err(ApplyError::Transient(_))
        ));
        assert!(matches!(
            classify_failure(&replace, "Unknown qdisc \"netem\", hence option \"delay\" is unparsable"),
            Err(ApplyError::Unsupported(_))
        ));
    }

    #[test]
    fn test_bgp_events_need_an_as_number() {
        let applier = applier();
        let down = RoutingEvent::BgpSessionDown { neighbor: None };
        assert!(matches!(
            applier.render_routing(&Endpoint::new("r2", "r2-eth0"), &down, false),
            Err(ApplyError::Unsupported(_))
        ));

        applier.topology_changed(&default_topology().r2_asn(65002).call());
        assert_eq!(
            rendered(&applier.render_routing(&Endpoint::new("r2", "r2-eth0"), &down, false).unwrap()),
            ["vtysh -c 'configure terminal' -c 'router bgp 65002' -c 'bgp shutdown'"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_tracks_enforced_spec() {
        let applier = TcApplier::new(
            TcConfig {
                dry_run: true,
                ..TcConfig::default()
            },
            &default_topology().call(),
        );
        let endpoint = Endpoint::new("r1", "r1-eth1");
        let spec =
            ImpairmentSpec::new([Impairment::RoutingEvent(RoutingEvent::InterfaceDown)]).unwrap();

        applier.apply(&endpoint, &spec).await.unwrap();
        assert_eq!(applier.enforced.lock().get(&endpoint), Some(&spec));

        applier.revert(&endpoint).await.unwrap();
        assert!(applier.enforced.lock().is_empty());
    }

    /// A `tc` stand-in that appends its arguments to `log`
    #[cfg(unix)]
    fn recording_tc(log: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = std::env::temp_dir().join(format!("netem-tc-{}", uuid::Uuid::new_v4()));
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"tc $*\" >> '{}'\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_routing_step_restores_previous_shaping() {
        let log = std::env::temp_dir().join(format!("netem-tc-{}.log", uuid::Uuid::new_v4()));
        let script = recording_tc(&log);
        let applier = TcApplier::new(
            TcConfig {
                tc_binary: script.display().to_string(),
                vtysh_binary: "false".to_string(),
                ..TcConfig::default()
            },
            &default_topology().call(),
        );
        let endpoint = Endpoint::new("r1", "r1-eth0");

        let first = ImpairmentSpec::new([Impairment::loss(1.0).unwrap()]).unwrap();
        applier.apply(&endpoint, &first).await.unwrap();

        let second = ImpairmentSpec::new([
            Impairment::loss(2.0).unwrap(),
            Impairment::RoutingEvent(RoutingEvent::BgpSessionDown { neighbor: None }),
        ])
        .unwrap();
        let error = applier.apply(&endpoint, &second).await.unwrap_err();
        assert!(matches!(error, ApplyError::Transient(_)));
        assert_eq!(applier.enforced.lock().get(&endpoint), Some(&first));

        let lines: Vec<String> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        assert_eq!(
            lines,
            [
                "tc qdisc replace dev r1-eth0 root handle 1: netem loss 1%",
                "tc qdisc del dev r1-eth0 parent 1:1 handle 10:",
                "tc qdisc replace dev r1-eth0 root handle 1: netem loss 2%",
                "tc qdisc del dev r1-eth0 parent 1:1 handle 10:",
                "tc qdisc replace dev r1-eth0 root handle 1: netem loss 1%",
                "tc qdisc del dev r1-eth0 parent 1:1 handle 10:",
            ]
        );

        // A clean endpoint is cleared again
        let clean = Endpoint::new("r1", "r1-eth1");
        assert!(applier.apply(&clean, &second).await.is_err());
        assert_eq!(applier.enforced.lock().get(&clean), None);
        let written = std::fs::read_to_string(&log).unwrap();
        assert_eq!(written.lines().last(), Some("tc qdisc del dev r1-eth1 root"));

        let _ = std::fs::remove_file(&script);
        let _ = std::fs::remove_file(&log);
    }
}
