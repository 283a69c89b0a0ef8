use impairment_core::impairment::units::{format_rate, format_time};
use impairment_core::scenario::ScenarioState;
use impairment_core::scheduler::snapshot::StatusSnapshot;
use impairment_core::topology::Topology;

pub fn describe_state(state: &ScenarioState) -> String {
    match state {
        ScenarioState::Scheduled { next } => format!("scheduled, next activation at {next}"),
        ScenarioState::Active {
            since,
            until: Some(until),
        } => format!("active since {since} until {until}"),
        ScenarioState::Active { since, until: None } => format!("active since {since}"),
        ScenarioState::Idle => "idle (no further occurrences)".to_string(),
        ScenarioState::Cancelled { reason } => format!("cancelled ({reason})"),
    }
}

pub fn print_topology(topology: &Topology) {
    println!("--- Topology ---");
    println!(
        "* {} (generation {})",
        topology.name(),
        topology.generation()
    );
    for node in topology.nodes() {
        print!("* Node {} ({})", node.id, node.role);
        if let Some(asn) = node.asn {
            print!(" AS{asn}");
        }
        if !node.capabilities.is_empty() {
            let daemons: Vec<_> = node.capabilities.iter().map(|c| c.to_string()).collect();
            print!(" [{}]", daemons.join(", "));
        }
        println!();
    }
    for link in topology.links() {
        print!(
            "* Link {}: {}:{} <-> {}:{}",
            link.id,
            link.source.node,
            link.source.interface,
            link.target.node,
            link.target.interface
        );
        if let Some(bps) = link.capacity_bps {
            print!(", {}", format_rate(bps));
        }
        if let Some(delay) = link.delay {
            print!(", {}", format_time(delay));
        }
        println!();
    }
    for node in topology.isolated_nodes() {
        println!("* Warning: node {node} is not connected to any link");
    }
}

pub fn print_status(snapshot: &StatusSnapshot) {
    println!("--- Status at {} ---", snapshot.taken_at);
    for (id, status) in &snapshot.scenarios {
        println!(
            "* {id} ({:?}, priority {}): {}",
            status.kind,
            status.priority,
            describe_state(&status.state)
        );
    }

    if !snapshot.applied.is_empty() {
        println!("--- Applied impairments ---");
    }
    for (endpoint, applied) in &snapshot.applied {
        let contributors: Vec<_> = applied
            .contributors()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        println!(
            "* {endpoint}: {} (from {})",
            applied.effective,
            contributors.join(", ")
        );
        if applied.is_degraded() {
            println!("  | degraded, the data plane enforces: {}", applied.enforced);
        }
    }

    let metrics = &snapshot.metrics;
    println!("--- Metrics ---");
    println!(
        "* Scenarios: {} ({} active)",
        metrics.scenarios, metrics.active_scenarios
    );
    println!(
        "* Impaired endpoints: {} ({} degraded)",
        metrics.applied_impairments, metrics.degraded_endpoints
    );
    println!(
        "* Data plane calls: {} applies, {} reverts, {} failures, {} retries",
        metrics.apply_calls, metrics.revert_calls, metrics.applier_failures, metrics.applier_retries
    );
    println!("* Events dropped: {}", metrics.events_dropped);
}
