use crate::config::LoadedConfig;
use crate::config::cli::{CliOpt, RunOpt};
use crate::util::{describe_state, print_status, print_topology};
use anyhow::{Context, bail};
use fastrand::Rng;
use futures_util::{FutureExt, select_biased};
use impairment_core::applier::ImpairmentApplier;
use impairment_core::applier::memory::InMemoryDataPlane;
use impairment_core::applier::tc::{TcApplier, TcConfig};
use impairment_core::clock::Clock;
use impairment_core::event::EventReceiver;
use impairment_core::scheduler::Scheduler;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub async fn run(cli: &CliOpt, options: &RunOpt, config: LoadedConfig) -> anyhow::Result<()> {
    if options.simulate && options.dry_run {
        bail!("`--simulate` and `--dry-run` cannot be combined");
    }
    if !(0.0..=1.0).contains(&options.simulated_failure_ratio) {
        bail!("the simulated failure ratio must be between 0 and 1");
    }

    println!("--- Params ---");
    let data_plane_rng_seed = if options.non_deterministic {
        Rng::new().u64(..)
    } else {
        options.data_plane_rng_seed
    };
    let data_plane = match (options.simulate, options.dry_run) {
        (true, _) => "in-memory",
        (false, true) => "tc (dry run)",
        (false, false) => "tc",
    };
    println!("* Topology path: {}", cli.topology.display());
    println!("* Scenarios path: {}", cli.scenarios.display());
    println!("* Data plane: {data_plane}");
    if options.simulate {
        println!("* Data plane seed: {data_plane_rng_seed}");
        println!(
            "* Simulated failure ratio: {}",
            options.simulated_failure_ratio
        );
    }
    let event_log = EventLog::new(options.event_log.clone());
    println!("* Event log: {event_log}");

    print_topology(&config.topology);

    let clock = Clock::system();
    let applier: Arc<dyn ImpairmentApplier> = if options.simulate {
        Arc::new(InMemoryDataPlane::new(clock.clone()).with_random_failures(
            options.simulated_failure_ratio,
            Rng::with_seed(data_plane_rng_seed),
        ))
    } else {
        let tc_config = TcConfig {
            dry_run: options.dry_run,
            netns_exec: options.netns_exec,
            ..TcConfig::default()
        };
        Arc::new(TcApplier::new(tc_config, &config.topology))
    };

    let (scheduler, events) = Scheduler::start(config.topology, applier, clock, config.scheduler);
    let event_writer = tokio::spawn(async move {
        let out = event_log.open().await?;
        write_events(events, out).await
    });

    println!("--- Scenarios ---");
    let mut rejected = 0;
    for definition in config.scenarios {
        let definition = match definition {
            Ok(definition) => definition,
            Err(e) => {
                println!("* Error: {e:#}");
                rejected += 1;
                continue;
            }
        };

        let id = definition.id.clone();
        match scheduler.create(definition).await {
            Ok(state) => println!("* {id}: {}", describe_state(&state)),
            Err(e) => {
                println!("* {id}: rejected ({e})");
                rejected += 1;
            }
        }
    }
    if rejected > 0 {
        tracing::warn!(rejected, "some scenarios were rejected");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(options.status_interval_secs.max(1)));
    ticker.tick().await;
    let mut ctrl_c = pin!(tokio::signal::ctrl_c().fuse());
    loop {
        select_biased! {
            result = ctrl_c => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = ticker.tick().fuse() => print_status(&scheduler.snapshot()),
        }
    }

    println!("--- Shutting down ---");
    scheduler.shutdown().await;
    event_writer
        .await
        .context("event writer crashed")?
        .context("event writer errored")?;

    print_status(&scheduler.snapshot());
    Ok(())
}

/// Where the JSON lines go; stdout is left to the status blocks
enum EventLog {
    Stderr,
    File(PathBuf),
}

impl EventLog {
    fn new(path: Option<PathBuf>) -> Self {
        path.map_or(EventLog::Stderr, EventLog::File)
    }

    async fn open(&self) -> anyhow::Result<Box<dyn AsyncWrite + Send + Unpin>> {
        Ok(match self {
            EventLog::Stderr => Box::new(tokio::io::stderr()),
            EventLog::File(path) => Box::new(
                tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("failed to create {}", path.display()))?,
            ),
        })
    }
}

impl Display for EventLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventLog::Stderr => f.write_str("stderr"),
            EventLog::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Writes every event as a JSON line until the scheduler drops its sender
async fn write_events(mut events: EventReceiver, mut out: impl AsyncWrite + Unpin) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        let mut line = serde_json::to_vec(&event).context("failed to serialize event")?;
        line.push(b'\n');
        out.write_all(&line).await.context("failed to write event")?;
        out.flush().await?;
    }

    let dropped = events.dropped();
    if dropped > 0 {
        tracing::warn!(dropped, "events were dropped because the log could not keep up");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use impairment_core::event::{self, Event, Transition};

    #[test]
    fn test_event_log_defaults_to_stderr() {
        assert!(matches!(EventLog::new(None), EventLog::Stderr));
        assert_eq!(EventLog::new(None).to_string(), "stderr");
        assert_eq!(
            EventLog::new(Some(PathBuf::from("events.jsonl"))).to_string(),
            "events.jsonl"
        );
    }

    #[tokio::test]
    async fn test_events_are_written_as_json_lines() {
        let (sender, events) = event::channel(8);
        sender.record(Event::new(Utc::now(), Transition::TopologyReplaced, "topology 1 replaced by 2"));
        sender.record(Event::new(Utc::now(), Transition::TopologyReplaced, "topology 2 replaced by 3"));
        drop(sender);

        let mut out = Vec::new();
        write_events(events, &mut out).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["message"], "topology 2 replaced by 3");
    }
}
