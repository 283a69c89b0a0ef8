use crate::config::LoadedConfig;
use crate::config::cli::ValidateOpt;
use crate::util::print_topology;
use anyhow::bail;
use chrono::Utc;
use impairment_core::applier::tc::{TcApplier, TcConfig};
use impairment_core::scenario::Activation;
use std::collections::BTreeSet;

pub fn validate(options: &ValidateOpt, config: LoadedConfig) -> anyhow::Result<()> {
    print_topology(&config.topology);

    let tc = options.show_commands.then(|| {
        let tc_config = TcConfig {
            dry_run: true,
            ..TcConfig::default()
        };
        TcApplier::new(tc_config, &config.topology)
    });

    let now = Utc::now();
    let mut ids = BTreeSet::new();
    let mut invalid = 0;

    println!("--- Scenarios ---");
    for definition in config.scenarios {
        let definition = match definition {
            Ok(definition) => definition,
            Err(e) => {
                println!("* Error: {e:#}");
                invalid += 1;
                continue;
            }
        };

        if !ids.insert(definition.id.clone()) {
            println!("* Error: scenario `{}` is declared twice", definition.id);
            invalid += 1;
            continue;
        }

        let endpoints = match definition.validate_against(&config.topology) {
            Ok(endpoints) => endpoints,
            Err(e) => {
                println!("* {}: error: {e}", definition.id);
                invalid += 1;
                continue;
            }
        };

        println!(
            "* {} ({:?}, priority {}) on {}",
            definition.id,
            definition.kind(),
            definition.priority,
            definition.target
        );
        if let Some(description) = &definition.description {
            println!("  | {description}");
        }
        println!("  * Impairments: {}", definition.impairments);

        let endpoint_names: Vec<_> = endpoints.iter().map(|e| e.to_string()).collect();
        println!("  * Endpoints: {}", endpoint_names.join(", "));

        if let Activation::Transient {
            recurrence,
            duration,
        } = &definition.activation
        {
            println!(
                "  * Schedule: {recurrence}, active for {}s",
                duration.as_secs()
            );
            for occurrence in recurrence.upcoming(now, options.occurrences) {
                println!("    | {occurrence}");
            }
        }

        let Some(tc) = &tc else {
            continue;
        };
        println!("  * Commands:");
        for endpoint in &endpoints {
            let mut commands = tc.render_shaping(endpoint, &definition.impairments);
            if let Some(event) = definition.impairments.routing_event() {
                match tc.render_routing(endpoint, event, false) {
                    Ok(routing) => commands.extend(routing),
                    Err(e) => println!("    | error: {e}"),
                }
            }
            for command in commands {
                println!("    | {command}");
            }
        }
    }

    if invalid > 0 {
        bail!("{invalid} scenario(s) are invalid");
    }

    println!("--- All scenarios are valid ---");
    Ok(())
}
