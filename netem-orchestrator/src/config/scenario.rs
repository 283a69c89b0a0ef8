use anyhow::{Context, bail};
use impairment_core::impairment::qdisc::QueueDiscipline;
use impairment_core::impairment::routing::{Ipv4Cidr, RoutingEvent};
use impairment_core::impairment::units::{Percentage, parse_rate, parse_size, parse_time};
use impairment_core::impairment::{
    CorrelatedRatio, Delay, DelayDistribution, Impairment, ImpairmentSpec, Jitter,
};
use impairment_core::scenario::{DEFAULT_PRIORITY, DEFAULT_TRANSIENT_DURATION, ScenarioDefinition};
use impairment_core::schedule::{Recurrence, ScheduleError, parse_duration};
use impairment_core::target::Target;
use impairment_core::topology::Generation;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use std::net::IpAddr;

#[derive(Deserialize, Clone)]
pub struct ScenariosJson {
    pub scenarios: Vec<ScenarioJson>,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ScenarioTypeJson {
    Persistent,
    Transient,
}

#[serde_as]
#[derive(Deserialize, Clone)]
pub struct ScenarioJson {
    pub id: String,
    #[serde(rename = "type")]
    #[serde(default = "default_scenario_type")]
    kind: ScenarioTypeJson,
    /// `link:a->b`, `link#<id>`, `path:a->b->c`, `path#<id>,<id>` or `node:x`
    #[serde_as(as = "DisplayFromStr")]
    applies_to: Target,
    impairments: ImpairmentsJson,
    /// RRULE or five-field cron expression, required for transient scenarios
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    schedule: Option<Recurrence>,
    /// ISO 8601 duration (e.g. `PT15M`) or seconds
    duration: Option<String>,
    #[serde(default = "default_priority")]
    priority: i32,
    description: Option<String>,
    /// Rejects the scenario unless the topology is at this generation
    topology_generation: Option<u64>,
}

fn default_scenario_type() -> ScenarioTypeJson {
    ScenarioTypeJson::Transient
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Netem parameters may be nested under `netem` or given at the top level
#[derive(Deserialize, Clone)]
struct ImpairmentsJson {
    netem: Option<NetemJson>,
    #[serde(flatten)]
    flat_netem: NetemJson,
    qdisc: Option<QdiscJson>,
    control_plane: Option<ControlPlaneJson>,
}

#[serde_as]
#[derive(Deserialize, Clone, Default)]
struct NetemJson {
    /// e.g. `50ms`
    delay: Option<String>,
    /// Jitter around `delay`, e.g. `10ms`
    delay_variation: Option<String>,
    /// 0-100
    delay_correlation: Option<f64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    distribution: Option<DelayDistribution>,
    jitter: Option<JitterJson>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    loss: Option<Percentage>,
    loss_correlation: Option<f64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    duplicate: Option<Percentage>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    corrupt: Option<Percentage>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    reorder: Option<Percentage>,
    reorder_correlation: Option<f64>,
    /// e.g. `1mbit`
    rate: Option<String>,
}

#[derive(Deserialize, Clone)]
struct JitterJson {
    mean: String,
    stddev: String,
}

#[derive(Deserialize, Clone)]
struct QdiscJson {
    #[serde(rename = "type")]
    #[serde(default = "default_qdisc_type")]
    kind: String,
    rate: Option<String>,
    ceil: Option<String>,
    burst: Option<String>,
    limit: Option<u32>,
    latency: Option<String>,
}

fn default_qdisc_type() -> String {
    "htb".to_string()
}

#[derive(Deserialize, Clone)]
struct ControlPlaneJson {
    bgp_flap: Option<BgpFlapJson>,
    bgp_withdraw: Option<BgpWithdrawJson>,
    ospf_cost_change: Option<OspfCostJson>,
    interface_flap: Option<serde_json::Value>,
}

#[derive(Deserialize, Clone)]
struct BgpFlapJson {
    neighbor: Option<IpAddr>,
}

#[serde_as]
#[derive(Deserialize, Clone)]
struct BgpWithdrawJson {
    #[serde_as(as = "DisplayFromStr")]
    prefix: Ipv4Cidr,
}

#[derive(Deserialize, Clone)]
struct OspfCostJson {
    cost: u16,
}

impl TryFrom<ScenarioJson> for ScenarioDefinition {
    type Error = anyhow::Error;

    fn try_from(json: ScenarioJson) -> Result<Self, Self::Error> {
        let id = json.id;
        let impairments = json
            .impairments
            .into_spec()
            .with_context(|| format!("invalid impairments in scenario `{id}`"))?;

        let definition = match json.kind {
            ScenarioTypeJson::Persistent => {
                ScenarioDefinition::persistent(id.as_str(), json.applies_to, impairments)
            }
            ScenarioTypeJson::Transient => {
                let recurrence = json
                    .schedule
                    .ok_or(ScheduleError::MissingSchedule)
                    .with_context(|| format!("invalid scenario `{id}`"))?;
                let duration = json
                    .duration
                    .as_deref()
                    .map(parse_duration)
                    .transpose()
                    .with_context(|| format!("invalid duration in scenario `{id}`"))?
                    .unwrap_or(DEFAULT_TRANSIENT_DURATION);

                ScenarioDefinition::transient(
                    id.as_str(),
                    json.applies_to,
                    impairments,
                    recurrence,
                    duration,
                )
                .with_context(|| format!("invalid scenario `{id}`"))?
            }
        };

        let mut definition = definition.with_priority(json.priority);
        if let Some(description) = json.description {
            definition = definition.with_description(description);
        }
        if let Some(generation) = json.topology_generation {
            definition = definition.for_generation(Generation(generation));
        }

        Ok(definition)
    }
}

impl ImpairmentsJson {
    fn into_spec(self) -> anyhow::Result<ImpairmentSpec> {
        let mut impairments = self.netem.unwrap_or(self.flat_netem).into_impairments()?;
        if let Some(qdisc) = self.qdisc {
            impairments.push(Impairment::QueueDiscipline(qdisc.try_into()?));
        }
        if let Some(control_plane) = self.control_plane {
            impairments.extend(control_plane.into_events().map(Impairment::RoutingEvent));
        }

        Ok(ImpairmentSpec::new(impairments)?)
    }
}

impl NetemJson {
    fn into_impairments(self) -> anyhow::Result<Vec<Impairment>> {
        let mut impairments = Vec::new();

        let (delay, variation) = match (self.delay, self.jitter) {
            (Some(_), Some(_)) => bail!("`delay` and `jitter` are mutually exclusive"),
            (None, Some(jitter)) => (Some(jitter.mean), Some(jitter.stddev)),
            (delay, None) => (delay, self.delay_variation),
        };

        if let Some(delay) = delay {
            impairments.push(Impairment::Delay(Delay {
                latency: parse_time(&delay)?,
                correlation: percentage(self.delay_correlation)?,
                distribution: self.distribution,
            }));
        }
        if let Some(variation) = variation {
            impairments.push(Impairment::Jitter(Jitter {
                variation: parse_time(&variation)?,
                correlation: None,
            }));
        }

        if let Some(loss) = correlated(self.loss, self.loss_correlation)? {
            impairments.push(Impairment::Loss(loss));
        }
        if let Some(duplicate) = correlated(self.duplicate, None)? {
            impairments.push(Impairment::Duplication(duplicate));
        }
        if let Some(corrupt) = correlated(self.corrupt, None)? {
            impairments.push(Impairment::Corruption(corrupt));
        }
        if let Some(reorder) = correlated(self.reorder, self.reorder_correlation)? {
            impairments.push(Impairment::Reordering(reorder));
        }
        if let Some(rate) = self.rate {
            impairments.push(Impairment::bandwidth_cap(parse_rate(&rate)?));
        }

        Ok(impairments)
    }
}

fn percentage(percent: Option<f64>) -> anyhow::Result<Option<Percentage>> {
    Ok(percent.map(Percentage::new).transpose()?)
}

fn correlated(
    ratio: Option<Percentage>,
    correlation: Option<f64>,
) -> anyhow::Result<Option<CorrelatedRatio>> {
    let Some(ratio) = ratio else {
        return Ok(None);
    };

    Ok(Some(CorrelatedRatio {
        ratio,
        correlation: percentage(correlation)?,
    }))
}

impl TryFrom<QdiscJson> for QueueDiscipline {
    type Error = anyhow::Error;

    fn try_from(json: QdiscJson) -> Result<Self, Self::Error> {
        let rate = || -> anyhow::Result<u64> {
            let rate = json.rate.as_deref().context("the qdisc needs a `rate`")?;
            Ok(parse_rate(rate)?)
        };
        let burst = json.burst.as_deref().map(parse_size).transpose()?;

        let qdisc = match json.kind.as_str() {
            "htb" => QueueDiscipline::Htb {
                rate_bps: rate()?,
                ceil_bps: json.ceil.as_deref().map(parse_rate).transpose()?,
                burst_bytes: burst,
            },
            "tbf" => QueueDiscipline::Tbf {
                rate_bps: rate()?,
                burst_bytes: burst.context("tbf needs a `burst`")?,
                latency: parse_time(json.latency.as_deref().context("tbf needs a `latency`")?)?,
            },
            "fq_codel" => QueueDiscipline::FqCodel {
                limit_packets: json.limit,
            },
            "pfifo" => QueueDiscipline::Pfifo {
                limit_packets: json.limit,
            },
            other => bail!("unsupported qdisc type `{other}`"),
        };

        Ok(qdisc)
    }
}

impl ControlPlaneJson {
    fn into_events(self) -> impl Iterator<Item = RoutingEvent> {
        [
            self.bgp_flap
                .map(|flap| RoutingEvent::BgpSessionDown {
                    neighbor: flap.neighbor,
                }),
            self.bgp_withdraw
                .map(|withdraw| RoutingEvent::BgpWithdraw {
                    prefix: withdraw.prefix,
                }),
            self.ospf_cost_change
                .map(|change| RoutingEvent::OspfCost { cost: change.cost }),
            self.interface_flap.map(|_| RoutingEvent::InterfaceDown),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use impairment_core::impairment::ImpairmentKind;
    use impairment_core::scenario::{Activation, ScenarioKind};
    use std::time::Duration;

    fn parse(json: &str) -> anyhow::Result<ScenarioDefinition> {
        let json: ScenarioJson = serde_json::from_str(json)?;
        ScenarioDefinition::try_from(json)
    }

    #[test]
    fn test_transient_scenario_with_nested_netem() {
        let definition = parse(
            r#"{
                "id": "burst",
                "applies_to": "path:h1->r1->r2",
                "schedule": "RRULE:FREQ=DAILY;BYHOUR=12",
                "duration": "PT1H",
                "priority": 10,
                "impairments": {
                    "netem": {"delay": "50ms", "delay_variation": "10ms", "loss": "2%", "loss_correlation": 25}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(definition.kind(), ScenarioKind::Transient);
        assert_eq!(definition.priority, 10);
        assert!(matches!(
            definition.activation,
            Activation::Transient { duration, .. } if duration == Duration::from_secs(3600)
        ));
        let kinds: Vec<_> = definition.impairments.kinds().collect();
        assert_eq!(
            kinds,
            [ImpairmentKind::Delay, ImpairmentKind::Jitter, ImpairmentKind::Loss]
        );
    }

    #[test]
    fn test_persistent_scenario_with_flat_netem_and_qdisc() {
        let definition = parse(
            r#"{
                "id": "baseline",
                "type": "persistent",
                "applies_to": "link:h1->r1",
                "impairments": {
                    "loss": "0.3%",
                    "qdisc": {"type": "tbf", "rate": "10mbit", "burst": "32kb", "latency": "50ms"},
                    "control_plane": {"ospf_cost_change": {"cost": 100}}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(definition.kind(), ScenarioKind::Persistent);
        assert_eq!(definition.priority, DEFAULT_PRIORITY);
        assert_eq!(
            definition.impairments.queue_discipline(),
            Some(&QueueDiscipline::Tbf {
                rate_bps: 10_000_000,
                burst_bytes: 32 * 1024,
                latency: Duration::from_millis(50),
            })
        );
        assert_eq!(
            definition.impairments.routing_event(),
            Some(&RoutingEvent::OspfCost { cost: 100 })
        );
    }

    #[test]
    fn test_transient_defaults_and_errors() {
        let definition = parse(
            r#"{"id": "t", "applies_to": "node:r1", "schedule": "*/10 * * * *", "impairments": {"rate": "1mbit"}}"#,
        )
        .unwrap();
        assert!(matches!(
            definition.activation,
            Activation::Transient { duration, .. } if duration == DEFAULT_TRANSIENT_DURATION
        ));

        let missing_schedule =
            parse(r#"{"id": "t", "applies_to": "node:r1", "impairments": {"loss": "1%"}}"#);
        assert!(missing_schedule.is_err());

        let bad_target = parse(
            r#"{"id": "t", "type": "persistent", "applies_to": "router:r1", "impairments": {}}"#,
        );
        assert!(bad_target.is_err());

        let two_routing_events = parse(
            r#"{"id": "t", "type": "persistent", "applies_to": "node:r1", "impairments": {
                "control_plane": {"bgp_flap": {}, "interface_flap": {}}
            }}"#,
        );
        assert!(two_routing_events.is_err());
    }
}
