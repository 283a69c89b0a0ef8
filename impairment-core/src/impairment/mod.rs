//! Declarative impairment model
//!
//! An [`ImpairmentSpec`] holds at most one [`Impairment`] per [`ImpairmentKind`]. Specs are
//! validated when they are built, so everything downstream can assume sane parameters.

pub mod qdisc;
pub mod routing;
pub mod units;

use qdisc::QueueDiscipline;
use routing::RoutingEvent;
use serde::{Deserialize, Serialize, Serializer};
use serde_with::{DurationMicroSeconds, serde_as};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use units::{Percentage, format_rate, format_time};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidImpairment {
    #[error("percentage {0} is outside of 0..=100")]
    PercentageOutOfRange(f64),
    #[error("malformed value `{0}`")]
    Malformed(String),
    #[error("rates must be at least 1 bit per second")]
    ZeroRate,
    #[error("jitter must be positive")]
    ZeroJitter,
    #[error("unknown delay distribution `{0}`")]
    UnknownDistribution(String),
    #[error("invalid queue discipline: {0}")]
    InvalidQdisc(String),
    #[error("invalid routing event: {0}")]
    InvalidRoutingEvent(String),
    #[error("invalid prefix `{prefix}`: {reason}")]
    InvalidPrefix { prefix: String, reason: String },
    #[error("the {0} impairment is specified more than once")]
    DuplicateKind(ImpairmentKind),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpairmentKind {
    Delay,
    Jitter,
    Loss,
    Duplication,
    Reordering,
    Corruption,
    BandwidthCap,
    QueueDiscipline,
    RoutingEvent,
}

impl ImpairmentKind {
    /// Kinds rendered as netem parameters
    pub fn is_netem(self) -> bool {
        !matches!(
            self,
            ImpairmentKind::QueueDiscipline | ImpairmentKind::RoutingEvent
        )
    }
}

impl Display for ImpairmentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImpairmentKind::Delay => "delay",
            ImpairmentKind::Jitter => "jitter",
            ImpairmentKind::Loss => "loss",
            ImpairmentKind::Duplication => "duplication",
            ImpairmentKind::Reordering => "reordering",
            ImpairmentKind::Corruption => "corruption",
            ImpairmentKind::BandwidthCap => "bandwidth-cap",
            ImpairmentKind::QueueDiscipline => "queue-discipline",
            ImpairmentKind::RoutingEvent => "routing-event",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayDistribution {
    Uniform,
    Normal,
    Pareto,
    ParetoNormal,
}

impl DelayDistribution {
    pub fn as_tc_str(self) -> &'static str {
        match self {
            DelayDistribution::Uniform => "uniform",
            DelayDistribution::Normal => "normal",
            DelayDistribution::Pareto => "pareto",
            DelayDistribution::ParetoNormal => "paretonormal",
        }
    }
}

impl std::str::FromStr for DelayDistribution {
    type Err = InvalidImpairment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "uniform" => Ok(DelayDistribution::Uniform),
            "normal" => Ok(DelayDistribution::Normal),
            "pareto" => Ok(DelayDistribution::Pareto),
            "paretonormal" => Ok(DelayDistribution::ParetoNormal),
            _ => Err(InvalidImpairment::UnknownDistribution(s.to_string())),
        }
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Delay {
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub latency: Duration,
    pub correlation: Option<Percentage>,
    pub distribution: Option<DelayDistribution>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Jitter {
    #[serde_as(as = "DurationMicroSeconds<u64>")]
    pub variation: Duration,
    pub correlation: Option<Percentage>,
}

/// A probability with an optional correlation to the previous packet
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CorrelatedRatio {
    pub ratio: Percentage,
    pub correlation: Option<Percentage>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "params")]
pub enum Impairment {
    Delay(Delay),
    Jitter(Jitter),
    Loss(CorrelatedRatio),
    Duplication(CorrelatedRatio),
    Reordering(CorrelatedRatio),
    Corruption(CorrelatedRatio),
    BandwidthCap { rate_bps: u64 },
    QueueDiscipline(QueueDiscipline),
    RoutingEvent(RoutingEvent),
}

impl Impairment {
    pub fn delay(latency: Duration) -> Self {
        Impairment::Delay(Delay {
            latency,
            correlation: None,
            distribution: None,
        })
    }

    pub fn jitter(variation: Duration) -> Self {
        Impairment::Jitter(Jitter {
            variation,
            correlation: None,
        })
    }

    pub fn loss(percent: f64) -> Result<Self, InvalidImpairment> {
        Ok(Impairment::Loss(CorrelatedRatio {
            ratio: Percentage::new(percent)?,
            correlation: None,
        }))
    }

    pub fn bandwidth_cap(rate_bps: u64) -> Self {
        Impairment::BandwidthCap { rate_bps }
    }

    pub fn kind(&self) -> ImpairmentKind {
        match self {
            Impairment::Delay(_) => ImpairmentKind::Delay,
            Impairment::Jitter(_) => ImpairmentKind::Jitter,
            Impairment::Loss(_) => ImpairmentKind::Loss,
            Impairment::Duplication(_) => ImpairmentKind::Duplication,
            Impairment::Reordering(_) => ImpairmentKind::Reordering,
            Impairment::Corruption(_) => ImpairmentKind::Corruption,
            Impairment::BandwidthCap { .. } => ImpairmentKind::BandwidthCap,
            Impairment::QueueDiscipline(_) => ImpairmentKind::QueueDiscipline,
            Impairment::RoutingEvent(_) => ImpairmentKind::RoutingEvent,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidImpairment> {
        match self {
            Impairment::Jitter(jitter) if jitter.variation.is_zero() => {
                Err(InvalidImpairment::ZeroJitter)
            }
            Impairment::BandwidthCap { rate_bps: 0 } => Err(InvalidImpairment::ZeroRate),
            Impairment::QueueDiscipline(qdisc) => qdisc.validate(),
            Impairment::RoutingEvent(event) => event.validate(),
            _ => Ok(()),
        }
    }
}

impl Display for Impairment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Impairment::Delay(delay) => write!(f, "delay {}", format_time(delay.latency)),
            Impairment::Jitter(jitter) => write!(f, "jitter {}", format_time(jitter.variation)),
            Impairment::Loss(loss) => write!(f, "loss {}", loss.ratio),
            Impairment::Duplication(duplicate) => write!(f, "duplicate {}", duplicate.ratio),
            Impairment::Reordering(reorder) => write!(f, "reorder {}", reorder.ratio),
            Impairment::Corruption(corrupt) => write!(f, "corrupt {}", corrupt.ratio),
            Impairment::BandwidthCap { rate_bps } => write!(f, "rate {}", format_rate(*rate_bps)),
            Impairment::QueueDiscipline(qdisc) => write!(f, "qdisc {qdisc}"),
            Impairment::RoutingEvent(event) => write!(f, "{event}"),
        }
    }
}

/// The impairments to enforce on a target, at most one per kind
///
/// The empty spec means "no impairment" and translates into a full revert.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImpairmentSpec {
    impairments: BTreeMap<ImpairmentKind, Impairment>,
}

impl ImpairmentSpec {
    pub fn new(
        impairments: impl IntoIterator<Item = Impairment>,
    ) -> Result<Self, InvalidImpairment> {
        let mut spec = Self::none();
        for impairment in impairments {
            impairment.validate()?;
            let kind = impairment.kind();
            if spec.impairments.insert(kind, impairment).is_some() {
                return Err(InvalidImpairment::DuplicateKind(kind));
            }
        }

        Ok(spec)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.impairments.is_empty()
    }

    pub fn get(&self, kind: ImpairmentKind) -> Option<&Impairment> {
        self.impairments.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ImpairmentKind> + '_ {
        self.impairments.keys().copied()
    }

    /// Impairments ordered by kind
    pub fn iter(&self) -> impl Iterator<Item = &Impairment> {
        self.impairments.values()
    }

    pub fn len(&self) -> usize {
        self.impairments.len()
    }

    pub fn has_netem(&self) -> bool {
        self.kinds().any(ImpairmentKind::is_netem)
    }

    pub fn queue_discipline(&self) -> Option<&QueueDiscipline> {
        match self.get(ImpairmentKind::QueueDiscipline) {
            Some(Impairment::QueueDiscipline(qdisc)) => Some(qdisc),
            _ => None,
        }
    }

    pub fn routing_event(&self) -> Option<&RoutingEvent> {
        match self.get(ImpairmentKind::RoutingEvent) {
            Some(Impairment::RoutingEvent(event)) => Some(event),
            _ => None,
        }
    }

    /// Adds an already validated impairment picked from another spec
    pub(crate) fn insert_validated(&mut self, impairment: Impairment) {
        self.impairments.insert(impairment.kind(), impairment);
    }
}

impl Display for ImpairmentSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            return f.write_str("none");
        }

        for (i, impairment) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{impairment}")?;
        }
        Ok(())
    }
}

impl Serialize for ImpairmentSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::impairment::qdisc::QueueDiscipline;

    #[test]
    fn test_spec_rejects_duplicate_kinds() {
        let result = ImpairmentSpec::new([
            Impairment::loss(1.0).unwrap(),
            Impairment::loss(2.0).unwrap(),
        ]);
        assert_eq!(
            result.unwrap_err(),
            InvalidImpairment::DuplicateKind(ImpairmentKind::Loss)
        );
    }

    #[test]
    fn test_spec_validates_parameters() {
        assert_eq!(
            ImpairmentSpec::new([Impairment::bandwidth_cap(0)]).unwrap_err(),
            InvalidImpairment::ZeroRate
        );
        assert_eq!(
            ImpairmentSpec::new([Impairment::jitter(Duration::ZERO)]).unwrap_err(),
            InvalidImpairment::ZeroJitter
        );

        let htb = Impairment::QueueDiscipline(QueueDiscipline::Htb {
            rate_bps: 10_000_000,
            ceil_bps: Some(1_000_000),
            burst_bytes: None,
        });
        assert!(matches!(
            ImpairmentSpec::new([htb]).unwrap_err(),
            InvalidImpairment::InvalidQdisc(_)
        ));
    }

    #[test]
    fn test_spec_display_is_ordered_by_kind() {
        let spec = ImpairmentSpec::new([
            Impairment::loss(2.0).unwrap(),
            Impairment::delay(Duration::from_millis(50)),
        ])
        .unwrap();
        assert_eq!(spec.to_string(), "delay 50ms, loss 2%");
        assert_eq!(ImpairmentSpec::none().to_string(), "none");
    }
}
