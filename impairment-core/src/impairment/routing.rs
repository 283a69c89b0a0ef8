use crate::impairment::InvalidImpairment;
use crate::topology::spec::Capability;
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// A control-plane event injected on a router
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RoutingEvent {
    /// Shuts down the BGP sessions of the router, or only the one with `neighbor`
    BgpSessionDown { neighbor: Option<IpAddr> },
    /// Stops advertising a prefix over BGP
    BgpWithdraw { prefix: Ipv4Cidr },
    /// Overrides the OSPF cost of the interface
    OspfCost { cost: u16 },
    /// Brings the interface administratively down
    InterfaceDown,
}

impl RoutingEvent {
    pub fn validate(&self) -> Result<(), InvalidImpairment> {
        if let RoutingEvent::OspfCost { cost: 0 } = self {
            return Err(InvalidImpairment::InvalidRoutingEvent(
                "ospf cost must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The routing daemon the node must run for this event to make sense
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            RoutingEvent::BgpSessionDown { .. } | RoutingEvent::BgpWithdraw { .. } => {
                Some(Capability::Bgp)
            }
            RoutingEvent::OspfCost { .. } => Some(Capability::Ospf),
            RoutingEvent::InterfaceDown => None,
        }
    }
}

impl Display for RoutingEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingEvent::BgpSessionDown { neighbor: None } => f.write_str("bgp sessions down"),
            RoutingEvent::BgpSessionDown {
                neighbor: Some(neighbor),
            } => write!(f, "bgp session with {neighbor} down"),
            RoutingEvent::BgpWithdraw { prefix } => write!(f, "bgp withdraw {prefix}"),
            RoutingEvent::OspfCost { cost } => write!(f, "ospf cost {cost}"),
            RoutingEvent::InterfaceDown => f.write_str("interface down"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub address: Ipv4Addr,
    pub network_prefix: u8,
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.network_prefix)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = InvalidImpairment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| InvalidImpairment::InvalidPrefix {
            prefix: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split('/');
        let address: Ipv4Addr = parts
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| invalid("invalid ipv4 address"))?;

        // A missing network prefix is interpreted as /32
        let network_prefix: u8 = parts
            .next()
            .unwrap_or("32")
            .parse()
            .map_err(|_| invalid("the network prefix is not a valid unsigned integer"))?;
        if network_prefix > 32 {
            return Err(invalid("network prefix cannot be higher than 32"));
        }

        if parts.next().is_some() {
            return Err(invalid("trailing characters"));
        }

        Ok(Self {
            address,
            network_prefix,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_prefix() {
        let prefix: Ipv4Cidr = "10.0.0.0/24".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.0.0.0/24");

        let host: Ipv4Cidr = "10.0.0.1".parse().unwrap();
        assert_eq!(host.network_prefix, 32);

        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/24/1".parse::<Ipv4Cidr>().is_err());
        assert!("::1/64".parse::<Ipv4Cidr>().is_err());
    }
}
