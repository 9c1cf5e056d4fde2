//! ICE candidate descriptions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

/// Transport protocol of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateProtocol {
    Udp,
    Tcp,
}

impl fmt::Display for CandidateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp => write!(f, "UDP"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

impl FromStr for CandidateProtocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            _ => Err(ProtocolError::UnknownProtocol(s.to_string())),
        }
    }
}

/// ICE candidate type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    /// Host candidate (local address)
    Host,
    /// Server reflexive (STUN)
    Srflx,
    /// Peer reflexive (discovered during connectivity checks)
    Prflx,
    /// Relay (TURN)
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Host => "host",
            Self::Srflx => "srflx",
            Self::Prflx => "prflx",
            Self::Relay => "relay",
        };
        f.write_str(name)
    }
}

impl FromStr for CandidateType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "host" => Ok(Self::Host),
            "srflx" => Ok(Self::Srflx),
            "prflx" => Ok(Self::Prflx),
            "relay" => Ok(Self::Relay),
            _ => Err(ProtocolError::UnknownCandidateType(s.to_string())),
        }
    }
}

/// A network endpoint offered during ICE negotiation.
///
/// `address` is kept exactly as given so a hostname or literal IP
/// round-trips through the candidate line unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u16,
    pub protocol: CandidateProtocol,
    pub priority: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
}

impl IceCandidate {
    /// The single host candidate the demo hands to its transport:
    /// foundation `0`, component `0`, UDP, priority `0`.
    pub fn host(address: impl Into<String>, port: u16) -> Self {
        Self {
            foundation: "0".to_string(),
            component: 0,
            protocol: CandidateProtocol::Udp,
            priority: 0,
            address: address.into(),
            port,
            candidate_type: CandidateType::Host,
        }
    }

    /// Format as a `candidate:` attribute value
    pub fn to_candidate_string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.address,
            self.port,
            self.candidate_type
        )
    }
}

impl FromStr for IceCandidate {
    type Err = ProtocolError;

    /// Parse `candidate:<foundation> <component> <protocol> <priority>
    /// <address> <port> typ <type> [extensions...]`, with or without a
    /// leading `a=`.
    fn from_str(s: &str) -> ProtocolResult<Self> {
        let line = s.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let body = line
            .strip_prefix("candidate:")
            .ok_or_else(|| ProtocolError::InvalidCandidate(format!("missing prefix: {s}")))?;

        let parts: Vec<&str> = body.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(ProtocolError::InvalidCandidate(format!(
                "expected at least 8 fields, got {}",
                parts.len()
            )));
        }
        if parts[6] != "typ" {
            return Err(ProtocolError::InvalidCandidate(format!(
                "expected 'typ', got '{}'",
                parts[6]
            )));
        }

        let number = |field: &str, name: &str| {
            field
                .parse::<u32>()
                .map_err(|_| ProtocolError::InvalidCandidate(format!("bad {name}: {field}")))
        };

        let component = u16::try_from(number(parts[1], "component")?)
            .map_err(|_| ProtocolError::InvalidCandidate(format!("bad component: {}", parts[1])))?;
        let port = u16::try_from(number(parts[5], "port")?)
            .map_err(|_| ProtocolError::InvalidCandidate(format!("bad port: {}", parts[5])))?;

        Ok(Self {
            foundation: parts[0].to_string(),
            component,
            protocol: parts[2].parse()?,
            priority: number(parts[3], "priority")?,
            address: parts[4].to_string(),
            port,
            candidate_type: parts[7].parse()?,
        })
    }
}

/// What an ICE transport accepts as a remote candidate: either a
/// structured host/port/protocol triple or a free-form candidate line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IceCandidateInit {
    Structured {
        host: String,
        port: u16,
        protocol: CandidateProtocol,
    },
    Sdp {
        #[serde(default)]
        sdp_mid: String,
        candidate: String,
    },
}

impl IceCandidateInit {
    /// Wrap a candidate line with an empty media id
    pub fn from_line(candidate: impl Into<String>) -> Self {
        Self::Sdp {
            sdp_mid: String::new(),
            candidate: candidate.into(),
        }
    }

    /// Resolve into a full candidate description
    pub fn into_candidate(self) -> ProtocolResult<IceCandidate> {
        match self {
            Self::Structured {
                host,
                port,
                protocol,
            } => Ok(IceCandidate {
                protocol,
                ..IceCandidate::host(host, port)
            }),
            Self::Sdp { candidate, .. } => candidate.parse(),
        }
    }
}

/// Candidate line for a host candidate at `address:port`, in the exact
/// form the demo server expects.
pub fn host_candidate_line(address: &str, port: u16) -> String {
    IceCandidate::host(address, port).to_candidate_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_candidate_line_is_exact() {
        assert_eq!(
            host_candidate_line("127.0.0.1", 3737),
            "candidate:0 0 UDP 0 127.0.0.1 3737 typ host"
        );
        assert_eq!(
            host_candidate_line("ice.example.test", 40000),
            "candidate:0 0 UDP 0 ice.example.test 40000 typ host"
        );
    }

    #[test]
    fn test_parse_browser_candidate() {
        let line = "a=candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx \
                    raddr 10.0.0.2 rport 46154 generation 0";
        let candidate: IceCandidate = line.parse().unwrap();

        assert_eq!(candidate.foundation, "842163049");
        assert_eq!(candidate.component, 1);
        assert_eq!(candidate.protocol, CandidateProtocol::Udp);
        assert_eq!(candidate.priority, 1677729535);
        assert_eq!(candidate.address, "203.0.113.7");
        assert_eq!(candidate.port, 46154);
        assert_eq!(candidate.candidate_type, CandidateType::Srflx);
    }

    #[test]
    fn test_parse_demo_line() {
        let candidate: IceCandidate = "candidate:0 0 UDP 0 127.0.0.1 3737 typ host"
            .parse()
            .unwrap();
        assert_eq!(candidate, IceCandidate::host("127.0.0.1", 3737));
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!("0 0 UDP 0 127.0.0.1 3737 typ host".parse::<IceCandidate>().is_err());
        assert!("candidate:0 0 UDP 0 127.0.0.1".parse::<IceCandidate>().is_err());
        assert!("candidate:0 0 UDP 0 127.0.0.1 70000 typ host".parse::<IceCandidate>().is_err());
        assert!("candidate:0 0 SCTP 0 127.0.0.1 3737 typ host".parse::<IceCandidate>().is_err());
        assert!("candidate:0 0 UDP 0 127.0.0.1 3737 type host".parse::<IceCandidate>().is_err());
        assert!("candidate:0 0 UDP 0 127.0.0.1 3737 typ mystery".parse::<IceCandidate>().is_err());
    }

    #[test]
    fn test_candidate_init_variants_agree() {
        let structured = IceCandidateInit::Structured {
            host: "127.0.0.1".to_string(),
            port: 3737,
            protocol: CandidateProtocol::Udp,
        };
        let line = IceCandidateInit::from_line(host_candidate_line("127.0.0.1", 3737));

        assert_eq!(
            structured.into_candidate().unwrap(),
            line.into_candidate().unwrap()
        );
    }
}
