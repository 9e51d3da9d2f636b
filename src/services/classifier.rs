//! OpenVPN output classifier
//!
//! Maps one raw output line to a severity plus the signals the session
//! controller reacts to. Severity comes from the first matching entry of
//! `SEVERITY_RULES`; every entry of `SIGNAL_RULES` is checked independently.

use std::net::Ipv4Addr;

use crate::domain::session::Severity;

/// Marker printed once the tunnel is fully established.
pub const SEQUENCE_COMPLETED: &str = "Initialization Sequence Completed";

/// Signal extracted from an output line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// The client finished its initialization sequence.
    SequenceCompleted,
    /// The server rejected the credentials.
    AuthFailed,
    /// The private key could not be decrypted with the supplied secret.
    DecryptFailed,
    /// A private tunnel address was printed next to a tunnel-interface marker.
    TunnelAddress(Ipv4Addr),
}

/// Classification result for a single line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classified {
    pub severity: Severity,
    pub signals: Vec<Signal>,
}

/// Line plus its lowercase form, computed once per line.
pub struct Line<'a> {
    raw: &'a str,
    lower: String,
}

impl<'a> Line<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            lower: raw.to_lowercase(),
        }
    }
}

/// One severity rule.
pub struct SeverityRule {
    pub name: &'static str,
    pub matches: fn(&Line<'_>) -> bool,
    pub severity: Severity,
}

/// One signal rule. Tunnel addresses need extraction and are handled apart.
pub struct SignalRule {
    pub name: &'static str,
    pub matches: fn(&Line<'_>) -> bool,
    pub signal: Signal,
}

/// Ordered severity table. Order matters: failures outrank transport markers.
pub const SEVERITY_RULES: &[SeverityRule] = &[
    SeverityRule {
        name: "sequence_completed",
        matches: is_sequence_completed,
        severity: Severity::Success,
    },
    SeverityRule {
        name: "auth_failed",
        matches: is_auth_failure,
        severity: Severity::Error,
    },
    SeverityRule {
        name: "decrypt_failed",
        matches: is_decrypt_failure,
        severity: Severity::Error,
    },
    SeverityRule {
        name: "error_marker",
        matches: has_error_marker,
        severity: Severity::Error,
    },
    SeverityRule {
        name: "tunnel_interface",
        matches: has_tunnel_marker,
        severity: Severity::Tun,
    },
    SeverityRule {
        name: "transport",
        matches: has_transport_marker,
        severity: Severity::Tcp,
    },
    SeverityRule {
        name: "handshake",
        matches: has_handshake_marker,
        severity: Severity::Tls,
    },
];

pub const SIGNAL_RULES: &[SignalRule] = &[
    SignalRule {
        name: "sequence_completed",
        matches: is_sequence_completed,
        signal: Signal::SequenceCompleted,
    },
    SignalRule {
        name: "auth_failed",
        matches: is_auth_failure,
        signal: Signal::AuthFailed,
    },
    SignalRule {
        name: "decrypt_failed",
        matches: is_decrypt_failure,
        signal: Signal::DecryptFailed,
    },
];

fn is_sequence_completed(line: &Line<'_>) -> bool {
    line.raw.contains(SEQUENCE_COMPLETED)
}

fn is_auth_failure(line: &Line<'_>) -> bool {
    line.raw.contains("AUTH_FAILED") || line.lower.contains("auth-failure")
}

fn is_decrypt_failure(line: &Line<'_>) -> bool {
    line.lower.contains("bad decrypt")
}

fn has_error_marker(line: &Line<'_>) -> bool {
    line.raw.contains("ERROR")
}

fn has_tunnel_marker(line: &Line<'_>) -> bool {
    line.raw.contains("tun0:") || (line.lower.contains("established") && line.raw.contains("tun"))
}

fn has_transport_marker(line: &Line<'_>) -> bool {
    line.raw.contains("Connecting to") || line.raw.contains("TCP")
}

fn has_handshake_marker(line: &Line<'_>) -> bool {
    line.raw.contains("TLS") || line.raw.contains("Peer Connection")
}

/// Lines that may carry the tunnel's own address.
fn is_tunnel_address_line(line: &Line<'_>) -> bool {
    line.raw.contains("tun0:")
        || (line.lower.contains("established")
            && (line.raw.contains("tun") || line.raw.contains("/24")))
}

/// Severity of a line: first matching rule wins, INFO otherwise.
pub fn severity_for(line: &str) -> Severity {
    let line = Line::new(line);
    severity_of(&line)
}

fn severity_of(line: &Line<'_>) -> Severity {
    SEVERITY_RULES
        .iter()
        .find(|rule| (rule.matches)(line))
        .map(|rule| rule.severity)
        .unwrap_or(Severity::Info)
}

/// Classify one output line.
pub fn classify(raw: &str) -> Classified {
    let line = Line::new(raw);
    let severity = severity_of(&line);

    let mut signals: Vec<Signal> = SIGNAL_RULES
        .iter()
        .filter(|rule| (rule.matches)(&line))
        .map(|rule| rule.signal)
        .collect();

    if is_tunnel_address_line(&line) {
        if let Some(addr) = first_private_ipv4(raw) {
            signals.push(Signal::TunnelAddress(addr));
        }
    }

    Classified { severity, signals }
}

/// First dotted-quad in `text` inside 10/8, 172.16/12 or 192.168/16.
pub fn first_private_ipv4(text: &str) -> Option<Ipv4Addr> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| token.len() >= 7)
        .filter_map(|token| token.trim_matches('.').parse::<Ipv4Addr>().ok())
        .find(|addr| addr.is_private())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_completed() {
        let c = classify("2024-01-01 10:00:00 Initialization Sequence Completed");
        assert_eq!(c.severity, Severity::Success);
        assert_eq!(c.signals, vec![Signal::SequenceCompleted]);
    }

    #[test]
    fn test_auth_failure_outranks_tls() {
        let c = classify("AUTH_FAILED: TLS handshake rejected");
        assert_eq!(c.severity, Severity::Error);
        assert!(c.signals.contains(&Signal::AuthFailed));
    }

    #[test]
    fn test_auth_failure_case_insensitive_phrase() {
        let c = classify("SIGTERM[soft,Auth-Failure] received, process exiting");
        assert_eq!(c.severity, Severity::Error);
        assert_eq!(c.signals, vec![Signal::AuthFailed]);
    }

    #[test]
    fn test_decrypt_failure() {
        let c = classify("OpenSSL: error:06065064:digital envelope routines:EVP_DecryptFinal_ex:bad decrypt");
        assert_eq!(c.severity, Severity::Error);
        assert_eq!(c.signals, vec![Signal::DecryptFailed]);
    }

    #[test]
    fn test_error_marker_outranks_transport() {
        assert_eq!(
            severity_for("TCP: connect to [AF_INET]1.2.3.4:443 failed: ERROR connection refused"),
            Severity::Error
        );
    }

    #[test]
    fn test_transport_and_handshake() {
        assert_eq!(severity_for("TCP/UDP: Preserving recently used remote address"), Severity::Tcp);
        assert_eq!(severity_for("Attempting to establish TCP connection"), Severity::Tcp);
        assert_eq!(severity_for("Control Channel: TLSv1.3, cipher TLSv1.3 TLS_AES_256_GCM_SHA384"), Severity::Tls);
        assert_eq!(severity_for("[server] Peer Connection Initiated with [AF_INET]1.2.3.4:1194"), Severity::Tls);
        assert_eq!(severity_for("OpenVPN 2.6.3 x86_64-pc-linux-gnu"), Severity::Info);
    }

    #[test]
    fn test_tunnel_address_extraction() {
        let c = classify("net_addr_v4_add: 10.8.0.6/24 dev tun0 established");
        assert_eq!(c.severity, Severity::Tun);
        assert_eq!(c.signals, vec![Signal::TunnelAddress(Ipv4Addr::new(10, 8, 0, 6))]);

        let c = classify("tun0: public 8.8.8.8 then private 192.168.1.20");
        assert_eq!(c.signals, vec![Signal::TunnelAddress(Ipv4Addr::new(192, 168, 1, 20))]);
    }

    #[test]
    fn test_no_tunnel_address_without_marker() {
        let c = classify("PUSH: Received control message: 'ifconfig 10.8.0.6 255.255.255.0'");
        assert!(c.signals.is_empty());
    }

    #[test]
    fn test_first_private_ipv4_ranges() {
        assert_eq!(first_private_ipv4("172.15.0.1 172.16.0.1"), Some(Ipv4Addr::new(172, 16, 0, 1)));
        assert_eq!(first_private_ipv4("172.32.0.1"), None);
        assert_eq!(first_private_ipv4("1.2.3.4 and 5.6.7.8"), None);
        assert_eq!(first_private_ipv4("addr 10.0.0.300"), None);
    }

    #[test]
    fn test_rules_are_named_uniquely() {
        let mut names: Vec<_> = SEVERITY_RULES.iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), SEVERITY_RULES.len());
    }
}
