//! Source d'événements basée sur netstat
//!
//! Interroge la table des connexions TCP via `netstat -ant` (repli sur
//! `ss -Htan` si netstat est absent) et retient les connexions établies
//! vers le port surveillé. Les horodatages sont pris au moment du
//! sondage: netstat n'expose pas l'instant d'ouverture des connexions.

use super::EventSource;
use crate::models::{ConnectionEvent, ConnectionState, GuardError};
use async_trait::async_trait;
use log::debug;
use std::net::IpAddr;
use std::time::SystemTime;
use tokio::process::Command;

pub struct NetstatEventSource {
    target_port: u16,
}

impl NetstatEventSource {
    pub fn new(target_port: u16) -> Self {
        Self { target_port }
    }

    async fn read_connections(&self) -> Result<String, GuardError> {
        // netstat d'abord, ss en repli sur les systèmes qui ne l'ont plus
        match Command::new("netstat").arg("-ant").output().await {
            Ok(output) if output.status.success() => {
                return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
            }
            Ok(output) => {
                debug!(
                    "netstat a retourné un statut d'échec: {}",
                    String::from_utf8_lossy(&output.stderr)
                );
            }
            Err(e) => {
                debug!("netstat indisponible ({}), repli sur ss", e);
            }
        }

        match Command::new("ss").args(["-Htan"]).output().await {
            Ok(output) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(output) => Err(GuardError::AdapterUnavailable(format!(
                "ss a échoué: {}",
                String::from_utf8_lossy(&output.stderr)
            ))),
            Err(e) => Err(GuardError::AdapterUnavailable(format!(
                "ni netstat ni ss ne sont exécutables: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl EventSource for NetstatEventSource {
    async fn poll(&self) -> Result<Vec<ConnectionEvent>, GuardError> {
        let output = self.read_connections().await?;
        let now = SystemTime::now();

        let events = output
            .lines()
            .filter_map(|line| parse_connection_line(line, self.target_port, now))
            .collect();

        Ok(events)
    }
}

/// Extrait un événement d'une ligne netstat ou ss
///
/// Formats acceptés:
/// `tcp  0  0 10.0.0.2:445  10.0.0.5:49152  ESTABLISHED` (netstat)
/// `ESTAB 0 0 10.0.0.2:445 10.0.0.5:49152` (ss -Htan)
fn parse_connection_line(
    line: &str,
    target_port: u16,
    now: SystemTime,
) -> Option<ConnectionEvent> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }

    let (local, remote, state) = if fields[0].starts_with("tcp") {
        if fields.len() < 6 {
            return None;
        }
        (fields[3], fields[4], fields[5])
    } else if fields[0].starts_with("ESTAB")
        || fields[0].starts_with("SYN")
        || fields[0].starts_with("TIME")
        || fields[0].starts_with("CLOSE")
        || fields[0].starts_with("FIN")
        || fields[0].starts_with("LISTEN")
    {
        (fields[3], fields[4], fields[0])
    } else {
        return None;
    };

    let (_, local_port) = local.rsplit_once(':')?;
    if local_port.parse::<u16>().ok()? != target_port {
        return None;
    }

    let (remote_ip, _) = remote.rsplit_once(':')?;
    let source_ip: IpAddr = remote_ip.parse().ok()?;

    let state = if state.starts_with("ESTAB") {
        ConnectionState::Established
    } else {
        ConnectionState::Other
    };

    Some(ConnectionEvent {
        source_ip,
        timestamp: now,
        target_port,
        state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netstat_established() {
        let now = SystemTime::now();
        let line = "tcp        0      0 10.0.0.2:445          10.0.0.5:49152        ESTABLISHED";
        let event = parse_connection_line(line, 445, now).unwrap();
        assert_eq!(event.source_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(event.target_port, 445);
        assert_eq!(event.state, ConnectionState::Established);
    }

    #[test]
    fn test_parse_netstat_other_state() {
        let now = SystemTime::now();
        let line = "tcp        0      0 10.0.0.2:445          10.0.0.5:49152        TIME_WAIT";
        let event = parse_connection_line(line, 445, now).unwrap();
        assert_eq!(event.state, ConnectionState::Other);
    }

    #[test]
    fn test_parse_ignores_other_ports() {
        let now = SystemTime::now();
        let line = "tcp        0      0 10.0.0.2:22           10.0.0.5:49152        ESTABLISHED";
        assert!(parse_connection_line(line, 445, now).is_none());
    }

    #[test]
    fn test_parse_ss_established() {
        let now = SystemTime::now();
        let line = "ESTAB      0      0      10.0.0.2:445        10.0.0.5:49152";
        let event = parse_connection_line(line, 445, now).unwrap();
        assert_eq!(event.source_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(event.state, ConnectionState::Established);
    }

    #[test]
    fn test_parse_ipv6_remote() {
        let now = SystemTime::now();
        let line = "tcp6       0      0 2001:db8::2:445       2001:db8::5:49152     ESTABLISHED";
        let event = parse_connection_line(line, 445, now).unwrap();
        assert_eq!(event.source_ip, "2001:db8::5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_parse_skips_headers_and_garbage() {
        let now = SystemTime::now();
        assert!(parse_connection_line("Active Internet connections (servers and established)", 445, now).is_none());
        assert!(parse_connection_line("Proto Recv-Q Send-Q Local Address Foreign Address State", 445, now).is_none());
        assert!(parse_connection_line("", 445, now).is_none());
    }
}
