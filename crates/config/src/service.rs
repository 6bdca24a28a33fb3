//! The `[recceiver]` section (§6.2): service-wide settings.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Service-wide settings read from the `[recceiver]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Period between UDP announce broadcasts.
    pub announce_interval: Duration,
    /// Keepalive ping timeout; a connection with no pong by this deadline is closed.
    pub tcp_timeout: Duration,
    /// Session batcher flush deadline.
    pub commit_interval: Duration,
    /// Session batcher flush size; `0` disables the size trigger.
    pub commit_size_limit: usize,
    /// Maximum concurrently active connections; the rest are admission-queued.
    pub max_active: usize,
    /// TCP bind address; port `0` requests an ephemeral port.
    pub bind: SocketAddrV4,
    /// UDP announce destinations.
    pub addrlist: Vec<SocketAddrV4>,
    /// `tracing` filter directive (`RUST_LOG`-style).
    pub loglevel: String,
    /// `full`, `compact`, `json` &c.; passed through to `tracing_subscriber`.
    pub logformat: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            announce_interval: Duration::from_secs(15),
            tcp_timeout: Duration::from_secs(3),
            commit_interval: Duration::from_secs(5),
            commit_size_limit: 0,
            max_active: 10,
            bind: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 5049),
            addrlist: vec![SocketAddrV4::new(Ipv4Addr::BROADCAST, 5049)],
            loglevel: "info".to_string(),
            logformat: "full".to_string(),
        }
    }
}

impl ServiceConfig {
    pub(crate) fn parse(ini: &ini::Ini) -> Result<Self> {
        let section = ini.section(Some("recceiver"));
        let get = |key: &str| section.and_then(|s| s.get(key));
        let defaults = Self::default();

        let announce_interval = optional(get("announceInterval"), defaults.announce_interval, |v| {
            parse_secs("announceInterval", v)
        })?;
        let tcp_timeout =
            optional(get("tcptimeout"), defaults.tcp_timeout, |v| parse_secs("tcptimeout", v))?;
        let commit_interval =
            optional(get("commitInterval"), defaults.commit_interval, |v| parse_secs("commitInterval", v))?;
        let commit_size_limit = optional(get("commitSizeLimit"), defaults.commit_size_limit, |v| {
            parse_usize("commitSizeLimit", v)
        })?;
        let max_active = optional(get("maxActive"), defaults.max_active, |v| parse_usize("maxActive", v))?;
        let bind = optional(get("bind"), defaults.bind, |v| parse_bind(v))?;
        let addrlist = match get("addrlist") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_announce_dest)
                .collect::<Result<Vec<_>>>()?,
            None => defaults.addrlist,
        };
        let loglevel = get("loglevel").map(str::to_string).unwrap_or(defaults.loglevel);
        let logformat = get("logformat").map(str::to_string).unwrap_or(defaults.logformat);

        Ok(Self {
            announce_interval,
            tcp_timeout,
            commit_interval,
            commit_size_limit,
            max_active,
            bind,
            addrlist,
            loglevel,
            logformat,
        })
    }
}

fn optional<T>(raw: Option<&str>, default: T, parse: impl FnOnce(&str) -> Result<T>) -> Result<T> {
    match raw {
        Some(v) => parse(v),
        None => Ok(default),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })?;
    Ok(Duration::from_secs_f64(secs.max(0.0)))
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })
}

/// `host:port`, host empty means "all interfaces".
fn parse_bind(raw: &str) -> Result<SocketAddrV4> {
    let (host, port) = split_host_port("bind", raw)?;
    let ip = if host.is_empty() { Ipv4Addr::UNSPECIFIED } else { parse_ip("bind", raw, host)? };
    Ok(SocketAddrV4::new(ip, port))
}

/// `host:port`, host `<broadcast>` or empty means the limited broadcast address.
fn parse_announce_dest(raw: &str) -> Result<SocketAddrV4> {
    let (host, port) = split_host_port("addrlist", raw)?;
    let ip = if host.is_empty() || host.eq_ignore_ascii_case("<broadcast>") {
        Ipv4Addr::BROADCAST
    } else {
        parse_ip("addrlist", raw, host)?
    };
    Ok(SocketAddrV4::new(ip, port))
}

fn split_host_port<'a>(key: &str, raw: &'a str) -> Result<(&'a str, u16)> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })?;
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })?;
    Ok((host, port))
}

fn parse_ip(key: &str, raw: &str, host: &str) -> Result<Ipv4Addr> {
    host.parse().map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(src: &str) -> ServiceConfig {
        let ini = ini::Ini::load_from_str(src).unwrap();
        ServiceConfig::parse(&ini).unwrap()
    }

    #[test]
    fn defaults_when_section_is_absent() {
        let config = load("");
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn parses_every_recognized_key() {
        let config = load(
            "[recceiver]\n\
             announceInterval=30\n\
             tcptimeout=5\n\
             commitInterval=2\n\
             commitSizeLimit=500\n\
             maxActive=4\n\
             bind=0.0.0.0:9000\n\
             addrlist=192.168.1.255:5049, <broadcast>:6000\n\
             loglevel=debug\n\
             logformat=json\n",
        );
        assert_eq!(config.announce_interval, Duration::from_secs(30));
        assert_eq!(config.tcp_timeout, Duration::from_secs(5));
        assert_eq!(config.commit_interval, Duration::from_secs(2));
        assert_eq!(config.commit_size_limit, 500);
        assert_eq!(config.max_active, 4);
        assert_eq!(config.bind, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 9000));
        assert_eq!(
            config.addrlist,
            vec![
                SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 255), 5049),
                SocketAddrV4::new(Ipv4Addr::BROADCAST, 6000),
            ]
        );
        assert_eq!(config.loglevel, "debug");
        assert_eq!(config.logformat, "json");
    }

    #[test]
    fn rejects_a_malformed_bind_address() {
        let ini = ini::Ini::load_from_str("[recceiver]\nbind=not-an-address\n").unwrap();
        assert!(ServiceConfig::parse(&ini).is_err());
    }
}
