//! Endpoint descriptions and the URI syntax used to select them.
//!
//! ```text
//! tcp://<host>[:<port>]          SCPI over raw TCP (port defaults to 8802)
//! serial:<port>[?baud=<baud>]    SCPI over RS-232/USB serial (9600 baud default)
//! gpib-ni://[<board>/]<address>  GPIB through an NI-488.2 style driver
//! gpib-contec://<address>        GPIB through a CONTEC API-GPIB style driver
//! ```
//!
//! Every form also accepts `timeout=<seconds>` as a query parameter, e.g.
//! `tcp://192.168.1.10:8802?timeout=3`.

use std::{fmt::Display, str::FromStr, time::Duration};

use strum_macros::{AsRefStr, EnumIter, EnumString};

use crate::error::{Error, Result};

pub const DEFAULT_TCP_PORT: u16 = 8802;
pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TERMINATOR: &[u8] = b"\r\n";

/// Highest GPIB primary address
pub const GPIB_MAX_ADDRESS: u8 = 30;

/// URI scheme naming each transport
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr, EnumString, EnumIter)]
pub enum Scheme {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "serial")]
    Serial,
    #[strum(serialize = "gpib-ni")]
    GpibNi,
    #[strum(serialize = "gpib-contec")]
    GpibContec,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// LAN socket
    Tcp { host: String, port: u16 },
    /// RS-232 or USB virtual COM port
    Serial { port: String, baud: u32 },
    /// GPIB device through an `ibdev` style driver
    GpibNi { board: u8, address: u8 },
    /// GPIB device through a CONTEC style driver (board 0 only)
    GpibContec { address: u8 },
}
impl Endpoint {
    pub fn scheme(&self) -> Scheme {
        match self {
            Endpoint::Tcp { .. } => Scheme::Tcp,
            Endpoint::Serial { .. } => Scheme::Serial,
            Endpoint::GpibNi { .. } => Scheme::GpibNi,
            Endpoint::GpibContec { .. } => Scheme::GpibContec,
        }
    }
}
impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = self.scheme();
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "{}://[{host}]:{port}", scheme.as_ref())
            }
            Endpoint::Tcp { host, port } => write!(f, "{}://{host}:{port}", scheme.as_ref()),
            Endpoint::Serial { port, baud } => {
                write!(f, "{}:{port}?baud={baud}", scheme.as_ref())
            }
            Endpoint::GpibNi { board, address } => {
                write!(f, "{}://{board}/{address}", scheme.as_ref())
            }
            Endpoint::GpibContec { address } => write!(f, "{}://{address}", scheme.as_ref()),
        }
    }
}

/// Everything needed to open a link. Fixed for the lifetime of the link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    pub endpoint: Endpoint,
    /// Default budget for a query to receive its response line
    pub receive_timeout: Duration,
    /// Upper bound on a single transport read, also the GPIB driver I/O timeout
    pub poll_interval: Duration,
    /// Upper bound on link establishment where the transport supports it
    pub connect_timeout: Duration,
    /// Bytes appended to every command
    pub terminator: Vec<u8>,
}
impl LinkConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            terminator: DEFAULT_TERMINATOR.to_vec(),
        }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Self::new(Endpoint::Tcp {
            host: host.to_string(),
            port,
        })
    }

    pub fn serial(port: &str, baud: u32) -> Self {
        Self::new(Endpoint::Serial {
            port: port.to_string(),
            baud,
        })
    }

    pub fn gpib_ni(board: u8, address: u8) -> Self {
        Self::new(Endpoint::GpibNi { board, address })
    }

    pub fn gpib_contec(address: u8) -> Self {
        Self::new(Endpoint::GpibContec { address })
    }

    /// Receive timeout as entered by a user, in whole seconds
    pub fn with_timeout_secs(self, secs: u64) -> Self {
        self.with_receive_timeout(Duration::from_millis(secs.saturating_mul(1000)))
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_terminator(mut self, terminator: impl AsRef<[u8]>) -> Self {
        self.terminator = terminator.as_ref().to_vec();
        self
    }
}
impl FromStr for LinkConfig {
    type Err = Error;

    fn from_str(uri: &str) -> Result<Self> {
        let Some((scheme, rest)) = uri.split_once(':') else {
            return Err(Error::InvalidConfig(format!("Missing scheme in '{uri}'")));
        };
        let scheme = Scheme::from_str(scheme)
            .map_err(|_| Error::InvalidConfig(format!("Unknown scheme '{scheme}'")))?;

        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(Error::InvalidConfig(format!("Missing address in '{uri}'")));
        }

        let mut baud = None;
        let mut timeout = None;
        for param in query.into_iter().flat_map(|q| q.split('&')) {
            if param.is_empty() {
                continue;
            }
            let (key, value) = param.split_once('=').ok_or_else(|| {
                Error::InvalidConfig(format!("Malformed parameter '{param}'"))
            })?;
            match key {
                "baud" if scheme == Scheme::Serial => baud = Some(parse_num::<u32>(key, value)?),
                "timeout" => timeout = Some(parse_timeout(value)?),
                _ => {
                    return Err(Error::InvalidConfig(format!(
                        "Unsupported parameter '{key}' for {}",
                        scheme.as_ref()
                    )));
                }
            }
        }

        let endpoint = match scheme {
            Scheme::Tcp => {
                let (host, port) = split_host_port(path)?;
                Endpoint::Tcp {
                    host: host.to_string(),
                    port: port.unwrap_or(DEFAULT_TCP_PORT),
                }
            }
            Scheme::Serial => Endpoint::Serial {
                port: path.to_string(),
                baud: baud.unwrap_or(DEFAULT_BAUD),
            },
            Scheme::GpibNi => {
                let (board, address) = match path.split_once('/') {
                    Some((board, address)) => (parse_num::<u8>("board", board)?, address),
                    None => (0, path),
                };
                Endpoint::GpibNi {
                    board,
                    address: parse_gpib_address(address)?,
                }
            }
            Scheme::GpibContec => Endpoint::GpibContec {
                address: parse_gpib_address(path)?,
            },
        };

        let mut config = LinkConfig::new(endpoint);
        if let Some(timeout) = timeout {
            config.receive_timeout = timeout;
        }
        Ok(config)
    }
}

fn parse_num<T: FromStr>(what: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid {what} '{value}'")))
}

fn parse_timeout(value: &str) -> Result<Duration> {
    let secs: f64 = parse_num("timeout", value)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "Timeout must be a positive number of seconds, got '{value}'"
        )));
    }
    Ok(Duration::from_millis((secs * 1000.0).round() as u64))
}

fn parse_gpib_address(value: &str) -> Result<u8> {
    let address: u8 = parse_num("GPIB address", value)?;
    if address > GPIB_MAX_ADDRESS {
        return Err(Error::InvalidConfig(format!(
            "GPIB address {address} out of range 0-{GPIB_MAX_ADDRESS}"
        )));
    }
    Ok(address)
}

fn split_host_port(path: &str) -> Result<(&str, Option<u16>)> {
    if let Some(bracketed) = path.strip_prefix('[') {
        let Some((host, tail)) = bracketed.split_once(']') else {
            return Err(Error::InvalidConfig(format!("Unterminated '[' in '{path}'")));
        };
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_num("port", port)?))),
            None if tail.is_empty() => Ok((host, None)),
            None => Err(Error::InvalidConfig(format!("Unexpected '{tail}' after host"))),
        };
    }

    match path.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((host, Some(parse_num("port", port)?))),
        _ => Ok((path, None)),
    }
}
