use std::time::Duration;

use async_trait::async_trait;
use log::info;

pub mod gpib;
mod scpi_serial;
mod scpi_tcp;

pub use scpi_serial::ScpiSerialLink;
pub use scpi_tcp::ScpiTcpLink;

use crate::{
    config::{Endpoint, LinkConfig},
    error::{Error, Result},
};

use self::gpib::{ContecDriver, ContecGpibLink, Ni488Driver, NiGpibLink};

/// An open connection to an instrument.
///
/// Links move bytes only; terminators, framing and timeouts are handled by
/// the session on top.
#[async_trait]
pub trait Link: Send {
    /// Write the whole buffer, looping over partial writes
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Return whatever arrived within roughly `max_wait`. An empty result
    /// means "nothing yet" and is not an error.
    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>>;

    /// Release the link. Best effort, the link is unusable afterwards either way.
    async fn close(&mut self) -> Result<()>;

    /// Short label for log output
    fn describe(&self) -> String;
}

/// Opens links for endpoints
#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self, config: &LinkConfig) -> Result<Box<dyn Link>>;
}

type NiDriverFactory = Box<dyn Fn() -> Box<dyn Ni488Driver> + Send + Sync>;
type ContecDriverFactory = Box<dyn Fn() -> Box<dyn ContecDriver> + Send + Sync>;

/// Connector for real hardware.
///
/// TCP and serial work out of the box. GPIB needs a vendor driver binding,
/// registered with [`with_ni_driver`](Self::with_ni_driver) or
/// [`with_contec_driver`](Self::with_contec_driver); a fresh driver handle is
/// created for every link.
pub struct SystemConnector {
    ni: Option<NiDriverFactory>,
    contec: Option<ContecDriverFactory>,
}
impl Default for SystemConnector {
    fn default() -> Self {
        let connector = Self {
            ni: None,
            contec: None,
        };

        #[cfg(feature = "linux-gpib")]
        let connector = connector.with_ni_driver(|| Box::new(gpib::LinuxGpib::new()));

        connector
    }
}
impl SystemConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ni_driver<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Ni488Driver> + Send + Sync + 'static,
    {
        self.ni = Some(Box::new(factory));
        self
    }

    pub fn with_contec_driver<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ContecDriver> + Send + Sync + 'static,
    {
        self.contec = Some(Box::new(factory));
        self
    }
}
#[async_trait]
impl Connector for SystemConnector {
    async fn connect(&mut self, config: &LinkConfig) -> Result<Box<dyn Link>> {
        info!("Opening {}", config.endpoint);

        let link: Box<dyn Link> = match &config.endpoint {
            Endpoint::Tcp { host, port } => {
                Box::new(ScpiTcpLink::connect(host, *port, config.connect_timeout).await?)
            }
            Endpoint::Serial { port, baud } => Box::new(ScpiSerialLink::open(port, *baud)?),
            Endpoint::GpibNi { board, address } => {
                let Some(factory) = &self.ni else {
                    return Err(Error::NotSupported(
                        "No NI-488.2 driver registered for GPIB".into(),
                    ));
                };
                Box::new(NiGpibLink::open(
                    factory(),
                    *board,
                    *address,
                    config.receive_timeout,
                )?)
            }
            Endpoint::GpibContec { address } => {
                let Some(factory) = &self.contec else {
                    return Err(Error::NotSupported(
                        "No CONTEC driver registered for GPIB".into(),
                    ));
                };
                Box::new(ContecGpibLink::open(
                    factory(),
                    *address,
                    config.receive_timeout,
                )?)
            }
        };

        info!("Connected to {}", link.describe());
        Ok(link)
    }
}

/// Render wire data for logs with control characters made visible
pub(crate) fn visualize(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .replace('\n', "␤")
        .replace('\r', "␍")
}
