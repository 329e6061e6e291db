//! Command/response exchange on top of a [`Link`].
//!
//! A [`Session`] owns at most one open link. Commands go out with the
//! configured terminator appended; queries then poll the link until the
//! framer sees a complete response, the deadline passes, or the link fails.
//! The session stays connected after a timeout or read failure, only
//! [`Session::close`] takes it back to [`SessionState::Disconnected`].

use std::time::Duration;

use log::{debug, info, warn};
use strum_macros::Display;
use tokio::time::sleep;

use crate::{
    clock::Deadline,
    config::LinkConfig,
    error::{Error, Result},
    framer::{BlockDecoder, BlockResult, LineFramer, LineResult},
    model::ModelInfo,
    protocol::{Connector, Link, SystemConnector, visualize},
};

/// Pause between polls that returned nothing
pub const IDLE_SLEEP: Duration = Duration::from_millis(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    Connected,
}

struct ActiveLink {
    link: Box<dyn Link>,
    config: LinkConfig,
}

pub struct Session<C = SystemConnector> {
    connector: C,
    active: Option<ActiveLink>,
}
impl Session {
    pub fn new() -> Self {
        Self::with_connector(SystemConnector::new())
    }
}
impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
impl<C: Connector> Session<C> {
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            active: None,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> SessionState {
        match self.active {
            Some(_) => SessionState::Connected,
            None => SessionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.is_some()
    }

    /// Configuration of the open link
    pub fn config(&self) -> Option<&LinkConfig> {
        self.active.as_ref().map(|active| &active.config)
    }

    /// Open a link to `config.endpoint`. Fails with [`Error::AlreadyOpen`],
    /// leaving the current link alone, if one is already open.
    pub async fn open(&mut self, config: LinkConfig) -> Result<()> {
        if let Some(active) = &self.active {
            warn!(
                "Refusing to open {}, already connected to {}",
                config.endpoint,
                active.link.describe()
            );
            return Err(Error::AlreadyOpen);
        }

        let link = self.connector.connect(&config).await?;
        self.active = Some(ActiveLink { link, config });
        Ok(())
    }

    /// Close the link. Does nothing if no link is open. The session is
    /// disconnected afterwards even if the link reported an error.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };

        let desc = active.link.describe();
        let res = active.link.close().await;
        match &res {
            Ok(()) => info!("Closed {desc}"),
            Err(e) => warn!("Error closing {desc}: {e}"),
        }
        res
    }

    /// Send a command, appending the configured terminator
    pub async fn send(&mut self, command: impl AsRef<[u8]>) -> Result<()> {
        let active = self.active.as_mut().ok_or(Error::NotConnected)?;
        Self::write_command(active, command.as_ref()).await
    }

    /// Send a command and wait up to the configured receive timeout for one
    /// response line
    pub async fn query(&mut self, command: impl AsRef<[u8]>) -> Result<String> {
        let timeout = self
            .active
            .as_ref()
            .ok_or(Error::NotConnected)?
            .config
            .receive_timeout;
        self.query_with_timeout(command, timeout).await
    }

    /// Send a command and wait up to `timeout` for one response line. The
    /// line is returned without CR or LF; anything after the first LF is
    /// discarded.
    pub async fn query_with_timeout(
        &mut self,
        command: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Result<String> {
        let command = command.as_ref();
        let active = self.active.as_mut().ok_or(Error::NotConnected)?;
        Self::write_command(active, command).await?;

        let mut framer = LineFramer::new();
        let line = Self::read_until(active, command, timeout, |data| {
            Ok(match framer.feed(data) {
                LineResult::Complete(line) => Some(line),
                LineResult::Incomplete => None,
            })
        })
        .await?;

        let resp = String::from_utf8_lossy(&line).into_owned();
        debug!("Response: {resp}");
        Ok(resp)
    }

    /// Send a command answered with an IEEE 488.2 binary block and return the
    /// block payload
    pub async fn query_block(
        &mut self,
        command: impl AsRef<[u8]>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let command = command.as_ref();
        let active = self.active.as_mut().ok_or(Error::NotConnected)?;
        Self::write_command(active, command).await?;

        let mut decoder = BlockDecoder::new();
        let payload = Self::read_until(active, command, timeout, |data| {
            Ok(match decoder.feed(data)? {
                BlockResult::Complete(payload) => Some(payload),
                BlockResult::Incomplete => None,
            })
        })
        .await?;

        debug!("Block response: {} bytes", payload.len());
        Ok(payload)
    }

    /// Query `*IDN?` and parse the identification
    pub async fn identify(&mut self) -> Result<ModelInfo> {
        let idn = self.query("*IDN?").await?;
        ModelInfo::from_idn(&idn)
    }

    /// Read and discard whatever arrives during `window`, returning the number
    /// of bytes thrown away
    pub async fn drain(&mut self, window: Duration) -> Result<usize> {
        let active = self.active.as_mut().ok_or(Error::NotConnected)?;
        let poll = active.config.poll_interval;
        let deadline = Deadline::after(window);

        let mut discarded = 0;
        while !deadline.expired() {
            let data = active
                .link
                .poll_read(poll.min(deadline.remaining()))
                .await?;
            if data.is_empty() {
                sleep(IDLE_SLEEP).await;
            } else {
                debug!("Discarding: {}", visualize(&data));
                discarded += data.len();
            }
        }

        Ok(discarded)
    }

    async fn write_command(active: &mut ActiveLink, command: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(command.len() + active.config.terminator.len());
        data.extend_from_slice(command);
        data.extend_from_slice(&active.config.terminator);

        debug!("Send({}): {}", active.link.describe(), visualize(&data));
        active.link.write(&data).await
    }

    /// Poll the link, handing every non-empty chunk to `accept`, until it
    /// produces a value or `timeout` passes
    async fn read_until<T>(
        active: &mut ActiveLink,
        command: &[u8],
        timeout: Duration,
        mut accept: impl FnMut(&[u8]) -> Result<Option<T>>,
    ) -> Result<T> {
        let poll = active.config.poll_interval;
        let deadline = Deadline::after(timeout);

        loop {
            let data = active
                .link
                .poll_read(poll.min(deadline.remaining()))
                .await?;

            if !data.is_empty() {
                if let Some(value) = accept(&data)? {
                    return Ok(value);
                }
            }

            if deadline.expired() {
                return Err(Error::Timeout(format!(
                    "No response to '{}' within {} ms",
                    String::from_utf8_lossy(command),
                    timeout.as_millis()
                )));
            }

            if data.is_empty() {
                sleep(IDLE_SLEEP).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Endpoint,
        error::ErrorKind,
        mock::MockConnector,
        model::{HiokiFamily, Manufacturer},
    };

    fn config() -> LinkConfig {
        LinkConfig::tcp("192.0.2.10", 8802)
    }

    async fn connected(mock: &MockConnector) -> Session<MockConnector> {
        let mut session = Session::with_connector(mock.clone());
        session.open(config()).await.unwrap();
        session
    }

    #[tokio::test]
    async fn state_follows_open_and_close() {
        let mock = MockConnector::new();
        let mut session = Session::with_connector(mock.clone());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.config().is_none());

        session.open(config()).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            session.config().unwrap().endpoint,
            Endpoint::Tcp {
                host: "192.0.2.10".into(),
                port: 8802
            }
        );

        session.close().await.unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.state().to_string(), "Disconnected");
        assert_eq!(session.connector().closes(), 1);
    }

    #[tokio::test]
    async fn failed_open_stays_disconnected() {
        let mock = MockConnector::new();
        mock.fail_next_connect();
        let mut session = Session::with_connector(mock.clone());

        let err = session.open(config()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert!(!session.is_connected());

        session.open(config()).await.unwrap();
        assert_eq!(mock.connects(), 1);
    }

    #[tokio::test]
    async fn close_error_still_disconnects() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.fail_next_close();

        let err = session.close().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Close);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.close().await.unwrap();
        assert_eq!(mock.closes(), 1);
    }

    #[tokio::test]
    async fn custom_terminator() {
        let mock = MockConnector::new();
        let mut session = Session::with_connector(mock.clone());
        session
            .open(config().with_terminator(b"\n"))
            .await
            .unwrap();

        session.send(":STARt").await.unwrap();
        assert_eq!(mock.written(), vec![b":STARt\n".to_vec()]);
    }

    #[tokio::test]
    async fn bytes_after_first_line_are_dropped() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"1\r\n2\r\n");
        mock.push_reply(b"3\r\n");

        assert_eq!(session.query("A?").await.unwrap(), "1");
        assert_eq!(session.query("B?").await.unwrap(), "3");
    }

    #[tokio::test]
    async fn empty_line_is_a_response() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"\r\n");

        assert_eq!(session.query(":ERRor?").await.unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn query_waits_through_silence() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_silence();
        mock.push_silence();
        mock.push_reply(b"+1.234E+00\n");

        let resp = session
            .query_with_timeout(":MEMory:VREAL? CH1_1", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resp, "+1.234E+00");
    }

    #[tokio::test(start_paused = true)]
    async fn query_uses_configured_timeout() {
        let mock = MockConnector::new();
        let mut session = Session::with_connector(mock.clone());
        session
            .open(config().with_receive_timeout(Duration::from_millis(100)))
            .await
            .unwrap();

        let start = tokio::time::Instant::now();
        let err = session.query("*OPC?").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.sentinel(), "Timeout");
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(start.elapsed() < Duration::from_millis(150));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn query_block_reads_definite_block() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"#15ab");
        mock.push_reply(b"cde\n");

        let payload = session
            .query_block(":WAVeform:DATA?", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(payload, b"abcde");
    }

    #[tokio::test]
    async fn query_block_rejects_text() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"ERR\n");

        let err = session
            .query_block(":WAVeform:DATA?", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadResponse(_)));
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn identify_parses_idn() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"HIOKI,LR8450,123456789,V1.20\r\n");

        let model = session.identify().await.unwrap();
        assert_eq!(model.man_family, Manufacturer::Hioki(HiokiFamily::LR8450));
        assert_eq!(model.model, "LR8450");
        assert_eq!(mock.written(), vec![b"*IDN?\r\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_discards_stale_input() {
        let mock = MockConnector::new();
        let mut session = connected(&mock).await;
        mock.push_reply(b"stale\r\n");
        mock.push_silence();
        mock.push_reply(b"old");

        let n = session.drain(Duration::from_millis(100)).await.unwrap();
        assert_eq!(n, 10);

        mock.push_reply(b"fresh\n");
        assert_eq!(session.query("X?").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn operations_need_a_link() {
        let mut session = Session::with_connector(MockConnector::new());

        assert!(matches!(
            session.query("*IDN?").await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            session.query_block("X?", Duration::from_secs(1)).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            session.drain(Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(session.identify().await, Err(Error::NotConnected)));
    }
}
