//! Scripted transport for exercising sessions without an instrument.
//!
//! [`MockConnector`] hands out [`MockLink`]s that share one script: every
//! `poll_read` consumes the next [`Reply`], and everything written is
//! recorded. Clones of a connector share the same script and log, so a test
//! can keep one clone while the session owns another.
//!
//! ```
//! use scpi_link::{config::LinkConfig, mock::MockConnector, session::Session};
//!
//! # tokio_test_block_on(async {
//! let mock = MockConnector::new();
//! mock.push_reply(b"ACME,MODEL1,SN1");
//! mock.push_reply(b"234\n");
//!
//! let mut session = Session::with_connector(mock.clone());
//! session.open(LinkConfig::tcp("192.0.2.1", 8802)).await.unwrap();
//! assert_eq!(session.query("*IDN?").await.unwrap(), "ACME,MODEL1,SN1234");
//! assert_eq!(mock.written(), vec![b"*IDN?\r\n".to_vec()]);
//! # });
//! # fn tokio_test_block_on(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use log::trace;

use crate::{
    config::LinkConfig,
    error::{Error, Result},
    protocol::{Connector, Link, visualize},
};

/// One scripted result of `poll_read`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Returned immediately
    Data(Vec<u8>),
    /// Nothing arrives for the whole poll
    Silence,
    /// The read fails
    Fail,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    written: Vec<Vec<u8>>,
    connects: usize,
    closes: usize,
    fail_connect: bool,
    fail_write: bool,
    fail_close: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    script: Arc<Mutex<Script>>,
}
impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_reply(&self, data: impl AsRef<[u8]>) {
        self.script()
            .replies
            .push_back(Reply::Data(data.as_ref().to_vec()));
    }

    pub fn push_silence(&self) {
        self.script().replies.push_back(Reply::Silence);
    }

    pub fn push_failure(&self) {
        self.script().replies.push_back(Reply::Fail);
    }

    pub fn fail_next_connect(&self) {
        self.script().fail_connect = true;
    }

    pub fn fail_next_write(&self) {
        self.script().fail_write = true;
    }

    pub fn fail_next_close(&self) {
        self.script().fail_close = true;
    }

    /// Every buffer passed to `write`, in order
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.script().written.clone()
    }

    /// Replies not consumed yet
    pub fn pending(&self) -> usize {
        self.script().replies.len()
    }

    /// Number of links successfully opened
    pub fn connects(&self) -> usize {
        self.script().connects
    }

    /// Number of close attempts, failed ones included
    pub fn closes(&self) -> usize {
        self.script().closes
    }
}
#[async_trait]
impl Connector for MockConnector {
    async fn connect(&mut self, config: &LinkConfig) -> Result<Box<dyn Link>> {
        let mut script = self.script();
        if script.fail_connect {
            script.fail_connect = false;
            return Err(Error::Connect(format!("{}: refused by mock", config.endpoint)));
        }
        script.connects += 1;

        Ok(Box::new(MockLink {
            script: self.script.clone(),
            endpoint: config.endpoint.to_string(),
        }))
    }
}

pub struct MockLink {
    script: Arc<Mutex<Script>>,
    endpoint: String,
}
impl MockLink {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
#[async_trait]
impl Link for MockLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("write({}): {}", self.endpoint, visualize(data));

        let mut script = self.script();
        if script.fail_write {
            script.fail_write = false;
            return Err(Error::Write(format!("{}: write rejected by mock", self.endpoint)));
        }
        script.written.push(data.to_vec());
        Ok(())
    }

    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>> {
        let reply = self.script().replies.pop_front();
        match reply {
            Some(Reply::Data(data)) => Ok(data),
            Some(Reply::Fail) => Err(Error::Read(format!("{}: read failed in mock", self.endpoint))),
            Some(Reply::Silence) | None => {
                tokio::time::sleep(max_wait).await;
                Ok(vec![])
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut script = self.script();
        script.closes += 1;
        if script.fail_close {
            script.fail_close = false;
            return Err(Error::Close(format!("{}: close failed in mock", self.endpoint)));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock:{}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_consumed_in_order() {
        let mut mock = MockConnector::new();
        mock.push_reply(b"a");
        mock.push_failure();
        mock.push_reply(b"b");

        let mut link = mock.connect(&LinkConfig::gpib_contec(1)).await.unwrap();
        assert_eq!(link.describe(), "mock:gpib-contec://1");
        assert_eq!(link.poll_read(Duration::ZERO).await.unwrap(), b"a");
        assert!(matches!(
            link.poll_read(Duration::ZERO).await,
            Err(Error::Read(_))
        ));
        assert_eq!(mock.pending(), 1);
        assert_eq!(link.poll_read(Duration::ZERO).await.unwrap(), b"b");
        assert!(link.poll_read(Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_are_one_shot() {
        let mut mock = MockConnector::new();
        mock.fail_next_connect();
        assert!(mock.connect(&LinkConfig::gpib_ni(0, 1)).await.is_err());

        let mut link = mock.connect(&LinkConfig::gpib_ni(0, 1)).await.unwrap();
        mock.fail_next_write();
        assert!(link.write(b"x").await.is_err());
        link.write(b"y").await.unwrap();
        assert_eq!(mock.written(), vec![b"y".to_vec()]);
        assert_eq!(mock.connects(), 1);
    }
}
