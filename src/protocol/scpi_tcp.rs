use std::{io::ErrorKind, time::Duration};

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::error::{Error, Result};

use super::{Link, visualize};

/// Largest chunk taken from the socket in one poll
const READ_CHUNK: usize = 4096;

/// SCPI over a raw TCP socket
pub struct ScpiTcpLink {
    stream: TcpStream,
    addr: String,
}
impl ScpiTcpLink {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("connect({addr}, {timeout:?})");

        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await
        {
            Err(_) => {
                return Err(Error::Connect(format!(
                    "{addr}: no answer within {} ms",
                    timeout.as_millis()
                )));
            }
            Ok(res) => res.map_err(|e| Error::Connect(format!("{addr}: {e}")))?,
        };

        Ok(Self::from_stream(stream, addr))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        /* Commands are tiny, don't let Nagle hold them back */
        if let Err(e) = stream.set_nodelay(true) {
            warn!("{addr}: could not set TCP_NODELAY: {e}");
        }

        Self { stream, addr }
    }
}
#[async_trait]
impl Link for ScpiTcpLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("write({}): {}", self.addr, visualize(data));

        self.stream
            .write_all(data)
            .await
            .map_err(|e| Error::Write(format!("{}: {e}", self.addr)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Write(format!("{}: {e}", self.addr)))
    }

    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>> {
        let mut buf = [0; READ_CHUNK];

        match tokio::time::timeout(max_wait, self.stream.read(&mut buf)).await {
            Err(_) => Ok(vec![]),
            Ok(Ok(0)) => Err(Error::Read(format!(
                "{}: connection closed by peer",
                self.addr
            ))),
            Ok(Ok(n)) => {
                trace!("poll_read({}): {}", self.addr, visualize(&buf[..n]));
                Ok(buf[..n].to_vec())
            }
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(vec![])
            }
            Ok(Err(e)) => Err(Error::Read(format!("{}: {e}", self.addr))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!("close({})", self.addr);

        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            /* Peer already gone, nothing left to release */
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::Close(format!("{}: {e}", self.addr))),
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn pair() -> (ScpiTcpLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (link, accepted) = tokio::join!(
            ScpiTcpLink::connect("127.0.0.1", port, Duration::from_secs(2)),
            listener.accept()
        );
        (link.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn writes_exact_bytes() {
        let (mut link, mut peer) = pair().await;

        link.write(b"*RST\r\n").await.unwrap();

        let mut buf = [0; 6];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*RST\r\n");
    }

    #[tokio::test]
    async fn poll_returns_available_data_or_nothing() {
        let (mut link, mut peer) = pair().await;

        let data = link.poll_read(Duration::from_millis(20)).await.unwrap();
        assert!(data.is_empty());

        peer.write_all(b"HIOKI,LR8450\r\n").await.unwrap();
        let mut got = vec![];
        while got.len() < 14 {
            got.extend(link.poll_read(Duration::from_millis(200)).await.unwrap());
        }
        assert_eq!(got, b"HIOKI,LR8450\r\n");
    }

    #[tokio::test]
    async fn peer_close_is_read_error() {
        let (mut link, peer) = pair().await;
        drop(peer);

        let res = link.poll_read(Duration::from_millis(500)).await;
        assert!(matches!(res, Err(Error::Read(_))));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let res = ScpiTcpLink::connect("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(res, Err(Error::Connect(_))));
    }

    #[tokio::test]
    async fn close_shuts_down_write_side() {
        let (mut link, mut peer) = pair().await;
        link.close().await.unwrap();

        let mut buf = vec![];
        let n = peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(link.describe(), format!("tcp://{}", link.addr));
    }
}
