use std::{io::ErrorKind, time::Duration};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

use crate::error::{Error, Result};

use super::{Link, visualize};

/// Longest a single read waits for the next byte
const READ_INTERVAL: Duration = Duration::from_millis(50);
/// Bound on blocking writes
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);
const READ_CHUNK: usize = 1024;

/// SCPI over an RS-232 or USB virtual COM port, 8N1 without flow control
pub struct ScpiSerialLink {
    port: String,
    serial: SerialStream,
}
impl ScpiSerialLink {
    pub fn open(port: &str, baud: u32) -> Result<Self> {
        debug!("open({port}, {baud})");

        let serial = tokio_serial::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(WRITE_TIMEOUT)
            .open_native_async()
            .map_err(|e| Error::Connect(format!("{port}: {e}")))?;

        /* Drop anything left over from a previous session */
        serial
            .clear(ClearBuffer::All)
            .map_err(|e| Error::Connect(format!("{port}: could not purge buffers: {e}")))?;

        Ok(Self::from_stream(serial, port))
    }

    /// Wrap an already configured stream, `port` only names it in logs
    pub fn from_stream(serial: SerialStream, port: &str) -> Self {
        Self {
            port: port.to_string(),
            serial,
        }
    }
}
#[async_trait]
impl Link for ScpiSerialLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("write({}): {}", self.port, visualize(data));

        self.serial
            .write_all(data)
            .await
            .map_err(|e| Error::Write(format!("{}: {e}", self.port)))?;
        self.serial
            .flush()
            .await
            .map_err(|e| Error::Write(format!("{}: {e}", self.port)))
    }

    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>> {
        let mut buf = [0; READ_CHUNK];
        let wait = max_wait.min(READ_INTERVAL);

        match tokio::time::timeout(wait, self.serial.read(&mut buf)).await {
            Err(_) => Ok(vec![]),
            Ok(Ok(n)) => {
                if n > 0 {
                    trace!("poll_read({}): {}", self.port, visualize(&buf[..n]));
                }
                Ok(buf[..n].to_vec())
            }
            Ok(Err(e))
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(vec![])
            }
            Ok(Err(e)) => Err(Error::Read(format!("{}: {e}", self.port))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!("close({})", self.port);

        self.serial
            .flush()
            .await
            .map_err(|e| Error::Close(format!("{}: {e}", self.port)))
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.port)
    }
}
