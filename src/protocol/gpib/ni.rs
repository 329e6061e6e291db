use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use log::{debug, trace};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

use crate::{
    error::{Error, Operation, Result},
    protocol::{Link, visualize},
};

use super::{VendorStatus, blocking};

/* ibsta bits */
pub const ERR: u16 = 0x8000;
pub const TIMO: u16 = 0x4000;
pub const END: u16 = 0x2000;
pub const SRQI: u16 = 0x1000;
pub const RQS: u16 = 0x0800;
pub const CMPL: u16 = 0x0100;

/// Mnemonics indexed by `iberr`, blank for reserved codes
const ERROR_MNEMONICS: [&str; 29] = [
    "EDVR", "ECIC", "ENOL", "EADR", "EARG", "ESAC", "EABO", "ENEB", "EDMA", "", "EOIP", "ECAP",
    "EFSO", "", "EBUS", "ESTB", "ESRQ", "", "", "", "ETAB", "ELCK", "EARM", "EHDL", "", "", "EWIP",
    "ERST", "EPWR",
];

/// Largest transfer requested from `ibrd` in one poll
const READ_CHUNK: usize = 4096;

pub fn error_mnemonic(iberr: i32) -> &'static str {
    usize::try_from(iberr)
        .ok()
        .and_then(|idx| ERROR_MNEMONICS.get(idx))
        .copied()
        .unwrap_or("")
}

/// Snapshot of the driver's status globals after a call
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NiStatus {
    pub ibsta: u16,
    pub iberr: i32,
    pub ibcnt: usize,
}
impl NiStatus {
    pub fn is_error(&self) -> bool {
        self.ibsta & ERR != 0
    }

    pub fn timed_out(&self) -> bool {
        self.ibsta & TIMO != 0
    }

    pub fn mnemonic(&self) -> &'static str {
        error_mnemonic(self.iberr)
    }
}
impl Display for NiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ibsta = 0x{:04x}, iberr = {}, {}",
            self.ibsta,
            self.iberr,
            self.mnemonic()
        )
    }
}

/// I/O timeout codes accepted by `ibdev`/`ibtmo`
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter)]
pub enum NiTimeout {
    TNone = 0,
    T10us,
    T30us,
    T100us,
    T300us,
    T1ms,
    T3ms,
    T10ms,
    T30ms,
    T100ms,
    T300ms,
    T1s,
    T3s,
    T10s,
    T30s,
    T100s,
    T300s,
    T1000s,
}
impl NiTimeout {
    /// Timeout length, `None` for [`NiTimeout::TNone`] (wait forever)
    pub fn duration(&self) -> Option<Duration> {
        let us = match self {
            Self::TNone => return None,
            Self::T10us => 10,
            Self::T30us => 30,
            Self::T100us => 100,
            Self::T300us => 300,
            Self::T1ms => 1_000,
            Self::T3ms => 3_000,
            Self::T10ms => 10_000,
            Self::T30ms => 30_000,
            Self::T100ms => 100_000,
            Self::T300ms => 300_000,
            Self::T1s => 1_000_000,
            Self::T3s => 3_000_000,
            Self::T10s => 10_000_000,
            Self::T30s => 30_000_000,
            Self::T100s => 100_000_000,
            Self::T300s => 300_000_000,
            Self::T1000s => 1_000_000_000,
        };
        Some(Duration::from_micros(us))
    }

    /// Shortest code that is at least `wait`
    pub fn covering(wait: Duration) -> Self {
        Self::iter()
            .find(|t| t.duration().is_some_and(|d| d >= wait))
            .unwrap_or(Self::T1000s)
    }

    /// Longest code that does not exceed `wait`, [`NiTimeout::T10us`] at least
    pub fn within(wait: Duration) -> Self {
        Self::iter()
            .rev()
            .find(|t| t.duration().is_some_and(|d| d <= wait))
            .unwrap_or(Self::T10us)
    }
}

/// Binding to an NI-488.2 compatible driver.
///
/// Each call returns the status globals as they were right after the call.
pub trait Ni488Driver: Send {
    /// Open and initialize a device, returning its unit descriptor
    fn ibdev(
        &mut self,
        board: i32,
        pad: i32,
        sad: i32,
        tmo: i32,
        eot: i32,
        eos: i32,
    ) -> (i32, NiStatus);

    fn ibclr(&mut self, ud: i32) -> NiStatus;

    /// Change the I/O timeout of a device
    fn ibtmo(&mut self, ud: i32, tmo: i32) -> NiStatus;

    fn ibwrt(&mut self, ud: i32, data: &[u8]) -> NiStatus;

    fn ibrd(&mut self, ud: i32, buf: &mut [u8]) -> NiStatus;

    fn ibonl(&mut self, ud: i32, online: i32) -> NiStatus;
}

/// GPIB device opened with `ibdev`
pub struct NiGpibLink {
    driver: Box<dyn Ni488Driver>,
    ud: i32,
    board: u8,
    address: u8,
    /// Timeout for writes and housekeeping
    io_tmo: NiTimeout,
    /// Timeout currently set on the device
    tmo: NiTimeout,
}
impl NiGpibLink {
    /// `io_timeout` bounds `ibclr` and writes. Reads temporarily shorten the
    /// device timeout to the wait they are given.
    pub fn open(
        mut driver: Box<dyn Ni488Driver>,
        board: u8,
        address: u8,
        io_timeout: Duration,
    ) -> Result<Self> {
        let tmo = NiTimeout::covering(io_timeout);
        debug!("ibdev({board}, {address}, {tmo:?})");

        /* No secondary address, assert EOI on last byte, no EOS handling */
        let (ud, status) =
            blocking(|| driver.ibdev(board.into(), address.into(), 0, tmo as i32, 1, 0));
        if status.is_error() || ud < 0 {
            return Err(vendor_error(Operation::Open, status));
        }

        let status = blocking(|| driver.ibclr(ud));
        if status.is_error() {
            /* Don't leak the descriptor */
            driver.ibonl(ud, 0);
            return Err(vendor_error(Operation::Open, status));
        }

        Ok(Self {
            driver,
            ud,
            board,
            address,
            io_tmo: tmo,
            tmo,
        })
    }

    fn set_timeout(&mut self, tmo: NiTimeout, op: Operation) -> Result<()> {
        if tmo == self.tmo {
            return Ok(());
        }

        trace!("ibtmo({}, {tmo:?})", self.ud);
        let status = self.driver.ibtmo(self.ud, tmo as i32);
        if status.is_error() {
            return Err(vendor_error(op, status));
        }
        self.tmo = tmo;
        Ok(())
    }
}
#[async_trait]
impl Link for NiGpibLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("ibwrt({}): {}", self.ud, visualize(data));

        self.set_timeout(self.io_tmo, Operation::Write)?;
        let status = blocking(|| self.driver.ibwrt(self.ud, data));
        if status.is_error() {
            return Err(vendor_error(Operation::Write, status));
        }
        Ok(())
    }

    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0; READ_CHUNK];

        self.set_timeout(NiTimeout::within(max_wait), Operation::Read)?;
        let status = blocking(|| self.driver.ibrd(self.ud, &mut buf));
        if status.is_error() && !status.timed_out() {
            return Err(vendor_error(Operation::Read, status));
        }

        /* A timed out read may still have transferred part of a message */
        buf.truncate(status.ibcnt.min(READ_CHUNK));
        if !buf.is_empty() {
            trace!("ibrd({}): {}", self.ud, visualize(&buf));
        }
        Ok(buf)
    }

    async fn close(&mut self) -> Result<()> {
        debug!("ibonl({}, 0)", self.ud);

        let status = blocking(|| self.driver.ibonl(self.ud, 0));
        if status.is_error() {
            return Err(vendor_error(Operation::Close, status));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gpib-ni://{}/{}", self.board, self.address)
    }
}

fn vendor_error(op: Operation, status: NiStatus) -> Error {
    Error::Protocol {
        op,
        status: VendorStatus::Ni(status),
    }
}
