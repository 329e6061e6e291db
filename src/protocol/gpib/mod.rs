//! GPIB links over vendor driver stacks.
//!
//! Two driver families are supported, each abstracted by a trait so the
//! actual library binding can be supplied by the application:
//! - [`Ni488Driver`]: the `ibdev`/`ibwrt`/`ibrd` API of NI-488.2 and
//!   linux-gpib, reporting through the `ibsta`/`iberr`/`ibcnt` globals.
//! - [`ContecDriver`]: the CONTEC API-GPIB `Gp*` functions, reporting through
//!   a packed return code.
//!
//! Driver calls are synchronous. Each one is bounded by the device timeout,
//! which links shorten to the caller's wait around reads, and runs on the
//! blocking pool where possible, so it does not stall a multi-threaded runtime.
//!
//! Vendor status is decoded at this boundary into [`crate::error::Error`],
//! with the raw status kept as a [`VendorStatus`] for diagnostics.

use std::fmt::Display;

use tokio::runtime::{Handle, RuntimeFlavor};

mod contec;
#[cfg(feature = "linux-gpib")]
mod linux_gpib;
mod ni;

pub use contec::{ContecDriver, ContecGpibLink, ContecStatus, ServiceEvents};
#[cfg(feature = "linux-gpib")]
pub use linux_gpib::LinuxGpib;
pub use ni::{
    CMPL, END, ERR, Ni488Driver, NiGpibLink, NiStatus, NiTimeout, RQS, SRQI, TIMO,
    error_mnemonic,
};

/// Raw status reported by a GPIB driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VendorStatus {
    Ni(NiStatus),
    Contec(ContecStatus),
}
impl Display for VendorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VendorStatus::Ni(status) => status.fmt(f),
            VendorStatus::Contec(status) => status.fmt(f),
        }
    }
}

/// Run a synchronous driver call. On a multi-threaded runtime the worker is
/// handed over to the blocking pool for the duration, so other tasks keep
/// running; elsewhere the call simply blocks.
pub(crate) fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
