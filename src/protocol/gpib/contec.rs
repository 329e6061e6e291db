use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use log::{debug, info, trace};

use crate::{
    error::{Error, Operation, Result},
    protocol::{Link, visualize},
};

use super::{VendorStatus, blocking};

/* GpBoardsts registers */
const REG_MY_ADDRESS: u32 = 0x08;
const REG_MASTER_MODE: u32 = 0x0a;

/* GpDelim settings */
const DELIM_LF: u32 = 3;
const EOI_ON: u32 = 1;

/// IFC pulse length, in 100 us units
const IFC_TIME: u32 = 1;

/* Interface messages */
const UNL: u32 = 0x3f;
const UNT: u32 = 0x5f;

/* Return codes with special handling */
const RET_OK_LIMIT: u32 = 3;
const RET_NOT_INITIALIZED: u32 = 80;
const RET_BUFFER_FULL: u32 = 128;
const RET_TIMEOUT: u32 = 254;

/* Bits above the result byte */
const EVENT_SRQ: u32 = 0x100;
const EVENT_IFC: u32 = 0x200;

const READ_CHUNK: usize = 10000;

/// Binding to a CONTEC API-GPIB style driver.
///
/// Every function returns the packed driver return code: the low byte is the
/// result (below 3 is success), bits 8 and 9 flag received SRQ and IFC.
pub trait ContecDriver: Send {
    fn gp_ini(&mut self) -> u32;

    fn gp_exit(&mut self) -> u32;

    fn gp_ifc(&mut self, ifc_time: u32) -> u32;

    fn gp_ren(&mut self) -> u32;

    fn gp_resetren(&mut self) -> u32;

    fn gp_timeout(&mut self, timeout_ms: u32) -> u32;

    fn gp_delim(&mut self, delim: u32, eoi: u32) -> u32;

    /// Read a board status register, returning the code and register value
    fn gp_boardsts(&mut self, reg: u32) -> (u32, u32);

    /// Send `data` addressed by `cmd` (`[count, talker, listener...]`)
    fn gp_talk(&mut self, cmd: &[u32], data: &[u8]) -> u32;

    /// Receive into `buf`, returning the code and number of bytes stored.
    /// A `cmd` of `[0]` continues a previous transfer without re-addressing.
    fn gp_listen(&mut self, cmd: &[u32], buf: &mut [u8]) -> (u32, usize);

    /// Send interface messages
    fn gp_comand(&mut self, cmd: &[u32]) -> u32;
}

/// Asynchronous bus events carried in a return code
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServiceEvents {
    pub srq: bool,
    pub ifc: bool,
}

/// Return code of a CONTEC driver call, with the call it came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContecStatus {
    pub func: &'static str,
    pub code: u32,
}
impl ContecStatus {
    pub fn new(func: &'static str, code: u32) -> Self {
        Self { func, code }
    }

    /// Result byte of the return code
    pub fn result(&self) -> u32 {
        self.code & 0xff
    }

    pub fn is_error(&self) -> bool {
        self.result() >= RET_OK_LIMIT
    }

    pub fn events(&self) -> ServiceEvents {
        ServiceEvents {
            srq: self.code & EVENT_SRQ != 0,
            ifc: self.code & EVENT_IFC != 0,
        }
    }

    pub fn message(&self) -> &'static str {
        if !self.is_error() {
            return "Completed normally.";
        }

        match self.result() {
            3 => "Data remains in the FIFO.",
            80 => "I/O address error. Check the board settings.",
            82 => "Registry setting error. Check the board settings.",
            128 => "Received data exceeded the buffer, or SRQ was not received.",
            200 => "Could not create thread.",
            201 => "Another event is in progress.",
            210 => "Could not set up DMA.",
            240 => "Esc key was pressed.",
            241 => "File I/O error.",
            242 => "Invalid address specification.",
            243 => "Buffer specification error.",
            244 => "Array size error.",
            245 => "Buffer is too small.",
            246 => "Invalid object name.",
            247 => "Device name check is invalid.",
            248 => "Invalid data type.",
            249 => "No more devices can be added.",
            250 => "Device name not found.",
            251 => "Delimiter differs between devices.",
            252 => "GPIB error.",
            253 => "Only the delimiter was received.",
            254 => "Timed out.",
            255 => "Parameter error.",
            _ => "",
        }
    }
}
impl Display for ContecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.func, self.message())?;
        match self.events() {
            ServiceEvents {
                srq: true,
                ifc: true,
            } => write!(f, " -- [SRQ] and [IFC] received"),
            ServiceEvents { srq: true, .. } => write!(f, " -- [SRQ] received"),
            ServiceEvents { ifc: true, .. } => write!(f, " -- [IFC] received"),
            _ => Ok(()),
        }
    }
}

/// Classify a driver return code, the single gate every CONTEC call goes through
fn check(func: &'static str, code: u32, op: Operation) -> Result<ContecStatus> {
    let status = ContecStatus::new(func, code);

    let events = status.events();
    if events.srq || events.ifc {
        info!("{status}");
    }

    if status.is_error() {
        return Err(Error::Protocol {
            op,
            status: VendorStatus::Contec(status),
        });
    }
    Ok(status)
}

/// GPIB device on board 0 of a CONTEC interface, with the PC as controller
pub struct ContecGpibLink {
    driver: Box<dyn ContecDriver>,
    address: u8,
    my_address: u32,
    /// Last listen stopped on a full buffer, continue without re-addressing
    continuing: bool,
    /// `GpTimeout` for talking and housekeeping, in ms
    io_timeout_ms: u32,
    /// `GpTimeout` currently in effect
    timeout_ms: u32,
}
impl ContecGpibLink {
    /// `io_timeout` bounds the setup and writes. Reads temporarily shorten the
    /// board timeout to the wait they are given.
    pub fn open(
        mut driver: Box<dyn ContecDriver>,
        address: u8,
        io_timeout: Duration,
    ) -> Result<Self> {
        debug!("open(gpib-contec {address}, {io_timeout:?})");
        let io_timeout_ms = timeout_ms(io_timeout);

        /* Guard against a board left initialized by an earlier run */
        driver.gp_exit();
        check("GpIni", driver.gp_ini(), Operation::Open)?;

        let (code, master) = driver.gp_boardsts(REG_MASTER_MODE);
        check("GpBoardsts", code, Operation::Open)?;
        if master != 0 {
            driver.gp_exit();
            return Err(Error::Connect(
                "GPIB board is not the system controller".into(),
            ));
        }

        let res = Self::configure(driver.as_mut(), io_timeout_ms);
        let my_address = match res {
            Ok(my_address) => my_address,
            Err(e) => {
                driver.gp_exit();
                return Err(e);
            }
        };

        Ok(Self {
            driver,
            address,
            my_address,
            continuing: false,
            io_timeout_ms,
            timeout_ms: io_timeout_ms,
        })
    }

    fn configure(driver: &mut dyn ContecDriver, io_timeout_ms: u32) -> Result<u32> {
        check("GpIfc", driver.gp_ifc(IFC_TIME), Operation::Open)?;
        check("GpRen", driver.gp_ren(), Operation::Open)?;

        let (code, my_address) = driver.gp_boardsts(REG_MY_ADDRESS);
        check("GpBoardsts", code, Operation::Open)?;

        check("GpDelim", driver.gp_delim(DELIM_LF, EOI_ON), Operation::Open)?;

        check("GpTimeout", driver.gp_timeout(io_timeout_ms), Operation::Open)?;

        Ok(my_address)
    }

    fn set_timeout(&mut self, ms: u32, op: Operation) -> Result<()> {
        if ms == self.timeout_ms {
            return Ok(());
        }

        trace!("GpTimeout({ms})");
        check("GpTimeout", self.driver.gp_timeout(ms), op)?;
        self.timeout_ms = ms;
        Ok(())
    }
}

/// Board timeout in ms, at least 1 since 0 disables it
fn timeout_ms(wait: Duration) -> u32 {
    u32::try_from(wait.as_millis()).unwrap_or(u32::MAX).max(1)
}

#[async_trait]
impl Link for ContecGpibLink {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!("GpTalk({}): {}", self.address, visualize(data));

        self.continuing = false;
        self.set_timeout(self.io_timeout_ms, Operation::Write)?;

        let cmd = [2, self.my_address, self.address.into()];
        let code = blocking(|| self.driver.gp_talk(&cmd, data));
        check("GpTalk", code, Operation::Write)?;
        Ok(())
    }

    async fn poll_read(&mut self, max_wait: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0; READ_CHUNK];
        self.set_timeout(timeout_ms(max_wait), Operation::Read)?;

        let addressed = [2, self.address.into(), self.my_address];
        let cmd: &[u32] = if self.continuing { &[0] } else { &addressed };
        let (code, len) = blocking(|| self.driver.gp_listen(cmd, &mut buf));
        buf.truncate(len.min(READ_CHUNK));

        match code & 0xff {
            RET_BUFFER_FULL => self.continuing = true,
            RET_TIMEOUT => self.continuing = false,
            _ => {
                self.continuing = false;
                check("GpListen", code, Operation::Read)?;
            }
        }

        if !buf.is_empty() {
            trace!("GpListen({}): {}", self.address, visualize(&buf));
        }
        Ok(buf)
    }

    async fn close(&mut self) -> Result<()> {
        debug!("close(gpib-contec {})", self.address);

        let (code, master) = self.driver.gp_boardsts(REG_MASTER_MODE);
        if code & 0xff == RET_NOT_INITIALIZED {
            return Ok(());
        }

        let mut res = Ok(());
        if master == 0 {
            /* Unlisten and untalk everything before letting go of the bus */
            if let Err(e) = check(
                "GpComand",
                self.driver.gp_comand(&[2, UNL, UNT]),
                Operation::Close,
            ) {
                res = Err(e);
            }
        }
        let resetren = check("GpResetren", self.driver.gp_resetren(), Operation::Close);
        res = res.and(resetren.map(|_| ()));

        let exit = check("GpExit", self.driver.gp_exit(), Operation::Close);
        res.and(exit.map(|_| ()))
    }

    fn describe(&self) -> String {
        format!("gpib-contec://{}", self.address)
    }
}
