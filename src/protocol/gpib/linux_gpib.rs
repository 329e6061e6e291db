use std::ffi::{c_int, c_long, c_void};

use super::ni::{Ni488Driver, NiStatus};

#[allow(non_snake_case)]
#[link(name = "gpib")]
unsafe extern "C" {
    fn ibdev(board: c_int, pad: c_int, sad: c_int, tmo: c_int, eot: c_int, eos: c_int) -> c_int;
    fn ibclr(ud: c_int) -> c_int;
    fn ibtmo(ud: c_int, tmo: c_int) -> c_int;
    fn ibwrt(ud: c_int, buf: *const c_void, count: c_long) -> c_int;
    fn ibrd(ud: c_int, buf: *mut c_void, count: c_long) -> c_int;
    fn ibonl(ud: c_int, online: c_int) -> c_int;
    fn ThreadIbsta() -> c_int;
    fn ThreadIberr() -> c_int;
    fn ThreadIbcntl() -> c_long;
}

/// NI-488.2 API of the linux-gpib user space library
#[derive(Debug, Default)]
pub struct LinuxGpib;
impl LinuxGpib {
    pub fn new() -> Self {
        Self
    }

    fn status() -> NiStatus {
        /* Thread-local copies, valid for the last call made on this thread */
        let (ibsta, iberr, ibcnt) = unsafe { (ThreadIbsta(), ThreadIberr(), ThreadIbcntl()) };
        NiStatus {
            ibsta: ibsta as u16,
            iberr,
            ibcnt: usize::try_from(ibcnt).unwrap_or(0),
        }
    }
}
impl Ni488Driver for LinuxGpib {
    fn ibdev(
        &mut self,
        board: i32,
        pad: i32,
        sad: i32,
        tmo: i32,
        eot: i32,
        eos: i32,
    ) -> (i32, NiStatus) {
        let ud = unsafe { ibdev(board, pad, sad, tmo, eot, eos) };
        (ud, Self::status())
    }

    fn ibclr(&mut self, ud: i32) -> NiStatus {
        unsafe { ibclr(ud) };
        Self::status()
    }

    fn ibtmo(&mut self, ud: i32, tmo: i32) -> NiStatus {
        unsafe { ibtmo(ud, tmo) };
        Self::status()
    }

    fn ibwrt(&mut self, ud: i32, data: &[u8]) -> NiStatus {
        let count = c_long::try_from(data.len()).unwrap_or(c_long::MAX);
        unsafe { ibwrt(ud, data.as_ptr().cast(), count) };
        Self::status()
    }

    fn ibrd(&mut self, ud: i32, buf: &mut [u8]) -> NiStatus {
        let count = c_long::try_from(buf.len()).unwrap_or(c_long::MAX);
        unsafe { ibrd(ud, buf.as_mut_ptr().cast(), count) };
        Self::status()
    }

    fn ibonl(&mut self, ud: i32, online: i32) -> NiStatus {
        unsafe { ibonl(ud, online) };
        Self::status()
    }
}
