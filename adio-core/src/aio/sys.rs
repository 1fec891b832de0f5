//! Raw Linux AIO syscall wrappers.
//!
//! Glibc does not export the native AIO entry points, so these go through
//! `libc::syscall` directly. Errors come back as `io::Error` from errno.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

// The native kernel AIO ABI is not exported by `libc`, so the fixed
// kernel definitions live here. `aio_context_t` is the opaque context
// handle (kernel `typedef unsigned long aio_context_t`), `io_event` is the
// completion record filled by `io_getevents`, and the `IOCB_CMD_*` values
// are the operation opcodes for `iocb::aio_lio_opcode`.
#[allow(non_camel_case_types)]
pub(crate) type aio_context_t = libc::c_ulong;

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct io_event {
    pub data: u64,
    pub obj: u64,
    pub res: i64,
    pub res2: i64,
}

pub(crate) const IOCB_CMD_PREAD: u16 = 0;
pub(crate) const IOCB_CMD_PWRITE: u16 = 1;

/// Creates a kernel AIO context able to hold `nr_events` in-flight requests.
pub(crate) fn setup(nr_events: usize) -> io::Result<aio_context_t> {
    let mut ctx: aio_context_t = 0;
    let rc = unsafe {
        libc::syscall(
            libc::SYS_io_setup,
            nr_events as libc::c_long,
            &mut ctx as *mut aio_context_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ctx)
}

/// Destroys a kernel AIO context.
pub(crate) fn destroy(ctx: aio_context_t) -> io::Result<()> {
    let rc = unsafe { libc::syscall(libc::SYS_io_destroy, ctx) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Submits a single control block to the context.
///
/// A full queue surfaces as an `io::Error` with raw code `EAGAIN`; the
/// caller decides whether that is retryable.
///
/// # Safety
///
/// The buffer referenced by `cb.aio_buf` must stay valid (and aligned for
/// direct I/O) until the matching completion event has been reaped.
pub(crate) unsafe fn submit(ctx: aio_context_t, cb: &mut libc::iocb) -> io::Result<()> {
    let mut list = [cb as *mut libc::iocb];
    let rc = unsafe {
        libc::syscall(
            libc::SYS_io_submit,
            ctx,
            1 as libc::c_long,
            list.as_mut_ptr(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Blocks until at least one completion is available, filling `events`.
///
/// Returns the number of events written. No timeout: the wait only ends
/// when the kernel delivers a completion (or the call is interrupted, in
/// which case the error carries `EINTR`).
pub(crate) fn get_events(
    ctx: aio_context_t,
    events: &mut [io_event],
) -> io::Result<usize> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_io_getevents,
            ctx,
            1 as libc::c_long,
            events.len() as libc::c_long,
            events.as_mut_ptr(),
            ptr::null_mut::<libc::timespec>(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

/// Prepares a positioned-read control block.
pub(crate) fn prep_pread(fd: RawFd, buf: *mut u8, len: usize, offset: u64, data: u64) -> libc::iocb {
    prep(IOCB_CMD_PREAD as u16, fd, buf, len, offset, data)
}

/// Prepares a positioned-write control block.
pub(crate) fn prep_pwrite(
    fd: RawFd,
    buf: *mut u8,
    len: usize,
    offset: u64,
    data: u64,
) -> libc::iocb {
    prep(IOCB_CMD_PWRITE as u16, fd, buf, len, offset, data)
}

fn prep(opcode: u16, fd: RawFd, buf: *mut u8, len: usize, offset: u64, data: u64) -> libc::iocb {
    let mut cb: libc::iocb = unsafe { std::mem::zeroed() };
    cb.aio_data = data;
    cb.aio_lio_opcode = opcode;
    cb.aio_fildes = fd as u32;
    cb.aio_buf = buf as usize as u64;
    cb.aio_nbytes = len as u64;
    cb.aio_offset = offset as i64;
    cb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prep_read_fields() {
        let cb = prep_pread(3, 0x1000 as *mut u8, 4096, 8192, 42);
        assert_eq!(cb.aio_lio_opcode, IOCB_CMD_PREAD as u16);
        assert_eq!(cb.aio_fildes, 3);
        assert_eq!(cb.aio_buf, 0x1000);
        assert_eq!(cb.aio_nbytes, 4096);
        assert_eq!(cb.aio_offset, 8192);
        assert_eq!(cb.aio_data, 42);
    }

    #[test]
    fn test_prep_write_opcode() {
        let cb = prep_pwrite(5, std::ptr::null_mut(), 0, 0, u64::MAX);
        assert_eq!(cb.aio_lio_opcode, IOCB_CMD_PWRITE as u16);
        assert_eq!(cb.aio_nbytes, 0);
        assert_eq!(cb.aio_data, u64::MAX);
    }
}
