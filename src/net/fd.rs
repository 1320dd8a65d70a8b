//! Descriptor plumbing for listener handoff.
//!
//! # Responsibilities
//! - Validate a pre-opened descriptor before adopting it as a listener
//! - Place a listener duplicate at a fixed slot in a child process
//!
//! # Design Decisions
//! - libc directly: std has no API for `SO_ACCEPTCONN` or for descriptor
//!   placement across exec
//! - Nothing here owns policy; `net::listener` and `lifecycle::respawn`
//!   decide when these run

use std::io;
use std::mem;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

use tokio::process::Command;

/// Slot the listener occupies in a restarted process.
pub const INHERITED_FD: RawFd = 3;

/// What a descriptor turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Not an open descriptor.
    Closed,
    /// Open, but not a socket.
    NotSocket,
    /// A socket that is not a listening TCP socket.
    NotListening,
    /// A listening stream socket.
    Listening,
}

/// Classify `fd` without taking ownership of it.
pub fn probe(fd: RawFd) -> io::Result<Probe> {
    // SAFETY: F_GETFD only reads descriptor flags.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EBADF) => Ok(Probe::Closed),
            _ => Err(err),
        };
    }

    let sock_type = match socket_option(fd, libc::SO_TYPE) {
        Ok(value) => value,
        Err(err) if err.raw_os_error() == Some(libc::ENOTSOCK) => return Ok(Probe::NotSocket),
        Err(err) => return Err(err),
    };
    if sock_type != libc::SOCK_STREAM {
        return Ok(Probe::NotListening);
    }
    if !matches!(socket_family(fd)?, libc::AF_INET | libc::AF_INET6) {
        return Ok(Probe::NotListening);
    }

    if socket_option(fd, libc::SO_ACCEPTCONN)? == 0 {
        return Ok(Probe::NotListening);
    }
    Ok(Probe::Listening)
}

fn socket_option(fd: RawFd, option: libc::c_int) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value and len point to live stack memory of the advertised size.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            option,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(value)
}

fn socket_family(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: sockaddr_storage is plain data; all-zero is a valid value.
    let mut addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    // SAFETY: addr and len describe a buffer large enough for any address.
    let rc = unsafe {
        libc::getsockname(
            fd,
            &mut addr as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(libc::c_int::from(addr.ss_family))
}

/// Mark `fd` close-on-exec so it only reaches children through [`pass_at_slot`].
pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain flag manipulation on a descriptor the caller vouches for.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Take ownership of a listening stream socket at `fd`.
///
/// # Safety
///
/// `fd` must not be owned by anything else in this process; the returned
/// listener closes it on drop.
pub unsafe fn adopt_listener(fd: RawFd) -> io::Result<std::net::TcpListener> {
    set_cloexec(fd)?;
    let owned = OwnedFd::from_raw_fd(fd);
    let listener = std::net::TcpListener::from(owned);
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Arrange for `fd` to appear at `slot` in the child spawned by `command`.
///
/// The source descriptor stays close-on-exec; only the copy at `slot` is
/// inherited. `fd` must stay open until `command` has been spawned.
pub fn pass_at_slot(command: &mut Command, fd: &OwnedFd, slot: RawFd) {
    use std::os::unix::io::AsRawFd;

    let src = fd.as_raw_fd();
    // SAFETY: the hook runs between fork and exec and only calls dup2/fcntl,
    // both async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            if src == slot {
                // dup2 onto itself keeps FD_CLOEXEC, clear it by hand.
                let flags = libc::fcntl(slot, libc::F_GETFD);
                if flags == -1 || libc::fcntl(slot, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1
                {
                    return Err(io::Error::last_os_error());
                }
            } else if libc::dup2(src, slot) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}
