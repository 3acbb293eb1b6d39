//! Pseudo-terminal pairs for console capture.
//!
//! Both the emulator and the serial bridge write their console to the
//! secondary side of a PTY; we read the primary side without buffering.

use std::io;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};

use rustix::fs::{fcntl_getfl, fcntl_setfl, Mode, OFlags};
use rustix::io::Errno;
use rustix::pty::{grantpt, openpt, ptsname, unlockpt, OpenptFlags};
use rustix::termios::{tcgetattr, tcsetattr, OptionalActions};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, Interest, ReadBuf};

use crate::error::Result;

/// A freshly opened PTY pair. The secondary side is handed to a child
/// process and must be dropped by the parent once the child is spawned.
pub struct PtyPair {
    primary: OwnedFd,
    secondary: OwnedFd,
}

impl PtyPair {
    pub fn open() -> Result<Self> {
        let primary = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC)?;
        grantpt(&primary)?;
        unlockpt(&primary)?;
        let name = ptsname(&primary, Vec::new())?;
        let secondary = rustix::fs::open(
            name.as_c_str(),
            OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC,
            Mode::empty(),
        )?;

        // Raw mode: no echo of what the child reads, no CRLF translation.
        let mut termios = tcgetattr(&secondary)?;
        termios.make_raw();
        tcsetattr(&secondary, OptionalActions::Now, &termios)?;

        Ok(Self { primary, secondary })
    }

    /// Stdio handles (stdin, stdout) for the child.
    pub fn child_stdio(&self) -> Result<(Stdio, Stdio)> {
        let stdin = self.secondary.try_clone()?;
        let stdout = self.secondary.try_clone()?;
        Ok((Stdio::from(stdin), Stdio::from(stdout)))
    }

    /// Close the secondary side and turn the primary side into a console.
    pub fn into_console(self) -> Result<PtyConsole> {
        drop(self.secondary);
        PtyConsole::new(self.primary)
    }
}

/// Unbuffered async reader over the primary side of a PTY.
pub struct PtyConsole {
    fd: AsyncFd<OwnedFd>,
}

impl PtyConsole {
    fn new(primary: OwnedFd) -> Result<Self> {
        let flags = fcntl_getfl(&primary)?;
        fcntl_setfl(&primary, flags | OFlags::NONBLOCK)?;
        let fd = AsyncFd::try_with_interest(primary, Interest::READABLE)
            .map_err(|err| err.into_parts().1)?;
        Ok(Self { fd })
    }
}

impl AsyncRead for PtyConsole {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            let read = guard.try_io(|fd| match rustix::io::read(fd.get_ref(), &mut *unfilled) {
                Ok(n) => Ok(n),
                // Linux reports EIO on the primary once every secondary fd
                // is closed, i.e. the child has gone away.
                Err(Errno::IO) => Ok(0),
                Err(errno) => Err(io::Error::from(errno)),
            });
            match read {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}
