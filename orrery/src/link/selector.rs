use std::io;
use std::os::fd::BorrowedFd;

use rustix::event::{PollFd, PollFlags, Timespec};

/// One descriptor to check. Read interest is implied.
#[derive(Debug, Clone, Copy)]
pub struct Watch<'a> {
    pub fd: BorrowedFd<'a>,
    pub write: bool,
}

/// Readiness of one watched descriptor after a check.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
    pub invalid: bool,
}

impl Readiness {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !(self.readable || self.writable || self.error || self.hangup || self.invalid)
    }

    fn from_flags(flags: PollFlags) -> Self {
        Self {
            readable: flags.contains(PollFlags::IN),
            writable: flags.contains(PollFlags::OUT),
            error: flags.contains(PollFlags::ERR),
            hangup: flags.contains(PollFlags::HUP),
            invalid: flags.contains(PollFlags::NVAL),
        }
    }
}

/// Readiness backend: one non-blocking check over a set of descriptors.
pub trait Selector {
    /// Fills `ready[i]` for `watches[i]` and returns how many descriptors
    /// have any readiness. Must not block.
    ///
    /// # Errors
    ///
    /// The underlying readiness call failed; `ready` is unspecified.
    fn select(&mut self, watches: &[Watch<'_>], ready: &mut [Readiness]) -> io::Result<usize>;
}

/// Level-triggered `poll(2)` with a zero timeout.
#[derive(Debug, Default)]
pub struct PollSelector;

const IMMEDIATE: Timespec = Timespec {
    tv_sec: 0,
    tv_nsec: 0,
};

impl Selector for PollSelector {
    fn select(&mut self, watches: &[Watch<'_>], ready: &mut [Readiness]) -> io::Result<usize> {
        let mut fds: Vec<PollFd<'_>> = watches
            .iter()
            .map(|watch| {
                let mut interest = PollFlags::IN;
                if watch.write {
                    interest |= PollFlags::OUT;
                }
                PollFd::from_borrowed_fd(watch.fd, interest)
            })
            .collect();

        let count = rustix::event::poll(&mut fds, Some(&IMMEDIATE))?;
        for (fd, slot) in fds.iter().zip(ready.iter_mut()) {
            *slot = Readiness::from_flags(fd.revents());
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_readable_and_writable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let watches = [Watch {
            fd: b.as_fd(),
            write: false,
        }];
        let mut ready = [Readiness::default()];

        assert_eq!(PollSelector.select(&watches, &mut ready).unwrap(), 0);
        assert!(ready[0].is_idle());

        a.write_all(b"x").unwrap();
        assert_eq!(PollSelector.select(&watches, &mut ready).unwrap(), 1);
        assert!(ready[0].readable);
        assert!(!ready[0].writable);

        let watches = [Watch {
            fd: b.as_fd(),
            write: true,
        }];
        PollSelector.select(&watches, &mut ready).unwrap();
        assert!(ready[0].writable);
    }

    #[test]
    fn peer_close_reports_hangup_or_eof() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        let watches = [Watch {
            fd: b.as_fd(),
            write: false,
        }];
        let mut ready = [Readiness::default()];
        assert_eq!(PollSelector.select(&watches, &mut ready).unwrap(), 1);
        assert!(ready[0].hangup || ready[0].readable);
    }
}
