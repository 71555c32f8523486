// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Interrupt events.
//!
//! Each open channel registers one event on its own interrupt vector. The
//! write-fence wait blocks on it; the device raises it when a descriptor
//! with `TRANSFER_IRQ_EN` retires while global interrupts are enabled.

use crate::error::{DmaError, DmaResult};
use std::sync::Arc;
use std::time::Duration;

/// A waitable interrupt.
pub trait InterruptEvent: Send + Sync {
    /// Block until the interrupt fires, consuming it.
    ///
    /// `None` waits forever.
    ///
    /// # Errors
    ///
    /// Returns `DmaError::Timeout` if `timeout` elapses first, or the OS
    /// error of the underlying wait.
    fn wait(&self, timeout: Option<Duration>) -> DmaResult<()>;
}

/// Creates events and binds them to device interrupt vectors.
pub trait InterruptSource: Send + Sync {
    /// Create an event and register it to `vector`.
    fn register(&self, vector: u32) -> DmaResult<Arc<dyn InterruptEvent>>;

    /// Detach whatever event is registered to `vector`.
    fn unregister(&self, vector: u32) -> DmaResult<()>;
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use std::os::unix::io::{AsRawFd, RawFd};

    /// Counter-backed event object, the handle a VFIO interrupt is bound to.
    #[derive(Debug)]
    pub struct EventFd {
        fd: RawFd,
    }

    impl EventFd {
        /// Create a new event with a zero counter.
        pub fn new() -> DmaResult<Self> {
            let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
            if fd < 0 {
                return Err(DmaError::Io(std::io::Error::last_os_error()));
            }
            Ok(Self { fd })
        }

        /// Increment the counter, waking a waiter.
        pub fn signal(&self) -> DmaResult<()> {
            let one: u64 = 1;
            let n = unsafe {
                libc::write(
                    self.fd,
                    &one as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n != std::mem::size_of::<u64>() as isize {
                return Err(DmaError::Io(std::io::Error::last_os_error()));
            }
            Ok(())
        }
    }

    impl AsRawFd for EventFd {
        fn as_raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl InterruptEvent for EventFd {
        fn wait(&self, timeout: Option<Duration>) -> DmaResult<()> {
            let timeout_ms: libc::c_int = match timeout {
                None => -1,
                Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            };
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };

            let res = loop {
                let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
                if res < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(DmaError::Io(err));
                }
                break res;
            };
            if res == 0 {
                return Err(DmaError::Timeout {
                    what: "interrupt",
                    attempts: 1,
                });
            }

            // Reading resets the counter.
            let mut count: u64 = 0;
            let n = unsafe {
                libc::read(
                    self.fd,
                    &mut count as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n != std::mem::size_of::<u64>() as isize {
                return Err(DmaError::Io(std::io::Error::last_os_error()));
            }
            log::trace!("eventfd {} fired ({} pending)", self.fd, count);
            Ok(())
        }
    }

    impl Drop for EventFd {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::EventFd;

#[cfg(test)]
mod tests {
    #[cfg(target_os = "linux")]
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_eventfd_signal_then_wait() {
        let ev = EventFd::new().unwrap();
        ev.signal().unwrap();
        ev.signal().unwrap();
        ev.wait(Some(Duration::from_millis(100))).unwrap();
        // Both signals were consumed by the single read
        let err = ev.wait(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, DmaError::Timeout { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_eventfd_cross_thread() {
        let ev = Arc::new(EventFd::new().unwrap());
        let waiter = {
            let ev = Arc::clone(&ev);
            std::thread::spawn(move || ev.wait(Some(Duration::from_secs(5))))
        };
        std::thread::sleep(Duration::from_millis(5));
        ev.signal().unwrap();
        waiter.join().unwrap().unwrap();
    }
}
