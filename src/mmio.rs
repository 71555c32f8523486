// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! MMIO access to the accelerator's register space.
//!
//! The engine only needs aligned 32- and 64-bit reads and writes at byte
//! offsets. [`Mmio`] abstracts that so the same engine code drives a real
//! mapped BAR or a software model.
//!
//! # Platform Support
//!
//! [`MappedMmio`] maps a PCI resource file (or a UIO map) on Linux. On other
//! platforms opening it returns `DmaError::PlatformNotSupported`.

use crate::error::{DmaError, DmaResult};
use std::path::Path;

/// Aligned register access at byte offsets into the device's MMIO space.
pub trait Mmio: Send + Sync {
    /// Read a 32-bit register. `offset` must be 4-byte aligned.
    fn read32(&self, offset: u64) -> DmaResult<u32>;
    /// Read a 64-bit register. `offset` must be 8-byte aligned.
    fn read64(&self, offset: u64) -> DmaResult<u64>;
    /// Write a 32-bit register. `offset` must be 4-byte aligned.
    fn write32(&self, offset: u64, value: u32) -> DmaResult<()>;
    /// Write a 64-bit register. `offset` must be 8-byte aligned.
    fn write64(&self, offset: u64, value: u64) -> DmaResult<()>;
}

/// Write consecutive 64-bit words starting at `offset`, in order.
pub fn write_block64(mmio: &dyn Mmio, offset: u64, words: &[u64]) -> DmaResult<()> {
    for (i, word) in words.iter().enumerate() {
        mmio.write64(offset + (i as u64) * 8, *word)?;
    }
    Ok(())
}

/// Validate alignment and bounds of an access of `width` bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn check_access(offset: u64, width: u64, size: usize) -> DmaResult<usize> {
    if offset % width != 0 {
        return Err(DmaError::misaligned("MMIO offset", offset, width));
    }
    match offset.checked_add(width) {
        Some(end) if end <= size as u64 => Ok(offset as usize),
        _ => Err(DmaError::InvalidParameter(format!(
            "MMIO offset {offset:#x} outside of {size:#x}-byte mapping"
        ))),
    }
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    /// Register space mapped from a resource file.
    pub struct MappedMmio {
        /// Keeps the mapping's backing file open.
        #[allow(dead_code)]
        file: File,
        base: *mut u8,
        size: usize,
    }

    // SAFETY: the mapping is owned by this struct and process-wide; moving it
    // between threads does not invalidate it.
    unsafe impl Send for MappedMmio {}

    // SAFETY: every access is a single bounds-checked volatile load or store
    // of a naturally aligned register.
    unsafe impl Sync for MappedMmio {}

    impl MappedMmio {
        /// Map `size` bytes of a device resource.
        ///
        /// # Arguments
        ///
        /// * `path` - Resource file, e.g. `/sys/bus/pci/devices/0000:5e:00.0/resource2`
        /// * `size` - Length of the register space to map
        ///
        /// # Errors
        ///
        /// Returns an error if the file cannot be opened or mapped.
        pub fn open(path: &Path, size: usize) -> DmaResult<Self> {
            if size == 0 {
                return Err(DmaError::InvalidParameter("zero-length MMIO mapping".into()));
            }

            let file = File::options()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DmaError::InvalidParameter(format!(
                            "permission denied: {}",
                            path.display()
                        ))
                    } else {
                        DmaError::Io(e)
                    }
                })?;

            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };

            if base == libc::MAP_FAILED {
                return Err(DmaError::MmapFailed(format!(
                    "{}: {}",
                    path.display(),
                    std::io::Error::last_os_error()
                )));
            }

            log::debug!("mapped {} bytes of {}", size, path.display());

            Ok(Self {
                file,
                base: base as *mut u8,
                size,
            })
        }

        /// Size of the mapping in bytes.
        pub fn size(&self) -> usize {
            self.size
        }
    }

    impl Mmio for MappedMmio {
        fn read32(&self, offset: u64) -> DmaResult<u32> {
            let off = check_access(offset, 4, self.size)?;
            // SAFETY: bounds and alignment checked above
            Ok(unsafe { std::ptr::read_volatile(self.base.add(off) as *const u32) })
        }

        fn read64(&self, offset: u64) -> DmaResult<u64> {
            let off = check_access(offset, 8, self.size)?;
            // SAFETY: bounds and alignment checked above
            Ok(unsafe { std::ptr::read_volatile(self.base.add(off) as *const u64) })
        }

        fn write32(&self, offset: u64, value: u32) -> DmaResult<()> {
            let off = check_access(offset, 4, self.size)?;
            // SAFETY: bounds and alignment checked above
            unsafe { std::ptr::write_volatile(self.base.add(off) as *mut u32, value) };
            Ok(())
        }

        fn write64(&self, offset: u64, value: u64) -> DmaResult<()> {
            let off = check_access(offset, 8, self.size)?;
            // SAFETY: bounds and alignment checked above
            unsafe { std::ptr::write_volatile(self.base.add(off) as *mut u64, value) };
            Ok(())
        }
    }

    impl Drop for MappedMmio {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.size);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::MappedMmio;

// ============================================================================
// Stub Implementation (unsupported platforms)
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub_impl {
    use super::*;

    /// Register space mapped from a resource file (unavailable on this platform).
    pub struct MappedMmio {
        _private: (),
    }

    impl MappedMmio {
        /// Always fails on this platform.
        pub fn open(_path: &Path, _size: usize) -> DmaResult<Self> {
            Err(DmaError::PlatformNotSupported("MMIO mapping requires Linux"))
        }

        pub fn size(&self) -> usize {
            0
        }
    }

    impl Mmio for MappedMmio {
        fn read32(&self, _offset: u64) -> DmaResult<u32> {
            Err(DmaError::PlatformNotSupported("MMIO mapping requires Linux"))
        }
        fn read64(&self, _offset: u64) -> DmaResult<u64> {
            Err(DmaError::PlatformNotSupported("MMIO mapping requires Linux"))
        }
        fn write32(&self, _offset: u64, _value: u32) -> DmaResult<()> {
            Err(DmaError::PlatformNotSupported("MMIO mapping requires Linux"))
        }
        fn write64(&self, _offset: u64, _value: u64) -> DmaResult<()> {
            Err(DmaError::PlatformNotSupported("MMIO mapping requires Linux"))
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use stub_impl::MappedMmio;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_access() {
        assert_eq!(check_access(8, 8, 16).unwrap(), 8);
        assert!(matches!(
            check_access(4, 8, 16),
            Err(DmaError::Misaligned { .. })
        ));
        assert!(matches!(
            check_access(16, 4, 16),
            Err(DmaError::InvalidParameter(_))
        ));
        assert!(check_access(u64::MAX - 3, 4, 16).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_mapped_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("fpga-mmdma-mmio-{}", std::process::id()));
        {
            let f = std::fs::File::create(&path).unwrap();
            f.set_len(4096).unwrap();
        }

        let mmio = MappedMmio::open(&path, 4096).unwrap();
        assert_eq!(mmio.size(), 4096);
        mmio.write64(0x40, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mmio.read64(0x40).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(mmio.read32(0x40).unwrap(), 0x5566_7788);
        assert_eq!(mmio.read32(0x44).unwrap(), 0x1122_3344);

        write_block64(&mmio, 0x100, &[1, 2, 3]).unwrap();
        assert_eq!(mmio.read64(0x110).unwrap(), 3);

        assert!(mmio.read64(0x41).is_err());
        assert!(mmio.write32(4096, 0).is_err());

        drop(mmio);
        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_missing_file() {
        let err = MappedMmio::open(Path::new("/nonexistent/fpga-mmdma"), 4096);
        assert!(matches!(err, Err(DmaError::Io(_))));
    }
}
