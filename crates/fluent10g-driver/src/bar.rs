//! Memory-mapped control-plane register window.
//!
//! BAR0 of the board is mapped through the sysfs `resource0` file of the
//! PCIe device, giving the driver direct 32-bit volatile access to the
//! register map described in [`fluent10g_chip::regs`].

// MMIO registers are naturally aligned by hardware, so pointer casts are safe.
#![allow(clippy::cast_ptr_alignment)]

use crate::error::{Result, TesterError};
use crate::hw::RegisterIo;
use fluent10g_chip::pcie;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::OpenOptions;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

/// Scan the PCIe bus for the first fluent10g board.
///
/// Reads vendor/device IDs from `/sys/bus/pci/devices/*/` and returns the
/// bus address (e.g. `0000:03:00.0`) of the first match.
///
/// # Errors
///
/// Returns [`TesterError::NoBoardFound`] if no device carries the expected
/// vendor/device pair.
pub fn discover() -> Result<String> {
    let entries = std::fs::read_dir("/sys/bus/pci/devices")?;

    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let vendor = read_hex_sysfs(&path.join("vendor"));
        let device = read_hex_sysfs(&path.join("device"));

        if let (Ok(vendor), Ok(device)) = (vendor, device) {
            if vendor == pcie::VENDOR_ID && device == pcie::DEVICE_ID {
                matches.push(entry.file_name().to_string_lossy().to_string());
            }
        }
    }

    // Sort for a stable pick when more than one board is plugged in.
    matches.sort();

    match matches.into_iter().next() {
        Some(addr) => {
            tracing::debug!("Found fluent10g board at {addr}");
            Ok(addr)
        }
        None => Err(TesterError::NoBoardFound),
    }
}

fn read_hex_sysfs(path: &Path) -> Result<u16> {
    let content = std::fs::read_to_string(path)?;
    let trimmed = content.trim().trim_start_matches("0x");
    u16::from_str_radix(trimmed, 16)
        .map_err(|e| TesterError::config(format!("invalid hex in {}: {e}", path.display())))
}

/// Mapped BAR0 register window.
pub struct RegisterWindow {
    /// Memory-mapped pointer.
    ptr: *mut u8,
    /// Size of the mapping.
    size: usize,
    /// PCIe bus address the window belongs to.
    pcie_addr: String,
}

impl std::fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("pcie_addr", &self.pcie_addr)
            .finish()
    }
}

// SAFETY: Send - RegisterWindow owns the mapping exclusively; mmap'd memory
// is process-wide and moving the handle between threads does not invalidate
// it.
unsafe impl Send for RegisterWindow {}

// SAFETY: Sync - all accesses are bounds-checked volatile word reads/writes,
// which the hardware serialises; the register map partitions ownership
// between the foreground and the capture task at the word level.
unsafe impl Sync for RegisterWindow {}

impl RegisterWindow {
    /// Map BAR0 of the board at the given PCIe bus address.
    ///
    /// # Errors
    ///
    /// Returns an error if the sysfs resource file does not exist, cannot
    /// be opened (typically a permission problem), or cannot be mapped.
    pub fn open(pcie_addr: &str) -> Result<Self> {
        let path = PathBuf::from(format!(
            "/sys/bus/pci/devices/{pcie_addr}/resource{}",
            pcie::BAR_ID
        ));

        if !path.exists() {
            return Err(TesterError::device_not_found(path));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len() as usize;

        // SAFETY: mmap necessary for MMIO - maps the BAR into the process
        // address space. Invariants: (1) fd valid from the open above;
        // (2) length taken from the resource file size; (3) mapping is
        // shared so writes reach the device; (4) ptr valid for size bytes
        // or Err.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
            .map_err(|e| {
                TesterError::config(format!("failed to mmap {}: {e}", path.display()))
            })?
        };

        tracing::info!("Mapped BAR{} of {pcie_addr} at {ptr:p}, size={size:#x}", pcie::BAR_ID);

        Ok(Self {
            ptr: ptr.cast(),
            size,
            pcie_addr: pcie_addr.to_string(),
        })
    }

    /// Discover the board and map its register window.
    ///
    /// # Errors
    ///
    /// Returns an error if no board is present or the mapping fails.
    pub fn open_first() -> Result<Self> {
        let addr = discover()?;
        Self::open(&addr)
    }

    /// PCIe bus address of the mapped board.
    #[must_use]
    pub fn pcie_addr(&self) -> &str {
        &self.pcie_addr
    }

    /// Size of the mapped window in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Read a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped window size.
    #[must_use]
    pub fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: read_volatile necessary for MMIO - hardware can change
        // the value. ptr is valid for self.size bytes and offset+4 <= size.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    /// Write a 32-bit register.
    ///
    /// # Panics
    ///
    /// Panics if `offset + 4` exceeds the mapped window size.
    pub fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.size, "Register offset out of bounds");
        // SAFETY: write_volatile necessary for MMIO - triggers hardware
        // side effects. ptr is valid for self.size bytes and offset+4 <= size.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value);
        }
    }
}

impl RegisterIo for RegisterWindow {
    fn read(&self, addr: u32) -> u32 {
        self.read32(addr as usize)
    }

    fn write(&self, addr: u32, value: u32) {
        self.write32(addr as usize, value);
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from the successful mmap in open(); Drop
        // runs at most once and no references outlive the window.
        unsafe {
            // Error in Drop cannot be propagated.
            let _ = munmap(self.ptr.cast(), self.size);
        }
        tracing::debug!("Unmapped BAR{} of {}", pcie::BAR_ID, self.pcie_addr);
    }
}
