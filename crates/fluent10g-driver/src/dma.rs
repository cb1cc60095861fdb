//! XDMA channel access.
//!
//! The board exposes one host-to-card and one card-to-host DMA channel as
//! character devices. The device address of a transfer is the file offset:
//! positioned reads and writes move data to and from board DRAM without a
//! seek syscall per granule.

use crate::error::{Result, TesterError};
use crate::hw::{DmaReader, DmaWriter};
use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};

fn open_channel(path: &Path) -> Result<File> {
    if !path.exists() {
        return Err(TesterError::device_not_found(path));
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    tracing::debug!("Opened DMA channel {}", path.display());
    Ok(file)
}

/// Host-to-card DMA channel (trace data towards the board).
#[derive(Debug)]
pub struct XdmaH2c {
    file: File,
    path: PathBuf,
}

impl XdmaH2c {
    /// Open the host-to-card character device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device node does not exist or cannot be
    /// opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_channel(&path)?;
        Ok(Self { file, path })
    }
}

impl DmaWriter for XdmaH2c {
    fn write(&mut self, device_addr: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let n = rustix::io::pwrite(
                self.file.as_fd(),
                &data[done..],
                device_addr + done as u64,
            )
            .map_err(|e| {
                TesterError::dma(format!("{}: write at {device_addr:#x}: {e}", self.path.display()))
            })?;
            if n == 0 {
                return Err(TesterError::dma(format!(
                    "{}: short write at {device_addr:#x}",
                    self.path.display()
                )));
            }
            done += n;
        }
        Ok(())
    }
}

/// Card-to-host DMA channel (capture data towards the host).
#[derive(Debug)]
pub struct XdmaC2h {
    file: File,
    path: PathBuf,
}

impl XdmaC2h {
    /// Open the card-to-host character device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device node does not exist or cannot be
    /// opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_channel(&path)?;
        Ok(Self { file, path })
    }
}

impl DmaReader for XdmaC2h {
    fn read(&mut self, device_addr: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = rustix::io::pread(
                self.file.as_fd(),
                &mut buf[done..],
                device_addr + done as u64,
            )
            .map_err(|e| {
                TesterError::dma(format!("{}: read at {device_addr:#x}: {e}", self.path.display()))
            })?;
            if n == 0 {
                return Err(TesterError::dma(format!(
                    "{}: short read at {device_addr:#x}",
                    self.path.display()
                )));
            }
            done += n;
        }
        Ok(())
    }
}
