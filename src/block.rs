//! Block devices backing the medium
//!
//! Storage backends (RAM, an always-empty device, external flash, SD cards) are variants of
//! one small capability trait. The arbitration core never calls it: only the MSC export path
//! and the filesystem driver do, and never both at once.

use core::borrow::BorrowMut;

/// Bytes per logical block
pub const BLOCK_SIZE: usize = 512;

/// Identification strings reported to the host
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor: &'static str,
    pub product: &'static str,
    pub revision: &'static str,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockError {
    /// Logical block address past the end of the device
    OutOfRange,
    ReadError,
    WriteError,
}

pub trait BlockDevice {
    fn info(&self) -> DeviceInfo;

    fn block_count(&self) -> u32;

    fn read_block(&mut self, lba: u32, block: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError>;

    fn write_block(&mut self, lba: u32, block: &[u8; BLOCK_SIZE]) -> Result<(), BlockError>;
}

/// Block device over a byte buffer
///
/// Trailing bytes that do not fill a whole block are not addressable.
pub struct RamBlockDevice<Buf: BorrowMut<[u8]>> {
    buf: Buf,
    info: DeviceInfo,
}

impl<Buf: BorrowMut<[u8]>> RamBlockDevice<Buf> {
    pub fn new(buf: Buf, info: DeviceInfo) -> Self {
        Self { buf, info }
    }

    pub fn into_inner(self) -> Buf {
        self.buf
    }

    fn range(&self, lba: u32) -> Result<core::ops::Range<usize>, BlockError> {
        if lba >= self.block_count() {
            return Err(BlockError::OutOfRange);
        }
        let start = lba as usize * BLOCK_SIZE;
        Ok(start..start + BLOCK_SIZE)
    }
}

impl<Buf: BorrowMut<[u8]>> BlockDevice for RamBlockDevice<Buf> {
    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn block_count(&self) -> u32 {
        (self.buf.borrow().len() / BLOCK_SIZE) as u32
    }

    fn read_block(&mut self, lba: u32, block: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        let range = self.range(lba)?;
        block.copy_from_slice(&self.buf.borrow()[range]);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, block: &[u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        let range = self.range(lba)?;
        self.buf.borrow_mut()[range].copy_from_slice(block);
        Ok(())
    }
}

/// Device that reads back zeros and discards writes
pub struct EmptyBlockDevice {
    blocks: u32,
    info: DeviceInfo,
}

impl EmptyBlockDevice {
    pub const fn new(blocks: u32, info: DeviceInfo) -> Self {
        Self { blocks, info }
    }
}

impl BlockDevice for EmptyBlockDevice {
    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn block_count(&self) -> u32 {
        self.blocks
    }

    fn read_block(&mut self, lba: u32, block: &mut [u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        if lba >= self.blocks {
            return Err(BlockError::OutOfRange);
        }
        block.fill(0);
        Ok(())
    }

    fn write_block(&mut self, lba: u32, _block: &[u8; BLOCK_SIZE]) -> Result<(), BlockError> {
        if lba >= self.blocks {
            return Err(BlockError::OutOfRange);
        }
        Ok(())
    }
}
