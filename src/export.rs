//! USB Mass Storage export path
//!
//! Serves SCSI commands received through [usbd-storage] from a [BlockDevice]. The medium is
//! only readable or writable by the host while the caller reports it as exported, which in
//! turn is [Arbiter::export_active]. Otherwise every medium access fails with
//! `NOT READY / MEDIUM NOT PRESENT` and the host sees an empty drive.
//!
//! [usbd-storage]: https://crates.io/crates/usbd-storage
//! [Arbiter::export_active]: crate::arbiter::Arbiter::export_active

use crate::block::{BlockDevice, BlockError, BLOCK_SIZE};
use core::borrow::BorrowMut;
use usb_device::bus::UsbBus;
use usb_device::UsbError;
use usbd_storage::subclass::scsi::{Scsi, ScsiCommand};
use usbd_storage::subclass::Command;
use usbd_storage::transport::bbb::{BulkOnly, BulkOnlyError};
use usbd_storage::transport::TransportError;

/// Fixed format sense data length
const SENSE_LEN: usize = 18;
/// Standard inquiry data length
const INQUIRY_LEN: usize = 36;

/// SCSI over Bulk Only Transport command
pub type ScsiBbbCommand<'a, 'alloc, Bus, Buf> =
    Command<'a, ScsiCommand, Scsi<BulkOnly<'alloc, Bus, Buf>>>;

type TransportResult = Result<(), TransportError<BulkOnlyError>>;

/// Sense key with additional sense code and qualifier
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sense {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    pub const NO_SENSE: Sense = Sense::new(0x00, 0x00, 0x00);
    pub const MEDIUM_NOT_PRESENT: Sense = Sense::new(0x02, 0x3A, 0x00);
    pub const UNRECOVERED_READ_ERROR: Sense = Sense::new(0x03, 0x11, 0x00);
    pub const WRITE_ERROR: Sense = Sense::new(0x03, 0x0C, 0x00);
    pub const INVALID_COMMAND: Sense = Sense::new(0x05, 0x20, 0x00);
    pub const LBA_OUT_OF_RANGE: Sense = Sense::new(0x05, 0x21, 0x00);

    pub const fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }
}

impl From<BlockError> for Sense {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::OutOfRange => Sense::LBA_OUT_OF_RANGE,
            BlockError::ReadError => Sense::UNRECOVERED_READ_ERROR,
            BlockError::WriteError => Sense::WRITE_ERROR,
        }
    }
}

/// Block-wise progress of a READ or WRITE
#[derive(Debug, Copy, Clone)]
struct Transfer {
    /// Range requested by the command this transfer belongs to
    command_lba: u64,
    command_len: u64,
    lba: u32,
    remaining: u32,
    /// Bytes of the current block already moved
    offset: usize,
    /// The current block is in the block buffer (reads only)
    loaded: bool,
}

impl Transfer {
    fn next_block(&mut self) {
        self.lba += 1;
        self.remaining -= 1;
        self.offset = 0;
        self.loaded = false;
    }
}

/// SCSI command processor backed by a [BlockDevice]
pub struct MscExport<B: BlockDevice> {
    device: B,
    sense: Sense,
    transfer: Option<Transfer>,
    block: [u8; BLOCK_SIZE],
}

impl<B: BlockDevice> MscExport<B> {
    pub fn new(device: B) -> Self {
        Self {
            device,
            sense: Sense::NO_SENSE,
            transfer: None,
            block: [0u8; BLOCK_SIZE],
        }
    }

    pub fn device(&self) -> &B {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut B {
        &mut self.device
    }

    pub fn into_inner(self) -> B {
        self.device
    }

    /// Sense data reported by the next `REQUEST SENSE`
    pub fn sense(&self) -> Sense {
        self.sense
    }

    /// Whether a READ or WRITE is in progress
    pub fn transfer_active(&self) -> bool {
        self.transfer.is_some()
    }

    /// Forgets the in-flight transfer and the pending sense. Call after a USB bus reset.
    pub fn reset(&mut self) {
        self.transfer = None;
        self.sense = Sense::NO_SENSE;
    }

    /// Drives `scsi` once, processing the current command if it needs an action
    ///
    /// # Errors
    /// USB stack errors other than [UsbError::WouldBlock]
    pub fn serve<'alloc, Bus, Buf>(
        &mut self,
        scsi: &mut Scsi<BulkOnly<'alloc, Bus, Buf>>,
        exported: bool,
    ) -> Result<(), UsbError>
    where
        Bus: UsbBus + 'alloc,
        Buf: BorrowMut<[u8]>,
    {
        scsi.poll(|command| {
            if let Err(err) = self.process(command, exported) {
                error!("msc: Transport error: {}", err);
            }
        })
    }

    /// Processes one callback for `command`
    ///
    /// READ and WRITE span several callbacks; the transfer state is kept between them and
    /// cleared once the command passes or fails.
    ///
    /// # Errors
    /// Transport errors returned while moving data
    pub fn process<'alloc, Bus, Buf>(
        &mut self,
        command: ScsiBbbCommand<'_, 'alloc, Bus, Buf>,
        exported: bool,
    ) -> TransportResult
    where
        Bus: UsbBus + 'alloc,
        Buf: BorrowMut<[u8]>,
    {
        let kind = command.kind;

        match kind {
            ScsiCommand::Inquiry { alloc_len, .. } => {
                let data = self.inquiry_data();
                respond(command, &data[..INQUIRY_LEN.min(alloc_len as usize)])?;
            }
            ScsiCommand::RequestSense { alloc_len, .. } => {
                let data = self.sense_data();
                respond(command, &data[..SENSE_LEN.min(alloc_len as usize)])?;
                self.sense = Sense::NO_SENSE;
            }
            _ if !exported => {
                debug!("msc: Medium not exported, rejecting {}", kind);
                self.fail(command, Sense::MEDIUM_NOT_PRESENT);
            }
            ScsiCommand::TestUnitReady { .. } => {
                command.pass();
            }
            ScsiCommand::ReadCapacity10 { .. } => {
                let last_lba = self.device.block_count().saturating_sub(1);
                let mut data = [0u8; 8];
                data[0..4].copy_from_slice(&last_lba.to_be_bytes());
                data[4..8].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
                respond(command, &data)?;
            }
            ScsiCommand::ReadCapacity16 { .. } => {
                let last_lba = u64::from(self.device.block_count().saturating_sub(1));
                let mut data = [0u8; 32];
                data[0..8].copy_from_slice(&last_lba.to_be_bytes());
                data[8..12].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
                respond(command, &data)?;
            }
            ScsiCommand::ReadFormatCapacities { .. } => {
                let mut data = [0u8; 12];
                data[3] = 0x08; // capacity list length
                data[4..8].copy_from_slice(&self.device.block_count().to_be_bytes());
                data[8] = 0x02; // formatted media
                data[9..12].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes()[1..]);
                respond(command, &data)?;
            }
            ScsiCommand::ModeSense6 { .. } => {
                // no block descriptors, not write protected
                respond(command, &[0x03, 0x00, 0x00, 0x00])?;
            }
            ScsiCommand::ModeSense10 { .. } => {
                respond(command, &[0x00, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])?;
            }
            ScsiCommand::Read { lba, len, .. } => {
                if self.begin_transfer(lba as u64, len as u64) {
                    self.read_blocks(command)?;
                } else {
                    self.fail(command, Sense::LBA_OUT_OF_RANGE);
                }
            }
            ScsiCommand::Write { lba, len, .. } => {
                if self.begin_transfer(lba as u64, len as u64) {
                    self.write_blocks(command)?;
                } else {
                    self.fail(command, Sense::LBA_OUT_OF_RANGE);
                }
            }
            _ => {
                warn!("msc: Unsupported command: {}", kind);
                self.fail(command, Sense::INVALID_COMMAND);
            }
        }

        Ok(())
    }

    /// Starts a transfer unless one for the same range is already running. Returns `false`
    /// if the range does not fit the device.
    ///
    /// A transfer left behind by another command (the host reset the transport in the middle
    /// of it) is dropped.
    fn begin_transfer(&mut self, lba: u64, len: u64) -> bool {
        if let Some(transfer) = self.transfer {
            if transfer.command_lba == lba && transfer.command_len == len {
                return true;
            }
            warn!(
                "msc: Dropping unfinished transfer of {} blocks from {}",
                transfer.command_len,
                transfer.command_lba
            );
            self.transfer = None;
        }

        let in_range = lba
            .checked_add(len)
            .is_some_and(|end| end <= u64::from(self.device.block_count()));
        if !in_range {
            warn!("msc: Blocks {}+{} out of range", lba, len);
            return false;
        }

        trace!("msc: Transfer of {} blocks from {}", len, lba);
        self.transfer = Some(Transfer {
            command_lba: lba,
            command_len: len,
            lba: lba as u32,
            remaining: len as u32,
            offset: 0,
            loaded: false,
        });
        true
    }

    fn read_blocks<'alloc, Bus, Buf>(
        &mut self,
        mut command: ScsiBbbCommand<'_, 'alloc, Bus, Buf>,
    ) -> TransportResult
    where
        Bus: UsbBus + 'alloc,
        Buf: BorrowMut<[u8]>,
    {
        let Some(mut transfer) = self.transfer else {
            return Ok(());
        };

        if transfer.remaining == 0 {
            self.transfer = None;
            command.pass();
            return Ok(());
        }

        if !transfer.loaded {
            if let Err(err) = self.device.read_block(transfer.lba, &mut self.block) {
                error!("msc: Reading block {} failed: {}", transfer.lba, err);
                self.fail(command, Sense::from(err));
                return Ok(());
            }
            transfer.loaded = true;
        }

        transfer.offset += match command.write_data(&self.block[transfer.offset..]) {
            Ok(count) => count,
            Err(err) => {
                self.transfer = None;
                return Err(err);
            }
        };
        if transfer.offset == BLOCK_SIZE {
            transfer.next_block();
        }
        self.transfer = Some(transfer);

        Ok(())
    }

    fn write_blocks<'alloc, Bus, Buf>(
        &mut self,
        mut command: ScsiBbbCommand<'_, 'alloc, Bus, Buf>,
    ) -> TransportResult
    where
        Bus: UsbBus + 'alloc,
        Buf: BorrowMut<[u8]>,
    {
        let Some(mut transfer) = self.transfer else {
            return Ok(());
        };

        while transfer.remaining > 0 {
            transfer.offset += match command.read_data(&mut self.block[transfer.offset..]) {
                Ok(count) => count,
                Err(err) => {
                    self.transfer = None;
                    return Err(err);
                }
            };
            if transfer.offset < BLOCK_SIZE {
                // wait for more data from the host
                self.transfer = Some(transfer);
                return Ok(());
            }

            if let Err(err) = self.device.write_block(transfer.lba, &self.block) {
                error!("msc: Writing block {} failed: {}", transfer.lba, err);
                self.fail(command, Sense::from(err));
                return Ok(());
            }
            transfer.next_block();
        }

        self.transfer = None;
        command.pass();
        Ok(())
    }

    fn fail<'alloc, Bus, Buf>(
        &mut self,
        command: ScsiBbbCommand<'_, 'alloc, Bus, Buf>,
        sense: Sense,
    ) where
        Bus: UsbBus + 'alloc,
        Buf: BorrowMut<[u8]>,
    {
        self.transfer = None;
        self.sense = sense;
        command.fail();
    }

    fn inquiry_data(&self) -> [u8; INQUIRY_LEN] {
        let info = self.device.info();
        let mut data = [b' '; INQUIRY_LEN];
        data[0] = 0x00; // direct access block device
        data[1] = 0x80; // removable
        data[2] = 0x04; // SPC-2
        data[3] = 0x02; // response data format
        data[4] = (INQUIRY_LEN - 5) as u8;
        data[5..8].fill(0);
        copy_padded(&mut data[8..16], info.vendor);
        copy_padded(&mut data[16..32], info.product);
        copy_padded(&mut data[32..36], info.revision);
        data
    }

    fn sense_data(&self) -> [u8; SENSE_LEN] {
        let mut data = [0u8; SENSE_LEN];
        data[0] = 0x70; // current errors, fixed format
        data[2] = self.sense.key & 0x0F;
        data[7] = (SENSE_LEN - 8) as u8;
        data[12] = self.sense.asc;
        data[13] = self.sense.ascq;
        data
    }
}

fn respond<'alloc, Bus, Buf>(
    mut command: ScsiBbbCommand<'_, 'alloc, Bus, Buf>,
    data: &[u8],
) -> TransportResult
where
    Bus: UsbBus + 'alloc,
    Buf: BorrowMut<[u8]>,
{
    command.try_write_data_all(data)?;
    command.pass();
    Ok(())
}

/// Copies ASCII `src` into `dst`, truncated. The rest of `dst` is left as is.
fn copy_padded(dst: &mut [u8], src: &str) {
    let len = dst.len().min(src.len());
    dst[..len].copy_from_slice(&src.as_bytes()[..len]);
}
