//! A USB bus double playing the host side of Bulk Only Transport

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use usb_device::bus::{PollResult, UsbBus};
use usb_device::class_prelude::{EndpointAddress, EndpointType};
use usb_device::{UsbDirection, UsbError};

const CBW_SIGNATURE: u32 = 0x43425355;
const CSW_LEN: usize = 13;
const MAX_CB_LEN: usize = 16;

const EP_CONTROL: u8 = 0x00;
const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x81;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CommandStatus {
    Passed,
    Failed,
    PhaseError,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataDirection {
    /// Host to device
    Out,
    /// Device to host
    In,
    NotExpected,
}

/// Command Block Wrapper sent by the host
pub struct Cbw {
    pub tag: u32,
    pub data_transfer_len: u32,
    pub direction: DataDirection,
    pub block: Vec<u8>,
}

impl Cbw {
    pub fn new(direction: DataDirection, data_transfer_len: u32, block: Vec<u8>) -> Self {
        Self {
            tag: 0x0BAD_CAFE,
            data_transfer_len,
            direction,
            block,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        assert!((1..=MAX_CB_LEN).contains(&self.block.len()));

        let flags = match self.direction {
            DataDirection::In => 0x80,
            DataDirection::Out | DataDirection::NotExpected => 0x00,
        };

        let mut bytes = Vec::with_capacity(15 + MAX_CB_LEN);
        bytes.extend_from_slice(&CBW_SIGNATURE.to_le_bytes());
        bytes.extend_from_slice(&self.tag.to_le_bytes());
        bytes.extend_from_slice(&self.data_transfer_len.to_le_bytes());
        bytes.push(flags);
        bytes.push(0); // lun
        bytes.push(self.block.len() as u8);
        bytes.extend_from_slice(&self.block);
        bytes.resize(15 + MAX_CB_LEN, 0);
        bytes
    }
}

/// Command Status Wrapper received by the host
#[derive(Debug, Eq, PartialEq)]
pub struct Csw {
    pub residue: u32,
    pub status: CommandStatus,
}

impl Csw {
    pub fn parse(bytes: &[u8]) -> Self {
        assert_eq!(CSW_LEN, bytes.len());
        assert_eq!(0x53425355u32.to_le_bytes(), bytes[..4]);

        let status = match bytes[12] {
            0x00 => CommandStatus::Passed,
            0x01 => CommandStatus::Failed,
            0x02 => CommandStatus::PhaseError,
            other => panic!("invalid status code {other:#x}"),
        };
        Self {
            residue: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            status,
        }
    }
}

/// Command descriptor blocks
pub mod cdb {
    pub fn test_unit_ready() -> Vec<u8> {
        vec![0x00, 0, 0, 0, 0, 0]
    }

    pub fn request_sense(alloc_len: u8) -> Vec<u8> {
        vec![0x03, 0, 0, 0, alloc_len, 0]
    }

    pub fn inquiry(alloc_len: u16) -> Vec<u8> {
        let [hi, lo] = alloc_len.to_be_bytes();
        vec![0x12, 0, 0, hi, lo, 0]
    }

    pub fn read_capacity10() -> Vec<u8> {
        vec![0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    }

    pub fn read10(lba: u32, blocks: u16) -> Vec<u8> {
        rw10(0x28, lba, blocks)
    }

    pub fn write10(lba: u32, blocks: u16) -> Vec<u8> {
        rw10(0x2A, lba, blocks)
    }

    /// An opcode the device does not implement (SYNCHRONIZE CACHE)
    pub fn unsupported() -> Vec<u8> {
        vec![0x35, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    }

    fn rw10(opcode: u8, lba: u32, blocks: u16) -> Vec<u8> {
        let mut cb = vec![opcode, 0];
        cb.extend_from_slice(&lba.to_be_bytes());
        cb.push(0);
        cb.extend_from_slice(&blocks.to_be_bytes());
        cb.push(0);
        cb
    }
}

struct Endpoint {
    addr: EndpointAddress,
    max_packet_size: u16,
    stalled: bool,
    packets: VecDeque<Vec<u8>>,
}

impl Endpoint {
    fn new(addr: u8, max_packet_size: u16) -> Self {
        Self {
            addr: EndpointAddress::from(addr),
            max_packet_size,
            stalled: false,
            packets: VecDeque::new(),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.packets
            .extend(bytes.chunks(self.max_packet_size as usize).map(<[u8]>::to_vec));
    }
}

#[derive(Default)]
struct Endpoints {
    enabled: bool,
    bulk_in: Option<Endpoint>,
    bulk_out: Option<Endpoint>,
}

/// Device side bus handed to `UsbBusAllocator`; clones share the endpoints with the host side
#[derive(Clone, Default)]
pub struct DummyUsbBus {
    eps: Arc<Mutex<Endpoints>>,
}

impl DummyUsbBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a CBW, as the host would
    pub fn send_command(&self, cbw: &Cbw) {
        self.send_data(&cbw.to_bytes());
    }

    /// Sends OUT data, as the host would
    pub fn send_data(&self, data: &[u8]) {
        let mut eps = self.eps.lock().unwrap();
        eps.bulk_out.as_mut().expect("OUT endpoint").push(data);
    }

    /// Receives up to `len` IN bytes, packet by packet
    pub fn receive(&self, len: usize) -> Vec<u8> {
        let mut eps = self.eps.lock().unwrap();
        let ep = eps.bulk_in.as_mut().expect("IN endpoint");

        let mut bytes = vec![];
        while bytes.len() < len {
            match ep.packets.pop_front() {
                Some(packet) => bytes.extend_from_slice(&packet),
                None => break,
            }
        }
        bytes
    }

    /// Receives the CSW. `None` if the device has not sent it yet
    pub fn receive_status(&self) -> Option<Csw> {
        let bytes = self.receive(CSW_LEN);
        (bytes.len() == CSW_LEN).then(|| Csw::parse(&bytes))
    }

    pub fn in_stalled(&self) -> bool {
        let eps = self.eps.lock().unwrap();
        let stalled = eps.bulk_in.as_ref().is_some_and(|ep| ep.stalled);
        stalled
    }
}

impl UsbBus for DummyUsbBus {
    fn alloc_ep(
        &mut self,
        ep_dir: UsbDirection,
        _ep_addr: Option<EndpointAddress>,
        ep_type: EndpointType,
        max_packet_size: u16,
        _interval: u8,
    ) -> usb_device::Result<EndpointAddress> {
        let mut eps = self.eps.lock().unwrap();
        assert!(!eps.enabled);

        if matches!(ep_type, EndpointType::Control) {
            return Ok(EndpointAddress::from(EP_CONTROL));
        }

        let ep = match ep_dir {
            UsbDirection::Out => eps.bulk_out.insert(Endpoint::new(EP_OUT, max_packet_size)),
            UsbDirection::In => eps.bulk_in.insert(Endpoint::new(EP_IN, max_packet_size)),
        };
        Ok(ep.addr)
    }

    fn enable(&mut self) {
        self.eps.lock().unwrap().enabled = true;
    }

    fn reset(&self) {}

    fn set_device_address(&self, _addr: u8) {}

    fn write(&self, ep_addr: EndpointAddress, buf: &[u8]) -> usb_device::Result<usize> {
        let mut eps = self.eps.lock().unwrap();
        let ep = eps.bulk_in.as_mut().ok_or(UsbError::InvalidEndpoint)?;

        if ep.addr != ep_addr {
            return Err(UsbError::InvalidEndpoint);
        }
        if buf.len() > ep.max_packet_size as usize {
            return Err(UsbError::BufferOverflow);
        }

        ep.packets.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn read(&self, ep_addr: EndpointAddress, buf: &mut [u8]) -> usb_device::Result<usize> {
        let mut eps = self.eps.lock().unwrap();
        let ep = eps.bulk_out.as_mut().ok_or(UsbError::InvalidEndpoint)?;

        if ep.addr != ep_addr {
            return Err(UsbError::InvalidEndpoint);
        }

        match ep.packets.front() {
            None => Err(UsbError::WouldBlock),
            Some(packet) if packet.len() > buf.len() => Err(UsbError::BufferOverflow),
            Some(_) => {
                let packet = ep.packets.pop_front().unwrap();
                buf[..packet.len()].copy_from_slice(&packet);
                Ok(packet.len())
            }
        }
    }

    fn set_stalled(&self, ep_addr: EndpointAddress, stalled: bool) {
        let mut eps = self.eps.lock().unwrap();
        let Endpoints {
            bulk_in, bulk_out, ..
        } = &mut *eps;
        for ep in [bulk_in, bulk_out].into_iter().flatten() {
            if ep.addr == ep_addr {
                ep.stalled = stalled;
            }
        }
    }

    fn is_stalled(&self, ep_addr: EndpointAddress) -> bool {
        let eps = self.eps.lock().unwrap();
        let stalled = [&eps.bulk_in, &eps.bulk_out]
            .into_iter()
            .flatten()
            .any(|ep| ep.addr == ep_addr && ep.stalled);
        stalled
    }

    fn suspend(&self) {}

    fn resume(&self) {}

    fn poll(&self) -> PollResult {
        PollResult::None
    }
}
