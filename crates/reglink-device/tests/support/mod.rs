#![allow(dead_code)] // each test binary uses a different slice of this module

//! In-memory register space standing in for real hardware.
//!
//! `FakeLink` decodes control requests, applies them to a register map,
//! and queues encoded replies, with just enough behavioral modeling of
//! the bus cores (completion bits, data-buffer ingress) for controller
//! transactions to run end to end.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;

use reglink_device::regmap::{I2C_DONE, I2C_START, SPI_START};
use reglink_device::Metadata;
use reglink_session::ControlLink;
use reglink_wire::{ControlReply, ControlRequest, ReadPayload, ResponseCode, RD_DWORD, WR_DWORD};

/// One decoded request, as the fake device saw it.
#[derive(Debug, Clone, Copy)]
pub struct SeenRequest {
    pub sequence: u16,
    pub cmd_code: u8,
    pub address: u32,
}

#[derive(Default)]
pub struct FakeState {
    pub registers: HashMap<u32, u32>,
    /// Every write applied, in order.
    pub writes: Vec<(u32, u32)>,
    /// Every address read, in order.
    pub reads: Vec<u32>,
    /// Every request received, including ones that got no reply.
    pub requests: Vec<SeenRequest>,
    /// Writes to these addresses are applied but never acknowledged.
    pub silent_addresses: HashSet<u32>,
    /// I2C controller bank to model, if any.
    pub i2c_base: Option<u32>,
    /// Bytes the modeled I2C read phase returns.
    pub i2c_ingress: Vec<u8>,
    /// SPI controller bank to model, if any.
    pub spi_base: Option<u32>,
    /// Bytes the modeled SPI read phase returns.
    pub spi_ingress: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl FakeState {
    fn read_register(&self, address: u32) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn apply_write(&mut self, address: u32, value: u32) {
        self.writes.push((address, value));

        if Some(address) == self.i2c_base && value & I2C_START != 0 {
            // transaction completes instantly: clear START, raise DONE,
            // land the ingress bytes in the data buffer
            self.registers.insert(address, (value & !I2C_START) | I2C_DONE);
            let ingress = self.i2c_ingress.clone();
            self.load_buffer(address + 16, 0, &ingress);
            return;
        }
        if Some(address) == self.spi_base && value & SPI_START != 0 {
            // append the read-phase bytes after the written ones and
            // report the core idle again
            self.registers.insert(address, 0);
            let write_byte_count = self.read_register(address + 4) & 0xFFFF;
            let ingress = self.spi_ingress.clone();
            self.load_buffer(address + 16, write_byte_count as usize, &ingress);
            return;
        }
        self.registers.insert(address, value);
    }

    /// Place `bytes` into the word-wide data buffer starting at byte
    /// `offset`, preserving earlier bytes in partially overwritten words.
    fn load_buffer(&mut self, buffer_base: u32, offset: usize, bytes: &[u8]) {
        for (index, byte) in bytes.iter().enumerate() {
            let position = offset + index;
            let register = buffer_base + (position as u32 / 4) * 4;
            let shift = (position % 4) * 8;
            let word = self.read_register(register) & !(0xFF << shift);
            self.registers.insert(register, word | (u32::from(*byte) << shift));
        }
    }

    fn handle(&mut self, request: &ControlRequest) {
        let (cmd_code, reply) = match *request {
            ControlRequest::ReadDword {
                sequence, address, ..
            } => {
                self.reads.push(address);
                let value = self.read_register(address);
                (
                    RD_DWORD,
                    ControlReply {
                        cmd_code: RD_DWORD,
                        flags: 0,
                        sequence,
                        response_code: ResponseCode::Success,
                        payload: Some(ReadPayload {
                            address,
                            value,
                            latched_sequence: sequence,
                        }),
                    },
                )
            }
            ControlRequest::WriteDword {
                sequence,
                address,
                value,
                ..
            } => {
                self.apply_write(address, value);
                (
                    WR_DWORD,
                    ControlReply {
                        cmd_code: WR_DWORD,
                        flags: 0,
                        sequence,
                        response_code: ResponseCode::Success,
                        payload: None,
                    },
                )
            }
        };
        self.requests.push(SeenRequest {
            sequence: request.sequence(),
            cmd_code,
            address: request.address(),
        });
        if cmd_code == WR_DWORD && self.silent_addresses.contains(&request.address()) {
            return;
        }
        let mut frame = BytesMut::new();
        reply.encode(&mut frame);
        self.pending.push_back(frame.to_vec());
    }
}

pub struct FakeLink {
    state: Arc<Mutex<FakeState>>,
}

impl ControlLink for FakeLink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let request = ControlRequest::decode(datagram)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        self.state.lock().unwrap().handle(&request);
        Ok(())
    }

    fn recv(&mut self, window: Duration) -> io::Result<Option<Vec<u8>>> {
        let reply = self.state.lock().unwrap().pending.pop_front();
        if reply.is_none() {
            thread::sleep(window.min(Duration::from_millis(5)));
        }
        Ok(reply)
    }
}

pub fn fake_state() -> Arc<Mutex<FakeState>> {
    Arc::new(Mutex::new(FakeState::default()))
}

pub fn fake_link(state: &Arc<Mutex<FakeState>>) -> Box<FakeLink> {
    Box::new(FakeLink {
        state: Arc::clone(state),
    })
}

pub fn metadata(serial_number: &str, board_id: Option<u32>) -> Metadata {
    Metadata {
        serial_number: Some(serial_number.to_string()),
        peer_ip: Some("192.168.0.2".to_string()),
        control_port: Some(8192),
        sequence_number_checking: Some(false),
        board_id,
        ..Metadata::default()
    }
}
