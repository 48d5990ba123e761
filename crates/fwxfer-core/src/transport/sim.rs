//! In-memory SPI flash behind a simulated bridge.
//!
//! Speaks the bridge command set from [`crate::protocol::bridge`] with NOR
//! semantics: programming can only clear bits, erase sets a whole sector to
//! 0xFF and leaves the device busy for a configurable number of status
//! polls.

use std::time::Duration;

use tracing::{debug, trace};

use super::traits::{Transport, TransportError};
use crate::field::{self, Endian};
use crate::protocol::bridge::{BridgeIdentity, build_identify};
use crate::protocol::constants::*;

/// Fault injection knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Status polls answered busy after each erase. `u32::MAX` never
    /// becomes ready.
    pub busy_polls: u32,
    /// Flip a bit when programming this address.
    pub corrupt_write_at: Option<u64>,
    /// Byte at this address survives erase.
    pub stuck_erase_at: Option<u64>,
    /// Return this write-status code for the write starting at the address.
    pub write_status_at: Option<(u64, u8)>,
}

/// Counters for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    pub transactions: usize,
    pub reads: usize,
    pub writes: usize,
    pub erases: usize,
    pub status_polls: usize,
    pub set_offsets: usize,
    pub resets: usize,
}

#[derive(Debug, Clone)]
pub struct FlashSimulator {
    memory: Vec<u8>,
    identity: Vec<u8>,
    sector_size: usize,
    window: u64,
    write_enabled: bool,
    busy_remaining: u32,
    last_result: u8,
    connected: bool,
    faults: SimFaults,
    stats: SimStats,
}

impl FlashSimulator {
    /// Blank (all 0xFF) flash of `flash_size` bytes.
    pub fn new(flash_size: usize, sector_size: usize) -> Self {
        let id = BridgeIdentity {
            vendor_id: 0x05E3,
            product_id: 0x0610,
            flash_size: flash_size as u32,
            sector_size: sector_size as u32,
            page_size: 0x100,
            model: "SIM-FLASH".into(),
            version: "1.00".into(),
        };
        Self {
            memory: vec![0xFF; flash_size],
            // fixed-size buffer writes never fail
            identity: build_identify(&id).unwrap_or_default(),
            sector_size: sector_size.max(1),
            window: 0,
            write_enabled: false,
            busy_remaining: 0,
            last_result: 0,
            connected: true,
            faults: SimFaults::default(),
            stats: SimStats::default(),
        }
    }

    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Fill flash with a pattern, e.g. a previously installed image.
    pub fn fill(&mut self, byte: u8) {
        self.memory.fill(byte);
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    fn ok(detail: u8) -> Vec<u8> {
        vec![BRIDGE_STATUS_IDLE_SUCCESS, detail]
    }

    fn fail(detail: u8) -> Vec<u8> {
        vec![BRIDGE_STATUS_IDLE_FAILURE, detail]
    }

    fn span(&self, offset: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(self.window + u64::from(offset)).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.memory.len()).then_some(start..end)
    }

    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        if request.len() < BRIDGE_FRAME_LEN {
            return Self::fail(0xEE);
        }
        let (op, sub) = (request[0], request[1]);
        let (Ok(addr), Ok(len)) = (
            field::read_u32(request, 2, Endian::Big),
            field::read_u16(request, 6, Endian::Big),
        ) else {
            return Self::fail(0xEE);
        };
        let payload = &request[BRIDGE_FRAME_LEN..];

        if self.busy_remaining > 0 && !(op == BRIDGE_OP_CONTROL && sub == BRIDGE_SUB_READ_STATUS) {
            return vec![BRIDGE_STATUS_BUSY, 0];
        }

        match (op, sub) {
            (BRIDGE_OP_GET_VERSION, _) => {
                let mut reply = Self::ok(0);
                reply.extend_from_slice(&self.identity);
                reply
            }
            (BRIDGE_OP_READ, BRIDGE_SUB_FLASH) => {
                self.stats.reads += 1;
                match self.span(addr, usize::from(len)) {
                    Some(range) => {
                        let mut reply = Self::ok(0);
                        reply.extend_from_slice(&self.memory[range]);
                        reply
                    }
                    None => Self::fail(0x02),
                }
            }
            (BRIDGE_OP_WRITE, BRIDGE_SUB_FLASH) => self.program(addr, payload),
            (BRIDGE_OP_CONTROL, BRIDGE_SUB_WRITE_ENABLE) => {
                self.write_enabled = true;
                Self::ok(0)
            }
            (BRIDGE_OP_CONTROL, BRIDGE_SUB_WRITE_DISABLE) => {
                self.write_enabled = false;
                Self::ok(0)
            }
            (BRIDGE_OP_CONTROL, BRIDGE_SUB_SET_OFFSET) => {
                self.stats.set_offsets += 1;
                self.window = u64::from(addr);
                Self::ok(0)
            }
            (BRIDGE_OP_CONTROL, BRIDGE_SUB_SECTOR_ERASE) => self.erase(addr),
            (BRIDGE_OP_CONTROL, BRIDGE_SUB_READ_STATUS) => {
                self.stats.status_polls += 1;
                if self.busy_remaining > 0 {
                    if self.busy_remaining != u32::MAX {
                        self.busy_remaining -= 1;
                    }
                    vec![BRIDGE_STATUS_BUSY, 0]
                } else {
                    Self::ok(self.last_result)
                }
            }
            (BRIDGE_OP_RESET, _) => {
                self.stats.resets += 1;
                self.window = 0;
                self.write_enabled = false;
                Vec::new()
            }
            _ => Self::fail(0xEF),
        }
    }

    fn program(&mut self, offset: u32, data: &[u8]) -> Vec<u8> {
        self.stats.writes += 1;
        if !self.write_enabled {
            return Self::fail(0x01);
        }
        self.write_enabled = false;
        let Some(range) = self.span(offset, data.len()) else {
            return Self::fail(0x02);
        };
        let start = range.start as u64;
        for (cell, &byte) in self.memory[range].iter_mut().zip(data) {
            *cell &= byte;
        }
        if let Some(bad) = self.faults.corrupt_write_at
            && bad >= start
            && bad < start + data.len() as u64
        {
            self.memory[bad as usize] ^= 0x01;
        }
        let code = match self.faults.write_status_at {
            Some((at, code)) if at == start => code,
            _ => 0x00,
        };
        self.last_result = code;
        Self::ok(code)
    }

    fn erase(&mut self, offset: u32) -> Vec<u8> {
        self.stats.erases += 1;
        if !self.write_enabled {
            return Self::fail(0x01);
        }
        self.write_enabled = false;
        let Some(range) = self.span(offset, 1) else {
            return Self::fail(0x02);
        };
        let start = range.start - range.start % self.sector_size;
        let end = (start + self.sector_size).min(self.memory.len());
        self.memory[start..end].fill(0xFF);
        if let Some(stuck) = self.faults.stuck_erase_at
            && (start as u64..end as u64).contains(&stuck)
        {
            self.memory[stuck as usize] = 0x00;
        }
        debug!(start = %format!("0x{:X}", start), "Simulated sector erase");
        self.busy_remaining = self.faults.busy_polls;
        self.last_result = 0;
        Self::ok(0)
    }
}

impl Transport for FlashSimulator {
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }
        self.stats.transactions += 1;
        let reply = self.handle(request);
        trace!(
            op = request.first().copied().unwrap_or(0),
            reply_len = reply.len(),
            "Simulated transaction"
        );
        if expected_reply_len == 0 {
            return Ok(Vec::new());
        }
        if reply.is_empty() {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(reply)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        format!("simulated flash ({} KiB)", self.memory.len() / 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::bridge::{self, BridgeConfig};
    use crate::protocol::{CommandEngine, DeviceClass, PollPolicy, WriteStatus};

    fn with_engine<R>(
        sim: &mut FlashSimulator,
        f: impl FnOnce(&mut CommandEngine<'_, FlashSimulator>) -> R,
    ) -> R {
        let class = DeviceClass::SpiBridge(BridgeConfig::default());
        let poll = PollPolicy::new(5, Duration::ZERO);
        let mut engine = CommandEngine::new(sim, &class, Duration::from_millis(10), poll);
        f(&mut engine)
    }

    #[test]
    fn test_program_and_read_back() {
        let mut sim = FlashSimulator::new(0x2_0000, 0x1000);
        with_engine(&mut sim, |engine| {
            assert_eq!(engine.write_chunk(0x1_0010, &[1, 2, 3]).unwrap(), WriteStatus::Continue);
            assert_eq!(engine.read(0x1_0010, 3).unwrap(), vec![1, 2, 3]);
        });
        assert_eq!(&sim.memory()[0x1_0010..0x1_0013], &[1, 2, 3]);
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut sim = FlashSimulator::new(0x1000, 0x1000);
        with_engine(&mut sim, |engine| {
            engine.write_chunk(0, &[0xF0]).unwrap();
            engine.write_chunk(0, &[0x0F]).unwrap();
        });
        assert_eq!(sim.memory()[0], 0x00);
    }

    #[test]
    fn test_erase_polls_until_ready() {
        let mut sim = FlashSimulator::new(0x2000, 0x1000).with_faults(SimFaults {
            busy_polls: 2,
            ..Default::default()
        });
        sim.fill(0x00);
        with_engine(&mut sim, |engine| engine.erase(0x1000).unwrap());
        assert!(sim.memory()[0x1000..].iter().all(|&b| b == 0xFF));
        assert!(sim.memory()[..0x1000].iter().all(|&b| b == 0x00));
        assert_eq!(sim.stats().status_polls, 3);
    }

    #[test]
    fn test_write_without_enable_fails() {
        let mut sim = FlashSimulator::new(0x1000, 0x1000);
        let tx = bridge::encode_write(0, &[0xAA]).unwrap();
        let reply = sim.transact(&tx.payload, tx.reply_len, Duration::ZERO).unwrap();
        assert_eq!(reply, vec![BRIDGE_STATUS_IDLE_FAILURE, 0x01]);
    }

    #[test]
    fn test_identify_block() {
        let mut sim = FlashSimulator::new(0x4_0000, 0x1000);
        let identity = with_engine(&mut sim, |engine| engine.identify().unwrap());
        assert_eq!(identity.flash_size, Some(0x4_0000));
        assert_eq!(identity.erase_block_size, Some(0x1000));
        assert_eq!(identity.firmware_version.as_deref(), Some("1.00"));
    }
}
