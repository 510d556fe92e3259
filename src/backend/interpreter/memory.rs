//! The interpreter's flat address space.
//!
//! Only the stack region is backed by memory. Code addresses name
//! instructions and can be called or compared but never read, and the heap
//! region is reserved but unmapped.

use tracing::trace;

use super::Fault;

pub const LOWEST_VALID_ADDRESS: u64 = 0x1000;
pub const CODE_BASE: u64 = 0x10_0000;
pub const STACK_BASE: u64 = 0x1000_0000;
pub const HEAP_BASE: u64 = 0x4000_0000;

#[derive(Debug)]
pub struct Stack {
    bytes: Vec<u8>,
    /// End of the active frame, in bytes from `STACK_BASE`
    extent: usize,
}

impl Stack {
    pub fn new(initial_size: usize) -> Self {
        Self {
            bytes: vec![0; initial_size.max(8)],
            extent: 0,
        }
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Moves the end of the active frame, doubling the backing buffer until
    /// it fits
    pub fn set_extent(&mut self, extent: usize) {
        if extent > self.bytes.len() {
            let mut size = self.bytes.len();

            while size < extent {
                size *= 2;
            }

            trace!(from = self.bytes.len(), to = size, "growing stack");
            self.bytes.resize(size, 0);
        }

        self.extent = extent;
    }

    pub fn address_of(offset: usize) -> u64 {
        STACK_BASE + offset as u64
    }

    /// Maps `size` bytes at `address` to an offset into the stack buffer
    pub fn translate(&self, address: u64, size: u64) -> Result<usize, Fault> {
        if address < LOWEST_VALID_ADDRESS {
            return Err(Fault::InvalidAddress { address });
        }

        if (CODE_BASE..STACK_BASE).contains(&address) {
            return Err(Fault::CodeAccess { address });
        }

        if address < CODE_BASE || address >= HEAP_BASE {
            return Err(Fault::Unmapped { address });
        }

        let offset = address - STACK_BASE;

        if offset + size > self.extent as u64 {
            return Err(Fault::OutOfFrame { address });
        }

        Ok(offset as usize)
    }

    /// Reads `width` bytes, little endian and zero extended
    pub fn read(&self, address: u64, width: u8) -> Result<u64, Fault> {
        let offset = self.translate(address, u64::from(width))?;

        Ok(self.read_at(offset, width))
    }

    pub fn write(&mut self, address: u64, width: u8, value: u64) -> Result<(), Fault> {
        let offset = self.translate(address, u64::from(width))?;
        self.write_at(offset, width, value);

        Ok(())
    }

    pub fn copy(&mut self, destination: u64, source: u64, size: u64) -> Result<(), Fault> {
        let destination = self.translate(destination, size)?;
        let source = self.translate(source, size)?;

        self.bytes
            .copy_within(source..source + size as usize, destination);

        Ok(())
    }

    fn read_at(&self, offset: usize, width: u8) -> u64 {
        let mut bytes = [0; 8];
        let width = usize::from(width.min(8));

        bytes[..width].copy_from_slice(&self.bytes[offset..offset + width]);
        u64::from_le_bytes(bytes)
    }

    fn write_at(&mut self, offset: usize, width: u8, value: u64) {
        let width = usize::from(width.min(8));

        self.bytes[offset..offset + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    /// A register slot. Register windows always lie inside the extent.
    pub fn slot(&self, offset: usize) -> u64 {
        self.read_at(offset, 8)
    }

    pub fn set_slot(&mut self, offset: usize, value: u64) {
        self.write_at(offset, 8, value);
    }

    pub fn fill(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn zero(&mut self, offset: usize, size: usize) {
        self.bytes[offset..offset + size].fill(0);
    }
}
