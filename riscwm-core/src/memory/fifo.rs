use super::device::MemoryDevice;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Byte FIFO connecting guest software to a host component.
///
/// Register layout (offsets from the start address):
///
/// | offset | read                              | write                        |
/// |--------|-----------------------------------|------------------------------|
/// | `0`    | next byte of the read buffer or 0 | append to the write buffer   |
/// | `1`    | `1` if a byte can be read         | ignored                      |
/// | `2`    | the `write_ready` flag            | `write_ready = value != 0`   |
///
/// Wider accesses behave like a byte access of their low byte. The host side is reached
/// through a [`FifoHandle`].
#[derive(Debug)]
pub struct BasicFifo {
    start: u32,
    state: Arc<Mutex<FifoState>>,
}

#[derive(Debug, Default)]
struct FifoState {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    write_ready: bool,
}

/// Host-side handle to a [`BasicFifo`].
#[derive(Debug, Clone)]
pub struct FifoHandle {
    state: Arc<Mutex<FifoState>>,
}

impl FifoHandle {
    /// Replaces the bytes the guest will read next.
    pub fn set_read_buffer(&self, bytes: &[u8]) {
        lock(&self.state).read_buffer = bytes.iter().copied().collect();
    }

    /// If the guest has marked its message as ready, returns it and clears both the write buffer
    /// and the ready flag.
    pub fn write_buffer_if_ready(&self) -> Option<Vec<u8>> {
        let mut state = lock(&self.state);
        if !state.write_ready {
            return None;
        }
        state.write_ready = false;
        Some(std::mem::take(&mut state.write_buffer))
    }
}

fn lock(state: &Mutex<FifoState>) -> MutexGuard<'_, FifoState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BasicFifo {
    pub fn new(start: u32) -> Self {
        Self {
            start,
            state: Arc::new(Mutex::new(FifoState::default())),
        }
    }

    /// Returns a new handle for the host side of this FIFO.
    pub fn handle(&self) -> FifoHandle {
        FifoHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MemoryDevice for BasicFifo {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        3
    }

    fn name(&self) -> &str {
        "component_fifo"
    }

    fn description(&self) -> &str {
        "Component interface FIFO"
    }

    fn read8(&mut self, address: u32) -> u8 {
        let mut state = lock(&self.state);
        match address.wrapping_sub(self.start) {
            0 => state.read_buffer.pop_front().unwrap_or(0),
            1 => u8::from(!state.read_buffer.is_empty()),
            2 => u8::from(state.write_ready),
            _ => 0,
        }
    }

    fn write8(&mut self, address: u32, value: u8) {
        let mut state = lock(&self.state);
        match address.wrapping_sub(self.start) {
            0 => state.write_buffer.push(value),
            2 => state.write_ready = value != 0,
            _ => {}
        }
    }

    fn read16(&mut self, address: u32) -> u16 {
        self.read8(address) as u16
    }

    fn read32(&mut self, address: u32) -> u32 {
        self.read8(address) as u32
    }

    fn read64(&mut self, address: u32) -> u64 {
        self.read8(address) as u64
    }

    fn write16(&mut self, address: u32, value: u16) {
        self.write8(address, value as u8);
    }

    fn write32(&mut self, address: u32, value: u32) {
        self.write8(address, value as u8);
    }

    fn write64(&mut self, address: u32, value: u64) {
        self.write8(address, value as u8);
    }
}
