use super::device::MemoryDevice;
use log::warn;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Debug print FIFO: a single byte register that prints every value written to it.
///
/// An 8-bit write emits the raw byte, so UTF-8 encoded text can be written byte by byte. Wider
/// writes emit the character whose code point is the low 16 bits of the value. Reads return `0`.
pub struct FifoPrint {
    start: u32,
    sink: Box<dyn Write + Send>,
}

impl fmt::Debug for FifoPrint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoPrint")
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}

impl FifoPrint {
    /// Create a print device at `start` that writes to stdout.
    pub fn new(start: u32) -> Self {
        Self::with_sink(start, Box::new(io::stdout()))
    }

    /// Create a print device at `start` that writes to `sink`.
    pub fn with_sink(start: u32, sink: Box<dyn Write + Send>) -> Self {
        Self { start, sink }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if let Err(err) = self.sink.write_all(bytes).and_then(|()| self.sink.flush()) {
            warn!("Debug print FIFO failed to write to its sink: {err}");
        }
    }

    fn emit_char(&mut self, address: u32, value: u64) {
        if address != self.start {
            return;
        }
        let c = char::from_u32((value & 0xFFFF) as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut buf = [0; 4];
        self.emit(c.encode_utf8(&mut buf).as_bytes());
    }
}

impl MemoryDevice for FifoPrint {
    fn start(&self) -> u32 {
        self.start
    }

    fn length(&self) -> u32 {
        1
    }

    fn name(&self) -> &str {
        "debug_fifo"
    }

    fn description(&self) -> &str {
        "Debug print FIFO"
    }

    fn read8(&mut self, _address: u32) -> u8 {
        0
    }

    fn write8(&mut self, address: u32, value: u8) {
        if address == self.start {
            self.emit(&[value]);
        }
    }

    fn read16(&mut self, _address: u32) -> u16 {
        0
    }

    fn read32(&mut self, _address: u32) -> u32 {
        0
    }

    fn read64(&mut self, _address: u32) -> u64 {
        0
    }

    fn write16(&mut self, address: u32, value: u16) {
        self.emit_char(address, value as u64);
    }

    fn write32(&mut self, address: u32, value: u32) {
        self.emit_char(address, value as u64);
    }

    fn write64(&mut self, address: u32, value: u64) {
        self.emit_char(address, value);
    }
}

/// A [`Write`] sink that collects everything written to it, for hosts that want to capture the
/// output of a print device instead of forwarding it to stdout.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink(Arc<Mutex<Vec<u8>>>);

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns everything written so far, decoded lossily as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for CaptureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prints_any_width() {
        let sink = CaptureSink::new();
        let mut print = FifoPrint::with_sink(0x1000_0000, Box::new(sink.clone()));
        print.write8(0x1000_0000, b'A');
        print.write16(0x1000_0000, b'b' as u16);
        print.write32(0x1000_0000, 0xE9);
        print.write64(0x1000_0000, b'!' as u64);
        assert_eq!("Abé!", sink.text());
        assert_eq!(0, print.read32(0x1000_0000));
    }
}
