use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use log::{debug, info, warn};
use riscwm_core::memory::{BasicFifo, FifoHandle, FifoPrint, Ram, RamSizeDevice, Rom};
use riscwm_core::vm::{self, InterpretResult, Vm};
use std::error::Error;
use std::fs;
use std::ops::Range;
use std::time::Instant;

const PRINT_FIFO_BASE: u32 = 0x1000_0000;
const COMPONENT_FIFO_BASE: u32 = 0x1000_1000;
const PANIC_FIFO_BASE: u32 = 0x1000_2000;

/// Number of cycles per hart between two polls of the host side FIFOs.
const POLL_INTERVAL: u64 = 1 << 20;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Flat firmware image, mapped read-only at the ROM base.
    firmware: Option<String>,
    /// ELF file whose loadable segments are placed in ROM and RAM instead of a flat image.
    #[arg(long, conflicts_with = "firmware")]
    elf: Option<String>,
    #[arg(long, default_value = "0x11000000", value_parser = parse_address)]
    rom_base: u32,
    #[arg(long, default_value = "0x80000000", value_parser = parse_address)]
    ram_base: u32,
    /// RAM size in bytes.
    #[arg(long, default_value_t = 8 << 20)]
    ram_size: u32,
    /// Number of cycles to run each hart for.
    #[arg(long, default_value_t = 64_000_000)]
    cycles: u64,
    /// Number of cycles between interrupt checks.
    #[arg(long, default_value_t = 16)]
    slice: u64,
    #[arg(long, default_value_t = 1)]
    harts: usize,
    /// Increase log verbosity (-v, -vv, ...).
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_address(s: &str) -> Result<u32, String> {
    let result = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse(),
    };
    result.map_err(|err| format!("invalid address `{s}`: {err}"))
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    stderrlog::new()
        .verbosity(1 + args.verbose as usize)
        .modules([module_path!(), "riscwm_core"])
        .init()?;

    let (rom_image, ram_segments, entry) = match (&args.firmware, &args.elf) {
        (_, Some(path)) => load_elf(&fs::read(path)?, args.rom_base..args.ram_base)?,
        (Some(path), None) => (fs::read(path)?, Vec::new(), args.rom_base),
        (None, None) => (Vec::new(), Vec::new(), args.rom_base),
    };

    let mut vm = Vm::new(vm::Config {
        harts: args.harts,
        slice_cycles: args.slice,
        reset_vector: entry,
        halt_on_ebreak: true,
    })?;

    let ram = Ram::new(args.ram_base, args.ram_size)
        .ok_or("RAM does not fit the address space")?;
    let ram_size = RamSizeDevice::new(&ram);
    let component_fifo = BasicFifo::new(COMPONENT_FIFO_BASE);
    let component_handle = component_fifo.handle();
    let panic_fifo = BasicFifo::new(PANIC_FIFO_BASE);
    let panic_handle = panic_fifo.handle();

    vm.add_device(Box::new(FifoPrint::new(PRINT_FIFO_BASE)))?;
    vm.add_device(Box::new(component_fifo))?;
    vm.add_device(Box::new(panic_fifo))?;
    if !rom_image.is_empty() {
        let rom = Rom::new(args.rom_base, rom_image)
            .ok_or("ROM does not fit the address space")?;
        vm.add_device(Box::new(rom))?;
    }
    vm.add_device(Box::new(ram))?;
    vm.add_device(Box::new(ram_size))?;

    for (address, bytes) in ram_segments {
        debug!("Loading {} bytes at {address:#010x}", bytes.len());
        vm.load(address, &bytes)?;
    }

    run(&mut vm, args.cycles, &component_handle, &panic_handle);
    Ok(())
}

/// Runs `cycles` cycles, stopping early on a breakpoint or a guest panic message.
fn run(vm: &mut Vm, cycles: u64, component: &FifoHandle, panic: &FifoHandle) {
    let start = Instant::now();
    let mut remaining = cycles;
    while remaining > 0 {
        let chunk = remaining.min(POLL_INTERVAL);
        remaining -= chunk;
        let result = vm.interpret(chunk);

        if let Some(bytes) = component.write_buffer_if_ready() {
            debug!("Component call of {} bytes", bytes.len());
        }
        if let Some(message) = panic.write_buffer_if_ready() {
            warn!("Guest panicked: {}", String::from_utf8_lossy(&message));
            break;
        }
        if let InterpretResult::Break { hart_id } = result {
            info!("Hart {hart_id} hit a breakpoint");
            break;
        }
    }

    let elapsed = start.elapsed();
    let executed = vm.executed_cycles() * vm.harts().len() as u64;
    let ips = executed as f64 / elapsed.as_secs_f64();
    info!("Executed {executed} instructions in {elapsed:?}");
    println!(
        "{executed} instructions in {:.3} s: {ips:.0} IPS ({:.2} MIPS)",
        elapsed.as_secs_f64(),
        ips / 1e6
    );
}

type LoadedImage = (Vec<u8>, Vec<(u32, Vec<u8>)>, u32);

/// Splits the loadable segments of an ELF file into a ROM image covering the read-only segments
/// in `rom`, and segments to be written to memory. Returns both and the entry point.
fn load_elf(bytes: &[u8], rom: Range<u32>) -> Result<LoadedImage, goblin::error::Error> {
    let elf = goblin::elf::Elf::parse(bytes)?;
    let mut rom_image = Vec::new();
    let mut segments = Vec::new();
    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
        let address = header.p_paddr as u32;
        let mut data = bytes
            .get(header.file_range())
            .ok_or_else(|| {
                goblin::error::Error::Malformed(format!(
                    "segment at {address:#010x} lies outside the file"
                ))
            })?
            .to_vec();
        // The part not backed by the file is zero filled
        data.resize(header.p_memsz as usize, 0);
        debug!("ELF segment at {address:#010x} with {} bytes", data.len());
        if rom.contains(&address) && !header.is_write() {
            let offset = (address - rom.start) as usize;
            let end = offset + data.len();
            if rom_image.len() < end {
                rom_image.resize(end, 0);
            }
            rom_image[offset..end].copy_from_slice(&data);
        } else {
            segments.push((address, data));
        }
    }
    Ok((rom_image, segments, elf.entry as u32))
}
