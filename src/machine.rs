//! Composition root: wires `Cpu`, the memory and I/O buses, and the nine
//! peripheral models onto the fixed address/port layout (spec section 6)
//! and drives the single-threaded cooperative loop (spec section 5).

use crate::cpu::Cpu;
use crate::devices::dma::Dma;
use crate::devices::fdc::Fdc;
use crate::devices::ide::Ide;
use crate::devices::pic::Pic;
use crate::devices::pit::Pit;
use crate::devices::ppi::Ppi;
use crate::devices::rtc::Rtc;
use crate::devices::vga::{Vga, VgaPorts};
use crate::devices::{Clock, SystemClock};
use crate::error::{EmulatorError, Result};
use crate::io::{IoBus, IoDevice};
use crate::memory::{MemBus, MemoryDevice};
use log::info;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

const EXTENSION_ROM_BASE: usize = 0xe8000;
const BIOS_TOP: usize = 0x100000;
const VGA_WINDOW_SIZE: usize = 0x20000;
/// Segment the 0F-34 vector stubs are written into: low conventional RAM
/// just past the BIOS data area (0040:0000-0040:FF) and well below any
/// boot sector (0000:7C00) or BIOS ROM (which lives at the top of the
/// address space, not here).
const VECTOR_SEGMENT: u16 = 0x0060;

/// A host-registered callback invoked for `0F 34 <vec>`. Takes the
/// vector number and mutable access to CPU and memory state, mirroring
/// the signature `Cpu::step` already expects.
pub type VectorHandler = Box<dyn FnMut(u8, &mut Cpu, &mut MemBus)>;

/// Assembled at startup from CLI-level inputs; kept separate from
/// `Machine` itself so construction failures (bad paths, oversized
/// images) surface before any device state is touched.
pub struct Configuration {
    pub bios_path: String,
    pub bios_image: Vec<u8>,
    pub extension_rom: Option<Vec<u8>>,
    pub floppy_image: Option<Vec<u8>>,
    pub primary_disk: Option<Vec<u8>>,
    pub secondary_disk: Option<Vec<u8>>,
    pub headless: bool,
}

impl Configuration {
    /// Reads image files from disk, producing host-side failures (spec
    /// error kind 4) as `EmulatorError` rather than panicking.
    pub fn load(
        bios_path: &str,
        extension_rom_path: Option<&str>,
        floppy_path: Option<&str>,
        primary_disk_path: Option<&str>,
        secondary_disk_path: Option<&str>,
        headless: bool,
    ) -> Result<Configuration> {
        let bios_image = std::fs::read(bios_path).map_err(|source| EmulatorError::BiosNotFound {
            path: bios_path.to_string(),
            source,
        })?;
        if bios_image.len() > BIOS_TOP {
            return Err(EmulatorError::BiosTooLarge { path: bios_path.to_string(), size: bios_image.len() });
        }
        let read_image = |path: &str| -> Result<Vec<u8>> {
            std::fs::read(path).map_err(|source| EmulatorError::ImageNotFound { path: path.to_string(), source })
        };
        Ok(Configuration {
            bios_path: bios_path.to_string(),
            bios_image,
            extension_rom: extension_rom_path.map(read_image).transpose()?,
            floppy_image: floppy_path.map(read_image).transpose()?,
            primary_disk: primary_disk_path.map(read_image).transpose()?,
            secondary_disk: secondary_disk_path.map(read_image).transpose()?,
            headless,
        })
    }
}

/// How many CPU instructions elapse between VGA repaints (spec section 5:
/// "every ~N instructions refresh the VGA frame and pump host input
/// events"; input pumping itself is the host collaborator's job).
const FRAME_INSTRUCTIONS: u32 = 20_000;

/// The assembled machine: CPU plus both buses plus shared handles to the
/// peripherals a caller (or a future debugger/host shell) might want to
/// poke directly.
pub struct Machine {
    cpu: Cpu,
    bus: MemBus,
    io: IoBus,
    pic: Rc<RefCell<Pic>>,
    pit: Rc<RefCell<Pit>>,
    vga: Rc<RefCell<Vga>>,
    clock: Rc<dyn Clock>,
    vectors: HashMap<u8, VectorHandler>,
    instructions_since_refresh: u32,
}

impl Machine {
    pub fn new(config: Configuration) -> Result<Machine> {
        let mut bus = MemBus::new();
        let mut io = IoBus::new();

        let pic = Rc::new(RefCell::new(Pic::new()));
        let dma = Rc::new(RefCell::new(Dma::new()));
        let pit = Rc::new(RefCell::new(Pit::new(Rc::clone(&pic))));
        let clock: Rc<dyn Clock> = Rc::new(SystemClock::new());
        let ppi = Rc::new(RefCell::new(Ppi::new(Rc::clone(&pit), Rc::clone(&clock))));
        let rtc = Rtc::new();
        let vga = Rc::new(RefCell::new(Vga::new(config.headless)));

        let mut fdc = Fdc::new(Rc::clone(&dma), Rc::clone(&pic));
        if let Some(image) = config.floppy_image {
            fdc.insert_image(image);
        }
        let mut ide = Ide::new();
        if let Some(image) = config.primary_disk {
            ide.attach_image(0, image);
        }
        if let Some(image) = config.secondary_disk {
            ide.attach_image(1, image);
        }

        io.add_peripheral(0x00, 0x10, Box::new(Rc::clone(&dma)));
        io.add_peripheral(0x81, 0x07, Box::new(Rc::clone(&dma)));
        io.add_peripheral(0x20, 0x02, Box::new(Rc::clone(&pic)));
        io.add_peripheral(0x40, 0x04, Box::new(Rc::clone(&pit)));
        io.add_peripheral(0x61, 0x02, Box::new(Rc::clone(&ppi)));
        io.add_peripheral(0xa0, 0x01, Box::new(Rc::clone(&ppi)));
        io.add_peripheral(0x70, 0x02, Box::new(rtc));
        io.add_peripheral(0x300, 0x10, Box::new(ide));
        io.add_peripheral(0x3f0, 0x08, Box::new(fdc));
        io.add_peripheral(
            0x3b0,
            0x30,
            Box::new(VgaIoView { vga: Rc::clone(&vga), clock: Rc::clone(&clock) }),
        );

        // Bus mapping stops at 0xBFFFF per the fixed memory layout, even
        // though the VGA's own backing store is a 256 KiB planar buffer
        // (only the 0xA0000-0xBFFFF window is addressable from the bus).
        bus.add_peripheral(0xa0000, VGA_WINDOW_SIZE, Box::new(VgaMemView(Rc::clone(&vga))));

        if let Some(rom) = &config.extension_rom {
            load_into_bus(&mut bus, EXTENSION_ROM_BASE, rom);
        }
        let bios_base = BIOS_TOP - config.bios_image.len();
        load_into_bus(&mut bus, bios_base, &config.bios_image);
        info!(
            target: "machine",
            "loaded BIOS {} ({} bytes) at {:#08x}",
            config.bios_path,
            config.bios_image.len(),
            bios_base
        );

        Ok(Machine {
            cpu: Cpu::new(),
            bus,
            io,
            pic,
            pit,
            vga,
            clock,
            vectors: HashMap::new(),
            instructions_since_refresh: 0,
        })
    }

    /// Registers a host handler for one of the `0F 34 <vec>` escape
    /// vectors and writes the matching stub into the vector-handler
    /// segment (spec 4.4's "16-byte vector handler segment"), retargeting
    /// the real-mode interrupt vector table entry to point at it.
    pub fn register_vector(&mut self, vector: u8, handler: VectorHandler) {
        self.vectors.insert(vector, handler);
        let offset = vector as u16 * 4;
        let stub_base = (VECTOR_SEGMENT as usize) * 16 + offset as usize;
        self.bus.write_byte(stub_base, 0x0f);
        self.bus.write_byte(stub_base + 1, 0x34);
        self.bus.write_byte(stub_base + 2, vector);
        self.bus.write_byte(stub_base + 3, 0xcf);
        self.bus.write_word(vector as usize * 4, offset);
        self.bus.write_word(vector as usize * 4 + 2, VECTOR_SEGMENT);
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        self.bus.reset();
        self.pic.borrow_mut().reset();
        self.pit.borrow_mut().reset();
    }

    /// Runs one CPU instruction plus the between-instructions device
    /// polling spec section 5 describes. Returns `Err` only on an
    /// implementation-gap error (spec kind 3); the caller decides whether
    /// to abort.
    pub fn step(&mut self) -> Result<()> {
        self.pit.borrow_mut().tick(self.clock.as_ref());
        let pic = Rc::clone(&self.pic);
        let mut poll_irq = move || pic.borrow_mut().dequeue_pending_irq();
        let vectors = &mut self.vectors;
        let mut dispatch_vector = move |vector: u8, cpu: &mut Cpu, bus: &mut MemBus| {
            if let Some(handler) = vectors.get_mut(&vector) {
                handler(vector, cpu, bus);
            }
        };
        self.cpu.step(&mut self.bus, &mut self.io, &mut poll_irq, &mut dispatch_vector)?;
        self.instructions_since_refresh += 1;
        if self.instructions_since_refresh >= FRAME_INSTRUCTIONS {
            self.instructions_since_refresh = 0;
            self.vga.borrow_mut().refresh();
        }
        Ok(())
    }

    /// Runs until `step` returns an error. `main` is responsible for
    /// mapping that error to an exit code and diagnostic (spec section 7
    /// kind 3: "aborting is strictly preferable to silently producing
    /// wrong results").
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }
}

fn load_into_bus(bus: &mut MemBus, base: usize, image: &[u8]) {
    let dest = bus.get_pointer(base, image.len()).expect("ROM region must not overlap a peripheral mapping");
    dest.copy_from_slice(image);
}

/// VGA's memory side is a plain `MemoryDevice`; its I/O side needs the
/// wall clock threaded in per access (see `VgaPorts`), which is why the
/// two views live behind separate wrapper types over the same `Rc`.
struct VgaMemView(Rc<RefCell<Vga>>);

impl MemoryDevice for VgaMemView {
    fn read_byte(&self, address: usize) -> u8 {
        self.0.borrow().read_byte(address)
    }
    fn write_byte(&mut self, address: usize, value: u8) {
        self.0.borrow_mut().write_byte(address, value)
    }
}

struct VgaIoView {
    vga: Rc<RefCell<Vga>>,
    clock: Rc<dyn Clock>,
}

impl IoDevice for VgaIoView {
    fn in8(&mut self, port: u16) -> u8 {
        let mut vga = self.vga.borrow_mut();
        let mut ports = VgaPorts { vga: &mut vga, clock: self.clock.as_ref() };
        ports.in8(port)
    }
    fn out8(&mut self, port: u16, value: u8) {
        let mut vga = self.vga.borrow_mut();
        let mut ports = VgaPorts { vga: &mut vga, clock: self.clock.as_ref() };
        ports.out8(port, value)
    }
}
