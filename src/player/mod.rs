// PSID driver: owns the CPU, the observed memory and the SID model. Runs
// the tune's init and play routines through the `mos6502` core and paces SID
// clocking so that one output sample corresponds to delta_t chip cycles.

pub mod memory;
pub mod sid_file;

use log::{info, warn};
use mos6502::cpu::CPU;
use mos6502::instruction::Nmos6502;
use mos6502::memory::Bus;
use mos6502::registers::{StackPointer, Status};

use crate::sid::ChipModel;
use memory::PlayerMemory;
use sid_file::SidFile;

pub const PAL_CLOCK_HZ: u32 = 985_248;
const PAL_FRAME_RATE: u32 = 50;
const NTSC_FRAME_RATE: u32 = 60;

/// Hard cap for a single init or play invocation. Hitting it is a warning,
/// not an error: whatever register state the routine reached is still
/// audible.
const MAX_INSTRUCTIONS: u32 = 0xFFFF;

/// PAL 50Hz frame period, used when a CIA-driven tune leaves the timer at 0.
const FALLBACK_FRAME_PERIOD: u32 = 20_000;

pub struct Player {
    cpu: CPU<PlayerMemory, Nmos6502>,
    init_address: u16,
    play_address: u16,
    songs: u16,
    speed: u32,
    current_song: u16,
    clock_freq: u32,
    sample_freq: u32,
    frame_rate: u32,
    frame_period: u32,
    /// SID cycles per output sample.
    delta_t: u32,
    /// Samples emitted since the last play-routine invocation, and the
    /// count that triggers the next one.
    play_counter: u32,
    play_limit: u32,
}

impl Player {
    /// Build a player for a loaded tune. `subtune` is 0-based; a negative
    /// value selects the file's default song.
    pub fn new(sid_file: &SidFile, chip_model: ChipModel, sample_freq: u32, subtune: i32) -> Self {
        let mut mem = PlayerMemory::new(chip_model);
        mem.load(sid_file.load_address, &sid_file.payload);

        let header = &sid_file.header;
        let current_song = if subtune >= 0 {
            subtune as u16
        } else {
            header.start_song.saturating_sub(1)
        };

        Player {
            cpu: CPU::new(mem, Nmos6502),
            init_address: header.init_address,
            play_address: header.play_address,
            songs: header.songs,
            speed: header.speed,
            current_song,
            clock_freq: PAL_CLOCK_HZ,
            sample_freq,
            frame_rate: PAL_FRAME_RATE,
            frame_period: PAL_CLOCK_HZ / PAL_FRAME_RATE,
            delta_t: 0,
            play_counter: 0,
            play_limit: 0,
        }
    }

    /// Start the selected subtune: reset the SID, configure sampling, run
    /// the init routine under the raster mimic, recover a missing play
    /// address from the interrupt vectors, and pick the frame pacing.
    pub fn start(&mut self) {
        self.cpu.memory.sid.reset();
        self.cpu
            .memory
            .sid
            .set_sampling_parameters(self.clock_freq as f64, self.sample_freq as f64);
        self.delta_t = self.cpu.memory.sid.cycles_per_sample() >> 16;
        self.frame_period = self.clock_freq / self.frame_rate;

        // Processor port: BASIC + KERNAL + I/O visible.
        self.cpu.memory.set_byte(0x0001, 0x37);

        if self.current_song >= self.songs {
            self.current_song = 0;
        }
        info!("playing subtune {}", self.current_song);

        self.run_init();

        if self.play_address == 0 {
            warn!("tune has play address 0, reading it from the interrupt vector");
            self.play_address = if self.cpu.memory.get_byte(0x0001) & 0x07 == 0x05 {
                self.cpu.memory.load_address(0xFFFE)
            } else {
                self.cpu.memory.load_address(0x0314)
            };
            info!("new play address is ${:04X}", self.play_address);
        }

        self.update_frame_period();
        self.play_counter = 0;
        self.play_limit = self.samples_per_frame();

        info!(
            "cpu_clk: {}Hz samplerate: {}Hz samples/frame: {} frame period: {} delta_t: {} cia timing: {}",
            self.clock_freq,
            self.sample_freq,
            self.play_limit,
            self.frame_period,
            self.delta_t,
            self.song_uses_cia_speed(),
        );
    }

    /// Render interleaved stereo frames. Each sample advances the SID by
    /// delta_t cycles; the play routine runs once per frame period's worth
    /// of samples. Mono output is duplicated into both channels.
    pub fn play(&mut self, buffer: &mut [i16]) {
        for frame in buffer.chunks_exact_mut(2) {
            self.play_counter += 1;
            if self.play_counter >= self.play_limit {
                self.play_counter = 0;
                self.tick();
                if self.frame_period == 0 {
                    self.frame_period = FALLBACK_FRAME_PERIOD;
                }
                self.play_limit = self.samples_per_frame();
            }

            self.cpu.memory.sid.clock_delta(self.delta_t);
            let sample = self.cpu.memory.sid.output();
            frame[0] = sample;
            frame[1] = sample;
        }
    }

    /// Run the play routine once, then refresh the frame period from CIA
    /// timer A when the tune paces itself.
    pub fn tick(&mut self) {
        self.setup_cpu(self.play_address, 0, 0, 0);

        let mut instructions = 0u32;
        while !self.step_is_terminal() {
            instructions += 1;
            if instructions > MAX_INSTRUCTIONS {
                warn!("play routine ran {MAX_INSTRUCTIONS} instructions without returning, breaking off");
                break;
            }
            // A jump into the kernal interrupt epilogue with I/O banked out
            // also ends the frame.
            let pc = self.cpu.registers.program_counter;
            if self.cpu.memory.get_byte(0x0001) & 0x07 != 0x05 && (pc == 0xEA31 || pc == 0xEA81) {
                break;
            }
        }

        if self.cpu.memory.get_byte(0x0001) & 0x03 != 0 && self.song_uses_cia_speed() {
            self.frame_period = (self.cpu.memory.get_byte(0xDC05) as u32) << 8
                | self.cpu.memory.get_byte(0xDC04) as u32;
        }
    }

    // ── Internal ─────────────────────────────────────────────────────────

    fn run_init(&mut self) {
        self.setup_cpu(self.init_address, self.current_song as u8, 0, 0);

        let mut instructions = 0u32;
        while !self.step_is_terminal() {
            // Coarse raster mimicry: tunes commonly busy-wait on $D012
            // during init, so advance the raster line once per instruction
            // and toggle the $D011 MSB at the wrap points.
            let raster = self.cpu.memory.get_byte(0xD012).wrapping_add(1);
            self.cpu.memory.set_byte(0xD012, raster);
            let d011 = self.cpu.memory.get_byte(0xD011);
            if raster == 0 || (d011 & 0x80 != 0 && raster >= 0x38) {
                self.cpu.memory.set_byte(0xD011, d011 ^ 0x80);
                self.cpu.memory.set_byte(0xD012, 0x00);
            }

            instructions += 1;
            if instructions > MAX_INSTRUCTIONS {
                warn!("init routine ran {MAX_INSTRUCTIONS} instructions without returning, breaking off");
                break;
            }
        }
    }

    fn setup_cpu(&mut self, pc: u16, a: u8, x: u8, y: u8) {
        self.cpu.registers.program_counter = pc;
        self.cpu.registers.stack_pointer = StackPointer(0xFF);
        self.cpu.registers.accumulator = a;
        self.cpu.registers.index_x = x;
        self.cpu.registers.index_y = y;
        self.cpu.registers.status = Status::empty();
    }

    /// Execute one instruction, then peek at the next opcode. BRK ends the
    /// routine; RTI or RTS with an empty stack would unwind past the
    /// routine's own frame, so they end it too.
    fn step_is_terminal(&mut self) -> bool {
        self.cpu.single_step();
        let opcode = self.cpu.memory.get_byte(self.cpu.registers.program_counter);
        match opcode {
            0x00 => true,
            0x40 | 0x60 => self.cpu.registers.stack_pointer.0 == 0xFF,
            _ => false,
        }
    }

    fn song_uses_cia_speed(&self) -> bool {
        let bit = 1u32.checked_shl(self.current_song as u32).unwrap_or(0);
        self.speed & bit != 0
    }

    /// Pick the frame period: CIA timer A when the song's speed bit is set
    /// and the timer high byte is programmed, NTSC retrace when the bit is
    /// set with an idle timer, PAL retrace otherwise.
    fn update_frame_period(&mut self) {
        if self.song_uses_cia_speed() {
            if self.cpu.memory.get_byte(0xDC05) != 0 {
                self.frame_period = self.cpu.memory.get_byte(0xDC04) as u32
                    | (self.cpu.memory.get_byte(0xDC05) as u32) << 8;
                return;
            }
            self.frame_rate = NTSC_FRAME_RATE;
        }
        self.frame_period = self.clock_freq / self.frame_rate;
    }

    fn samples_per_frame(&self) -> u32 {
        self.sample_freq / (self.clock_freq / self.frame_period)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::sid_file::{build_psid, load_sid};
    use super::*;

    fn player_for(payload: &[u8], load: u16, init: u16, play: u16) -> Player {
        let data = build_psid(load, init, play, 1, 1, 0, payload);
        let sid_file = load_sid(&data).unwrap();
        Player::new(&sid_file, ChipModel::Mos8580, 22_050, -1)
    }

    #[test]
    fn init_runs_to_rts() {
        // init: LDA #$0F, STA $D418, RTS
        let payload = [0xa9, 0x0f, 0x8d, 0x18, 0xd4, 0x60];
        let mut player = player_for(&payload, 0x1000, 0x1000, 0x1000);
        player.start();
        assert_eq!(player.cpu.memory.get_byte(0xD418) & 0x0f, 0x0f);
        assert_eq!(player.delta_t, PAL_CLOCK_HZ / 22_050);
        assert_eq!(player.play_limit, 22_050 / PAL_FRAME_RATE);
    }

    #[test]
    fn runaway_init_hits_the_instruction_cap() {
        // init: JMP $1000 - never returns.
        let payload = [0x4c, 0x00, 0x10];
        let mut player = player_for(&payload, 0x1000, 0x1000, 0x1000);
        player.start();
    }

    #[test]
    fn missing_play_address_is_read_from_the_vector() {
        // init installs an IRQ handler address at $0314/$0315, then RTS.
        let payload = [
            0xa9, 0x40, // LDA #$40
            0x8d, 0x14, 0x03, // STA $0314
            0xa9, 0x12, // LDA #$12
            0x8d, 0x15, 0x03, // STA $0315
            0x60, // RTS
        ];
        let mut player = player_for(&payload, 0x1000, 0x1000, 0x0000);
        player.start();
        // $01 is $37 here, so the vector comes from $0314/$0315.
        assert_eq!(player.play_address, 0x1240);
    }

    #[test]
    fn subtune_selection_wraps_out_of_range() {
        let payload = [0x60];
        let data = build_psid(0x1000, 0x1000, 0x1000, 2, 1, 0, &payload);
        let sid_file = load_sid(&data).unwrap();
        let mut player = Player::new(&sid_file, ChipModel::Mos8580, 22_050, 7);
        player.start();
        assert_eq!(player.current_song, 0);
    }

    #[test]
    fn cia_speed_bit_selects_timer_period() {
        // init programs CIA timer A with $4025 and returns.
        let payload = [
            0xa9, 0x25, // LDA #$25
            0x8d, 0x04, 0xdc, // STA $DC04
            0xa9, 0x40, // LDA #$40
            0x8d, 0x05, 0xdc, // STA $DC05
            0x60, // RTS
        ];
        let data = build_psid(0x1000, 0x1000, 0x1000, 1, 1, 0x01, &payload);
        let sid_file = load_sid(&data).unwrap();
        let mut player = Player::new(&sid_file, ChipModel::Mos8580, 22_050, -1);
        player.start();
        assert_eq!(player.frame_period, 0x4025);
    }

    #[test]
    fn play_renders_samples_and_invokes_play_routine() {
        // init: RTS. play: increment $2000, RTS.
        let payload = [
            0x60, // $1000: RTS
            0xee, 0x00, 0x20, // $1001: INC $2000
            0x60, // RTS
        ];
        let mut player = player_for(&payload, 0x1000, 0x1000, 0x1001);
        player.start();
        // Two frames' worth of samples at 22050Hz / 50Hz.
        let frames = 2 * (22_050 / 50) as usize;
        let mut buffer = vec![0i16; frames * 2];
        player.play(&mut buffer);
        assert_eq!(player.cpu.memory.get_byte(0x2000), 2);
    }
}
