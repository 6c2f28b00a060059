// MOS 6581/8580 model: three voices in a hard-sync ring, the state-variable
// filter and the board-level RC filter, clocked cycle-accurately and read
// out as signed 16-bit samples.

mod envelope;
mod external_filter;
mod filter;
mod voice;
mod wave;

use external_filter::ExternalFilter;
use filter::Filter;
use voice::Voice;

/// Which SID revision to model. The 6581 carries measured DC offsets in the
/// waveform and envelope DACs; the 8580 is clean.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChipModel {
    Mos6581,
    Mos8580,
}

// The voices form a ring: voice 0 is synced by voice 2, voice 1 by voice 0,
// voice 2 by voice 1. Indices avoid reference cycles and map the hardware
// one-to-one.
const SYNC_SOURCE: [usize; 3] = [2, 0, 1];
const SYNC_DEST: [usize; 3] = [1, 2, 0];

const OUTPUT_RANGE: i32 = 1 << 16;
const OUTPUT_HALF: i32 = OUTPUT_RANGE >> 1;
// Theoretical maximum magnitude of the mixed, volume-scaled signal, used to
// scale the output into 16 bits.
const FULL_SCALE_DIV: i32 = ((4095 * 255 >> 7) * 3 * 15 * 2) / OUTPUT_RANGE;

// A write-only register read returns the last byte written to any register
// for this many cycles. The hardware's gradual bit fade is not modeled.
const BUS_VALUE_TTL: i32 = 0x2000;

pub struct Sid {
    voices: [Voice; 3],
    filter: Filter,
    ext_filter: ExternalFilter,
    bus_value: u8,
    bus_value_ttl: i32,
    ext_in: i32,
    pot_x: u8,
    pot_y: u8,
    cycles_per_sample: u32,
}

impl Sid {
    pub fn new(chip_model: ChipModel) -> Self {
        let mut sid = Sid {
            voices: [
                Voice::new(chip_model),
                Voice::new(chip_model),
                Voice::new(chip_model),
            ],
            filter: Filter::new(chip_model),
            ext_filter: ExternalFilter::new(chip_model),
            bus_value: 0,
            bus_value_ttl: 0,
            ext_in: 0,
            pot_x: 0,
            pot_y: 0,
            cycles_per_sample: 0,
        };
        sid.set_sampling_parameters(985_248.0, 22_050.0);
        sid
    }

    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.reset();
        }
        self.filter.reset();
        self.ext_filter.reset();
        self.bus_value = 0;
        self.bus_value_ttl = 0;
    }

    /// Select the external filter passband for the output rate (20kHz, or
    /// 0.9x Nyquist below ~44.1kHz rates) and fix the clock-to-sample ratio
    /// in 16.16 fixed point.
    pub fn set_sampling_parameters(&mut self, clock_freq: f64, sample_freq: f64) {
        let mut pass_freq = 20_000.0;
        if 2.0 * pass_freq / sample_freq >= 0.9 {
            pass_freq = 0.9 * sample_freq / 2.0;
        }
        self.ext_filter.set_passband(pass_freq);
        self.cycles_per_sample = (clock_freq / sample_freq * (1 << 16) as f64 + 0.5) as u32;
    }

    /// Clock cycles per output sample in 16.16 fixed point.
    pub fn cycles_per_sample(&self) -> u32 {
        self.cycles_per_sample
    }

    /// Mix a 16-bit external audio signal into the filter stage. Voice
    /// outputs are 20 bits, so the sample is scaled up to match three
    /// voices (which also accommodates the 8580 "digi boost" trick).
    pub fn input(&mut self, sample: i32) {
        self.ext_in = (sample << 4) * 3;
    }

    pub fn mute(&mut self, voice: usize, muted: bool) {
        if let Some(voice) = self.voices.get_mut(voice) {
            voice.set_mute(muted);
        }
    }

    pub fn enable_filter(&mut self, enabled: bool) {
        self.filter.set_enabled(enabled);
    }

    pub fn enable_external_filter(&mut self, enabled: bool) {
        self.ext_filter.set_enabled(enabled);
    }

    // ── Register file ────────────────────────────────────────────────────

    /// Reads of write-only registers return the decaying bus value; POTX/Y
    /// are unconnected here, OSC3 and ENV3 expose voice 3's oscillator and
    /// envelope for tunes that use them as entropy or timing sources.
    pub fn read(&self, reg: u8) -> u8 {
        match reg {
            0x19 => self.pot_x,
            0x1a => self.pot_y,
            0x1b => self.voices[2]
                .wave
                .read_osc(self.voices[SYNC_SOURCE[2]].wave.accumulator()),
            0x1c => self.voices[2].envelope.output(),
            _ => self.bus_value,
        }
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        self.bus_value = value;
        self.bus_value_ttl = BUS_VALUE_TTL;

        match reg {
            0x00..=0x14 => {
                let voice = &mut self.voices[reg as usize / 7];
                match reg % 7 {
                    0 => voice.wave.set_frequency_lo(value),
                    1 => voice.wave.set_frequency_hi(value),
                    2 => voice.wave.set_pulse_width_lo(value),
                    3 => voice.wave.set_pulse_width_hi(value),
                    4 => voice.set_control(value),
                    5 => voice.envelope.set_attack_decay(value),
                    _ => voice.envelope.set_sustain_release(value),
                }
            }
            0x15 => self.filter.set_fc_lo(value),
            0x16 => self.filter.set_fc_hi(value),
            0x17 => self.filter.set_res_filt(value),
            0x18 => self.filter.set_mode_vol(value),
            _ => {}
        }
    }

    // ── Clocking ─────────────────────────────────────────────────────────

    pub fn clock_delta(&mut self, delta: u32) {
        if delta == 0 {
            return;
        }

        // Age the bus value.
        self.bus_value_ttl -= delta as i32;
        if self.bus_value_ttl <= 0 {
            self.bus_value = 0;
            self.bus_value_ttl = 0;
        }

        // Clock the amplitude modulators.
        for voice in &mut self.voices {
            voice.envelope.clock_delta(delta);
        }

        // Clock and synchronize the oscillators. The span is cut at every
        // accumulator MSB toggle of an active sync source, since hard sync
        // must land on the exact cycle of the edge.
        let mut delta_osc = delta;
        while delta_osc > 0 {
            let mut delta_min = delta_osc;
            for i in 0..3 {
                let wave = &self.voices[i].wave;
                // Only the MSB of a sync source with nonzero frequency
                // matters.
                if !(self.voices[SYNC_DEST[i]].wave.sync_enabled() && wave.frequency() != 0) {
                    continue;
                }
                let freq = wave.frequency() as u32;
                let acc = wave.accumulator();
                // Clock to MSB off if the MSB is on, else to MSB on.
                let delta_acc = if acc & 0x0080_0000 != 0 {
                    0x0100_0000 - acc
                } else {
                    0x0080_0000 - acc
                };
                let mut delta_next = delta_acc / freq;
                if delta_acc % freq != 0 {
                    delta_next += 1;
                }
                if delta_next < delta_min {
                    delta_min = delta_next;
                }
            }

            for voice in &mut self.voices {
                voice.wave.clock_delta(delta_min);
            }
            self.synchronize();
            delta_osc -= delta_min;
        }

        // Clock the filter with the amplitude-modulated voice outputs, then
        // the external filter with the filter's output.
        let (v1, v2, v3) = self.voice_outputs();
        self.filter.clock_delta(delta, v1, v2, v3, self.ext_in);
        self.ext_filter.clock_delta(delta, self.filter.output());
    }

    /// Propagate hard sync around the ring. A sync source that is itself
    /// being synced on the same cycle does not reset its destination; this
    /// has been verified by sampling OSC3.
    fn synchronize(&mut self) {
        let rising = [
            self.voices[0].wave.msb_rising(),
            self.voices[1].wave.msb_rising(),
            self.voices[2].wave.msb_rising(),
        ];
        let sync = [
            self.voices[0].wave.sync_enabled(),
            self.voices[1].wave.sync_enabled(),
            self.voices[2].wave.sync_enabled(),
        ];
        for i in 0..3 {
            let dest = SYNC_DEST[i];
            if rising[i] && sync[dest] && !(sync[i] && rising[SYNC_SOURCE[i]]) {
                self.voices[dest].wave.reset_accumulator();
            }
        }
    }

    fn voice_outputs(&self) -> (i32, i32, i32) {
        let acc = [
            self.voices[0].wave.accumulator(),
            self.voices[1].wave.accumulator(),
            self.voices[2].wave.accumulator(),
        ];
        (
            self.voices[0].output(acc[SYNC_SOURCE[0]]),
            self.voices[1].output(acc[SYNC_SOURCE[1]]),
            self.voices[2].output(acc[SYNC_SOURCE[2]]),
        )
    }

    /// Audio output scaled by the theoretical maximum magnitude into a
    /// signed 16-bit sample, clipped at the rails.
    pub fn output(&self) -> i16 {
        let sample = self.ext_filter.output() / FULL_SCALE_DIV;
        if sample >= OUTPUT_HALF {
            (OUTPUT_HALF - 1) as i16
        } else if sample < -OUTPUT_HALF {
            (-OUTPUT_HALF) as i16
        } else {
            sample as i16
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────────────────────
