// Waveform generator: 24-bit phase accumulator, 23-bit noise shift register,
// hard-sync edge latch, and the combined-waveform lookup tables.

use std::sync::OnceLock;

use super::ChipModel;

const ACCUMULATOR_MASK: u32 = 0x00ff_ffff;
const SHIFT_REGISTER_MASK: u32 = 0x007f_ffff;
const SHIFT_REGISTER_RESET: u32 = 0x007f_fff8;

pub struct WaveformGenerator {
    acc: u32,
    shift: u32,
    freq: u16,
    pw: u16,
    waveform: u8,
    test: bool,
    ring_mod: bool,
    sync: bool,
    msb_rising: bool,
    tables: &'static CombinedTables,
}

impl WaveformGenerator {
    pub fn new(chip_model: ChipModel) -> Self {
        WaveformGenerator {
            acc: 0,
            shift: SHIFT_REGISTER_RESET,
            freq: 0,
            pw: 0,
            waveform: 0,
            test: false,
            ring_mod: false,
            sync: false,
            msb_rising: false,
            tables: CombinedTables::get(chip_model),
        }
    }

    pub fn reset(&mut self) {
        self.acc = 0;
        self.shift = SHIFT_REGISTER_RESET;
        self.freq = 0;
        self.pw = 0;
        self.test = false;
        self.ring_mod = false;
        self.sync = false;
        self.msb_rising = false;
    }

    // ── Register writes ──────────────────────────────────────────────────

    pub fn set_frequency_lo(&mut self, value: u8) {
        self.freq = (self.freq & 0xff00) | value as u16;
    }

    pub fn set_frequency_hi(&mut self, value: u8) {
        self.freq = ((value as u16) << 8) | (self.freq & 0x00ff);
    }

    pub fn set_pulse_width_lo(&mut self, value: u8) {
        self.pw = (self.pw & 0x0f00) | value as u16;
    }

    pub fn set_pulse_width_hi(&mut self, value: u8) {
        self.pw = (((value as u16) << 8) & 0x0f00) | (self.pw & 0x00ff);
    }

    pub fn set_control(&mut self, value: u8) {
        self.waveform = (value >> 4) & 0x0f;
        self.ring_mod = value & 0x04 != 0;
        self.sync = value & 0x02 != 0;

        let test_next = value & 0x08 != 0;
        if test_next {
            // Test bit set: the accumulator is cleared and the shift register
            // drains towards zero. The slow bit fade is not modeled.
            self.acc = 0;
            self.shift = 0;
        } else if self.test {
            // Test bit 1 -> 0: counting resumes and the shift register
            // restarts from its reset pattern.
            self.shift = SHIFT_REGISTER_RESET;
        }
        self.test = test_next;

        // The gate bit belongs to the envelope generator.
    }

    // ── Accessors for the sync machinery ─────────────────────────────────

    #[inline]
    pub fn accumulator(&self) -> u32 {
        self.acc
    }

    #[inline]
    pub fn frequency(&self) -> u16 {
        self.freq
    }

    #[inline]
    pub fn msb_rising(&self) -> bool {
        self.msb_rising
    }

    #[inline]
    pub fn sync_enabled(&self) -> bool {
        self.sync
    }

    /// Hard sync: the sync source's MSB rise resets this accumulator.
    #[inline]
    pub(super) fn reset_accumulator(&mut self) {
        self.acc = 0;
    }

    // ── Clocking ─────────────────────────────────────────────────────────

    pub fn clock_delta(&mut self, delta: u32) {
        if self.test {
            return;
        }

        let acc_prev = self.acc;
        let mut delta_acc = delta * self.freq as u32;
        self.acc = (self.acc + delta_acc) & ACCUMULATOR_MASK;

        // Bit 23 going high is latched for hard sync.
        self.msb_rising = acc_prev & 0x0080_0000 == 0 && self.acc & 0x0080_0000 != 0;

        // Shift the noise register once for each time accumulator bit 19
        // flipped from 0 to 1 inside this span; bit 19 goes high each time
        // 0x100000 is added to the accumulator.
        let mut shift_period: u32 = 0x0010_0000;
        while delta_acc > 0 {
            if delta_acc < shift_period {
                shift_period = delta_acc;
                // Determine whether bit 19 is set on the last period.
                if shift_period <= 0x0008_0000 {
                    // Check for a flip from 0 to 1.
                    if self.acc.wrapping_sub(shift_period) & 0x0008_0000 != 0
                        || self.acc & 0x0008_0000 == 0
                    {
                        break;
                    }
                } else {
                    // Check for a flip from 0 (to 1, or via 1 to 0) or from
                    // 1 via 0 to 1.
                    if self.acc.wrapping_sub(shift_period) & 0x0008_0000 != 0
                        && self.acc & 0x0008_0000 == 0
                    {
                        break;
                    }
                }
            }

            // The hardware shift is delayed two cycles; not modeled.
            let bit0 = ((self.shift >> 22) ^ (self.shift >> 17)) & 0x1;
            self.shift = ((self.shift << 1) & SHIFT_REGISTER_MASK) | bit0;

            delta_acc -= shift_period;
        }
    }

    // ── Output functions ─────────────────────────────────────────────────

    // Triangle: the MSB selects between the rising and the inverted falling
    // half, the lower 11 bits are left-shifted (half the resolution, full
    // amplitude). Ring modulation substitutes the MSB with MSB EOR the sync
    // source's MSB.
    fn output_triangle(&self, ring_acc: u32) -> u16 {
        let msb = if self.ring_mod {
            self.acc ^ ring_acc
        } else {
            self.acc
        } & 0x0080_0000;

        if msb != 0 {
            ((!self.acc >> 11) & 0xffe) as u16
        } else {
            ((self.acc >> 11) & 0xffe) as u16
        }
    }

    // Sawtooth: the upper 12 bits of the accumulator.
    fn output_sawtooth(&self) -> u16 {
        (self.acc >> 12) as u16
    }

    // Pulse: a 12-bit comparison against the pulse width register, all ones
    // or all zeros. The test bit holds the output at 0xfff.
    fn output_pulse(&self) -> u16 {
        if self.test || (self.acc >> 12) as u16 >= self.pw {
            0xfff
        } else {
            0x000
        }
    }

    // Noise: intermediate bits of the shift register scattered over the
    // output's top 8 bits.
    //
    //                    ----------------------->---------------------
    //                    |                                            |
    //               ----EOR----                                       |
    //               |         |                                       |
    //               2 2 2 1 1 1 1 1 1 1 1 1 1                         |
    // Register bits 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 <---
    //               |   |       |     |   |       |     |   |
    // OSC3 bits     7   6       5     4   3       2     1   0
    fn output_noise(&self) -> u16 {
        (((self.shift & 0x0040_0000) >> 11)
            | ((self.shift & 0x0010_0000) >> 10)
            | ((self.shift & 0x0001_0000) >> 7)
            | ((self.shift & 0x0000_2000) >> 5)
            | ((self.shift & 0x0000_0800) >> 4)
            | ((self.shift & 0x0000_0080) >> 1)
            | ((self.shift & 0x0000_0010) << 1)
            | ((self.shift & 0x0000_0004) << 2)) as u16
    }

    /// 12-bit waveform output for the selected waveform combination.
    /// `ring_acc` is the sync source's accumulator, used by ring modulation.
    pub fn output(&self, ring_acc: u32) -> u16 {
        match self.waveform {
            0x0 => 0x000,
            0x1 => self.output_triangle(ring_acc),
            0x2 => self.output_sawtooth(),
            0x3 => {
                // Combined waveforms short-circuit the output bits; the mixed
                // result is looked up in a per-model table. Saw+tri is
                // indexed by the sawtooth output.
                (self.tables.saw_tri[self.output_sawtooth() as usize] as u16) << 4
            }
            0x4 => self.output_pulse(),
            0x5 => {
                // Pulse+tri is indexed by the right-shifted triangle output
                // so that ring modulation keeps working, and gated by the
                // pulse comparator.
                let lut = self.tables.pulse_tri
                    [(self.output_triangle(ring_acc) >> 1) as usize] as u16;
                (lut << 4) & self.output_pulse()
            }
            0x6 => {
                let lut = self.tables.pulse_saw[self.output_sawtooth() as usize] as u16;
                (lut << 4) & self.output_pulse()
            }
            0x7 => {
                let lut = self.tables.pulse_saw_tri[self.output_sawtooth() as usize] as u16;
                (lut << 4) & self.output_pulse()
            }
            0x8 => self.output_noise(),
            // Combinations including noise drain the shift register within a
            // few cycles and produce no audible output.
            _ => 0x000,
        }
    }

    /// Memory-mapped OSC3 read-back: top 8 bits of the waveform output.
    pub fn read_osc(&self, ring_acc: u32) -> u8 {
        (self.output(ring_acc) >> 4) as u8
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Combined-waveform tables
// ─────────────────────────────────────────────────────────────────────────────

/// Lookup tables for the combined waveforms, one set per chip model.
///
/// Selecting several waveforms at once short-circuits the DAC input bits: a
/// zero bit forces the output bit low and drags its neighbours down as well.
/// The sampled OSC3 dumps are approximated here with a bit-coupling model:
/// an output bit survives only when the AND of the component waveforms sets
/// it and enough neighbouring bits are set to hold its level up. The 8580
/// couples more weakly than the 6581, and the pulse rail pulls harder than a
/// second waveform does. Bit-exact table dumps are out of scope.
pub struct CombinedTables {
    saw_tri: Box<[u8; 4096]>,
    pulse_tri: Box<[u8; 4096]>,
    pulse_saw: Box<[u8; 4096]>,
    pulse_saw_tri: Box<[u8; 4096]>,
}

impl CombinedTables {
    pub fn get(chip_model: ChipModel) -> &'static CombinedTables {
        static MOS6581: OnceLock<CombinedTables> = OnceLock::new();
        static MOS8580: OnceLock<CombinedTables> = OnceLock::new();
        match chip_model {
            ChipModel::Mos6581 => MOS6581.get_or_init(|| CombinedTables::build(0.88, 0.92, 4.0)),
            ChipModel::Mos8580 => MOS8580.get_or_init(|| CombinedTables::build(0.94, 0.96, 6.0)),
        }
    }

    fn build(threshold: f64, pulse_threshold: f64, falloff: f64) -> CombinedTables {
        let mut saw_tri = Box::new([0u8; 4096]);
        let mut pulse_tri = Box::new([0u8; 4096]);
        let mut pulse_saw = Box::new([0u8; 4096]);
        let mut pulse_saw_tri = Box::new([0u8; 4096]);

        for i in 0..4096u16 {
            let saw = i;
            let tri = triangle_for_upper_bits(i);

            saw_tri[i as usize] = couple_bits(saw & tri, threshold, falloff);
            // The pulse rail is all ones in these tables; the comparator
            // output is ANDed in at lookup time.
            pulse_saw[i as usize] = couple_bits(saw, pulse_threshold, falloff);
            pulse_saw_tri[i as usize] = couple_bits(saw & tri, pulse_threshold, falloff);
            // Pulse+tri is indexed by the triangle output right-shifted one
            // bit; only the lower half of the index space is reachable.
            if i < 2048 {
                pulse_tri[i as usize] = couple_bits((i << 1) & 0xffe, pulse_threshold, falloff);
            }
        }

        CombinedTables {
            saw_tri,
            pulse_tri,
            pulse_saw,
            pulse_saw_tri,
        }
    }
}

/// Triangle output for an accumulator whose upper 12 bits are `i`.
fn triangle_for_upper_bits(i: u16) -> u16 {
    if i & 0x800 != 0 {
        ((!i) & 0x7ff) << 1
    } else {
        (i & 0x7ff) << 1
    }
}

/// Keep a set bit only when the exponentially weighted support from its
/// neighbours clears the threshold; return the top 8 bits.
fn couple_bits(value: u16, threshold: f64, falloff: f64) -> u8 {
    let mut out: u16 = 0;
    for i in 0..12i32 {
        if value & (1 << i) == 0 {
            continue;
        }
        let mut level = 0.0;
        let mut full = 0.0;
        for j in 0..12i32 {
            let weight = falloff.powi(-(i - j).abs());
            full += weight;
            if value & (1 << j) != 0 {
                level += weight;
            }
        }
        if level / full >= threshold {
            out |= 1 << i;
        }
    }
    (out >> 4) as u8
}

// ─────────────────────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn wave() -> WaveformGenerator {
        WaveformGenerator::new(ChipModel::Mos6581)
    }

    #[test]
    fn accumulator_stays_in_24_bits() {
        let mut w = wave();
        w.set_frequency_lo(0xff);
        w.set_frequency_hi(0xff);
        for _ in 0..10_000 {
            w.clock_delta(97);
            assert!(w.accumulator() <= ACCUMULATOR_MASK);
            assert!(w.shift <= SHIFT_REGISTER_MASK);
        }
    }

    #[test]
    fn sawtooth_tracks_accumulator_top_bits() {
        let mut w = wave();
        w.set_frequency_lo(0x00);
        w.set_frequency_hi(0x10);
        w.set_control(0x20);
        w.clock_delta(3);
        // acc = 3 * 0x1000 = 0x3000
        assert_eq!(w.output(0), 0x003);
    }

    #[test]
    fn pulse_compares_against_width() {
        let mut w = wave();
        w.set_control(0x40);
        w.set_pulse_width_lo(0x00);
        w.set_pulse_width_hi(0x08);
        w.set_frequency_hi(0x10);
        // acc>>12 below pw: output low.
        w.clock_delta(1);
        assert_eq!(w.output(0), 0x000);
        // Clock past the comparison point.
        w.clock_delta(0x800);
        assert_eq!(w.output(0), 0xfff);
    }

    #[test]
    fn pulse_duty_follows_width() {
        let mut w = wave();
        w.set_control(0x40);
        w.set_pulse_width_lo(0x00);
        w.set_pulse_width_hi(0x04); // pw = 0x400
        w.set_frequency_lo(0x00);
        w.set_frequency_hi(0x10); // one output step per cycle
        let mut high = 0u32;
        for _ in 0..4096 {
            w.clock_delta(1);
            if w.output(0) == 0xfff {
                high += 1;
            }
        }
        // High for (4096 - pw) of 4096 steps, within one step.
        let expected = 4096 - 0x400;
        assert!((high as i32 - expected).unsigned_abs() <= 1);
    }

    #[test]
    fn test_bit_freezes_and_reloads_shift_register() {
        let mut w = wave();
        w.set_frequency_lo(0x34);
        w.set_frequency_hi(0x12);
        w.clock_delta(500);
        w.set_control(0x08);
        assert_eq!(w.accumulator(), 0);
        assert_eq!(w.shift, 0);
        // Clocking is a no-op while test is set.
        w.clock_delta(500);
        assert_eq!(w.accumulator(), 0);
        // Clearing test reloads the noise register.
        w.set_control(0x00);
        assert_eq!(w.shift, SHIFT_REGISTER_RESET);
    }

    #[test]
    fn ring_mod_inverts_triangle_half() {
        let mut w = wave();
        w.set_control(0x14); // triangle + ring mod
        w.set_frequency_hi(0x10);
        w.clock_delta(0x200);
        let plain = w.output(0);
        let rung = w.output(0x0080_0000);
        // Flipping the source MSB selects the inverted half.
        assert_ne!(plain, rung);
    }

    #[test]
    fn noise_mixed_with_other_waveforms_is_silent() {
        let mut w = wave();
        w.set_frequency_hi(0x10);
        for control in [0x90u8, 0xa0, 0xc0, 0xf0] {
            w.set_control(control);
            w.clock_delta(123);
            assert_eq!(w.output(0), 0);
        }
    }

    #[test]
    fn combined_tables_bounded_by_components() {
        let tables = CombinedTables::get(ChipModel::Mos6581);
        for i in 0..4096usize {
            let saw = i as u16;
            let tri = triangle_for_upper_bits(i as u16);
            // The coupled result never sets a bit the plain AND clears.
            let and_top = ((saw & tri) >> 4) as u8;
            assert_eq!(tables.saw_tri[i] & !and_top, 0);
            assert_eq!(tables.pulse_saw[i] & !(saw >> 4) as u8, 0);
        }
    }
}
