// A voice couples one waveform generator and one envelope generator and
// applies the chip's measured DC offsets.

use super::envelope::EnvelopeGenerator;
use super::wave::WaveformGenerator;
use super::ChipModel;

pub struct Voice {
    pub wave: WaveformGenerator,
    pub envelope: EnvelopeGenerator,
    wave_zero: i32,
    voice_dc: i32,
    muted: bool,
}

impl Voice {
    pub fn new(chip_model: ChipModel) -> Self {
        let (wave_zero, voice_dc) = match chip_model {
            // The waveform DAC's "zero" level measures at 0x380 rather than
            // the ideal 0x800, and the envelope multiplier adds a DC offset
            // of about half the dynamic range of one voice. Both make the
            // 6581 output asymmetric about zero.
            ChipModel::Mos6581 => (0x380, 0x800 * 0xff),
            // No DC offsets in the MOS8580.
            ChipModel::Mos8580 => (0x800, 0),
        };
        Voice {
            wave: WaveformGenerator::new(chip_model),
            envelope: EnvelopeGenerator::new(),
            wave_zero,
            voice_dc,
            muted: false,
        }
    }

    /// The control register feeds both generators: waveform select, test,
    /// ring and sync bits go to the oscillator, the gate bit to the envelope.
    pub fn set_control(&mut self, value: u8) {
        self.wave.set_control(value);
        self.envelope.set_control(value);
    }

    /// Amplitude-modulated waveform output, ideal range [-2048*255, 2047*255].
    /// `ring_acc` is the sync source's accumulator for ring modulation.
    #[inline]
    pub fn output(&self, ring_acc: u32) -> i32 {
        if self.muted {
            return 0;
        }
        (self.wave.output(ring_acc) as i32 - self.wave_zero) * self.envelope.output() as i32
            + self.voice_dc
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn reset(&mut self) {
        self.wave.reset();
        self.envelope.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn muted_voice_outputs_zero() {
        let mut voice = Voice::new(ChipModel::Mos6581);
        voice.set_control(0x11);
        voice.wave.set_frequency_hi(0x20);
        voice.wave.clock_delta(1000);
        voice.envelope.clock_delta(1000);
        assert_ne!(voice.output(0), 0);
        voice.set_mute(true);
        assert_eq!(voice.output(0), 0);
    }

    #[test]
    fn idle_8580_voice_sits_at_zero() {
        let voice = Voice::new(ChipModel::Mos8580);
        assert_eq!(voice.output(0), 0);
    }

    #[test]
    fn idle_6581_voice_carries_dc() {
        let voice = Voice::new(ChipModel::Mos6581);
        // Zero envelope: only the voice DC remains.
        assert_eq!(voice.output(0), 0x800 * 0xff);
    }
}
