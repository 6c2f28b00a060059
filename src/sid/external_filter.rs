// Board-level RC output stage: a ~16Hz high-pass DC blocker and a low-pass
// at the sampling passband, both as simple integer one-pole integrators.

use super::ChipModel;

pub struct ExternalFilter {
    enabled: bool,
    // Maximum mixer DC level, subtracted when the filter is bypassed since
    // there is then no high-pass stage to remove it:
    // ((wave DC + voice DC) * voices + mixer DC) * volume.
    mixer_dc: i32,
    // Integrator state.
    vlp: i32,
    vhp: i32,
    vo: i32,
    // Cutoff frequencies, scaled by 2*pi*1.048576 so the division by 1e6
    // becomes a 20-bit right shift.
    w0lp: i32,
    w0hp: i32,
}

impl ExternalFilter {
    pub fn new(chip_model: ChipModel) -> Self {
        let mixer_dc = match chip_model {
            ChipModel::Mos6581 => {
                ((((0x800 - 0x380) + 0x800) * 0xff * 3 - 0xfff * 0xff / 18) >> 7) * 0x0f
            }
            // No DC offsets in the MOS8580.
            ChipModel::Mos8580 => 0,
        };
        let mut filter = ExternalFilter {
            enabled: true,
            mixer_dc,
            vlp: 0,
            vhp: 0,
            vo: 0,
            w0lp: 0,
            w0hp: 0,
        };
        filter.set_passband(15915.6);
        filter
    }

    pub fn reset(&mut self) {
        self.vlp = 0;
        self.vhp = 0;
        self.vo = 0;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Low-pass at the passband frequency (R=10kOhm, C=1000pF on the board,
    /// w0 = 1/RC = 100000, clamped for stability); high-pass fixed at ~16Hz
    /// (R=1kOhm, C=10uF, w0 = 100).
    pub fn set_passband(&mut self, pass_freq: f64) {
        self.w0hp = 105;
        self.w0lp = ((pass_freq * 2.0 * std::f64::consts::PI * 1.048576).round() as i32)
            .min(104_858);
    }

    pub fn clock_delta(&mut self, mut delta: u32, vi: i32) {
        if !self.enabled {
            // No filter to remove the maximum DC level, so subtract it here.
            self.vlp = 0;
            self.vhp = 0;
            self.vo = vi - self.mixer_dc;
            return;
        }

        // Maximum step for the filter to stay satisfactory is about 8 cycles.
        let mut delta_flt: u32 = 8;
        while delta != 0 {
            if delta < delta_flt {
                delta_flt = delta;
            }

            // Vo = Vlp - Vhp;
            // Vlp += w0lp*(Vi - Vlp)*delta_t;
            // Vhp += w0hp*(Vlp - Vhp)*delta_t;
            // The first multiply is widened: full-scale input against the
            // clamped low-pass coefficient grazes the i32 range.
            let dvlp =
                ((self.w0lp * delta_flt as i32 >> 8) as i64 * (vi - self.vlp) as i64 >> 12) as i32;
            let dvhp = self.w0hp * delta_flt as i32 * (self.vlp - self.vhp) >> 20;
            self.vo = self.vlp - self.vhp;
            self.vlp += dvlp;
            self.vhp += dvhp;

            delta -= delta_flt;
        }
    }

    #[inline]
    pub fn output(&self) -> i32 {
        self.vo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_dc_over_time() {
        let mut filter = ExternalFilter::new(ChipModel::Mos6581);
        let dc = 200_000;
        // The low-pass settles quickly, then the high-pass slowly pulls the
        // DC out of the output.
        filter.clock_delta(2000, dc);
        let early = filter.output();
        assert!(early > dc / 2);
        // ~2 seconds of cycles: well past the ~16Hz corner's time constant.
        for _ in 0..200 {
            filter.clock_delta(10_000, dc);
        }
        assert!(filter.output().abs() < dc / 20);
    }

    #[test]
    fn bypass_subtracts_mixer_dc() {
        let mut filter = ExternalFilter::new(ChipModel::Mos6581);
        filter.set_enabled(false);
        filter.clock_delta(100, 12345);
        let dc = ((((0x800 - 0x380) + 0x800) * 0xff * 3 - 0xfff * 0xff / 18) >> 7) * 0x0f;
        assert_eq!(filter.output(), 12345 - dc);
    }

    #[test]
    fn reset_clears_state() {
        let mut filter = ExternalFilter::new(ChipModel::Mos8580);
        filter.clock_delta(5000, 100_000);
        filter.reset();
        assert_eq!(filter.output(), 0);
        assert_eq!(filter.vlp, 0);
        assert_eq!(filter.vhp, 0);
    }
}
