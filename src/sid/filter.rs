// State-variable filter: two-integrator-loop biquad confirmed by Bob Yannes
// as the actual SID circuit. Integer fixed-point throughout; the shift
// amounts carry the stability margins and must not change.

use std::f64::consts::PI;
use std::sync::OnceLock;

use super::ChipModel;

const MIXER_DC_6581: i32 = -0xfff * 0xff / 18 >> 7;

// Measured mappings from the 11-bit FC register to cutoff frequency.
//
// The 6581 has the shape of the tanh function with a discontinuity at
// FCHI = 0x80; the 8580 is close to the specified linear 30Hz-12kHz map.
// The function is specified with spline interpolation points; the table is
// filled by interpolation and read back by FC lookup. Characteristics vary
// between chips, these are two particular C64s.
static F0_POINTS_6581: [(i32, i32); 31] = [
    //  FC      f         FCHI FCLO
    // ----------------------------
    (0, 220),      // 0x00      - repeated end point
    (0, 220),      // 0x00
    (128, 230),    // 0x10
    (256, 250),    // 0x20
    (384, 300),    // 0x30
    (512, 420),    // 0x40
    (640, 780),    // 0x50
    (768, 1600),   // 0x60
    (832, 2300),   // 0x68
    (896, 3200),   // 0x70
    (960, 4300),   // 0x78
    (992, 5000),   // 0x7c
    (1008, 5400),  // 0x7e
    (1016, 5700),  // 0x7f
    (1023, 6000),  // 0x7f 0x07
    (1023, 6000),  // 0x7f 0x07 - discontinuity
    (1024, 4600),  // 0x80      -
    (1024, 4600),  // 0x80
    (1032, 4800),  // 0x81
    (1056, 5300),  // 0x84
    (1088, 6000),  // 0x88
    (1120, 6600),  // 0x8c
    (1152, 7200),  // 0x90
    (1280, 9500),  // 0xa0
    (1408, 12000), // 0xb0
    (1536, 14500), // 0xc0
    (1664, 16000), // 0xd0
    (1792, 17100), // 0xe0
    (1920, 17700), // 0xf0
    (2047, 18000), // 0xff 0x07
    (2047, 18000), // 0xff 0x07 - repeated end point
];

static F0_POINTS_8580: [(i32, i32); 19] = [
    //  FC      f         FCHI FCLO
    // ----------------------------
    (0, 0),        // 0x00      - repeated end point
    (0, 0),        // 0x00
    (128, 800),    // 0x10
    (256, 1600),   // 0x20
    (384, 2500),   // 0x30
    (512, 3300),   // 0x40
    (640, 4100),   // 0x50
    (768, 4800),   // 0x60
    (896, 5600),   // 0x70
    (1024, 6500),  // 0x80
    (1152, 7500),  // 0x90
    (1280, 8400),  // 0xa0
    (1408, 9200),  // 0xb0
    (1536, 9800),  // 0xc0
    (1664, 10500), // 0xd0
    (1792, 11000), // 0xe0
    (1920, 11700), // 0xf0
    (2047, 12500), // 0xff 0x07
    (2047, 12500), // 0xff 0x07 - repeated end point
];

/// Cutoff curve for a chip model, filled once by spline interpolation.
fn cutoff_table(chip_model: ChipModel) -> &'static [u16; 2048] {
    static MOS6581: OnceLock<[u16; 2048]> = OnceLock::new();
    static MOS8580: OnceLock<[u16; 2048]> = OnceLock::new();
    match chip_model {
        ChipModel::Mos6581 => MOS6581.get_or_init(|| interpolate_curve(&F0_POINTS_6581)),
        ChipModel::Mos8580 => MOS8580.get_or_init(|| interpolate_curve(&F0_POINTS_8580)),
    }
}

/// Piecewise cubic through each interior segment. Tangents come from the
/// neighbouring points; a repeated x-coordinate marks a derivative
/// discontinuity, with the one-sided tangent reconstructed from the segment
/// slope.
fn interpolate_curve(points: &[(i32, i32)]) -> [u16; 2048] {
    let mut table = [0u16; 2048];
    for w in points.windows(4) {
        let (p0, p1, p2, p3) = (w[0], w[1], w[2], w[3]);
        if p1.0 == p2.0 {
            continue;
        }
        let slope = (p2.1 - p1.1) as f64 / (p2.0 - p1.0) as f64;
        let (k1, k2) = if p0.0 == p1.0 && p2.0 == p3.0 {
            (slope, slope)
        } else if p0.0 == p1.0 {
            let k2 = (p3.1 - p1.1) as f64 / (p3.0 - p1.0) as f64;
            ((3.0 * slope - k2) / 2.0, k2)
        } else if p2.0 == p3.0 {
            let k1 = (p2.1 - p0.1) as f64 / (p2.0 - p0.0) as f64;
            (k1, (3.0 * slope - k1) / 2.0)
        } else {
            (
                (p2.1 - p0.1) as f64 / (p2.0 - p0.0) as f64,
                (p3.1 - p1.1) as f64 / (p3.0 - p1.0) as f64,
            )
        };

        let (x1, y1) = (p1.0 as f64, p1.1 as f64);
        let (x2, y2) = (p2.0 as f64, p2.1 as f64);
        let dx = x2 - x1;
        let dy = y2 - y1;
        let a = ((k1 + k2) - 2.0 * dy / dx) / (dx * dx);
        let b = ((k2 - k1) / dx - 3.0 * (x1 + x2) * a) / 2.0;
        let c = k1 - (3.0 * x1 * a + 2.0 * b) * x1;
        let d = y1 - ((x1 * a + b) * x1 + c) * x1;

        for x in p1.0..=p2.0 {
            let xf = x as f64;
            let y = ((a * xf + b) * xf + c) * xf + d;
            table[x as usize] = y.round().max(0.0) as u16;
        }
    }
    table
}

pub struct Filter {
    // Configuration
    enabled: bool,
    fc: u16,
    filt: u8,
    res: u8,
    // Mode
    voice3_off: bool,
    hp_bp_lp: u8,
    vol: u8,
    // Runtime state
    vhp: i32,
    vbp: i32,
    vlp: i32,
    vnf: i32,
    // Cutoff and resonance coefficients
    mixer_dc: i32,
    q_1024_div: i32,
    w0: i32,
    w0_ceil_1: i32,
    w0_ceil_dt: i32,
    f0: &'static [u16; 2048],
}

impl Filter {
    pub fn new(chip_model: ChipModel) -> Self {
        let mixer_dc = match chip_model {
            // The mixer's "zero" level moves from 5.50V at zero volume to
            // 5.44V at full volume, a DC offset of about -1/18 of one
            // voice's dynamic range.
            ChipModel::Mos6581 => MIXER_DC_6581,
            ChipModel::Mos8580 => 0,
        };
        let mut filter = Filter {
            enabled: true,
            fc: 0,
            filt: 0,
            res: 0,
            voice3_off: false,
            hp_bp_lp: 0,
            vol: 0,
            vhp: 0,
            vbp: 0,
            vlp: 0,
            vnf: 0,
            mixer_dc,
            q_1024_div: 0,
            w0: 0,
            w0_ceil_1: 0,
            w0_ceil_dt: 0,
            f0: cutoff_table(chip_model),
        };
        filter.set_w0();
        filter.set_q();
        filter
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn reset(&mut self) {
        self.fc = 0;
        self.filt = 0;
        self.res = 0;
        self.voice3_off = false;
        self.hp_bp_lp = 0;
        self.vol = 0;
        self.vhp = 0;
        self.vbp = 0;
        self.vlp = 0;
        self.vnf = 0;
        self.set_w0();
        self.set_q();
    }

    // ── Register writes ──────────────────────────────────────────────────

    pub fn set_fc_lo(&mut self, value: u8) {
        self.fc = (self.fc & 0x7f8) | (value as u16 & 0x007);
        self.set_w0();
    }

    pub fn set_fc_hi(&mut self, value: u8) {
        self.fc = ((value as u16) << 3) & 0x7f8 | (self.fc & 0x007);
        self.set_w0();
    }

    pub fn set_res_filt(&mut self, value: u8) {
        self.res = (value >> 4) & 0x0f;
        self.filt = value & 0x0f;
        self.set_q();
    }

    pub fn set_mode_vol(&mut self, value: u8) {
        self.voice3_off = value & 0x80 != 0;
        self.hp_bp_lp = (value >> 4) & 0x07;
        self.vol = value & 0x0f;
    }

    fn set_w0(&mut self) {
        // Multiply with 1.048576 so the later division by 1e6 becomes a
        // 20-bit right shift.
        self.w0 = (2.0 * PI * self.f0[self.fc as usize] as f64 * 1.048576).round() as i32;

        // Limit f0 to 16kHz to keep the 1-cycle step stable.
        let w0_max_1 = (2.0 * PI * 16000.0 * 1.048576).round() as i32;
        self.w0_ceil_1 = self.w0.min(w0_max_1);

        // Limit f0 to 4kHz to keep the multi-cycle step stable.
        let w0_max_dt = (2.0 * PI * 4000.0 * 1.048576).round() as i32;
        self.w0_ceil_dt = self.w0.min(w0_max_dt);
    }

    fn set_q(&mut self) {
        // Q is controlled linearly by res over roughly [0.707, 1.7]. The
        // factor 1024 is dispensed of by a 10-bit right shift.
        self.q_1024_div = (1024.0 / (0.707 + self.res as f64 / 15.0)).round() as i32;
    }

    // ── Clocking ─────────────────────────────────────────────────────────

    /// Scale the inputs from 20 down to 13 bits to stay within
    /// multiplication range. Voice 3 is only silenced by voice3off when it
    /// does not pass through the filter.
    fn scale_inputs(&self, voice1: i32, voice2: i32, voice3: i32, ext_in: i32) -> [i32; 4] {
        let voice3 = if self.voice3_off && self.filt & 0x04 == 0 {
            0
        } else {
            voice3 >> 7
        };
        [voice1 >> 7, voice2 >> 7, voice3, ext_in >> 7]
    }

    /// Sum the routed inputs into the filter input, everything else into the
    /// bypass summer.
    fn route(&mut self, inputs: [i32; 4]) -> i32 {
        let mut vi = 0;
        let mut vnf = 0;
        for (bit, value) in inputs.into_iter().enumerate() {
            if self.filt & (1 << bit) != 0 {
                vi += value;
            } else {
                vnf += value;
            }
        }
        self.vnf = vnf;
        vi
    }

    /// Single-cycle step, stable up to the 16kHz cutoff ceiling.
    #[allow(dead_code)]
    pub fn clock(&mut self, voice1: i32, voice2: i32, voice3: i32, ext_in: i32) {
        let inputs = self.scale_inputs(voice1, voice2, voice3, ext_in);
        if !self.enabled {
            self.vnf = inputs.iter().sum();
            self.vhp = 0;
            self.vbp = 0;
            self.vlp = 0;
            return;
        }
        let vi = self.route(inputs);

        // Vhp = Vbp/Q - Vlp - Vi; dVbp = -w0*Vhp*dt; dVlp = -w0*Vbp*dt.
        // delta_t = 1 is converted to seconds by the 20-bit shift.
        let dvbp = self.w0_ceil_1 * self.vhp >> 20;
        let dvlp = self.w0_ceil_1 * self.vbp >> 20;
        self.vbp -= dvbp;
        self.vlp -= dvlp;
        self.vhp = (self.vbp * self.q_1024_div >> 10) - self.vlp - vi;
    }

    pub fn clock_delta(
        &mut self,
        mut delta: u32,
        voice1: i32,
        voice2: i32,
        voice3: i32,
        ext_in: i32,
    ) {
        let inputs = self.scale_inputs(voice1, voice2, voice3, ext_in);
        if !self.enabled {
            self.vnf = inputs.iter().sum();
            self.vhp = 0;
            self.vbp = 0;
            self.vlp = 0;
            return;
        }
        let vi = self.route(inputs);

        // Maximum step for the filter to stay satisfactory under the cutoff
        // and resonance constraints is about 8 cycles.
        let mut delta_flt: u32 = 8;
        while delta != 0 {
            if delta < delta_flt {
                delta_flt = delta;
            }
            // The division by 1e6 is split into >>6 and >>14 to avoid
            // overflowing the multiplications.
            let w0_delta_t = self.w0_ceil_dt * delta_flt as i32 >> 6;
            let dvbp = w0_delta_t * self.vhp >> 14;
            let dvlp = w0_delta_t * self.vbp >> 14;
            self.vbp -= dvbp;
            self.vlp -= dvlp;
            self.vhp = (self.vbp * self.q_1024_div >> 10) - self.vlp - vi;

            delta -= delta_flt;
        }
    }

    /// Mix the selected filter outputs (the sum is unweighted, as on
    /// hardware), add the bypass summer and the mixer DC, scale by volume.
    pub fn output(&self) -> i32 {
        if !self.enabled {
            return (self.vnf + self.mixer_dc) * self.vol as i32;
        }
        let mut vf = 0;
        if self.hp_bp_lp & 0x01 != 0 {
            vf += self.vlp;
        }
        if self.hp_bp_lp & 0x02 != 0 {
            vf += self.vbp;
        }
        if self.hp_bp_lp & 0x04 != 0 {
            vf += self.vhp;
        }
        (self.vnf + vf + self.mixer_dc) * self.vol as i32
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_sums_voices_times_volume() {
        let mut filter = Filter::new(ChipModel::Mos8580);
        filter.set_mode_vol(0x0f); // volume 15, no filter modes
        filter.set_res_filt(0x00); // nothing routed through the filter
        let (v1, v2, v3) = (1 << 7, 2 << 7, 3 << 7);
        filter.clock_delta(8, v1, v2, v3, 0);
        assert_eq!(filter.output(), (1 + 2 + 3) * 15);

        // The emulator-level disable switch yields the same identity.
        filter.set_enabled(false);
        filter.clock_delta(8, v1, v2, v3, 0);
        assert_eq!(filter.output(), (1 + 2 + 3) * 15);
    }

    #[test]
    fn bypass_identity_with_6581_mixer_dc() {
        let mut filter = Filter::new(ChipModel::Mos6581);
        filter.set_mode_vol(0x0f);
        filter.set_res_filt(0x00);
        let (v1, v2, v3) = (100 << 7, 200 << 7, 300 << 7);
        filter.clock_delta(8, v1, v2, v3, 0);
        assert_eq!(filter.output(), (100 + 200 + 300 + MIXER_DC_6581) * 15);
    }

    #[test]
    fn voice3_off_silences_unrouted_voice3() {
        let mut filter = Filter::new(ChipModel::Mos8580);
        filter.set_mode_vol(0x8f); // voice3off + volume 15
        filter.set_res_filt(0x00);
        filter.clock_delta(8, 0, 0, 500 << 7, 0);
        assert_eq!(filter.output(), 0);

        // Routed through the filter, voice 3 is not silenced.
        filter.set_fc_hi(0xff);
        filter.set_res_filt(0x04);
        filter.clock_delta(64, 0, 0, 500 << 7, 0);
        assert_ne!(filter.vbp, 0);
    }

    #[test]
    fn routing_splits_input_and_bypass() {
        let mut filter = Filter::new(ChipModel::Mos8580);
        filter.set_res_filt(0x01);
        let inputs = filter.scale_inputs(1 << 7, 2 << 7, 3 << 7, 4 << 7);
        let vi = filter.route(inputs);
        assert_eq!(vi, 1);
        assert_eq!(filter.vnf, 2 + 3 + 4);

        filter.set_res_filt(0x0e);
        let inputs = filter.scale_inputs(1 << 7, 2 << 7, 3 << 7, 4 << 7);
        let vi = filter.route(inputs);
        assert_eq!(vi, 2 + 3 + 4);
        assert_eq!(filter.vnf, 1);
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut filter = Filter::new(ChipModel::Mos8580);
        filter.set_fc_hi(0xff);
        filter.set_fc_lo(0x07);
        filter.set_res_filt(0x01);
        filter.set_mode_vol(0x1f); // lowpass, volume 15
        // Feed a constant and let the integrators settle.
        for _ in 0..20_000 {
            filter.clock(1000 << 7, 0, 0, 0);
        }
        // The filter stages are inverting, as on hardware.
        let settled = filter.output() / 15;
        assert!((settled + 1000).abs() < 50, "settled at {settled}");
    }

    #[test]
    fn cutoff_tables_match_measured_endpoints() {
        let f6581 = cutoff_table(ChipModel::Mos6581);
        assert_eq!(f6581[0], 220);
        assert_eq!(f6581[1023], 6000);
        assert_eq!(f6581[1024], 4600);
        assert_eq!(f6581[2047], 18000);
        let f8580 = cutoff_table(ChipModel::Mos8580);
        assert_eq!(f8580[0], 0);
        assert_eq!(f8580[2047], 12500);
        // Monotonic on each side of the 6581 discontinuity.
        assert!(f6581[512] < f6581[768]);
        assert!(f6581[1100] < f6581[1500]);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut a = Filter::new(ChipModel::Mos6581);
        a.set_fc_hi(0x55);
        a.set_res_filt(0xf7);
        a.set_mode_vol(0x9f);
        a.clock_delta(100, 4000 << 7, 0, 0, 0);
        a.reset();
        let once = (a.fc, a.filt, a.res, a.vhp, a.vbp, a.vlp, a.vnf, a.w0, a.q_1024_div);
        a.reset();
        let twice = (a.fc, a.filt, a.res, a.vhp, a.vbp, a.vlp, a.vnf, a.w0, a.q_1024_div);
        assert_eq!(once, twice);
    }
}
