// ADSR envelope generator with the rate-counter wrap ("ADSR delay bug") and
// the piecewise-linear exponential decay of the real chip.

// Rate counter periods, indexed by the 4-bit attack/decay/release value.
// The counter period is the number of cycles between envelope steps; the
// values were measured on hardware by timing ENV3 between level 1 and 129
// with the CIA timers in linked mode, so they include the one-cycle delay
// the designers did not account for when zeroing the counter.
static RATE_COUNTER_PERIOD: [u16; 16] = [
    9,     //   2ms*1.0MHz/256 =     7.81
    32,    //   8ms*1.0MHz/256 =    31.25
    63,    //  16ms*1.0MHz/256 =    62.50
    95,    //  24ms*1.0MHz/256 =    93.75
    149,   //  38ms*1.0MHz/256 =   148.44
    220,   //  56ms*1.0MHz/256 =   218.75
    267,   //  68ms*1.0MHz/256 =   265.63
    313,   //  80ms*1.0MHz/256 =   312.50
    392,   // 100ms*1.0MHz/256 =   390.63
    977,   // 250ms*1.0MHz/256 =   976.56
    1954,  // 500ms*1.0MHz/256 =  1953.13
    3126,  // 800ms*1.0MHz/256 =  3125.00
    3907,  //   1 s*1.0MHz/256 =  3906.25
    11720, //   3 s*1.0MHz/256 = 11718.75
    19532, //   5 s*1.0MHz/256 = 19531.25
    31251, //   8 s*1.0MHz/256 = 31250.00
];

// Both nibbles of the envelope counter are compared against the 4-bit
// sustain value, so the sustain level is the nibble duplicated.
static SUSTAIN_LEVEL: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb,
    0xcc, 0xdd, 0xee, 0xff,
];

#[derive(Clone, Copy, Debug, PartialEq)]
enum State {
    Attack,
    DecaySustain,
    Release,
}

/// A 15-bit counter divides the clock down to envelope steps; a second
/// counter with period 1, 2, 4, 8, 16 or 30 (reloaded at envelope levels
/// 0xff, 0x5d, 0x36, 0x1a, 0x0e, 0x06, 0x00) shapes decay and release into
/// a piecewise-linear approximation of an exponential.
pub struct EnvelopeGenerator {
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
    gate: bool,
    state: State,
    envelope_counter: u8,
    exponential_counter: u8,
    exponential_counter_period: u8,
    hold_zero: bool,
    rate_counter: u16,
    rate_period: u16,
}

impl EnvelopeGenerator {
    pub fn new() -> Self {
        let mut envelope = EnvelopeGenerator {
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            gate: false,
            state: State::Release,
            envelope_counter: 0,
            exponential_counter: 0,
            exponential_counter_period: 1,
            hold_zero: true,
            rate_counter: 0,
            rate_period: 0,
        };
        envelope.reset();
        envelope
    }

    pub fn reset(&mut self) {
        self.attack = 0;
        self.decay = 0;
        self.sustain = 0;
        self.release = 0;
        self.gate = false;
        self.state = State::Release;
        self.envelope_counter = 0;
        self.exponential_counter = 0;
        self.exponential_counter_period = 1;
        self.hold_zero = true;
        self.rate_counter = 0;
        self.rate_period = RATE_COUNTER_PERIOD[self.release as usize];
    }

    /// Gate bit. 0 -> 1 starts attack and unlocks the zero freeze; 1 -> 0
    /// starts release. The rate counter is never reset, so there is a delay
    /// before the envelope starts moving.
    pub fn set_control(&mut self, value: u8) {
        let gate = value & 0x01 != 0;
        if !self.gate && gate {
            self.state = State::Attack;
            self.rate_period = RATE_COUNTER_PERIOD[self.attack as usize];
            self.hold_zero = false;
        } else if self.gate && !gate {
            self.state = State::Release;
            self.rate_period = RATE_COUNTER_PERIOD[self.release as usize];
        }
        self.gate = gate;
    }

    pub fn set_attack_decay(&mut self, value: u8) {
        self.attack = (value >> 4) & 0x0f;
        self.decay = value & 0x0f;
        match self.state {
            State::Attack => self.rate_period = RATE_COUNTER_PERIOD[self.attack as usize],
            State::DecaySustain => self.rate_period = RATE_COUNTER_PERIOD[self.decay as usize],
            State::Release => {}
        }
    }

    pub fn set_sustain_release(&mut self, value: u8) {
        self.sustain = (value >> 4) & 0x0f;
        self.release = value & 0x0f;
        if self.state == State::Release {
            self.rate_period = RATE_COUNTER_PERIOD[self.release as usize];
        }
    }

    pub fn clock_delta(&mut self, mut delta: u32) {
        // If the comparison value was written below the current counter, the
        // counter keeps counting up until it wraps to zero at 0x8000 before
        // the envelope can step again; verified by sampling ENV3.
        let mut rate_step = self.rate_period as i32 - self.rate_counter as i32;
        if rate_step <= 0 {
            rate_step += 0x7fff;
        }

        while delta > 0 {
            if (delta as i32) < rate_step {
                self.rate_counter += delta as u16;
                if self.rate_counter & 0x8000 != 0 {
                    self.rate_counter += 1;
                    self.rate_counter &= 0x7fff;
                }
                return;
            }

            self.rate_counter = 0;
            delta -= rate_step as u32;

            // The first envelope step in the attack state also resets the
            // exponential counter; verified by sampling ENV3.
            self.exponential_counter += 1;
            if self.state == State::Attack
                || self.exponential_counter == self.exponential_counter_period
            {
                self.exponential_counter = 0;

                if self.hold_zero {
                    rate_step = self.rate_period as i32;
                    continue;
                }

                match self.state {
                    State::Attack => {
                        // The counter can flip from 0xff to 0x00 by switching
                        // release -> attack at the right moment; it then
                        // freezes at zero until released and re-gated.
                        self.envelope_counter = self.envelope_counter.wrapping_add(1);
                        if self.envelope_counter == 0xff {
                            self.state = State::DecaySustain;
                            self.rate_period = RATE_COUNTER_PERIOD[self.decay as usize];
                        }
                    }
                    State::DecaySustain => {
                        if self.envelope_counter != SUSTAIN_LEVEL[self.sustain as usize] {
                            self.envelope_counter -= 1;
                        }
                    }
                    State::Release => {
                        // The counter may likewise flip 0x00 -> 0xff and keep
                        // counting down in the release state.
                        self.envelope_counter = self.envelope_counter.wrapping_sub(1);
                    }
                }

                match self.envelope_counter {
                    0xff => self.exponential_counter_period = 1,
                    0x5d => self.exponential_counter_period = 2,
                    0x36 => self.exponential_counter_period = 4,
                    0x1a => self.exponential_counter_period = 8,
                    0x0e => self.exponential_counter_period = 16,
                    0x06 => self.exponential_counter_period = 30,
                    0x00 => {
                        self.exponential_counter_period = 1;
                        // Once the counter reaches zero it is frozen there.
                        self.hold_zero = true;
                    }
                    _ => {}
                }
            }

            rate_step = self.rate_period as i32;
        }
    }

    #[inline]
    pub fn output(&self) -> u8 {
        self.envelope_counter
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────────────────────
