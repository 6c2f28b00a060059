//! Cycle-accurate PSID playback.
//!
//! The core is a reSID-derived MOS 6581/8580 model (three oscillators with
//! hard sync and ring modulation, three ADSR envelopes, the state-variable
//! filter and the board-level RC filter) coupled to a 6502 CPU over an
//! observed 64K bus. The driver interleaves play-routine execution, SID
//! clocking and sample emission at the output rate, all inside the audio
//! host's pull callback.

pub mod audio;
pub mod error;
pub mod player;
pub mod sid;

pub use error::PlayerError;
pub use sid::{ChipModel, Sid};
