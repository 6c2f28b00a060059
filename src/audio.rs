// cpal output glue. The whole emulation (play-routine cadence, SID
// clocking, sample emission) runs inside the stream's pull callback; the
// callback always fills the requested number of frames.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::error::PlayerError;
use crate::player::Player;

/// Open the default output device at the requested rate and hand the player
/// to the stream callback. Stream faults are reported through `err_tx`
/// since the error callback runs on the audio thread.
pub fn start_stream(
    mut player: Player,
    sample_rate: u32,
    err_tx: Sender<String>,
) -> Result<cpal::Stream, PlayerError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlayerError::AudioBackend("no audio output device found".into()))?;

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut scratch: Vec<i16> = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0);
                player.play(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = sample as f32 / 32768.0;
                }
            },
            move |err| {
                let _ = err_tx.try_send(err.to_string());
            },
            None,
        )
        .map_err(|e| PlayerError::AudioBackend(e.to_string()))?;

    stream
        .play()
        .map_err(|e| PlayerError::AudioBackend(e.to_string()))?;

    Ok(stream)
}
