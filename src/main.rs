use std::fs;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use crossbeam_channel::{bounded, select};
use log::info;

use sidelight::audio;
use sidelight::player::sid_file::load_sid;
use sidelight::player::Player;
use sidelight::{ChipModel, PlayerError};

/// Play a PSID tune through a cycle-accurate SID model.
#[derive(Parser)]
#[command(name = "sidelight", version, about)]
struct Args {
    /// PSID file to play
    file: PathBuf,

    /// Subtune to start with (0-based; -1 = use the file default)
    #[arg(
        short = 'a',
        long = "subtune",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    subtune: i32,

    /// Playback sample rate in Hz
    #[arg(short = 's', long = "sample-rate", default_value_t = 22_050)]
    sample_rate: u32,

    /// SID model: 0 = 6581, 1 = 8580
    #[arg(short = 'm', long = "model", default_value_t = 0)]
    model: u8,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("sidelight: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), PlayerError> {
    let chip_model = match args.model {
        1 => ChipModel::Mos8580,
        _ => ChipModel::Mos6581,
    };

    let data = fs::read(&args.file)?;
    let sid_file = load_sid(&data)?;
    let header = &sid_file.header;
    info!("name: {}", header.name);
    info!("author: {}", header.author);
    info!("released: {}", header.released);
    info!(
        "load ${:04X} init ${:04X} play ${:04X}, {} song(s), start song {}, speed ${:08X}",
        sid_file.load_address,
        header.init_address,
        header.play_address,
        header.songs,
        header.start_song,
        header.speed,
    );
    info!(
        "sid model: {}",
        match chip_model {
            ChipModel::Mos6581 => "6581",
            ChipModel::Mos8580 => "8580",
        }
    );

    let mut player = Player::new(&sid_file, chip_model, args.sample_rate, args.subtune);
    player.start();

    // The stream owns the player; it must stay alive until we are done.
    let (err_tx, err_rx) = bounded::<String>(1);
    let _stream = audio::start_stream(player, args.sample_rate, err_tx)?;

    // Wait for Enter on a helper thread so stream faults can interrupt us.
    let (quit_tx, quit_rx) = bounded::<()>(1);
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = quit_tx.send(());
    });

    println!("Press the Enter key to stop");
    select! {
        recv(quit_rx) -> _ => {}
        recv(err_rx) -> err => {
            if let Ok(err) = err {
                return Err(PlayerError::AudioBackend(err));
            }
        }
    }

    Ok(())
}
