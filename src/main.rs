use std::{
    path::PathBuf,
    process::ExitCode,
    sync::atomic::Ordering,
    thread,
};

use clap::Parser;
use log::{error, info, warn};

use emuchip::{
    display::FrameSlot,
    keyboard::{ChannelKeypad, InputEvent},
    sound::{Beeper, Silent, Speaker},
    timer::TICK_INTERVAL,
    window::{scale_from_factor, Window},
    EmuError, Emulator, EmulatorConfig, TimerMode,
};

#[derive(Parser, Debug)]
#[command(version, about = "CHIP-8 interpreter", long_about = None)]
struct Args {
    /// Program image to run
    rom: PathBuf,

    /// Run one instruction per F1 press and log the machine state after each
    #[arg(short, long)]
    debug: bool,

    #[arg(long, value_enum, default_value_t = TimerMode::Blocking)]
    timer_mode: TimerMode,

    /// Seed for the random instruction
    #[arg(long)]
    seed: Option<u64>,

    /// Window scale factor
    #[arg(long, default_value_t = 16)]
    scale: u8,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "emuchip=debug"
    } else {
        "emuchip=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), EmuError> {
    let config = EmulatorConfig {
        timer_mode: args.timer_mode,
        tick_interval: TICK_INTERVAL,
        seed: args.seed,
        step_mode: args.debug,
    };

    let (input, keypad) = ChannelKeypad::channel();
    let frames = FrameSlot::new();

    // the stream has to outlive the engine thread
    let (beeper, speaker): (Option<Beeper>, Box<dyn Speaker + Send>) = match Beeper::new() {
        Ok((beeper, handle)) => (Some(beeper), Box::new(handle)),
        Err(err) => {
            warn!("{err}, running without sound");
            (None, Box::new(Silent))
        }
    };

    let mut emu = Emulator::new(
        &config,
        Box::new(frames.clone()),
        speaker,
        Box::new(keypad),
    );
    emu.load_program_file(&args.rom)?;
    info!("running {}", args.rom.display());

    let quit = emu.quit_handle();
    let mut window = Window::new("emuchip - ESC to exit", scale_from_factor(args.scale))?;
    if args.debug {
        info!("step mode: press F1 to run the next instruction");
    }
    let engine = thread::spawn(move || emu.run());

    let mut frontend = Ok(());
    while window.is_open() && !engine.is_finished() {
        window.poll_input(&input);
        if let Some(frame) = frames.take() {
            window.blit(&frame);
        }
        if let Err(err) = window.sync() {
            frontend = Err(err);
            break;
        }
    }

    quit.store(true, Ordering::Release);
    // wakes the engine if it is blocked waiting for a key or a step
    let _ = input.send(InputEvent::Quit);
    let result = engine
        .join()
        .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
    drop(beeper);

    result.and(frontend)
}
