mod args;
mod keyboard;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keybed_audio::{render, AudioEngine, CompletionPump, Config, CpalBackend};
use keybed_types::{EffectsParams, NoteId, VoiceEvent};

use args::Options;
use keyboard::{Keyboard, Press};

fn init_logging(verbose: bool, log_file: Option<&Path>) {
    use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode, WriteLogger};

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    let config = simplelog::Config::default();

    let result = match log_file.map(File::create) {
        Some(Ok(file)) => WriteLogger::init(log_level, config, file),
        Some(Err(e)) => {
            eprintln!("keybed: cannot create log file: {}", e);
            TermLogger::init(log_level, config, TerminalMode::Stderr, ColorChoice::Auto)
        }
        None => TermLogger::init(log_level, config, TerminalMode::Stderr, ColorChoice::Auto),
    };
    if let Err(e) = result {
        eprintln!("keybed: logger already initialized: {}", e);
    }

    log::info!("keybed starting (log level: {:?})", log_level);
}

/// Command-line effect values layered over the configured ones.
fn effects_override(options: &Options, base: EffectsParams) -> Option<EffectsParams> {
    if options.bass_db.is_none()
        && options.treble_db.is_none()
        && options.reverb_mix.is_none()
        && options.echo_mix.is_none()
    {
        return None;
    }
    Some(EffectsParams::new(
        options.bass_db.unwrap_or(base.bass_db),
        options.treble_db.unwrap_or(base.treble_db),
        options.reverb_mix.unwrap_or(base.reverb_mix),
        options.echo_mix.unwrap_or(base.echo_mix),
    ))
}

fn log_events(events: &crossbeam_channel::Receiver<VoiceEvent>) {
    for event in events.try_iter() {
        match event {
            VoiceEvent::Started(note) => log::debug!("{} started", note),
            VoiceEvent::Ended { note, reason } => log::debug!("{} ended ({:?})", note, reason),
        }
    }
}

fn play(engine: &Arc<AudioEngine>, options: &Options) {
    let hold = Duration::from_millis(options.hold_ms());
    let events = engine.events();
    let mut keyboard = Keyboard::new(engine.clone());

    for &note in &options.notes {
        let mut outcome = keyboard.press(note, 1.0);
        match outcome {
            Ok(Press::AlreadySounding) => {
                keyboard.release(note);
                outcome = keyboard.press(note, 1.0);
            }
            Ok(Press::AtCapacity) => {
                if let Some(oldest) = keyboard.release_oldest() {
                    log::info!("released {} to make room for {}", oldest, note);
                }
                outcome = keyboard.press(note, 1.0);
            }
            _ => {}
        }

        match outcome {
            Ok(Press::Started(_)) => {
                println!("{}", note);
                log::debug!("sounding: {:?}", keyboard.sounding());
            }
            Ok(other) => log::warn!("{} not played: {:?}", note, other),
            Err(e) => eprintln!("keybed: {}", e),
        }

        thread::sleep(hold);
        log_events(&events);
    }

    keyboard.release_all();
    log_events(&events);
}

fn main() -> std::io::Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let options = match args::parse(&argv) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("keybed: {}\n\n{}", e, args::USAGE);
            std::process::exit(2);
        }
    };
    if options.help {
        println!("{}", args::USAGE);
        return Ok(());
    }

    init_logging(options.verbose, options.log_file.as_deref());

    if options.list_devices {
        for name in render::output_devices() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = Config::load();
    if let Some(dir) = &options.samples {
        config.set_samples_dir(dir.clone());
    }
    if let Some(device) = &options.device {
        config.set_output_device(device.clone());
    }

    let backend = CpalBackend::new(config.output_device().map(str::to_string));
    let engine = Arc::new(AudioEngine::from_config(Box::new(backend), &config));

    let missing = engine.samples().missing();
    if !missing.is_empty() {
        log::warn!(
            "{} of {} samples missing in {}",
            missing.len(),
            NoteId::COUNT,
            engine.samples().dir().display()
        );
    }

    if let Some(params) = effects_override(&options, engine.effects()) {
        let applied = engine.set_effects(params);
        log::info!("effects: {:?}", applied);
    }
    if let Some(volume) = options.volume {
        engine.set_master_volume(volume);
    }

    if let Err(e) = engine.start() {
        eprintln!("keybed: {}", e);
        std::process::exit(1);
    }
    let mut pump = CompletionPump::spawn(engine.clone())?;

    play(&engine, &options);

    engine.stop_all();
    engine.stop();
    pump.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_override_keeps_unset_values() {
        let options = args::parse(&["--treble".to_string(), "-4".to_string(), "C".to_string()]).unwrap();
        let base = EffectsParams::new(2.0, 1.0, 30.0, 10.0);

        let merged = effects_override(&options, base).unwrap();
        assert_eq!(merged, EffectsParams::new(2.0, -4.0, 30.0, 10.0));
    }

    #[test]
    fn no_effect_flags_means_no_override() {
        let options = args::parse(&["E".to_string()]).unwrap();
        assert_eq!(effects_override(&options, EffectsParams::default()), None);
    }
}
