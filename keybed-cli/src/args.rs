use std::path::PathBuf;

use keybed_types::NoteId;

pub const USAGE: &str = "\
usage: keybed [options] NOTE...
       keybed --list-devices

Plays NOTEs (C, C#, D ... B) one after another, at most three at a time.

options:
  -v, --verbose        debug logging
  --log-file PATH      log to PATH instead of stderr
  --samples DIR        sample directory
  --device NAME        output device
  --hold-ms N          time between notes (default 400)
  --bass DB            bass shelf gain, -20..20
  --treble DB          treble shelf gain, -20..20
  --reverb PCT         reverb mix, 0..100
  --echo PCT           echo mix, 0..100
  --volume V           master volume, 0..1";

pub const DEFAULT_HOLD_MS: u64 = 400;

#[derive(Debug, Default, PartialEq)]
pub struct Options {
    pub verbose: bool,
    pub help: bool,
    pub list_devices: bool,
    pub log_file: Option<PathBuf>,
    pub samples: Option<PathBuf>,
    pub device: Option<String>,
    pub hold_ms: Option<u64>,
    pub bass_db: Option<f32>,
    pub treble_db: Option<f32>,
    pub reverb_mix: Option<f32>,
    pub echo_mix: Option<f32>,
    pub volume: Option<f32>,
    pub notes: Vec<NoteId>,
}

impl Options {
    pub fn hold_ms(&self) -> u64 {
        self.hold_ms.unwrap_or(DEFAULT_HOLD_MS)
    }
}

fn value<'a>(flag: &str, iter: &mut impl Iterator<Item = &'a String>) -> Result<&'a String, String> {
    iter.next().ok_or_else(|| format!("{} needs a value", flag))
}

fn number<T: std::str::FromStr>(flag: &str, raw: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{}: '{}' is not a number", flag, raw))
}

/// Parse arguments (without the program name).
pub fn parse(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => options.help = true,
            "--list-devices" => options.list_devices = true,
            "--log-file" => options.log_file = Some(PathBuf::from(value(arg, &mut iter)?)),
            "--samples" => options.samples = Some(PathBuf::from(value(arg, &mut iter)?)),
            "--device" => options.device = Some(value(arg, &mut iter)?.clone()),
            "--hold-ms" => options.hold_ms = Some(number(arg, value(arg, &mut iter)?)?),
            "--bass" => options.bass_db = Some(number(arg, value(arg, &mut iter)?)?),
            "--treble" => options.treble_db = Some(number(arg, value(arg, &mut iter)?)?),
            "--reverb" => options.reverb_mix = Some(number(arg, value(arg, &mut iter)?)?),
            "--echo" => options.echo_mix = Some(number(arg, value(arg, &mut iter)?)?),
            "--volume" => options.volume = Some(number(arg, value(arg, &mut iter)?)?),
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            note => options
                .notes
                .push(note.parse::<NoteId>().map_err(|e| e.to_string())?),
        }
    }

    if options.notes.is_empty() && !options.help && !options.list_devices {
        return Err("no notes given".to_string());
    }
    Ok(options)
}
