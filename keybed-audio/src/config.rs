use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use keybed_types::{clamp_volume, EffectsParams, NoteId};

use crate::engine::backend::ChainSettings;
use crate::engine::samples::SampleLibrary;
use crate::paths;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    samples: SamplesConfig,
    #[serde(default)]
    notes: BTreeMap<String, String>,
    #[serde(default)]
    effects: EffectsConfig,
    #[serde(default)]
    chain: ChainConfig,
    #[serde(default)]
    output: OutputConfig,
}

#[derive(Deserialize, Default)]
struct SamplesConfig {
    dir: Option<PathBuf>,
    extension: Option<String>,
}

#[derive(Deserialize, Default)]
struct EffectsConfig {
    bass_db: Option<f32>,
    treble_db: Option<f32>,
    reverb_mix: Option<f32>,
    echo_mix: Option<f32>,
}

#[derive(Deserialize, Default)]
struct ChainConfig {
    bass_freq_hz: Option<f32>,
    treble_freq_hz: Option<f32>,
    delay_time_secs: Option<f32>,
    delay_feedback: Option<f32>,
    reverb_room_size: Option<f32>,
    reverb_damping: Option<f32>,
}

#[derive(Deserialize, Default)]
struct OutputConfig {
    device: Option<String>,
    master_volume: Option<f32>,
}

/// A user config file that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

pub struct Config {
    samples: SamplesConfig,
    notes: BTreeMap<NoteId, String>,
    effects: EffectsConfig,
    chain: ChainConfig,
    output: OutputConfig,
}

impl Config {
    /// Embedded defaults merged with the user file, if one exists and parses.
    pub fn load() -> Self {
        let mut config = Self::embedded();

        if let Some(path) = paths::user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => config.merge(user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        config
    }

    /// Embedded defaults merged with `contents`.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let user: ConfigFile =
            toml::from_str(contents).map_err(|e| ConfigError(e.to_string()))?;
        let mut config = Self::embedded();
        config.merge(user);
        Ok(config)
    }

    fn embedded() -> Self {
        let base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| {
            log::error!(target: "config", "embedded config.toml is invalid: {}", e);
            ConfigFile::default()
        });
        let mut config = Config {
            samples: SamplesConfig::default(),
            notes: BTreeMap::new(),
            effects: EffectsConfig::default(),
            chain: ChainConfig::default(),
            output: OutputConfig::default(),
        };
        config.merge(base);
        config
    }

    fn merge(&mut self, file: ConfigFile) {
        merge_samples(&mut self.samples, file.samples);
        merge_effects(&mut self.effects, file.effects);
        merge_chain(&mut self.chain, file.chain);
        merge_output(&mut self.output, file.output);

        for (key, asset) in file.notes {
            match key.parse::<NoteId>() {
                Ok(note) => {
                    self.notes.insert(note, asset);
                }
                Err(e) => log::warn!(target: "config", "ignoring [notes] entry: {}", e),
            }
        }
    }

    /// Sample directory: the configured one, else the resolved default.
    pub fn samples_dir(&self) -> PathBuf {
        self.samples
            .dir
            .clone()
            .unwrap_or_else(paths::samples_dir)
    }

    pub fn sample_extension(&self) -> &str {
        self.samples.extension.as_deref().unwrap_or("wav")
    }

    /// Sample asset stem for a note, honouring `[notes]` overrides.
    pub fn asset_name(&self, note: NoteId) -> &str {
        self.notes
            .get(&note)
            .map(String::as_str)
            .unwrap_or_else(|| note.asset_name())
    }

    /// Note -> sample file mapping built from this config.
    pub fn sample_library(&self) -> SampleLibrary {
        let mut library = SampleLibrary::new(self.samples_dir(), self.sample_extension());
        for note in NoteId::ALL {
            library.set_asset_name(note, self.asset_name(note));
        }
        library
    }

    /// Initial effect values, clamped to their ranges.
    pub fn effects(&self) -> EffectsParams {
        let fallback = EffectsParams::default();
        EffectsParams {
            bass_db: self.effects.bass_db.unwrap_or(fallback.bass_db),
            treble_db: self.effects.treble_db.unwrap_or(fallback.treble_db),
            reverb_mix: self.effects.reverb_mix.unwrap_or(fallback.reverb_mix),
            echo_mix: self.effects.echo_mix.unwrap_or(fallback.echo_mix),
        }
        .clamped()
    }

    /// Fixed effect-chain settings, clamped to what the render graph supports.
    pub fn chain(&self) -> ChainSettings {
        let fallback = ChainSettings::default();
        ChainSettings {
            bass_freq_hz: self
                .chain
                .bass_freq_hz
                .unwrap_or(fallback.bass_freq_hz)
                .clamp(20.0, 20_000.0),
            treble_freq_hz: self
                .chain
                .treble_freq_hz
                .unwrap_or(fallback.treble_freq_hz)
                .clamp(20.0, 20_000.0),
            delay_time_secs: self
                .chain
                .delay_time_secs
                .unwrap_or(fallback.delay_time_secs)
                .clamp(0.01, 2.0),
            delay_feedback: self
                .chain
                .delay_feedback
                .unwrap_or(fallback.delay_feedback)
                .clamp(0.0, 0.95),
            reverb_room_size: self
                .chain
                .reverb_room_size
                .unwrap_or(fallback.reverb_room_size)
                .clamp(0.0, 1.0),
            reverb_damping: self
                .chain
                .reverb_damping
                .unwrap_or(fallback.reverb_damping)
                .clamp(0.0, 1.0),
        }
    }

    /// Override the sample directory, e.g. from the command line.
    pub fn set_samples_dir(&mut self, dir: PathBuf) {
        self.samples.dir = Some(dir);
    }

    pub fn set_output_device(&mut self, device: String) {
        self.output.device = Some(device);
    }

    /// Output device name; `None` means the system default.
    pub fn output_device(&self) -> Option<&str> {
        self.output.device.as_deref()
    }

    pub fn master_volume(&self) -> f32 {
        clamp_volume(self.output.master_volume.unwrap_or(1.0))
    }
}

fn merge_samples(base: &mut SamplesConfig, user: SamplesConfig) {
    if user.dir.is_some() {
        base.dir = user.dir;
    }
    if user.extension.is_some() {
        base.extension = user.extension;
    }
}

fn merge_effects(base: &mut EffectsConfig, user: EffectsConfig) {
    if user.bass_db.is_some() {
        base.bass_db = user.bass_db;
    }
    if user.treble_db.is_some() {
        base.treble_db = user.treble_db;
    }
    if user.reverb_mix.is_some() {
        base.reverb_mix = user.reverb_mix;
    }
    if user.echo_mix.is_some() {
        base.echo_mix = user.echo_mix;
    }
}

fn merge_chain(base: &mut ChainConfig, user: ChainConfig) {
    if user.bass_freq_hz.is_some() {
        base.bass_freq_hz = user.bass_freq_hz;
    }
    if user.treble_freq_hz.is_some() {
        base.treble_freq_hz = user.treble_freq_hz;
    }
    if user.delay_time_secs.is_some() {
        base.delay_time_secs = user.delay_time_secs;
    }
    if user.delay_feedback.is_some() {
        base.delay_feedback = user.delay_feedback;
    }
    if user.reverb_room_size.is_some() {
        base.reverb_room_size = user.reverb_room_size;
    }
    if user.reverb_damping.is_some() {
        base.reverb_damping = user.reverb_damping;
    }
}

fn merge_output(base: &mut OutputConfig, user: OutputConfig) {
    if user.device.is_some() {
        base.device = user.device;
    }
    if user.master_volume.is_some() {
        base.master_volume = user.master_volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_defaults_parse() {
        toml::from_str::<ConfigFile>(DEFAULT_CONFIG).expect("embedded config.toml");
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.effects(), EffectsParams::default());
        assert_eq!(config.chain(), ChainSettings::default());
        assert_eq!(config.sample_extension(), "wav");
        assert_eq!(config.master_volume(), 1.0);
        assert_eq!(config.output_device(), None);
    }

    #[test]
    fn user_values_override_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            [effects]
            reverb_mix = 40.0

            [chain]
            delay_time_secs = 0.5
            "#,
        )
        .unwrap();

        let effects = config.effects();
        assert_eq!(effects.reverb_mix, 40.0);
        assert_eq!(effects.echo_mix, 0.0);
        assert_eq!(effects.bass_db, 0.0);

        let chain = config.chain();
        assert_eq!(chain.delay_time_secs, 0.5);
        assert_eq!(chain.delay_feedback, ChainSettings::default().delay_feedback);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = Config::from_toml_str(
            r#"
            [effects]
            bass_db = -80.0
            echo_mix = 250.0

            [chain]
            delay_feedback = 1.5

            [output]
            master_volume = 3.0
            "#,
        )
        .unwrap();

        assert_eq!(config.effects().bass_db, -20.0);
        assert_eq!(config.effects().echo_mix, 100.0);
        assert_eq!(config.chain().delay_feedback, 0.95);
        assert_eq!(config.master_volume(), 1.0);
    }

    #[test]
    fn note_asset_overrides() {
        let config = Config::from_toml_str(
            r#"
            [samples]
            dir = "/opt/piano"
            extension = "aif"

            [notes]
            "C#" = "c_sharp_soft"
            Bb = "ignored"
            "#,
        )
        .unwrap();

        assert_eq!(config.asset_name(NoteId::Cs), "c_sharp_soft");
        assert_eq!(config.asset_name(NoteId::D), "d");
        assert_eq!(config.samples_dir(), PathBuf::from("/opt/piano"));

        let library = config.sample_library();
        assert_eq!(
            library.path_for(NoteId::Cs),
            PathBuf::from("/opt/piano/c_sharp_soft.aif")
        );
    }

    #[test]
    fn malformed_user_config_is_an_error() {
        assert!(Config::from_toml_str("[effects]\nbass_db = \"loud\"").is_err());
    }

    #[test]
    fn command_line_overrides_replace_file_values() {
        let mut config =
            Config::from_toml_str("[samples]\ndir = \"/srv/a\"\n[output]\ndevice = \"hw:0\"").unwrap();
        config.set_samples_dir(PathBuf::from("/srv/b"));
        config.set_output_device("pulse".to_string());

        assert_eq!(config.samples_dir(), PathBuf::from("/srv/b"));
        assert_eq!(config.output_device(), Some("pulse"));
        assert_eq!(
            config.sample_library().path_for(NoteId::G),
            PathBuf::from("/srv/b/g.wav")
        );
    }
}
