use std::path::PathBuf;

/// Resolve the directory holding the note samples.
///
/// Fallback chain:
/// 1. `KEYBED_SAMPLES_DIR` env var (runtime override)
/// 2. `CARGO_MANIFEST_DIR/../assets/samples` (compile-time, the workspace asset dir)
/// 3. `./samples` relative to CWD
pub fn samples_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KEYBED_SAMPLES_DIR") {
        return PathBuf::from(dir);
    }

    let compile_time = PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../assets/samples"
    ));
    if compile_time.exists() {
        return compile_time;
    }

    PathBuf::from("samples")
}

/// User config file location (`~/.config/keybed/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keybed").join("config.toml"))
}
