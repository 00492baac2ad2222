use std::path::{Path, PathBuf};

use keybed_types::NoteId;

use crate::error::AudioError;

/// Static note -> sample file mapping.
#[derive(Debug, Clone)]
pub struct SampleLibrary {
    dir: PathBuf,
    extension: String,
    assets: [String; NoteId::COUNT],
}

impl SampleLibrary {
    /// Library using the built-in asset names (`C#` -> `csharp`).
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            assets: NoteId::ALL.map(|note| note.asset_name().to_string()),
        }
    }

    pub fn set_asset_name(&mut self, note: NoteId, asset: &str) {
        self.assets[note.index()] = asset.to_string();
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn asset_name(&self, note: NoteId) -> &str {
        &self.assets[note.index()]
    }

    /// Where the sample for `note` is expected, whether or not it exists.
    pub fn path_for(&self, note: NoteId) -> PathBuf {
        let file = if self.extension.is_empty() {
            self.assets[note.index()].clone()
        } else {
            format!("{}.{}", self.assets[note.index()], self.extension)
        };
        self.dir.join(file)
    }

    /// Locate the sample for `note`, failing with `AssetNotFound` if it is missing.
    pub fn resolve(&self, note: NoteId) -> Result<PathBuf, AudioError> {
        let path = self.path_for(note);
        if path.is_file() {
            Ok(path)
        } else {
            log::debug!(target: "audio::samples", "missing sample for {}: {:?}", note, path);
            Err(AudioError::AssetNotFound { note, path })
        }
    }

    /// Notes whose sample file is missing.
    pub fn missing(&self) -> Vec<NoteId> {
        NoteId::ALL
            .into_iter()
            .filter(|&note| !self.path_for(note).is_file())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_uses_asset_name_and_extension() {
        let lib = SampleLibrary::new("/s", ".wav");
        assert_eq!(lib.path_for(NoteId::Fs), PathBuf::from("/s/fsharp.wav"));
        assert_eq!(lib.asset_name(NoteId::C), "c");
    }

    #[test]
    fn resolve_reports_missing_asset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.wav"), b"RIFF").unwrap();

        let lib = SampleLibrary::new(dir.path(), "wav");
        assert_eq!(lib.resolve(NoteId::C).unwrap(), dir.path().join("c.wav"));
        match lib.resolve(NoteId::D) {
            Err(AudioError::AssetNotFound { note, path }) => {
                assert_eq!(note, NoteId::D);
                assert_eq!(path, dir.path().join("d.wav"));
            }
            other => panic!("expected AssetNotFound, got {:?}", other),
        }
        assert_eq!(lib.missing().len(), 11);
    }

    #[test]
    fn a_directory_is_not_a_sample() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("e.wav")).unwrap();
        let lib = SampleLibrary::new(dir.path(), "wav");
        assert!(lib.resolve(NoteId::E).is_err());
    }
}
