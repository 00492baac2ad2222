use std::fmt;
use std::path::PathBuf;

use keybed_types::NoteId;

/// Errors reported synchronously by engine operations.
///
/// Every failure is local to the call that raised it: the registry, the
/// graph and the lifecycle state are left as they were before the call.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No sample file exists for the note.
    AssetNotFound { note: NoteId, path: PathBuf },
    /// The graph refused to attach, wire or play the voice.
    GraphAttachFailed { note: NoteId, reason: String },
    /// The processing context could not be built or started.
    EngineStartFailed(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::AssetNotFound { note, path } => {
                write!(f, "no sample for note {} at {}", note, path.display())
            }
            AudioError::GraphAttachFailed { note, reason } => {
                write!(f, "could not attach voice for note {}: {}", note, reason)
            }
            AudioError::EngineStartFailed(reason) => {
                write!(f, "audio engine failed to start: {}", reason)
            }
        }
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_note() {
        let err = AudioError::AssetNotFound {
            note: NoteId::Cs,
            path: PathBuf::from("/samples/csharp.wav"),
        };
        assert_eq!(err.to_string(), "no sample for note C# at /samples/csharp.wav");

        let err = AudioError::GraphAttachFailed {
            note: NoteId::A,
            reason: "engine is not running".to_string(),
        };
        assert!(err.to_string().contains("note A"));
    }
}
