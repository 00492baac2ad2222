use serde::{Deserialize, Serialize};

/// Shared effect-chain settings. One instance per engine; every update
/// replaces all four values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectsParams {
    /// Low-shelf gain in dB.
    pub bass_db: f32,
    /// High-shelf gain in dB.
    pub treble_db: f32,
    /// Reverb wet/dry mix, percent.
    pub reverb_mix: f32,
    /// Delay wet/dry mix, percent.
    pub echo_mix: f32,
}

impl EffectsParams {
    pub const GAIN_MIN_DB: f32 = -20.0;
    pub const GAIN_MAX_DB: f32 = 20.0;
    pub const MIX_MIN: f32 = 0.0;
    pub const MIX_MAX: f32 = 100.0;

    pub fn new(bass_db: f32, treble_db: f32, reverb_mix: f32, echo_mix: f32) -> Self {
        Self {
            bass_db,
            treble_db,
            reverb_mix,
            echo_mix,
        }
    }

    /// Clamp every field into its declared range. NaN becomes the neutral value.
    pub fn clamped(self) -> Self {
        Self {
            bass_db: clamp_or(self.bass_db, Self::GAIN_MIN_DB, Self::GAIN_MAX_DB, 0.0),
            treble_db: clamp_or(self.treble_db, Self::GAIN_MIN_DB, Self::GAIN_MAX_DB, 0.0),
            reverb_mix: clamp_or(self.reverb_mix, Self::MIX_MIN, Self::MIX_MAX, 0.0),
            echo_mix: clamp_or(self.echo_mix, Self::MIX_MIN, Self::MIX_MAX, 0.0),
        }
    }
}

impl Default for EffectsParams {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Clamp a voice or master gain into `[0, 1]`. NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    clamp_or(volume, 0.0, 1.0, 0.0)
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_limits_each_field() {
        let p = EffectsParams::new(-35.0, 21.5, 140.0, -3.0).clamped();
        assert_eq!(p, EffectsParams::new(-20.0, 20.0, 100.0, 0.0));
    }

    #[test]
    fn clamped_keeps_in_range_values_verbatim() {
        let p = EffectsParams::new(-4.5, 7.25, 33.0, 61.0);
        assert_eq!(p.clamped(), p);
    }

    #[test]
    fn nan_and_infinities() {
        let p = EffectsParams::new(f32::NAN, f32::INFINITY, f32::NEG_INFINITY, f32::NAN).clamped();
        assert_eq!(p, EffectsParams::new(0.0, 20.0, 0.0, 0.0));
        assert_eq!(clamp_volume(f32::NAN), 0.0);
        assert_eq!(clamp_volume(1.7), 1.0);
        assert_eq!(clamp_volume(-0.1), 0.0);
        assert_eq!(clamp_volume(0.42), 0.42);
    }
}
