//! Effect stages of the shared chain: equalizer, echo and reverb.
//!
//! All buffers are allocated when a stage is constructed; processing never
//! allocates. Filter coefficients are computed on the control side and
//! handed over ready to use.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Q_BUTTERWORTH_F32};

use crate::engine::backend::BackendError;

/// Which shelf of the equalizer a coefficient set is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shelf {
    Low,
    High,
}

/// Shelf coefficients for `gain_db` at corner `freq_hz`.
///
/// The corner is kept below Nyquist so any configured frequency yields a
/// stable filter at the device rate.
pub fn shelf_coefficients(
    shelf: Shelf,
    sample_rate: f32,
    freq_hz: f32,
    gain_db: f32,
) -> Result<Coefficients<f32>, BackendError> {
    let corner = freq_hz.clamp(10.0, sample_rate * 0.45);
    let filter = match shelf {
        Shelf::Low => biquad::Type::LowShelf(gain_db),
        Shelf::High => biquad::Type::HighShelf(gain_db),
    };
    Coefficients::<f32>::from_params(filter, sample_rate.hz(), corner.hz(), Q_BUTTERWORTH_F32)
        .map_err(|e| BackendError(format!("{:?} shelf at {} Hz: {:?}", shelf, corner, e)))
}

/// Two-band shelving equalizer (bass and treble).
pub struct Equalizer {
    low: DirectForm2Transposed<f32>,
    high: DirectForm2Transposed<f32>,
}

impl Equalizer {
    pub fn new(low: Coefficients<f32>, high: Coefficients<f32>) -> Self {
        Self {
            low: DirectForm2Transposed::<f32>::new(low),
            high: DirectForm2Transposed::<f32>::new(high),
        }
    }

    pub fn set_coefficients(&mut self, low: Coefficients<f32>, high: Coefficients<f32>) {
        self.low.update_coefficients(low);
        self.high.update_coefficients(high);
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.high.run(self.low.run(*sample));
        }
    }
}

/// Feedback delay with a wet/dry mix.
pub struct Echo {
    buffer: Vec<f32>,
    write_pos: usize,
    delay_samples: usize,
    feedback: f32,
    mix: f32,
}

impl Echo {
    pub fn new(sample_rate: f32, delay_secs: f32, feedback: f32) -> Self {
        let delay_samples = ((delay_secs * sample_rate) as usize).max(1);
        Self {
            buffer: vec![0.0; delay_samples + 1],
            write_pos: 0,
            delay_samples,
            feedback: feedback.clamp(0.0, 0.95),
            mix: 0.0,
        }
    }

    /// Wet proportion in `[0, 1]`.
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        let len = self.buffer.len();
        for sample in buffer.iter_mut() {
            let read_pos = (self.write_pos + len - self.delay_samples) % len;
            let delayed = self.buffer[read_pos];
            self.buffer[self.write_pos] = *sample + delayed * self.feedback;
            self.write_pos = (self.write_pos + 1) % len;

            *sample = *sample * (1.0 - self.mix) + delayed * self.mix;
        }
    }
}

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp: f32,
    filter_state: f32,
}

impl Comb {
    fn new(len: usize, feedback: f32, damp: f32) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            feedback,
            damp,
            filter_state: 0.0,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        // One-pole lowpass in the loop absorbs highs like a real room.
        self.filter_state = output * (1.0 - self.damp) + self.filter_state * self.damp;
        self.buffer[self.pos] = input + self.filter_state * self.feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

struct Allpass {
    buffer: Vec<f32>,
    pos: usize,
    gain: f32,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            gain: 0.5,
        }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = -self.gain * input + delayed;
        self.buffer[self.pos] = input + self.gain * output;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }
}

/// Schroeder reverb: four parallel combs into two series allpasses.
pub struct Reverb {
    combs: [Comb; 4],
    allpasses: [Allpass; 2],
    mix: f32,
}

const COMB_DELAYS_MS: [f32; 4] = [29.7, 37.1, 41.1, 43.7];
const ALLPASS_DELAYS_MS: [f32; 2] = [5.0, 1.7];

impl Reverb {
    pub fn new(sample_rate: f32, room_size: f32, damping: f32) -> Self {
        let feedback = 0.7 + room_size.clamp(0.0, 1.0) * 0.28;
        let damp = damping.clamp(0.0, 1.0);
        let samples = |ms: f32| (ms * sample_rate / 1000.0) as usize;

        Self {
            combs: COMB_DELAYS_MS.map(|ms| Comb::new(samples(ms), feedback, damp)),
            allpasses: ALLPASS_DELAYS_MS.map(|ms| Allpass::new(samples(ms))),
            mix: 0.0,
        }
    }

    /// Wet proportion in `[0, 1]`.
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            let dry = *sample;
            let mut wet = 0.0;
            for comb in &mut self.combs {
                wet += comb.process(dry);
            }
            wet *= 0.25;
            for allpass in &mut self.allpasses {
                wet = allpass.process(wet);
            }
            *sample = dry * (1.0 - self.mix) + wet * self.mix;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    #[test]
    fn flat_equalizer_passes_signal() {
        let low = shelf_coefficients(Shelf::Low, SR, 200.0, 0.0).unwrap();
        let high = shelf_coefficients(Shelf::High, SR, 6000.0, 0.0).unwrap();
        let mut eq = Equalizer::new(low, high);

        let mut buf = vec![0.5; 4800];
        eq.process(&mut buf);
        assert!((buf[4799] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn bass_boost_raises_dc_level() {
        let low = shelf_coefficients(Shelf::Low, SR, 200.0, 12.0).unwrap();
        let high = shelf_coefficients(Shelf::High, SR, 6000.0, 0.0).unwrap();
        let mut eq = Equalizer::new(low, high);

        let mut buf = vec![0.1; 9600];
        eq.process(&mut buf);
        // +12 dB is roughly 4x at DC.
        assert!(buf[9599] > 0.3, "got {}", buf[9599]);
    }

    #[test]
    fn shelf_corner_is_kept_below_nyquist() {
        assert!(shelf_coefficients(Shelf::High, 22_050.0, 20_000.0, 6.0).is_ok());
    }

    #[test]
    fn dry_echo_is_transparent() {
        let mut echo = Echo::new(SR, 0.01, 0.5);
        let mut buf: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();
        let expected = buf.clone();
        echo.process(&mut buf);
        assert_eq!(buf, expected);
    }

    #[test]
    fn wet_echo_repeats_impulse_after_delay() {
        let mut echo = Echo::new(1000.0, 0.01, 0.5);
        echo.set_mix(1.0);
        let mut buf = vec![0.0; 40];
        buf[0] = 1.0;
        echo.process(&mut buf);

        assert_eq!(buf[0], 0.0);
        assert!((buf[10] - 1.0).abs() < 1e-6);
        assert!((buf[20] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reverb_tail_decays() {
        let mut reverb = Reverb::new(SR, 0.5, 0.5);
        reverb.set_mix(1.0);
        let mut buf = vec![0.0; SR as usize * 3];
        buf[0] = 1.0;
        reverb.process(&mut buf);

        let early: f32 = buf[..4800].iter().map(|s| s.abs()).sum();
        let late: f32 = buf[buf.len() - 4800..].iter().map(|s| s.abs()).sum();
        assert!(early > 0.0);
        assert!(late < early * 0.1);
        assert!(buf.iter().all(|s| s.is_finite()));
    }
}
