//! The render-thread half of the cpal backend.
//!
//! `RenderGraph` owns every voice player, the summing stage and the effect
//! chain. The control side talks to it only through `GraphCommand`s, which
//! are drained at the top of each block, or applied straight through
//! `apply_now` while no stream is rendering. Nothing on the render path
//! allocates, blocks or logs once the graph is built.

use std::sync::Arc;

use biquad::Coefficients;
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};

use super::dsp::{Echo, Equalizer, Reverb};
use crate::engine::backend::{ChainSettings, VoiceNodeId};

/// Upper bound on simultaneously attached players.
pub const MAX_PLAYERS: usize = 64;

/// Frames rendered per inner pass.
const BLOCK_FRAMES: usize = 512;

/// Per-sample step limit for gain ramps, about 5 ms at 48 kHz.
const GAIN_SLEW: f32 = 1.0 / 240.0;

/// Commands sent from the control side to the render thread.
pub enum GraphCommand {
    Attach {
        node: VoiceNodeId,
        frames: Arc<[f32]>,
        /// Source frames advanced per output frame.
        step: f32,
        gain: f32,
    },
    Play(VoiceNodeId),
    SetGain {
        node: VoiceNodeId,
        gain: f32,
    },
    Detach(VoiceNodeId),
    SetMaster(f32),
    /// Shelf coefficients and wet proportions, replaced together.
    SetEffects {
        low: Coefficients<f32>,
        high: Coefficients<f32>,
        delay_mix: f32,
        reverb_mix: f32,
    },
}

struct Player {
    node: VoiceNodeId,
    frames: Arc<[f32]>,
    step: f32,
    position: f32,
    gain: f32,
    current_gain: f32,
    playing: bool,
}

impl Player {
    /// Mix into `out`. Returns true when the end of the sample was reached
    /// during this call.
    fn render(&mut self, out: &mut [f32]) -> bool {
        if !self.playing {
            return false;
        }
        let len = self.frames.len();
        for sample in out.iter_mut() {
            let index = self.position as usize;
            if index >= len {
                self.playing = false;
                return true;
            }
            let frac = self.position - index as f32;
            let a = self.frames[index];
            let b = if index + 1 < len { self.frames[index + 1] } else { 0.0 };

            self.current_gain += (self.gain - self.current_gain).clamp(-GAIN_SLEW, GAIN_SLEW);
            *sample += (a + (b - a) * frac) * self.current_gain;
            self.position += self.step;
        }
        if self.position as usize >= len {
            self.playing = false;
            return true;
        }
        false
    }
}

pub struct RenderGraph {
    commands: Receiver<GraphCommand>,
    completions: Option<Sender<VoiceNodeId>>,
    players: Vec<Player>,
    master: f32,
    eq: Equalizer,
    echo: Echo,
    reverb: Reverb,
    scratch: Vec<f32>,
}

impl RenderGraph {
    pub fn new(
        sample_rate: f32,
        chain: &ChainSettings,
        commands: Receiver<GraphCommand>,
        completions: Option<Sender<VoiceNodeId>>,
        eq_low: Coefficients<f32>,
        eq_high: Coefficients<f32>,
        master: f32,
    ) -> Self {
        Self {
            commands,
            completions,
            players: Vec::with_capacity(MAX_PLAYERS),
            master,
            eq: Equalizer::new(eq_low, eq_high),
            echo: Echo::new(sample_rate, chain.delay_time_secs, chain.delay_feedback),
            reverb: Reverb::new(sample_rate, chain.reverb_room_size, chain.reverb_damping),
            scratch: vec![0.0; BLOCK_FRAMES],
        }
    }

    pub fn set_delay_mix(&mut self, mix: f32) {
        self.echo.set_mix(mix);
    }

    pub fn set_reverb_mix(&mut self, mix: f32) {
        self.reverb.set_mix(mix);
    }

    #[cfg(test)]
    pub(crate) fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Apply `command` immediately, after anything still queued so the
    /// order of control calls is kept.
    pub fn apply_now(&mut self, command: GraphCommand) {
        self.drain_commands();
        self.apply(command);
    }

    fn apply(&mut self, command: GraphCommand) {
        match command {
            GraphCommand::Attach {
                node,
                frames,
                step,
                gain,
            } => {
                if self.players.len() < MAX_PLAYERS {
                    self.players.push(Player {
                        node,
                        frames,
                        step,
                        position: 0.0,
                        gain,
                        current_gain: gain,
                        playing: false,
                    });
                }
            }
            GraphCommand::Play(node) => {
                if let Some(player) = self.player_mut(node) {
                    player.position = 0.0;
                    player.current_gain = player.gain;
                    player.playing = true;
                }
            }
            GraphCommand::SetGain { node, gain } => {
                if let Some(player) = self.player_mut(node) {
                    player.gain = gain;
                }
            }
            GraphCommand::Detach(node) => {
                if let Some(index) = self.players.iter().position(|p| p.node == node) {
                    // The control side keeps its own reference to the frames,
                    // so dropping the player never frees sample memory here.
                    self.players.swap_remove(index);
                }
            }
            GraphCommand::SetMaster(gain) => self.master = gain,
            GraphCommand::SetEffects {
                low,
                high,
                delay_mix,
                reverb_mix,
            } => {
                self.eq.set_coefficients(low, high);
                self.echo.set_mix(delay_mix);
                self.reverb.set_mix(reverb_mix);
            }
        }
    }

    fn player_mut(&mut self, node: VoiceNodeId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.node == node)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    /// Render one mono block: voices -> master -> EQ -> echo -> reverb.
    fn process(&mut self, frames: usize) {
        let Self {
            players,
            scratch,
            completions,
            ..
        } = self;
        let block = &mut scratch[..frames];
        block.fill(0.0);

        for player in players.iter_mut() {
            if player.render(block) {
                if let Some(tx) = completions {
                    let _ = tx.try_send(player.node);
                }
            }
        }

        let master = self.master;
        let block = &mut self.scratch[..frames];
        for sample in block.iter_mut() {
            *sample *= master;
        }
        self.eq.process(block);
        self.echo.process(block);
        self.reverb.process(block);
    }

    /// Fill an interleaved device buffer. The mono mix goes to every channel.
    pub fn render<T>(&mut self, out: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<f32>,
    {
        self.drain_commands();
        let channels = channels.max(1);

        for chunk in out.chunks_mut(BLOCK_FRAMES * channels) {
            let frames = chunk.len() / channels;
            self.process(frames);
            for (frame, &value) in chunk.chunks_mut(channels).zip(&self.scratch[..frames]) {
                let value = value.clamp(-1.0, 1.0);
                for slot in frame.iter_mut() {
                    *slot = T::from_sample(value);
                }
            }
        }
    }
}

/// Fill an interleaved buffer with silence.
pub fn silence<T>(out: &mut [T])
where
    T: SizedSample + FromSample<f32>,
{
    for slot in out.iter_mut() {
        *slot = T::from_sample(0.0f32);
    }
}
