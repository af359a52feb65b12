//! Mix renderer - four slots, summing bus, tone chain, output gain
//!
//! Real-time processing and offline export run through the same per-block
//! routine, so an exported impulse is exactly what the live path produces
//! for a unit impulse at the same rate and block size.

use std::sync::Arc;

use irmix_library::{ImpulseResponse, ResampleError};
use tracing::debug;

use crate::gain::db_to_gain;
use crate::params::{ParamHandle, ParamStore, NUM_SLOTS};
use crate::slot::SlotEngine;
use crate::tone::ToneEngine;

/// Block size used for offline rendering
pub const OFFLINE_BLOCK: usize = 512;

/// Default length of an exported impulse, in seconds
pub const DEFAULT_RENDER_SECS: f64 = 2.0;

/// The complete mixer signal path
pub struct MixRenderer {
    slots: [SlotEngine; NUM_SLOTS],
    tone: ToneEngine,
    output_gain_db: ParamHandle,
    /// Interleaved stereo summing bus
    bus: Vec<f32>,
    sample_rate: u32,
    max_block: usize,
}

impl MixRenderer {
    /// Create a renderer reading from `params`
    pub fn new(params: &ParamStore) -> Self {
        Self {
            slots: std::array::from_fn(|i| SlotEngine::new(i, params.slot(i).clone())),
            tone: ToneEngine::new(params.tone().clone()),
            output_gain_db: params.output_gain_db().clone(),
            bus: Vec::new(),
            sample_rate: 0,
            max_block: 0,
        }
    }

    /// Allocate everything for `sample_rate` / `max_block`.
    ///
    /// Must be called before processing and whenever the host changes either
    /// value. Never call from the audio thread.
    pub fn prepare(&mut self, sample_rate: u32, max_block: usize) -> Result<(), ResampleError> {
        let max_block = max_block.max(1);
        for slot in &mut self.slots {
            slot.prepare(sample_rate, max_block)?;
        }
        self.tone.prepare(sample_rate);
        self.bus = vec![0.0; max_block * 2];
        self.sample_rate = sample_rate;
        self.max_block = max_block;
        debug!(sample_rate, max_block, "mix renderer prepared");
        Ok(())
    }

    /// Clear all processing history
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.tone.reset();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub fn slot(&self, index: usize) -> &SlotEngine {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut SlotEngine {
        &mut self.slots[index]
    }

    pub fn tone(&self) -> &ToneEngine {
        &self.tone
    }

    /// Process an interleaved stereo block in place
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        if self.max_block == 0 {
            buffer.fill(0.0);
            return;
        }
        let chunk = self.max_block * 2;
        for block in buffer.chunks_mut(chunk) {
            let frames = block.len() / 2;
            self.mix_slots(block, 2, frames);
            self.finish(block);
        }
    }

    /// Process `input` (interleaved, `input_channels` wide) into an
    /// interleaved stereo `output`
    pub fn process_block_from(&mut self, input: &[f32], input_channels: usize, output: &mut [f32]) {
        if self.max_block == 0 {
            output.fill(0.0);
            return;
        }
        let input_channels = input_channels.max(1);
        let frames = (input.len() / input_channels).min(output.len() / 2);
        output[frames * 2..].fill(0.0);

        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_block);
            let block_in = &input[done * input_channels..(done + n) * input_channels];
            self.mix_slots(block_in, input_channels, n);
            self.finish(&mut output[done * 2..(done + n) * 2]);
            done += n;
        }
    }

    /// Sum every audible slot into the bus (at most `max_block` frames)
    fn mix_slots(&mut self, input: &[f32], channels: usize, frames: usize) {
        let bus = &mut self.bus[..frames * 2];
        bus.fill(0.0);

        let any_solo = self.slots.iter().any(|s| s.is_loaded() && s.is_soloed());

        for slot in &mut self.slots {
            if !slot.is_loaded() {
                continue;
            }
            if any_solo && !slot.is_soloed() {
                continue;
            }
            slot.process(input, channels, bus);
        }
    }

    /// Tone chain and output gain on the bus, written to `out`
    fn finish(&mut self, out: &mut [f32]) {
        let bus = &mut self.bus[..out.len()];
        self.tone.process(bus);

        let gain = db_to_gain(self.output_gain_db.get());
        for (o, &b) in out.iter_mut().zip(bus.iter()) {
            *o = b * gain;
        }
    }
}

/// Everything an offline render needs, frozen at one instant
pub struct RenderSnapshot {
    /// Independent copy of all parameters (alignment offsets included)
    pub params: ParamStore,
    /// Response loaded in each slot
    pub impulses: [Option<Arc<ImpulseResponse>>; NUM_SLOTS],
}

/// Stereo result of an offline render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImpulse {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl RenderedImpulse {
    /// Length in frames
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Mono fold-down, (L + R) / 2
    pub fn to_mono(&self) -> Vec<f32> {
        self.left
            .iter()
            .zip(&self.right)
            .map(|(l, r)| (l + r) * 0.5)
            .collect()
    }
}

/// Render the mixer's response to a unit impulse.
///
/// A fresh signal path is built at `sample_rate` from the snapshot and fed a
/// unit impulse followed by silence, in `OFFLINE_BLOCK`-frame blocks, for
/// `duration_secs` seconds.
pub fn render_offline(
    snapshot: &RenderSnapshot,
    duration_secs: f64,
    sample_rate: u32,
) -> Result<RenderedImpulse, ResampleError> {
    let mut renderer = MixRenderer::new(&snapshot.params);
    renderer.prepare(sample_rate, OFFLINE_BLOCK)?;
    for (index, ir) in snapshot.impulses.iter().enumerate() {
        if let Some(ir) = ir {
            renderer.slot_mut(index).load_impulse(Arc::clone(ir))?;
        }
    }

    let total = (duration_secs * sample_rate as f64).round() as usize;
    let mut left = Vec::with_capacity(total);
    let mut right = Vec::with_capacity(total);

    let mut input = vec![0.0f32; OFFLINE_BLOCK * 2];
    let mut output = vec![0.0f32; OFFLINE_BLOCK * 2];
    input[0] = 1.0;
    input[1] = 1.0;

    let mut done = 0;
    while done < total {
        let frames = (total - done).min(OFFLINE_BLOCK);
        renderer.process_block_from(&input[..frames * 2], 2, &mut output[..frames * 2]);
        for frame in output[..frames * 2].chunks_exact(2) {
            left.push(frame[0]);
            right.push(frame[1]);
        }
        if done == 0 {
            input[0] = 0.0;
            input[1] = 0.0;
        }
        done += frames;
    }

    debug!(frames = total, sample_rate, "offline render complete");

    Ok(RenderedImpulse {
        left,
        right,
        sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gain::pan_gains;

    fn impulse(samples: Vec<f32>) -> Arc<ImpulseResponse> {
        Arc::new(ImpulseResponse::from_channels(vec![samples], 48000).unwrap())
    }

    fn decaying(len: usize, seed: f32) -> Vec<f32> {
        (0..len)
            .map(|i| ((i as f32 * seed).sin()) * (-(i as f32) / 80.0).exp())
            .collect()
    }

    fn unit_block(frames: usize) -> Vec<f32> {
        let mut buf = vec![0.0; frames * 2];
        buf[0] = 1.0;
        buf[1] = 1.0;
        buf
    }

    #[test]
    fn test_no_loaded_slots_gives_silence() {
        let store = ParamStore::new();
        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 256).unwrap();
        let mut buf = unit_block(256);
        renderer.process_block(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_single_slot_reproduces_shaped_impulse() {
        let store = ParamStore::new();
        let h = decaying(400, 0.3);

        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 128).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(h.clone())).unwrap();

        // Expected: the response scaled by level and centre pan, through the tone chain
        let (pan_l, pan_r) = pan_gains(0.0);
        let level = db_to_gain(-6.0);
        let mut expected: Vec<f32> = (0..1024)
            .flat_map(|i| {
                let s = h.get(i).copied().unwrap_or(0.0) * level;
                [s * pan_l, s * pan_r]
            })
            .collect();
        let mut tone = ToneEngine::new(store.tone().clone());
        tone.prepare(48000);
        for block in expected.chunks_mut(256) {
            tone.process(block);
        }

        let mut actual = vec![0.0f32; 2048];
        actual[0] = 1.0;
        actual[1] = 1.0;
        for block in actual.chunks_mut(256) {
            renderer.process_block(block);
        }

        for i in 0..actual.len() {
            assert!((actual[i] - expected[i]).abs() < 1e-4, "sample {}", i);
        }
    }

    #[test]
    fn test_solo_silences_other_slots() {
        let store = ParamStore::new();
        store.set("Slot1_Solo", 1.0);
        store.set("Slot2_Level", 6.0);

        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 256).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(vec![0.5])).unwrap();
        renderer.slot_mut(1).load_impulse(impulse(vec![1.0])).unwrap();

        let mut solo = unit_block(256);
        renderer.process_block(&mut solo);

        store.set("Slot1_Solo", 0.0);
        store.set("Slot2_Mute", 1.0);
        renderer.reset();
        let mut only_first = unit_block(256);
        renderer.process_block(&mut only_first);

        for (a, b) in solo.iter().zip(&only_first) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_solo_on_empty_slot_ignored() {
        let store = ParamStore::new();
        store.set("Slot3_Solo", 1.0);
        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 64).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(vec![1.0])).unwrap();
        let mut buf = unit_block(64);
        renderer.process_block(&mut buf);
        assert!(buf.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_mute_wins_over_solo() {
        let store = ParamStore::new();
        store.set("Slot1_Solo", 1.0);
        store.set("Slot1_Mute", 1.0);
        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 64).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(vec![1.0])).unwrap();
        renderer.slot_mut(1).load_impulse(impulse(vec![1.0])).unwrap();
        let mut buf = unit_block(64);
        renderer.process_block(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_output_gain_floor_silences() {
        let store = ParamStore::new();
        store.set("OutputGainDb", -24.0);
        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 64).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(vec![1.0])).unwrap();
        let mut quiet = unit_block(64);
        renderer.process_block(&mut quiet);
        let peak = quiet.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.0 && peak < 0.05);
    }

    #[test]
    fn test_oversized_host_block_is_split() {
        let store = ParamStore::new();
        let h = decaying(300, 0.2);

        let mut small = MixRenderer::new(&store);
        small.prepare(48000, 64).unwrap();
        small.slot_mut(0).load_impulse(impulse(h.clone())).unwrap();
        let mut split = unit_block(400);
        small.process_block(&mut split);

        let mut big = MixRenderer::new(&store);
        big.prepare(48000, 400).unwrap();
        big.slot_mut(0).load_impulse(impulse(h)).unwrap();
        let mut whole = unit_block(400);
        big.process_block(&mut whole);

        for (a, b) in split.iter().zip(&whole) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_mono_input_path() {
        let store = ParamStore::new();
        let mut renderer = MixRenderer::new(&store);
        renderer.prepare(48000, 128).unwrap();
        renderer.slot_mut(0).load_impulse(impulse(vec![1.0])).unwrap();

        let mut input = vec![0.0f32; 128];
        input[0] = 1.0;
        let mut output = vec![1.0f32; 256];
        renderer.process_block_from(&input, 1, &mut output);
        assert!((output[0] - output[1]).abs() < 1e-6);
        assert!(output[0] > 0.0);
    }

    #[test]
    fn test_offline_matches_live_path() {
        let store = ParamStore::new();
        store.set("Slot1_Pan", -40.0);
        store.set("Slot2_DelayMs", 1.5);
        store.set("Slot2_AlignMs", 0.3);
        store.set("MidGainDb", 4.0);
        let a = impulse(decaying(700, 0.17));
        let b = impulse(decaying(500, 0.41));

        let snapshot = RenderSnapshot {
            params: store.snapshot(),
            impulses: [Some(a.clone()), Some(b.clone()), None, None],
        };
        let offline = render_offline(&snapshot, 0.05, 48000).unwrap();
        assert_eq!(offline.len(), 2400);

        let mut live = MixRenderer::new(&store);
        live.prepare(48000, OFFLINE_BLOCK).unwrap();
        live.slot_mut(0).load_impulse(a).unwrap();
        live.slot_mut(1).load_impulse(b).unwrap();
        let mut buf = vec![0.0f32; 2400 * 2];
        buf[0] = 1.0;
        buf[1] = 1.0;
        for block in buf.chunks_mut(OFFLINE_BLOCK * 2) {
            live.process_block(block);
        }

        for i in 0..2400 {
            assert!((offline.left[i] - buf[i * 2]).abs() < 1e-6, "left {}", i);
            assert!((offline.right[i] - buf[i * 2 + 1]).abs() < 1e-6, "right {}", i);
        }
    }

    #[test]
    fn test_offline_length_and_mono() {
        let store = ParamStore::new();
        let snapshot = RenderSnapshot {
            params: store.snapshot(),
            impulses: [Some(impulse(vec![1.0])), None, None, None],
        };
        let rendered = render_offline(&snapshot, DEFAULT_RENDER_SECS, 44100).unwrap();
        assert_eq!(rendered.len(), 88200);
        let mono = rendered.to_mono();
        assert_eq!(mono.len(), 88200);
        assert!((mono[10] - (rendered.left[10] + rendered.right[10]) / 2.0).abs() < 1e-9);
    }
}
