use crate::dsp::oscillator::SineOsc;
use crate::dsp::smooth::Smoothed;
use crate::error::{EngineError, Result};

/*
Entrainment tones
=================

Each tone is a pair of free-running sine oscillators, one per ear: the left
runs at the base frequency, the right at base + beat difference. The ~0.5-8
Hz difference between the ears produces the slow amplitude beating the
listener perceives as a pulse inside the head.

The registry lives on the control path and owns the id space; voices live
on the render path inside the `ToneBank` and are shipped across the command
ring fully constructed. Ids carry a generation counter so a handle to a
removed tone can never address a slot that has since been reused.
*/

/// Concurrent voice cap. The id space is unbounded; this only limits how
/// many voices are live at once, because bank slots are pre-allocated.
pub const MAX_TONES: usize = 64;

/// Release ramp applied when a tone is removed, before the voice retires.
const RELEASE_SECONDS: f32 = 0.03;

/// Handle to a registered tone. Stale handles (removed and recycled slots)
/// are rejected by generation mismatch rather than by luck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToneId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ToneId {
    pub fn slot(&self) -> usize {
        self.index as usize
    }
}

/// Control-side description of a tone.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToneParams {
    /// Left-ear frequency in Hz.
    pub base_freq_hz: f32,
    /// Right-ear offset in Hz; the perceived beat rate.
    pub beat_diff_hz: f32,
    /// Per-tone gain in [0, 1].
    pub volume: f32,
    /// Muted tones keep their slot but ramp to silence.
    pub active: bool,
}

impl Default for ToneParams {
    fn default() -> Self {
        Self {
            base_freq_hz: 220.0,
            beat_diff_hz: 4.0,
            volume: 0.5,
            active: true,
        }
    }
}

impl ToneParams {
    fn sanitized(mut self) -> Self {
        self.base_freq_hz = self.base_freq_hz.clamp(20.0, 2_000.0);
        self.beat_diff_hz = self.beat_diff_hz.clamp(-40.0, 40.0);
        self.volume = self.volume.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    params: Option<ToneParams>,
}

/// Control-path bookkeeping for the tone id space. Mirrors what the render
/// bank is doing without ever touching render state directly.
pub struct ToneRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ToneRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MAX_TONES),
            free: Vec::new(),
        }
    }

    /// Claim a slot for a new tone. Fails when all voice slots are live.
    pub fn allocate(&mut self, params: ToneParams) -> Result<ToneId> {
        let params = params.sanitized();
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.params = Some(params);
            return Ok(ToneId {
                index,
                generation: slot.generation,
            });
        }

        if self.slots.len() >= MAX_TONES {
            return Err(EngineError::InvalidParameter(format!(
                "tone limit reached ({MAX_TONES} concurrent tones)"
            )));
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            params: Some(params),
        });
        Ok(ToneId {
            index,
            generation: 0,
        })
    }

    /// Release a slot. The generation bump invalidates the handle.
    pub fn release(&mut self, id: ToneId) -> Result<()> {
        let slot = self.get_slot_mut(id)?;
        slot.params = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(())
    }

    pub fn release_all(&mut self) -> Vec<ToneId> {
        let mut released = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.params.take().is_some() {
                released.push(ToneId {
                    index: index as u32,
                    generation: slot.generation,
                });
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        released
    }

    pub fn params(&self, id: ToneId) -> Result<ToneParams> {
        let slot = self
            .slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| stale_handle(id))?;
        slot.params.ok_or_else(|| stale_handle(id))
    }

    pub fn update<F: FnOnce(&mut ToneParams)>(&mut self, id: ToneId, f: F) -> Result<ToneParams> {
        let slot = self.get_slot_mut(id)?;
        let params = slot.params.as_mut().ok_or_else(|| stale_handle(id))?;
        f(params);
        *params = params.sanitized();
        Ok(*params)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.params.is_some()).count()
    }

    fn get_slot_mut(&mut self, id: ToneId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or_else(|| stale_handle(id))
    }
}

impl Default for ToneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn stale_handle(id: ToneId) -> EngineError {
    EngineError::InvalidParameter(format!(
        "stale tone handle (slot {}, generation {})",
        id.index, id.generation
    ))
}

/// Render-path voice: two free-running oscillators plus ramped parameters.
pub struct ToneVoice {
    left_osc: SineOsc,
    right_osc: SineOsc,
    base_freq: Smoothed,
    beat_diff: Smoothed,
    gain: Smoothed,
    target_volume: f32,
    removing: bool,
}

impl ToneVoice {
    /// Built on the control path; starts silent and fades in, so insertion
    /// into a live bank never clicks.
    pub fn new(params: ToneParams, sample_rate: f32) -> Self {
        let params = params.sanitized();
        let mut gain = Smoothed::new(0.0, 0.02, sample_rate);
        gain.set_target(if params.active { params.volume } else { 0.0 });
        Self {
            left_osc: SineOsc::new(),
            right_osc: SineOsc::new(),
            base_freq: Smoothed::new(params.base_freq_hz, 0.02, sample_rate),
            beat_diff: Smoothed::new(params.beat_diff_hz, 0.02, sample_rate),
            gain,
            target_volume: params.volume,
            removing: false,
        }
    }

    pub fn set_base_freq(&mut self, hz: f32) {
        self.base_freq.set_target(hz.clamp(20.0, 2_000.0));
    }

    pub fn set_beat_diff(&mut self, hz: f32) {
        self.beat_diff.set_target(hz.clamp(-40.0, 40.0));
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.target_volume = volume.clamp(0.0, 1.0);
        if !self.removing {
            self.gain.set_target(self.target_volume);
        }
    }

    pub fn set_active(&mut self, active: bool) {
        if !self.removing {
            self.gain
                .set_target(if active { self.target_volume } else { 0.0 });
        }
    }

    /// Start the release fade. The bank retires the voice once the fade
    /// lands at silence.
    pub fn begin_removal(&mut self, sample_rate: f32) {
        self.removing = true;
        self.gain.set_ramp_time(RELEASE_SECONDS, sample_rate);
        self.gain.set_target(0.0);
    }

    fn is_finished(&self) -> bool {
        self.removing && !self.gain.is_ramping() && self.gain.value() <= 1e-6
    }

    #[inline]
    fn next_sample(&mut self, sample_rate: f32) -> (f32, f32) {
        let base = self.base_freq.next();
        let diff = self.beat_diff.next();
        let gain = self.gain.next();
        let l = self.left_osc.next(base, sample_rate) * gain;
        let r = self.right_osc.next((base + diff).max(1.0), sample_rate) * gain;
        (l, r)
    }
}

/// Render-path container: a fixed array of voice slots mixed into the
/// master bus after the spatial and dry/wet stages.
pub struct ToneBank {
    sample_rate: f32,
    voices: Vec<Option<Box<ToneVoice>>>,
    /// Shared gain applied to every tone, driven by the distance
    /// attenuation feature.
    distance_gain: Smoothed,
    retired: Vec<Box<ToneVoice>>,
}

impl ToneBank {
    pub fn new(sample_rate: f32) -> Self {
        let mut voices = Vec::with_capacity(MAX_TONES);
        voices.resize_with(MAX_TONES, || None);
        Self {
            sample_rate,
            voices,
            distance_gain: Smoothed::new(1.0, 0.02, sample_rate),
            retired: Vec::with_capacity(MAX_TONES),
        }
    }

    /// Install a control-built voice. An occupied slot is displaced into
    /// the retired list rather than dropped on the render thread.
    pub fn insert(&mut self, slot: usize, voice: Box<ToneVoice>) {
        if slot >= self.voices.len() {
            return;
        }
        if let Some(old) = self.voices[slot].replace(voice) {
            self.retired.push(old);
        }
    }

    pub fn with_voice<F: FnOnce(&mut ToneVoice)>(&mut self, slot: usize, f: F) {
        if let Some(voice) = self.voices.get_mut(slot).and_then(|v| v.as_deref_mut()) {
            f(voice);
        }
    }

    pub fn remove(&mut self, slot: usize) {
        let sample_rate = self.sample_rate;
        self.with_voice(slot, |v| v.begin_removal(sample_rate));
    }

    pub fn remove_all(&mut self) {
        for slot in 0..self.voices.len() {
            self.remove(slot);
        }
    }

    pub fn set_distance_gain(&mut self, gain: f32) {
        self.distance_gain.set_target(gain.clamp(0.0, 1.0));
    }

    /// Mix every live voice into the stereo bus. Finished release fades
    /// move their voice to the retired list for the control path to free.
    pub fn render_add(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        for n in 0..left.len() {
            let shared = self.distance_gain.next();
            let mut l_acc = 0.0;
            let mut r_acc = 0.0;
            for voice in self.voices.iter_mut().flatten() {
                let (l, r) = voice.next_sample(self.sample_rate);
                l_acc += l;
                r_acc += r;
            }
            left[n] += l_acc * shared;
            right[n] += r_acc * shared;
        }

        for slot in self.voices.iter_mut() {
            if slot.as_ref().is_some_and(|v| v.is_finished()) {
                if let Some(voice) = slot.take() {
                    self.retired.push(voice);
                }
            }
        }
    }

    /// Drain voices whose release completed, to be dropped off-thread.
    pub fn take_retired(&mut self) -> Vec<Box<ToneVoice>> {
        std::mem::take(&mut self.retired)
    }

    pub fn live_voices(&self) -> usize {
        self.voices.iter().flatten().count()
    }
}
