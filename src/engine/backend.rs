use crate::dsp::convolver::Convolver;
use crate::dsp::crossfade::{Crossfade, CrossfadeLaw};
use crate::dsp::smooth::Smoothed;
use crate::engine::metering::{Levels, TapProducer};
use crate::engine::transport::{BufferSource, TransportState};
use crate::engine::Ear;
use crate::graph::dynamics::DynamicsStage;
use crate::graph::{PhaseSmearUnit, PitchShiftUnit, ToneBank, ToneVoice};
use crate::spatial::{
    ListenerPose, RoomAcousticsUnit, SpatialPositioner, SpeakerPropagationArray, Vec3,
};
use crate::MAX_BLOCK_SIZE;
use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/*
Render backend
==============

Everything the audio callback touches lives here, behind two rules:

  1. Data flows control -> render through the command ring and render ->
     control through the notification and trash rings. Nothing is shared
     mutably; the only shared state is a handful of atomics the render
     side writes and the control side reads.

  2. The render path never allocates, frees or blocks. Anything heap-sized
     arrives pre-built inside a command (boxed sources, voices, speaker
     paths, convolution kernels) and leaves through the trash ring so the
     drop runs on the control thread.
*/

/// Transport facts the render side publishes after every block.
pub struct SharedTransport {
    pub(crate) position: AtomicU64,
    pub(crate) state: AtomicU8,
    pub(crate) sample_rate: u32,
}

impl SharedTransport {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self {
            position: AtomicU64::new(0),
            state: AtomicU8::new(TransportState::Idle.as_u8()),
            sample_rate,
        }
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn position_frames(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.sample_rate as f64
    }
}

/// Extended-mode render chain: the speaker array feeding the room model.
/// Built whole on the control path and shipped across in one command.
pub struct SpeakerPath {
    pub array: SpeakerPropagationArray,
    pub room: RoomAcousticsUnit,
}

pub(crate) enum Command {
    Start(Box<BufferSource>),
    Pause,
    Resume,
    Stop,
    SeekFrames(usize),
    SetLoop(bool),
    SetDetune(Ear, f32),
    SetDryWet(f32),
    SetMasterVolume(f32),
    SetCompressorActive(bool),
    SetSmearDepth(f32),
    SetSmearRate(f32),
    SetSpatialActive(bool),
    SetSpatialPosition(Vec3),
    AddTone(usize, Box<ToneVoice>),
    RemoveTone(usize),
    RemoveAllTones,
    SetToneActive(usize, bool),
    SetToneBaseFreq(usize, f32),
    SetToneBeatDiff(usize, f32),
    SetToneVolume(usize, f32),
    SetDistanceAttenuation(f32),
    ConnectArray(Box<SpeakerPath>),
    DisconnectArray,
    UpdateListener(ListenerPose),
    SetArrayVolume(f32),
    SetRoomAmount(f32),
    SetRoomAbsorption(f32),
    InstallRoomImpulse(Box<Convolver>),
}

/// Events the render side reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A non-looping source ran to its end. Fired exactly once per source.
    PlaybackEnded,
}

/// Heap objects retired from the render path, dropped control-side.
pub(crate) enum Trash {
    Source(Box<BufferSource>),
    Voice(Box<ToneVoice>),
    Kernel(Box<Convolver>),
    Path(Box<SpeakerPath>),
}

/// The complete render-side processing chain.
pub struct EngineBackend {
    sample_rate: f32,
    commands: Consumer<Command>,
    notifications: Producer<Notification>,
    trash: Producer<Trash>,
    shared: Arc<SharedTransport>,
    levels: Arc<Levels>,
    left_tap: TapProducer,
    right_tap: TapProducer,

    source: Option<Box<BufferSource>>,
    looping: bool,
    positioner: SpatialPositioner,
    speaker_path: Option<Box<SpeakerPath>>,
    smear_left: PhaseSmearUnit,
    smear_right: PhaseSmearUnit,
    shift_left: PitchShiftUnit,
    shift_right: PitchShiftUnit,
    dry_wet: Crossfade,
    dynamics: DynamicsStage,
    tones: ToneBank,
    master: Smoothed,

    mono_scratch: Vec<f32>,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
    path_left: Vec<f32>,
    path_right: Vec<f32>,
}

pub(crate) struct BackendShared {
    pub commands: Consumer<Command>,
    pub notifications: Producer<Notification>,
    pub trash: Producer<Trash>,
    pub transport: Arc<SharedTransport>,
    pub levels: Arc<Levels>,
    pub left_tap: TapProducer,
    pub right_tap: TapProducer,
}

impl EngineBackend {
    pub(crate) fn new(
        sample_rate: f32,
        shift_left: PitchShiftUnit,
        shift_right: PitchShiftUnit,
        shared: BackendShared,
    ) -> Self {
        Self {
            sample_rate,
            commands: shared.commands,
            notifications: shared.notifications,
            trash: shared.trash,
            shared: shared.transport,
            levels: shared.levels,
            left_tap: shared.left_tap,
            right_tap: shared.right_tap,
            source: None,
            looping: false,
            positioner: SpatialPositioner::new(sample_rate),
            speaker_path: None,
            smear_left: PhaseSmearUnit::new(sample_rate),
            smear_right: PhaseSmearUnit::new(sample_rate),
            shift_left,
            shift_right,
            dry_wet: Crossfade::new(CrossfadeLaw::EqualPower, 0.5, 0.02, sample_rate),
            dynamics: DynamicsStage::new(sample_rate),
            tones: ToneBank::new(sample_rate),
            master: Smoothed::new(1.0, 0.02, sample_rate),
            mono_scratch: vec![0.0; MAX_BLOCK_SIZE],
            wet_left: vec![0.0; MAX_BLOCK_SIZE],
            wet_right: vec![0.0; MAX_BLOCK_SIZE],
            path_left: vec![0.0; MAX_BLOCK_SIZE],
            path_right: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Render one stereo block. `left` and `right` must be equal length,
    /// at most `MAX_BLOCK_SIZE` frames.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        let frames = left.len().min(MAX_BLOCK_SIZE);
        let (left, right) = (&mut left[..frames], &mut right[..frames]);

        self.drain_commands();
        self.fill_source(left, right);

        // Single-source 3D placement, then the optional extended chain.
        self.positioner.process_block(left, right);
        if self.speaker_path.is_some() {
            self.run_speaker_path(left, right);
        }

        // Per-ear wet chains: smear then detune, fed from the routed signal.
        self.wet_left[..frames].copy_from_slice(left);
        self.wet_right[..frames].copy_from_slice(right);
        self.smear_left.process_block(&mut self.wet_left[..frames]);
        self.smear_right.process_block(&mut self.wet_right[..frames]);
        self.shift_left.process_block(&mut self.wet_left[..frames]);
        self.shift_right.process_block(&mut self.wet_right[..frames]);

        // One gain pair per sample applied to both ears keeps the image
        // centered through dry/wet moves.
        for n in 0..frames {
            let (dry_gain, wet_gain) = self.dry_wet.next_gains();
            left[n] = left[n] * dry_gain + self.wet_left[n] * wet_gain;
            right[n] = right[n] * dry_gain + self.wet_right[n] * wet_gain;
        }

        self.dynamics.process_block(left, right);
        self.tones.render_add(left, right);

        // Per-ear taps observe the chains ahead of the master gain; the
        // published levels meter the final output.
        self.left_tap.push_block(left);
        self.right_tap.push_block(right);

        for n in 0..frames {
            let gain = self.master.next();
            left[n] *= gain;
            right[n] *= gain;
        }

        self.publish_state(left, right);
        self.sweep_retired();
    }

    fn fill_source(&mut self, left: &mut [f32], right: &mut [f32]) {
        let playing = self.shared.state() == TransportState::Playing;
        let Some(source) = self.source.as_mut() else {
            left.fill(0.0);
            right.fill(0.0);
            return;
        };

        if !playing {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        let result = source.fill(left, right, self.looping);
        if result.ended {
            // Exactly one end event per source: the source retires with it.
            let _ = self.notifications.push(Notification::PlaybackEnded);
            if let Some(finished) = self.source.take() {
                let _ = self.trash.push(Trash::Source(finished));
            }
            self.shared
                .state
                .store(TransportState::Idle.as_u8(), Ordering::Release);
            self.shared.position.store(0, Ordering::Release);
        }
    }

    fn run_speaker_path(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len();
        let Some(path) = self.speaker_path.as_mut() else {
            return;
        };

        for n in 0..frames {
            self.mono_scratch[n] = (left[n] + right[n]) * 0.5;
        }
        path.array.process_block(
            &self.mono_scratch[..frames],
            &mut self.path_left[..frames],
            &mut self.path_right[..frames],
        );
        path.room
            .process_block(&mut self.path_left[..frames], &mut self.path_right[..frames]);
        left.copy_from_slice(&self.path_left[..frames]);
        right.copy_from_slice(&self.path_right[..frames]);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Start(source) => {
                if let Some(old) = self.source.replace(source) {
                    let _ = self.trash.push(Trash::Source(old));
                }
                self.shared.position.store(0, Ordering::Release);
                self.shared
                    .state
                    .store(TransportState::Playing.as_u8(), Ordering::Release);
            }
            Command::Pause => {
                if self.shared.state() == TransportState::Playing {
                    self.shared
                        .state
                        .store(TransportState::Paused.as_u8(), Ordering::Release);
                }
            }
            Command::Resume => {
                if self.shared.state() == TransportState::Paused {
                    self.shared
                        .state
                        .store(TransportState::Playing.as_u8(), Ordering::Release);
                }
            }
            Command::Stop => {
                if let Some(old) = self.source.take() {
                    let _ = self.trash.push(Trash::Source(old));
                }
                self.shared
                    .state
                    .store(TransportState::Idle.as_u8(), Ordering::Release);
                self.shared.position.store(0, Ordering::Release);
            }
            Command::SeekFrames(frame) => {
                if let Some(source) = self.source.as_mut() {
                    source.seek_to(frame);
                    self.shared
                        .position
                        .store(source.position() as u64, Ordering::Release);
                }
            }
            Command::SetLoop(looping) => self.looping = looping,
            Command::SetDetune(Ear::Left, cents) => self.shift_left.set_cents(cents),
            Command::SetDetune(Ear::Right, cents) => self.shift_right.set_cents(cents),
            Command::SetDryWet(mix) => self.dry_wet.set_mix(mix),
            Command::SetMasterVolume(volume) => self.master.set_target(volume.clamp(0.0, 1.0)),
            Command::SetCompressorActive(active) => self.dynamics.set_active(active),
            Command::SetSmearDepth(depth) => {
                self.smear_left.set_depth(depth);
                self.smear_right.set_depth(depth);
            }
            Command::SetSmearRate(rate) => {
                self.smear_left.set_rate(rate);
                self.smear_right.set_rate(rate);
            }
            Command::SetSpatialActive(active) => self.positioner.set_active(active),
            Command::SetSpatialPosition(position) => self.positioner.set_position(position),
            Command::AddTone(slot, voice) => self.tones.insert(slot, voice),
            Command::RemoveTone(slot) => self.tones.remove(slot),
            Command::RemoveAllTones => self.tones.remove_all(),
            Command::SetToneActive(slot, active) => {
                self.tones.with_voice(slot, |v| v.set_active(active))
            }
            Command::SetToneBaseFreq(slot, hz) => {
                self.tones.with_voice(slot, |v| v.set_base_freq(hz))
            }
            Command::SetToneBeatDiff(slot, hz) => {
                self.tones.with_voice(slot, |v| v.set_beat_diff(hz))
            }
            Command::SetToneVolume(slot, volume) => {
                self.tones.with_voice(slot, |v| v.set_volume(volume))
            }
            Command::SetDistanceAttenuation(gain) => self.tones.set_distance_gain(gain),
            Command::ConnectArray(path) => {
                if let Some(old) = self.speaker_path.replace(path) {
                    let _ = self.trash.push(Trash::Path(old));
                }
            }
            Command::DisconnectArray => {
                if let Some(old) = self.speaker_path.take() {
                    let _ = self.trash.push(Trash::Path(old));
                }
                // Leaving extended mode re-centers the listener.
                self.positioner.update_listener(ListenerPose::default());
            }
            Command::UpdateListener(pose) => {
                self.positioner.update_listener(pose);
                if let Some(path) = self.speaker_path.as_mut() {
                    path.array.update_listener(pose);
                    path.room.update_listener(pose);
                }
            }
            Command::SetArrayVolume(volume) => {
                if let Some(path) = self.speaker_path.as_mut() {
                    path.array.set_volume(volume);
                }
            }
            Command::SetRoomAmount(amount) => {
                if let Some(path) = self.speaker_path.as_mut() {
                    path.room.set_amount(amount);
                }
            }
            Command::SetRoomAbsorption(absorption) => {
                if let Some(path) = self.speaker_path.as_mut() {
                    path.room.set_absorption(absorption);
                }
            }
            Command::InstallRoomImpulse(kernel) => {
                if let Some(path) = self.speaker_path.as_mut() {
                    path.room.install_impulse(kernel);
                } else {
                    // No room to install into; send it straight back.
                    let _ = self.trash.push(Trash::Kernel(kernel));
                }
            }
        }
    }

    fn publish_state(&mut self, left: &[f32], right: &[f32]) {
        if let Some(source) = self.source.as_ref() {
            self.shared
                .position
                .store(source.position() as u64, Ordering::Release);
        }

        let frames = left.len().max(1) as f32;
        let rms = |buf: &[f32]| (buf.iter().map(|s| s * s).sum::<f32>() / frames).sqrt();
        self.levels.publish(rms(left), rms(right));
    }

    fn sweep_retired(&mut self) {
        for voice in self.tones.take_retired() {
            let _ = self.trash.push(Trash::Voice(voice));
        }
        if let Some(path) = self.speaker_path.as_mut() {
            for kernel in path.room.take_retired() {
                let _ = self.trash.push(Trash::Kernel(kernel));
            }
        }
    }
}
