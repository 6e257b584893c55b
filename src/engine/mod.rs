//! The control surface and render backend of the engine.
//!
//! [`SignalGraph`] is the application-facing half: it owns the loaded
//! source material, the tone registry and the parameter mirror, and talks
//! to the render side exclusively through lock-free rings. The render half
//! is [`EngineBackend`], which either runs inside a cpal callback (via
//! [`crate::io::OutputStream`]) or is driven directly by tests.

/// Render-side processing chain and the command/notification protocol.
pub mod backend;
/// RMS levels, sample taps and spectrum analysis.
pub mod metering;
/// Transport state and playback sources.
pub mod transport;

pub use backend::{EngineBackend, Notification, SharedTransport, SpeakerPath};
pub use transport::TransportState;

use crate::dsp::convolver::{Convolver, DEFAULT_PARTITION};
use crate::error::{EngineError, Result};
use crate::graph::tones::{ToneId, ToneParams, ToneRegistry, ToneVoice};
use crate::graph::PitchShiftUnit;
use crate::io::AudioBufferPair;
use crate::spatial::{
    room, ListenerPose, SpeakerArrayConfig, SpeakerPropagationArray, Vec3,
};
use backend::{BackendShared, Command, Trash};
use metering::{tap_pair, AnalysisFeeds, Levels};
use rtrb::{Consumer, Producer, RingBuffer};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which ear's independent processing chain a parameter addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ear {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Slack in the command ring; one slot per in-flight change.
    pub command_capacity: usize,
    /// Samples of slack in each analysis tap.
    pub tap_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            command_capacity: 256,
            tap_capacity: 16_384,
        }
    }
}

/// Description of the currently loaded source.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceInfo {
    pub name: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub frames: usize,
}

/// Control-side mirror of the render parameters, for UI readback without
/// a round trip.
#[derive(Debug, Clone, Copy)]
pub struct ParameterState {
    pub detune_left_cents: f32,
    pub detune_right_cents: f32,
    pub dry_wet: f32,
    pub master_volume: f32,
    pub smear_depth: f32,
    pub smear_rate_hz: f32,
    pub compressor_active: bool,
    pub spatial_active: bool,
    pub spatial_position: Vec3,
    pub looping: bool,
    pub speaker_volume: f32,
    pub room_amount: f32,
    /// Absorption filter cutoff in Hz.
    pub room_absorption_hz: f32,
    pub room_decay_seconds: f32,
    pub distance_attenuation: f32,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            detune_left_cents: 0.0,
            detune_right_cents: 0.0,
            dry_wet: 0.5,
            master_volume: 1.0,
            smear_depth: 0.5,
            smear_rate_hz: 1.0,
            compressor_active: false,
            spatial_active: false,
            spatial_position: Vec3::new(0.0, 0.0, -1.0),
            looping: false,
            speaker_volume: 1.0,
            room_amount: 0.0,
            room_absorption_hz: 4_000.0,
            room_decay_seconds: 2.5,
            distance_attenuation: 1.0,
        }
    }
}

type EndedCallback = Box<dyn FnMut() + Send>;

/// The application-facing engine handle.
pub struct SignalGraph {
    config: EngineConfig,
    commands: Producer<Command>,
    notifications: Consumer<Notification>,
    trash: Consumer<Trash>,
    transport: Arc<SharedTransport>,
    backend: Option<Box<EngineBackend>>,
    feeds: Option<AnalysisFeeds>,

    loaded: Option<Arc<AudioBufferPair>>,
    source_info: Option<SourceInfo>,
    registry: ToneRegistry,
    params: ParameterState,
    array_connected: bool,
    on_ended: Option<EndedCallback>,
}

impl SignalGraph {
    /// Build the whole control/render pair. The backend starts attached;
    /// hand it to an output stream or a test driver with
    /// [`take_backend`](Self::take_backend).
    pub fn initialize(config: EngineConfig) -> Result<Self> {
        if config.sample_rate == 0 {
            return Err(EngineError::Initialization(
                "sample rate must be nonzero".into(),
            ));
        }
        let sample_rate = config.sample_rate as f32;

        // Per-ear detune chains register first; an unsupported processing
        // context fails initialization before any ring exists.
        let shift_left = PitchShiftUnit::register(sample_rate)?;
        let shift_right = PitchShiftUnit::register(sample_rate)?;

        let (command_tx, command_rx) = RingBuffer::new(config.command_capacity.max(16));
        let (notify_tx, notify_rx) = RingBuffer::new(64);
        let (trash_tx, trash_rx) = RingBuffer::new(config.command_capacity.max(16) * 2);
        let (left_tap_tx, left_tap_rx) = tap_pair(config.tap_capacity);
        let (right_tap_tx, right_tap_rx) = tap_pair(config.tap_capacity);

        let transport = Arc::new(SharedTransport::new(config.sample_rate));
        let levels = Arc::new(Levels::default());

        let backend = EngineBackend::new(
            sample_rate,
            shift_left,
            shift_right,
            BackendShared {
                commands: command_rx,
                notifications: notify_tx,
                trash: trash_tx,
                transport: Arc::clone(&transport),
                levels: Arc::clone(&levels),
                left_tap: left_tap_tx,
                right_tap: right_tap_tx,
            },
        );

        info!(sample_rate = config.sample_rate, "engine initialized");
        Ok(Self {
            config,
            commands: command_tx,
            notifications: notify_rx,
            trash: trash_rx,
            transport,
            backend: Some(Box::new(backend)),
            feeds: Some(AnalysisFeeds {
                levels,
                left_tap: left_tap_rx,
                right_tap: right_tap_rx,
            }),
            loaded: None,
            source_info: None,
            registry: ToneRegistry::new(),
            params: ParameterState::default(),
            array_connected: false,
            on_ended: None,
        })
    }

    /// Detach the render backend. Returns `None` after the first call.
    pub fn take_backend(&mut self) -> Option<Box<EngineBackend>> {
        self.backend.take()
    }

    /// Detach the analysis feeds (levels and stereo taps).
    pub fn take_analysis_feeds(&mut self) -> Option<AnalysisFeeds> {
        self.feeds.take()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> &ParameterState {
        &self.params
    }

    // ----- transport ----------------------------------------------------

    /// Decode a WAV file as the engine's source material. Stops playback
    /// first; a decode failure leaves the previous source loaded.
    pub fn load(&mut self, path: &Path) -> Result<SourceInfo> {
        self.stop();
        let buffer = AudioBufferPair::load_wav(path)?;
        if buffer.sample_rate != self.config.sample_rate {
            warn!(
                file_rate = buffer.sample_rate,
                engine_rate = self.config.sample_rate,
                "source sample rate differs from engine rate; playback will be detuned"
            );
        }

        let info = SourceInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            duration_seconds: buffer.duration_seconds(),
            sample_rate: buffer.sample_rate,
            frames: buffer.frames(),
        };
        info!(name = %info.name, duration = info.duration_seconds, "source loaded");
        self.loaded = Some(Arc::new(buffer));
        self.source_info = Some(info.clone());
        Ok(info)
    }

    /// Install an already decoded buffer, mainly for tests and synthesis.
    pub fn load_buffer(&mut self, buffer: AudioBufferPair, name: &str) -> SourceInfo {
        self.stop();
        let info = SourceInfo {
            name: name.to_string(),
            duration_seconds: buffer.duration_seconds(),
            sample_rate: buffer.sample_rate,
            frames: buffer.frames(),
        };
        self.loaded = Some(Arc::new(buffer));
        self.source_info = Some(info.clone());
        info
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.source_info.as_ref()
    }

    /// Start playback from the top. A no-op while already playing or
    /// with nothing loaded; a fresh single-use source is built for every
    /// actual start.
    pub fn play(&mut self) {
        self.play_from(0.0);
    }

    /// Start playback at an offset, clamped to the source duration.
    pub fn play_from(&mut self, offset_seconds: f64) {
        let Some(buffer) = self.loaded.as_ref() else {
            debug!("play ignored; nothing loaded");
            return;
        };
        if self.transport.state() == TransportState::Playing {
            debug!("play ignored; already playing");
            return;
        }

        let mut source = Box::new(transport::BufferSource::new(Arc::clone(buffer)));
        if offset_seconds > 0.0 {
            source.seek_to((offset_seconds * self.config.sample_rate as f64) as usize);
        }
        self.send(Command::Start(source));
        // Publish optimistically so back-to-back play() calls coalesce
        // even before the render side runs.
        self.transport
            .state
            .store(TransportState::Playing.as_u8(), Ordering::Release);
        info!(offset_seconds, "playback started");
    }

    pub fn pause(&mut self) {
        self.send(Command::Pause);
    }

    pub fn resume(&mut self) {
        self.send(Command::Resume);
    }

    pub fn stop(&mut self) {
        self.send(Command::Stop);
        self.transport
            .state
            .store(TransportState::Idle.as_u8(), Ordering::Release);
    }

    /// Jump to a time position, clamped to the source duration.
    pub fn seek(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.config.sample_rate as f64) as usize;
        self.send(Command::SeekFrames(frame));
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.params.looping = looping;
        self.send(Command::SetLoop(looping));
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// Current playback position in seconds, as last published by the
    /// render side.
    pub fn current_time(&self) -> f64 {
        self.transport.position_seconds()
    }

    /// The shared audio clock: position and transport state as published
    /// by the render side, readable from any thread.
    pub fn shared_clock(&self) -> Arc<SharedTransport> {
        Arc::clone(&self.transport)
    }

    /// Callback fired from [`tick`](Self::tick) when a non-looping source
    /// reaches its end.
    pub fn on_playback_ended<F: FnMut() + Send + 'static>(&mut self, callback: F) {
        self.on_ended = Some(Box::new(callback));
    }

    /// Service the render->control rings: fire end-of-stream callbacks
    /// and drop retired render objects. Call this regularly (per UI
    /// frame is plenty).
    pub fn tick(&mut self) {
        while let Ok(event) = self.notifications.pop() {
            match event {
                Notification::PlaybackEnded => {
                    debug!("playback ended");
                    if let Some(callback) = self.on_ended.as_mut() {
                        callback();
                    }
                }
            }
        }
        // Dropping here is the entire point: retired sources, voices,
        // kernels and paths free on this thread.
        while self.trash.pop().is_ok() {}
    }

    // ----- core parameters ----------------------------------------------

    /// Detune one ear's chain in cents.
    pub fn set_detune(&mut self, ear: Ear, cents: f32) {
        match ear {
            Ear::Left => self.params.detune_left_cents = cents,
            Ear::Right => self.params.detune_right_cents = cents,
        }
        self.send(Command::SetDetune(ear, cents));
    }

    /// Dry/wet balance in [0, 1]; equal-power, so perceived loudness
    /// holds through the whole range.
    pub fn set_dry_wet(&mut self, mix: f32) {
        self.params.dry_wet = mix.clamp(0.0, 1.0);
        self.send(Command::SetDryWet(mix));
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.params.master_volume = volume.clamp(0.0, 1.0);
        self.send(Command::SetMasterVolume(volume));
    }

    pub fn set_compressor_active(&mut self, active: bool) {
        self.params.compressor_active = active;
        self.send(Command::SetCompressorActive(active));
    }

    pub fn set_smear_depth(&mut self, depth: f32) {
        self.params.smear_depth = depth.clamp(0.0, 1.0);
        self.send(Command::SetSmearDepth(depth));
    }

    pub fn set_smear_rate(&mut self, rate_hz: f32) {
        self.params.smear_rate_hz = rate_hz;
        self.send(Command::SetSmearRate(rate_hz));
    }

    // ----- spatial ------------------------------------------------------

    pub fn set_spatial_active(&mut self, active: bool) {
        self.params.spatial_active = active;
        self.send(Command::SetSpatialActive(active));
    }

    pub fn set_spatial_position(&mut self, position: Vec3) {
        self.params.spatial_position = position;
        self.send(Command::SetSpatialPosition(position));
    }

    pub fn update_listener(&mut self, pose: ListenerPose) {
        self.send(Command::UpdateListener(pose));
    }

    /// Enter extended mode: build a speaker array (plus its room model)
    /// and splice it into the render chain.
    pub fn connect_speaker_array(
        &mut self,
        positions: &[Vec3],
        config: SpeakerArrayConfig,
    ) -> Result<()> {
        if positions.is_empty() {
            return Err(EngineError::InvalidParameter(
                "speaker array needs at least one speaker".into(),
            ));
        }
        let sample_rate = self.config.sample_rate as f32;
        let mut array = SpeakerPropagationArray::new(positions, config, sample_rate);
        array.set_volume(self.params.speaker_volume);
        let mut room_unit = crate::spatial::RoomAcousticsUnit::new(sample_rate);
        room_unit.set_amount(self.params.room_amount);
        room_unit.set_absorption(self.params.room_absorption_hz);

        info!(speakers = positions.len(), "speaker array connected");
        self.send(Command::ConnectArray(Box::new(SpeakerPath {
            array,
            room: room_unit,
        })));
        self.array_connected = true;
        Ok(())
    }

    /// Leave extended mode; the listener pose resets to the default.
    pub fn disconnect_speaker_array(&mut self) {
        if self.array_connected {
            info!("speaker array disconnected");
        }
        self.array_connected = false;
        self.send(Command::DisconnectArray);
    }

    pub fn speaker_array_connected(&self) -> bool {
        self.array_connected
    }

    /// Overall gain of the array's stereo downmix, applied after the
    /// per-speaker gates and panners.
    pub fn set_speaker_volume(&mut self, volume: f32) {
        self.params.speaker_volume = volume.clamp(0.0, 2.0);
        self.send(Command::SetArrayVolume(volume));
    }

    // ----- room ---------------------------------------------------------

    /// Handle to the room model. Exists only while a speaker array is
    /// connected, mirroring where the unit actually sits in the chain.
    pub fn room_acoustics(&mut self) -> Option<RoomAcoustics<'_>> {
        if self.array_connected {
            Some(RoomAcoustics { graph: self })
        } else {
            None
        }
    }

    // ----- tones --------------------------------------------------------

    /// Register a new entrainment tone; returns a generation-checked
    /// handle. Fails once the concurrent-voice cap is reached.
    pub fn add_tone(&mut self, params: ToneParams) -> Result<ToneId> {
        let id = self.registry.allocate(params)?;
        let voice = Box::new(ToneVoice::new(
            self.registry.params(id)?,
            self.config.sample_rate as f32,
        ));
        self.send(Command::AddTone(id.slot(), voice));
        debug!(slot = id.slot(), "tone added");
        Ok(id)
    }

    pub fn remove_tone(&mut self, id: ToneId) -> Result<()> {
        self.registry.release(id)?;
        self.send(Command::RemoveTone(id.slot()));
        Ok(())
    }

    pub fn remove_all_tones(&mut self) {
        let released = self.registry.release_all();
        if !released.is_empty() {
            self.send(Command::RemoveAllTones);
        }
    }

    pub fn set_tone_active(&mut self, id: ToneId, active: bool) -> Result<()> {
        self.registry.update(id, |p| p.active = active)?;
        self.send(Command::SetToneActive(id.slot(), active));
        Ok(())
    }

    pub fn set_tone_base_freq(&mut self, id: ToneId, hz: f32) -> Result<()> {
        self.registry.update(id, |p| p.base_freq_hz = hz)?;
        self.send(Command::SetToneBaseFreq(id.slot(), hz));
        Ok(())
    }

    pub fn set_tone_beat_diff(&mut self, id: ToneId, hz: f32) -> Result<()> {
        self.registry.update(id, |p| p.beat_diff_hz = hz)?;
        self.send(Command::SetToneBeatDiff(id.slot(), hz));
        Ok(())
    }

    pub fn set_tone_volume(&mut self, id: ToneId, volume: f32) -> Result<()> {
        self.registry.update(id, |p| p.volume = volume)?;
        self.send(Command::SetToneVolume(id.slot(), volume));
        Ok(())
    }

    pub fn tone_params(&self, id: ToneId) -> Result<ToneParams> {
        self.registry.params(id)
    }

    pub fn tone_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Shared attenuation over all tones, for tying tone loudness to a
    /// game-world distance.
    pub fn set_distance_attenuation(&mut self, gain: f32) {
        self.params.distance_attenuation = gain.clamp(0.0, 1.0);
        self.send(Command::SetDistanceAttenuation(gain));
    }

    fn send(&mut self, command: Command) {
        if self.commands.push(command).is_err() {
            // The ring only backs up if nothing is rendering; drop and
            // log rather than block the control thread.
            warn!("command ring full; dropping command");
        }
    }
}

/// Borrowed control surface for the room model while extended mode is up.
pub struct RoomAcoustics<'a> {
    graph: &'a mut SignalGraph,
}

impl RoomAcoustics<'_> {
    /// Scale all reflection and late-tail gains; the dry signal stays at
    /// unity regardless.
    pub fn set_amount(&mut self, amount: f32) {
        self.graph.params.room_amount = amount.clamp(0.0, 1.0);
        self.graph.send(Command::SetRoomAmount(amount));
    }

    /// Retune the absorption filter cutoff in Hz.
    pub fn set_absorption(&mut self, cutoff_hz: f32) {
        self.graph.params.room_absorption_hz = cutoff_hz.clamp(200.0, 16_000.0);
        self.graph.send(Command::SetRoomAbsorption(cutoff_hz));
    }

    /// Rebuild the late-tail kernel for a new decay time. The synthesis
    /// and FFT planning happen here on the control thread; the render
    /// side just swaps pointers behind a short mute.
    pub fn set_decay_time(&mut self, decay_seconds: f32) -> Result<()> {
        if !(0.1..=10.0).contains(&decay_seconds) {
            return Err(EngineError::InvalidParameter(format!(
                "room decay {decay_seconds} s out of range (0.1 - 10)"
            )));
        }
        self.graph.params.room_decay_seconds = decay_seconds;
        let impulse =
            room::synthesize_impulse(decay_seconds, self.graph.config.sample_rate as f32);
        let kernel = Box::new(Convolver::new(&impulse, DEFAULT_PARTITION));
        debug!(
            decay_seconds,
            partitions = kernel.impulse_partitions(),
            "room kernel rebuilt"
        );
        self.graph.send(Command::InstallRoomImpulse(kernel));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tones::MAX_TONES;

    fn graph_with_tone_source(seconds: f64) -> (SignalGraph, Box<EngineBackend>) {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        let frames = (seconds * 48_000.0) as usize;
        let samples: Vec<f32> = (0..frames)
            .map(|n| (std::f32::consts::TAU * 220.0 * n as f32 / 48_000.0).sin() * 0.5)
            .collect();
        graph.load_buffer(
            AudioBufferPair::new(samples.clone(), samples, 48_000),
            "tone",
        );
        let backend = graph.take_backend().unwrap();
        (graph, backend)
    }

    fn render_seconds(backend: &mut EngineBackend, seconds: f64) {
        let mut l = vec![0.0; 1_024];
        let mut r = vec![0.0; 1_024];
        let blocks = (seconds * 48_000.0 / 1_024.0).ceil() as usize;
        for _ in 0..blocks {
            backend.render(&mut l, &mut r);
        }
    }

    #[test]
    fn test_initialize_rejects_zero_sample_rate() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            SignalGraph::initialize(config),
            Err(EngineError::Initialization(_))
        ));
    }

    #[test]
    fn test_play_without_source_is_a_no_op() {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        graph.play();
        assert_eq!(graph.transport_state(), TransportState::Idle);
    }

    #[test]
    fn test_playback_runs_to_end_exactly_once() {
        let (mut graph, mut backend) = graph_with_tone_source(0.5);
        let ended = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&ended);
        graph.on_playback_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        graph.play();
        render_seconds(&mut backend, 2.0);
        graph.tick();

        assert_eq!(graph.transport_state(), TransportState::Idle);
        assert_eq!(graph.current_time(), 0.0);
        assert_eq!(ended.load(Ordering::SeqCst), 1, "end event must fire once");

        // More rendering after the end produces no further events.
        render_seconds(&mut backend, 1.0);
        graph.tick();
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_looping_source_never_ends() {
        let (mut graph, mut backend) = graph_with_tone_source(0.25);
        let ended = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&ended);
        graph.on_playback_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        graph.set_looping(true);
        graph.play();
        render_seconds(&mut backend, 2.0);
        graph.tick();

        assert_eq!(ended.load(Ordering::SeqCst), 0);
        assert_eq!(graph.transport_state(), TransportState::Playing);
        // The published position stays inside the source.
        assert!(graph.current_time() < 0.25);
    }

    #[test]
    fn test_play_while_playing_is_a_no_op() {
        let (mut graph, mut backend) = graph_with_tone_source(2.0);
        graph.play();
        render_seconds(&mut backend, 0.5);

        let position_before = graph.current_time();
        graph.play(); // must not restart
        render_seconds(&mut backend, 0.1);
        assert!(
            graph.current_time() > position_before,
            "second play() restarted the transport"
        );
    }

    #[test]
    fn test_pause_resume_holds_position() {
        let (mut graph, mut backend) = graph_with_tone_source(2.0);
        graph.play();
        render_seconds(&mut backend, 0.5);

        graph.pause();
        render_seconds(&mut backend, 0.5);
        let paused_at = graph.current_time();
        assert_eq!(graph.transport_state(), TransportState::Paused);

        render_seconds(&mut backend, 0.5);
        assert_eq!(graph.current_time(), paused_at, "position moved while paused");

        graph.resume();
        render_seconds(&mut backend, 0.2);
        assert!(graph.current_time() > paused_at);
    }

    #[test]
    fn test_seek_lands_and_does_not_double_fire() {
        let (mut graph, mut backend) = graph_with_tone_source(2.0);
        let ended = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&ended);
        graph.on_playback_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        graph.play();
        graph.seek(1.5);
        render_seconds(&mut backend, 0.1);
        assert!((graph.current_time() - 1.6).abs() < 0.1);

        // Seek near the end twice, then let it run out: still one event.
        graph.seek(1.9);
        graph.seek(1.9);
        render_seconds(&mut backend, 1.0);
        graph.tick();
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_resets_without_end_event() {
        let (mut graph, mut backend) = graph_with_tone_source(2.0);
        let ended = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&ended);
        graph.on_playback_ended(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        graph.play();
        render_seconds(&mut backend, 0.3);
        graph.stop();
        render_seconds(&mut backend, 0.1);
        graph.tick();

        assert_eq!(graph.transport_state(), TransportState::Idle);
        assert_eq!(graph.current_time(), 0.0);
        assert_eq!(ended.load(Ordering::SeqCst), 0, "stop is not an end event");
    }

    #[test]
    fn test_backend_renders_audio_while_playing() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        graph.play();

        let mut l = vec![0.0; 1_024];
        let mut r = vec![0.0; 1_024];
        // Skip a few blocks of ramp-in.
        for _ in 0..10 {
            backend.render(&mut l, &mut r);
        }
        assert!(l.iter().any(|&s| s.abs() > 1e-3), "no audio rendered");
    }

    #[test]
    fn test_tone_bank_plays_without_a_source() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        graph.add_tone(ToneParams::default()).unwrap();

        let mut l = vec![0.0; 1_024];
        let mut r = vec![0.0; 1_024];
        for _ in 0..10 {
            backend.render(&mut l, &mut r);
        }
        assert!(
            l.iter().any(|&s| s.abs() > 1e-3),
            "tones should sound with the transport idle"
        );
    }

    #[test]
    fn test_tone_cap_is_enforced_control_side() {
        let mut graph = SignalGraph::initialize(EngineConfig {
            command_capacity: 512,
            ..EngineConfig::default()
        })
        .unwrap();
        let mut last = None;
        for _ in 0..MAX_TONES {
            last = Some(graph.add_tone(ToneParams::default()).unwrap());
        }
        assert!(graph.add_tone(ToneParams::default()).is_err());

        // Freeing one makes room again.
        graph.remove_tone(last.unwrap()).unwrap();
        assert!(graph.add_tone(ToneParams::default()).is_ok());
    }

    #[test]
    fn test_stale_tone_handle_rejected_after_remove_all() {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        let id = graph.add_tone(ToneParams::default()).unwrap();
        graph.remove_all_tones();
        assert!(graph.set_tone_volume(id, 0.2).is_err());
    }

    #[test]
    fn test_connect_array_requires_speakers() {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        assert!(graph
            .connect_speaker_array(&[], SpeakerArrayConfig::default())
            .is_err());
        assert!(!graph.speaker_array_connected());

        graph
            .connect_speaker_array(
                &[Vec3::new(0.0, 0.0, -5.0)],
                SpeakerArrayConfig::default(),
            )
            .unwrap();
        assert!(graph.speaker_array_connected());
    }

    #[test]
    fn test_extended_mode_renders_through_array() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        graph
            .connect_speaker_array(
                &[Vec3::new(2.0, 0.0, -2.0), Vec3::new(-2.0, 0.0, -2.0)],
                SpeakerArrayConfig::default(),
            )
            .unwrap();
        graph.room_acoustics().unwrap().set_amount(0.5);
        graph.set_looping(true);
        graph.play();

        let mut l = vec![0.0; 1_024];
        let mut r = vec![0.0; 1_024];
        for _ in 0..40 {
            backend.render(&mut l, &mut r);
        }
        assert!(l.iter().any(|&s| s.abs() > 1e-4));
        graph.tick(); // drains any retired objects without panicking
    }

    #[test]
    fn test_speaker_volume_reaches_connected_array() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        graph.set_looping(true);
        graph
            .connect_speaker_array(
                &[Vec3::new(0.0, 0.0, -2.0)],
                SpeakerArrayConfig::default(),
            )
            .unwrap();
        graph.play();

        let mut l = vec![0.0; 1_024];
        let mut r = vec![0.0; 1_024];
        for _ in 0..20 {
            backend.render(&mut l, &mut r);
        }
        assert!(l.iter().any(|&s| s.abs() > 1e-3));

        // Muting the array silences the whole extended chain once the
        // gain ramp and the wet delay tails run out.
        graph.set_speaker_volume(0.0);
        for _ in 0..30 {
            backend.render(&mut l, &mut r);
        }
        assert!(
            l.iter().chain(r.iter()).all(|&s| s.abs() < 1e-4),
            "array volume change never reached the render side"
        );
    }

    #[test]
    fn test_room_handle_gated_on_array() {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        assert!(graph.room_acoustics().is_none());

        graph
            .connect_speaker_array(
                &[Vec3::new(0.0, 0.0, -3.0)],
                SpeakerArrayConfig::default(),
            )
            .unwrap();
        let mut room = graph.room_acoustics().unwrap();
        assert!(room.set_decay_time(0.01).is_err());
        assert!(room.set_decay_time(60.0).is_err());
        assert!(room.set_decay_time(1.5).is_ok());

        graph.disconnect_speaker_array();
        assert!(graph.room_acoustics().is_none());
    }

    #[test]
    fn test_trash_drains_on_tick() {
        let (mut graph, mut backend) = graph_with_tone_source(0.2);
        graph.play();
        render_seconds(&mut backend, 1.0); // source ends, retires via trash
        let id = graph.add_tone(ToneParams::default()).unwrap();
        render_seconds(&mut backend, 0.1);
        graph.remove_tone(id).unwrap();
        render_seconds(&mut backend, 0.5); // release completes, voice retires
        graph.tick();
        // Nothing to assert beyond "no panic"; the drop happened here.
    }

    #[test]
    fn test_parameter_mirror_tracks_setters() {
        let mut graph = SignalGraph::initialize(EngineConfig::default()).unwrap();
        graph.set_detune(Ear::Left, -7.0);
        graph.set_detune(Ear::Right, 7.0);
        graph.set_dry_wet(0.8);
        graph.set_master_volume(0.4);
        graph.set_smear_depth(0.9);
        graph.set_compressor_active(true);

        let p = graph.params();
        assert_eq!(p.detune_left_cents, -7.0);
        assert_eq!(p.detune_right_cents, 7.0);
        assert_eq!(p.dry_wet, 0.8);
        assert_eq!(p.master_volume, 0.4);
        assert_eq!(p.smear_depth, 0.9);
        assert!(p.compressor_active);
    }

    #[test]
    fn test_taps_run_ahead_of_master_levels_behind() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        let mut feeds = graph.take_analysis_feeds().unwrap();
        graph.set_looping(true);
        graph.play();
        graph.set_master_volume(0.0);
        render_seconds(&mut backend, 0.2);

        // Discard whatever landed while the master gain ramped out.
        let mut scratch = vec![0.0; 48_000];
        feeds.left_tap.drain(&mut scratch);

        render_seconds(&mut backend, 0.05);
        let read = feeds.left_tap.drain(&mut scratch);
        assert!(read > 0);
        assert!(
            scratch[..read].iter().any(|&s| s.abs() > 1e-3),
            "per-ear tap should see the chain before the master gain"
        );
        assert!(
            feeds.levels.left() < 1e-6,
            "levels should meter the muted final output"
        );
    }

    #[test]
    fn test_levels_publish_during_render() {
        let (mut graph, mut backend) = graph_with_tone_source(1.0);
        let feeds = graph.take_analysis_feeds().unwrap();
        graph.play();
        render_seconds(&mut backend, 0.2);
        assert!(feeds.levels.left() > 0.0);
        assert!(feeds.levels.right() > 0.0);
    }
}
