use crate::dsp::delay::DelayLine;
use crate::dsp::smooth::Smoothed;
use crate::spatial::hrtf::HrtfPanner;
use crate::spatial::{ListenerPose, Vec3};
use crate::{MAX_BLOCK_SIZE, SPEED_OF_SOUND};

/*
Speaker propagation array
=========================

Extended mode replaces the single positioned source with N virtual
speakers fixed in world space, all playing the same program. Each speaker
is processed as:

  mono feed -> propagation delay -> distance gate gain -> binaural panner

and the panned outputs sum into the stereo bus. The propagation delay is
the physical travel time distance/343 s, so walking between speakers
produces genuine arrival-time differences (and slow movement produces a
subtle Doppler from the delay ramping).

The distance gate is a pure function of listener distance: a speaker is
active iff distance <= activation_radius. No hysteresis band; a listener
hovering exactly at the boundary flips the target gain, but the 20 ms gain
ramp turns that into a soft flutter rather than clicks.
*/

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpeakerArrayConfig {
    /// Speakers farther than this from the listener are silent.
    pub activation_radius: f32,
    /// Gain of an active speaker before panning.
    pub nominal_gain: f32,
    /// Upper bound for the propagation delay lines.
    pub max_delay_seconds: f32,
}

impl Default for SpeakerArrayConfig {
    fn default() -> Self {
        Self {
            activation_radius: 50.0,
            nominal_gain: 0.6,
            // activation_radius / 343, rounded up with headroom.
            max_delay_seconds: 0.5,
        }
    }
}

/// Travel time from a speaker at `distance` meters, in seconds.
#[inline]
pub fn propagation_delay_seconds(distance: f32) -> f32 {
    distance.max(0.0) / SPEED_OF_SOUND
}

/// Read-only view of one speaker's state, for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerDescriptor {
    pub index: usize,
    pub position: Vec3,
    pub active: bool,
    pub distance: f32,
}

struct Speaker {
    position: Vec3,
    active: bool,
    distance: f32,
    gain: Smoothed,
    delay: DelayLine,
    delay_samples: Smoothed,
    panner: HrtfPanner,
}

/// A set of world-fixed speakers with per-speaker propagation and gating.
pub struct SpeakerPropagationArray {
    sample_rate: f32,
    config: SpeakerArrayConfig,
    speakers: Vec<Speaker>,
    volume: Smoothed,
    listener: ListenerPose,
}

impl SpeakerPropagationArray {
    /// Built entirely on the control path: every delay line and panner is
    /// allocated here, then the array ships to the render side whole.
    pub fn new(positions: &[Vec3], config: SpeakerArrayConfig, sample_rate: f32) -> Self {
        let listener = ListenerPose::default();
        let speakers = positions
            .iter()
            .map(|&position| {
                let mut speaker = Speaker {
                    position,
                    active: false,
                    distance: 0.0,
                    gain: Smoothed::new(0.0, 0.02, sample_rate),
                    delay: DelayLine::with_duration(config.max_delay_seconds, sample_rate),
                    delay_samples: Smoothed::new(1.0, 0.02, sample_rate),
                    panner: HrtfPanner::new(sample_rate),
                };
                Self::aim_speaker(&mut speaker, &listener, &config, sample_rate, true);
                speaker
            })
            .collect();

        Self {
            sample_rate,
            config,
            speakers,
            volume: Smoothed::new(1.0, 0.02, sample_rate),
            listener,
        }
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume.set_target(volume.clamp(0.0, 2.0));
    }

    /// Re-aim every speaker at the new listener pose: distances, gate
    /// states, propagation delays and panner cues all retarget.
    pub fn update_listener(&mut self, pose: ListenerPose) {
        self.listener = pose;
        for speaker in &mut self.speakers {
            Self::aim_speaker(speaker, &self.listener, &self.config, self.sample_rate, false);
        }
    }

    fn aim_speaker(
        speaker: &mut Speaker,
        listener: &ListenerPose,
        config: &SpeakerArrayConfig,
        sample_rate: f32,
        snap: bool,
    ) {
        let (azimuth, elevation, distance) = listener.direction_to(speaker.position);
        speaker.distance = distance;
        speaker.active = distance <= config.activation_radius;

        let gain = if speaker.active { config.nominal_gain } else { 0.0 };
        let max_samples = speaker.delay.max_delay_samples() as f32;
        let delay = (propagation_delay_seconds(distance) * sample_rate)
            .clamp(1.0, max_samples);

        if snap {
            speaker.gain.snap_to(gain);
            speaker.delay_samples.snap_to(delay);
        } else {
            speaker.gain.set_target(gain);
            speaker.delay_samples.set_target(delay);
        }
        speaker.panner.set_direction(azimuth, elevation, distance);
    }

    pub fn descriptors(&self) -> Vec<SpeakerDescriptor> {
        self.speakers
            .iter()
            .enumerate()
            .map(|(index, s)| SpeakerDescriptor {
                index,
                position: s.position,
                active: s.active,
                distance: s.distance,
            })
            .collect()
    }

    /// Feed a mono block through every speaker, summing the panned
    /// results into `left` / `right` (overwrites, does not add).
    pub fn process_block(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        let frames = input.len().min(MAX_BLOCK_SIZE);
        left[..frames].fill(0.0);
        right[..frames].fill(0.0);

        for speaker in &mut self.speakers {
            // Skip speakers that are gated off and fully faded.
            if !speaker.active && !speaker.gain.is_ramping() && speaker.gain.value() <= 1e-6 {
                // History still advances so reactivation has a full line.
                for &x in &input[..frames] {
                    speaker.delay.write(x);
                    speaker.delay_samples.next();
                }
                continue;
            }

            for n in 0..frames {
                speaker.delay.write(input[n]);
                let delayed = speaker
                    .delay
                    .read_interpolated(speaker.delay_samples.next());
                let fed = delayed * speaker.gain.next();
                let (l, r) = speaker.panner.process_sample(fed);
                left[n] += l;
                right[n] += r;
            }
        }

        for n in 0..frames {
            let v = self.volume.next();
            left[n] *= v;
            right[n] *= v;
        }
    }

    pub fn reset(&mut self) {
        for speaker in &mut self.speakers {
            speaker.delay.reset();
            speaker.panner.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener_at(position: Vec3) -> ListenerPose {
        ListenerPose {
            position,
            ..ListenerPose::default()
        }
    }

    #[test]
    fn test_activation_is_pure_distance_gate() {
        let positions = [
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(60.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, -5.0),
        ];
        let mut array =
            SpeakerPropagationArray::new(&positions, SpeakerArrayConfig::default(), 48_000.0);
        array.update_listener(listener_at(Vec3::ZERO));

        let active: Vec<bool> = array.descriptors().iter().map(|d| d.active).collect();
        assert_eq!(active, vec![true, false, true]);
    }

    #[test]
    fn test_gate_flips_both_ways_without_hysteresis() {
        let positions = [Vec3::new(49.0, 0.0, 0.0)];
        let mut array =
            SpeakerPropagationArray::new(&positions, SpeakerArrayConfig::default(), 48_000.0);

        array.update_listener(listener_at(Vec3::ZERO));
        assert!(array.descriptors()[0].active);

        // Step just outside the radius, then back.
        array.update_listener(listener_at(Vec3::new(-2.0, 0.0, 0.0)));
        assert!(!array.descriptors()[0].active);
        array.update_listener(listener_at(Vec3::ZERO));
        assert!(array.descriptors()[0].active);
    }

    #[test]
    fn test_propagation_delay_tracks_distance() {
        assert!((propagation_delay_seconds(343.0) - 1.0).abs() < 1e-6);
        assert!((propagation_delay_seconds(34.3) - 0.1).abs() < 1e-6);
        assert_eq!(propagation_delay_seconds(-5.0), 0.0);
    }

    #[test]
    fn test_nearer_speaker_arrives_first() {
        let sr = 48_000.0;
        let positions = [Vec3::new(0.0, 0.0, -3.43)]; // 10 ms away
        let mut array =
            SpeakerPropagationArray::new(&positions, SpeakerArrayConfig::default(), sr);
        array.update_listener(listener_at(Vec3::ZERO));

        let mut input = vec![0.0; 2_048];
        input[0] = 1.0;
        let mut left = vec![0.0; 2_048];
        let mut right = vec![0.0; 2_048];
        array.process_block(&input, &mut left, &mut right);

        let first_sound = left
            .iter()
            .zip(right.iter())
            .position(|(l, r)| l.abs() > 1e-4 || r.abs() > 1e-4)
            .expect("impulse never arrived");
        let expected = (0.01 * sr) as usize;
        assert!(
            first_sound >= expected - 4 && first_sound <= expected + 64,
            "impulse arrived at {first_sound}, expected ~{expected}"
        );
    }

    #[test]
    fn test_deactivated_speaker_fades_to_silence() {
        let sr = 48_000.0;
        let positions = [Vec3::new(5.0, 0.0, 0.0)];
        let mut array =
            SpeakerPropagationArray::new(&positions, SpeakerArrayConfig::default(), sr);
        array.update_listener(listener_at(Vec3::ZERO));

        let input = vec![0.5; 1_024];
        let mut left = vec![0.0; 1_024];
        let mut right = vec![0.0; 1_024];
        // Warm the delay line and confirm output.
        for _ in 0..10 {
            array.process_block(&input, &mut left, &mut right);
        }
        assert!(left.iter().any(|&s| s.abs() > 1e-3));

        // Walk out of range; after the ramp the speaker is silent.
        array.update_listener(listener_at(Vec3::new(100.0, 0.0, 0.0)));
        for _ in 0..10 {
            array.process_block(&input, &mut left, &mut right);
        }
        assert!(
            left.iter().chain(right.iter()).all(|&s| s.abs() < 1e-4),
            "gated speaker still audible"
        );
    }

    #[test]
    fn test_delay_clamps_at_line_capacity() {
        let positions = [Vec3::new(10_000.0, 0.0, 0.0)]; // 29 s of travel
        let config = SpeakerArrayConfig {
            activation_radius: 20_000.0,
            ..SpeakerArrayConfig::default()
        };
        let mut array = SpeakerPropagationArray::new(&positions, config, 48_000.0);
        array.update_listener(listener_at(Vec3::ZERO));

        // Must not panic or read out of range.
        let input = vec![0.1; 512];
        let mut left = vec![0.0; 512];
        let mut right = vec![0.0; 512];
        array.process_block(&input, &mut left, &mut right);
        assert!(left.iter().all(|s| s.is_finite()));
    }
}
