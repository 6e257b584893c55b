//! 3D positioning: head-model binaural panning, the direct/spatial stage,
//! the fixed speaker array, and room acoustics.

/// ITD/ILD head-model panner with fractional inter-aural delays.
pub mod hrtf;
/// Direct/spatial crossfade stage around a single panned source.
pub mod positioner;
/// Early reflections and convolution reverb for the corridor model.
pub mod room;
/// Distance-gated fixed speaker array with propagation delay.
pub mod speakers;

pub use hrtf::HrtfPanner;
pub use positioner::SpatialPositioner;
pub use room::RoomAcousticsUnit;
pub use speakers::{SpeakerArrayConfig, SpeakerDescriptor, SpeakerPropagationArray};

/// Minimal 3D vector. Y is up, -Z is the listener's default forward.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector, or zero when the input has no length.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > 1e-9 {
            Self::new(self.x / len, self.y / len, self.z / len)
        } else {
            Self::ZERO
        }
    }
}

/// Listener position and orientation in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ListenerPose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

impl ListenerPose {
    /// Direction of `target` in listener-local terms: (azimuth radians,
    /// elevation radians, distance meters). Azimuth is positive to the
    /// listener's right.
    pub fn direction_to(&self, target: Vec3) -> (f32, f32, f32) {
        let offset = target.sub(self.position);
        let distance = offset.length();
        if distance < 1e-6 {
            return (0.0, 0.0, 0.0);
        }

        let forward = self.forward.normalized();
        let up = self.up.normalized();
        let right = forward.cross(up).normalized();
        let dir = offset.normalized();

        let fwd_component = dir.dot(forward);
        let right_component = dir.dot(right);
        let up_component = dir.dot(up);

        let azimuth = right_component.atan2(fwd_component);
        let elevation = up_component.clamp(-1.0, 1.0).asin();
        (azimuth, elevation, distance)
    }
}
