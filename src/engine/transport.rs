use crate::io::AudioBufferPair;
use std::sync::Arc;

/// Coarse transport state, published to the control side through an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportState {
    Idle,
    Playing,
    Paused,
}

impl TransportState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            TransportState::Idle => 0,
            TransportState::Playing => 1,
            TransportState::Paused => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Idle,
        }
    }
}

/// Playback cursor over a decoded stereo buffer.
///
/// Sources are single-use: each play() builds a fresh one on the control
/// path and ships it over the command ring, and a finished or stopped
/// source goes back out through the trash ring. The render path never
/// rewinds a retired source.
pub struct BufferSource {
    buffer: Arc<AudioBufferPair>,
    position: usize,
}

/// Outcome of one fill pass.
pub struct FillResult {
    /// Frames actually written.
    pub frames: usize,
    /// The source ran off the end of a non-looping buffer.
    pub ended: bool,
}

impl BufferSource {
    pub fn new(buffer: Arc<AudioBufferPair>) -> Self {
        Self { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn frames(&self) -> usize {
        self.buffer.left.len()
    }

    /// Jump the cursor, clamped to the buffer length.
    pub fn seek_to(&mut self, frame: usize) {
        self.position = frame.min(self.frames());
    }

    /// Copy the next chunk into `left`/`right`. When `looping`, the cursor
    /// wraps and the fill continues from the top, so reported positions
    /// always stay in `[0, frames)`.
    pub fn fill(&mut self, left: &mut [f32], right: &mut [f32], looping: bool) -> FillResult {
        debug_assert_eq!(left.len(), right.len());
        let total = self.frames();
        if total == 0 {
            left.fill(0.0);
            right.fill(0.0);
            return FillResult {
                frames: 0,
                ended: true,
            };
        }

        let mut written = 0;
        while written < left.len() {
            if self.position >= total {
                if looping {
                    self.position = 0;
                } else {
                    left[written..].fill(0.0);
                    right[written..].fill(0.0);
                    return FillResult {
                        frames: written,
                        ended: true,
                    };
                }
            }

            let run = (total - self.position).min(left.len() - written);
            left[written..written + run]
                .copy_from_slice(&self.buffer.left[self.position..self.position + run]);
            right[written..written + run]
                .copy_from_slice(&self.buffer.right[self.position..self.position + run]);
            self.position += run;
            written += run;
        }

        FillResult {
            frames: written,
            ended: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(frames: usize) -> Arc<AudioBufferPair> {
        let left: Vec<f32> = (0..frames).map(|i| i as f32).collect();
        let right: Vec<f32> = (0..frames).map(|i| -(i as f32)).collect();
        Arc::new(AudioBufferPair::new(left, right, 48_000))
    }

    #[test]
    fn test_fill_copies_and_advances() {
        let mut source = BufferSource::new(ramp_buffer(100));
        let mut l = vec![0.0; 40];
        let mut r = vec![0.0; 40];
        let result = source.fill(&mut l, &mut r, false);
        assert_eq!(result.frames, 40);
        assert!(!result.ended);
        assert_eq!(l[0], 0.0);
        assert_eq!(l[39], 39.0);
        assert_eq!(r[39], -39.0);
        assert_eq!(source.position(), 40);
    }

    #[test]
    fn test_non_looping_source_ends_and_pads_silence() {
        let mut source = BufferSource::new(ramp_buffer(50));
        let mut l = vec![9.0; 80];
        let mut r = vec![9.0; 80];
        let result = source.fill(&mut l, &mut r, false);
        assert_eq!(result.frames, 50);
        assert!(result.ended);
        assert_eq!(l[49], 49.0);
        assert!(l[50..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_looping_source_wraps_position() {
        let mut source = BufferSource::new(ramp_buffer(30));
        let mut l = vec![0.0; 75];
        let mut r = vec![0.0; 75];
        let result = source.fill(&mut l, &mut r, true);
        assert_eq!(result.frames, 75);
        assert!(!result.ended);
        // 75 = 2 * 30 + 15; the cursor lands inside the third pass.
        assert_eq!(source.position(), 15);
        assert_eq!(l[30], 0.0);
        assert_eq!(l[60], 0.0);
        assert_eq!(l[74], 14.0);
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut source = BufferSource::new(ramp_buffer(20));
        source.seek_to(1_000);
        assert_eq!(source.position(), 20);
        source.seek_to(5);
        assert_eq!(source.position(), 5);
    }

    #[test]
    fn test_empty_buffer_ends_immediately() {
        let mut source = BufferSource::new(ramp_buffer(0));
        let mut l = vec![1.0; 16];
        let mut r = vec![1.0; 16];
        let result = source.fill(&mut l, &mut r, true);
        assert!(result.ended);
        assert!(l.iter().all(|&s| s == 0.0));
    }
}
