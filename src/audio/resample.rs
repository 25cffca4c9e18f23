//! Sample rate conversion.
//!
//! Streaming linear interpolation over interleaved `f32` audio. The last
//! input frame of every chunk is kept so interpolation continues seamlessly
//! across chunk boundaries.

/// Stateful linear resampler for interleaved audio
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    channels: usize,
    /// Source frames advanced per output frame
    step: f64,
    /// Position of the next output frame, in source frames relative to the
    /// first frame of the next chunk (-1.0 is `previous`)
    position: f64,
    previous: Vec<f32>,
    primed: bool,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate,
            channels: channels as usize,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            previous: vec![0.0; channels as usize],
            primed: false,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Resample one chunk of interleaved samples.
    ///
    /// Trailing samples that do not form a complete frame are ignored.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let channels = self.channels;
        let frames = input.len() / channels;
        if frames == 0 {
            return Vec::new();
        }

        if !self.primed {
            self.previous.copy_from_slice(&input[..channels]);
            self.primed = true;
        }

        let last = (frames - 1) as f64;
        let estimate = ((last - self.position) / self.step).ceil().max(0.0) as usize;
        let mut output = Vec::with_capacity((estimate + 1) * channels);

        let mut position = self.position;
        while position < last {
            let index = position.floor();
            let frac = (position - index) as f32;
            let a = frame_at(&self.previous, input, channels, index as isize);
            let b = frame_at(&self.previous, input, channels, index as isize + 1);
            for ch in 0..channels {
                output.push(a[ch] + (b[ch] - a[ch]) * frac);
            }
            position += self.step;
        }

        self.position = position - frames as f64;
        self.previous
            .copy_from_slice(&input[(frames - 1) * channels..frames * channels]);

        output
    }
}

/// Frame `index` of the chunk, where -1 is the last frame of the previous chunk
fn frame_at<'a>(previous: &'a [f32], input: &'a [f32], channels: usize, index: isize) -> &'a [f32] {
    if index < 0 {
        previous
    } else {
        let start = index as usize * channels;
        &input[start..start + channels]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| i as f32).collect()
    }

    #[test]
    fn test_downsample_length() {
        let mut resampler = Resampler::new(48000, 24000, 1);
        let mut total = 0;
        for chunk in ramp(4800).chunks(480) {
            total += resampler.process(chunk).len();
        }
        assert!((2399..=2401).contains(&total), "got {}", total);
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut resampler = Resampler::new(24000, 48000, 1);
        let out = resampler.process(&[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_chunking_is_seamless() {
        let input = ramp(1000);

        let mut whole = Resampler::new(44100, 48000, 1);
        let expected = whole.process(&input);

        let mut chunked = Resampler::new(44100, 48000, 1);
        let mut got = Vec::new();
        for chunk in input.chunks(97) {
            got.extend(chunked.process(chunk));
        }

        let n = expected.len().min(got.len());
        assert!(n > 1000);
        for i in 0..n {
            assert!((expected[i] - got[i]).abs() < 1e-3, "sample {} differs", i);
        }
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let mut resampler = Resampler::new(24000, 48000, 2);
        let out = resampler.process(&[0.0, 10.0, 2.0, 20.0, 4.0, 30.0]);
        assert_eq!(out, vec![0.0, 10.0, 1.0, 15.0, 2.0, 20.0, 3.0, 25.0]);
    }

    #[test]
    fn test_empty_input() {
        let mut resampler = Resampler::new(48000, 44100, 2);
        assert!(resampler.process(&[]).is_empty());
        assert!(resampler.process(&[1.0]).is_empty());
    }
}
