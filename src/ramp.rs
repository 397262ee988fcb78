use crate::audio::{check_channels, FrameSource};
use crate::error::{MixRampError, Result};
use crate::gain::GainAnalysis;

// ─── Constants ───────────────────────────────────────────────────────────────

/// 分块时长（秒）。ReplayGain 建议的最小值是 20ms，但那样会出现采样不足的错误
pub const CHUNK_SECONDS: f64 = 0.10;

/// 16 位有符号满幅，ReplayGain 以此为采样刻度
const SCALE: f64 = (1 << 15) as f64;

/// 记录断点的响度阶梯（dB），严格递增
pub const LADDER: [f64; 15] = [
    -90.0, -60.0, -40.0, -30.0, -24.0, -21.0, -18.0, -15.0, -12.0, -9.0, -6.0, -3.0, 0.0, 3.0, 6.0,
];

// ─── Tables ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampPoint {
    pub db: f64,
    pub seconds: f64,
}

/// 每个阶梯值对应一行，`None` 表示从未达到该响度
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RampTable {
    rows: [Option<RampPoint>; LADDER.len()],
}

impl RampTable {
    pub fn rows(&self) -> &[Option<RampPoint>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Option::is_none)
    }

    #[cfg(test)]
    pub(crate) fn from_rows(rows: [Option<RampPoint>; LADDER.len()]) -> Self {
        Self { rows }
    }
}

/// 一次完整扫描的结果
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ramps {
    pub start: RampTable,
    pub end: RampTable,
    /// 参与分析的完整分块数
    pub chunks: usize,
}

// ─── Extractor ───────────────────────────────────────────────────────────────

fn padded_length(frames: u64, sample_rate: f64) -> f64 {
    frames as f64 / sample_rate + CHUNK_SECONDS
}

/// 逐块扫描音频并填充起始/结束两张表
pub struct RampExtractor {
    channels: usize,
    sample_rate: f64,
    chunk_frames: usize,
    /// 轨道长度加一个分块；长度未知时结束表先记录分块起点，读完后再换算
    length: Option<f64>,
    ramps: Ramps,
}

impl RampExtractor {
    pub fn new(source: &dyn FrameSource) -> Result<Self> {
        let channels = check_channels(source.channels())?;
        let sample_rate = source.sample_rate();
        Ok(Self {
            channels,
            sample_rate,
            chunk_frames: (CHUNK_SECONDS * sample_rate) as usize,
            length: source.frame_count().map(|n| padded_length(n, sample_rate)),
            ramps: Ramps::default(),
        })
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// 读完整个来源，末尾不足一块的部分被丢弃
    pub fn run(mut self, source: &mut dyn FrameSource, engine: &mut GainAnalysis) -> Result<Ramps> {
        let k = self.chunk_frames;
        if k < engine.min_samples() {
            return Err(MixRampError::NotEnoughSamples(k));
        }

        let mut interleaved = vec![0.0; k * self.channels];
        let mut left = vec![0.0; k];
        let mut right = if self.channels == 2 { vec![0.0; k] } else { Vec::new() };

        let mut frames_read = 0u64;
        loop {
            let n = source.read_frames(&mut interleaved, k)?;
            frames_read += n as u64;
            if n < k { break; }

            if self.channels == 1 {
                for (l, s) in left.iter_mut().zip(&interleaved) {
                    *l = SCALE * s;
                }
            } else {
                for ((l, r), frame) in left.iter_mut().zip(right.iter_mut()).zip(interleaved.chunks_exact(2)) {
                    *l = SCALE * frame[0];
                    *r = SCALE * frame[1];
                }
            }

            let time = (self.ramps.chunks * k) as f64 / self.sample_rate;
            let rs = if self.channels == 2 { Some(right.as_slice()) } else { None };
            engine.analyze_samples(&left, rs);
            // The chunk loudness is the negative of the ReplayGain.
            let loudness = -engine.title_gain()?;

            self.record(loudness, time);
            self.ramps.chunks += 1;
        }

        if self.length.is_none() {
            let length = padded_length(frames_read, self.sample_rate);
            for point in self.ramps.end.rows.iter_mut().flatten() {
                point.seconds = length - point.seconds;
            }
        }

        Ok(self.ramps)
    }

    /// 用一个分块的响度更新两张表
    fn record(&mut self, loudness: f64, time: f64) {
        // Start rows keep the first crossing.
        for (row, &db) in self.ramps.start.rows.iter_mut().zip(&LADDER) {
            if row.is_none() && loudness >= db {
                *row = Some(RampPoint { db: loudness, seconds: time });
            }
        }
        // End rows keep the last crossing, measured back from the end.
        for (row, &db) in self.ramps.end.rows.iter_mut().zip(&LADDER) {
            if loudness >= db {
                let seconds = self.length.map_or(time, |length| length - time);
                *row = Some(RampPoint { db: loudness, seconds });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySource;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn extractor_for(channels: usize, rate: f64, frames: usize) -> RampExtractor {
        let src = MemorySource::new(channels, rate, vec![0.0; frames * channels]);
        RampExtractor::new(&src).unwrap()
    }

    fn sine(rate: f64, amplitude: f64, frames: usize) -> Vec<f64> {
        (0..frames)
            .map(|i| amplitude * (2.0 * PI * 1000.0 * i as f64 / rate).sin())
            .collect()
    }

    fn run(src: &mut MemorySource) -> Ramps {
        let mut engine = GainAnalysis::new(src.sample_rate).unwrap();
        RampExtractor::new(&*src).unwrap().run(src, &mut engine).unwrap()
    }

    #[test]
    fn ladder_is_strictly_increasing() {
        assert!(LADDER.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn chunk_size_follows_rate() {
        assert_eq!(extractor_for(1, 44100.0, 0).chunk_frames(), 4410);
        assert_eq!(extractor_for(2, 48000.0, 0).chunk_frames(), 4800);
        assert_eq!(extractor_for(1, 11025.0, 0).chunk_frames(), 1102);
    }

    #[test]
    fn rejects_three_channels() {
        let src = MemorySource::new(3, 44100.0, vec![0.0; 30]);
        assert!(matches!(RampExtractor::new(&src), Err(MixRampError::UnsupportedChannels(3))));
    }

    #[test]
    fn chunk_below_window_is_fatal() {
        let mut src = MemorySource::new(1, 44100.0, vec![0.0; 44100]);
        let mut engine = GainAnalysis::new(44100.0).unwrap();
        let mut ex = RampExtractor::new(&src).unwrap();
        ex.chunk_frames = 1000;
        assert!(matches!(ex.run(&mut src, &mut engine), Err(MixRampError::NotEnoughSamples(1000))));
    }

    #[test]
    fn start_keeps_first_and_end_keeps_last() {
        let mut ex = extractor_for(1, 44100.0, 44100);
        ex.record(-50.0, 0.0);
        ex.record(-20.0, 0.1);
        ex.record(-50.0, 0.2);

        let start = ex.ramps.start.rows();
        assert_eq!(start[0], Some(RampPoint { db: -50.0, seconds: 0.0 }));
        assert_eq!(start[1], Some(RampPoint { db: -50.0, seconds: 0.0 }));
        assert_eq!(start[2], Some(RampPoint { db: -20.0, seconds: 0.1 }));
        assert_eq!(start[6], Some(RampPoint { db: -20.0, seconds: 0.1 }));
        assert_eq!(start[7], None);

        let end = ex.ramps.end.rows();
        let length = 1.0 + CHUNK_SECONDS;
        assert_eq!(end[0], Some(RampPoint { db: -50.0, seconds: length - 0.2 }));
        assert_eq!(end[2], Some(RampPoint { db: -20.0, seconds: length - 0.1 }));
        assert_eq!(end[7], None);
    }

    #[test]
    fn silence_leaves_tables_unset() {
        let mut src = MemorySource::new(1, 44100.0, vec![0.0; 44100]);
        let ramps = run(&mut src);
        assert_eq!(ramps.chunks, 10);
        assert!(ramps.start.is_empty());
        assert!(ramps.end.is_empty());
    }

    #[test]
    fn shorter_than_one_chunk() {
        let mut src = MemorySource::new(2, 48000.0, vec![0.3; 2 * 4799]);
        let ramps = run(&mut src);
        assert_eq!(ramps.chunks, 0);
        assert!(ramps.start.is_empty() && ramps.end.is_empty());
    }

    #[test]
    fn partial_tail_is_discarded() {
        let mut samples = vec![0.0; 44100];
        samples.extend(sine(44100.0, 1.0, 4000));
        let mut src = MemorySource::new(1, 44100.0, samples);
        let ramps = run(&mut src);
        assert_eq!(ramps.chunks, 10);
        assert!(ramps.start.is_empty());
    }

    #[test]
    fn loud_sine_fills_every_row() {
        let mut src = MemorySource::new(1, 44100.0, sine(44100.0, 1.0, 44100));
        let ramps = run(&mut src);
        for (s, e) in ramps.start.rows().iter().zip(ramps.end.rows()) {
            let s = s.unwrap();
            let e = e.unwrap();
            assert!(s.db > 6.0);
            assert_eq!(s.seconds, 0.0);
            // Last chunk starts at 0.9 s, length is padded to 1.1 s.
            assert!((e.seconds - 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn stereo_matches_mono() {
        let mono = sine(48000.0, 0.8, 48000);
        let stereo: Vec<f64> = mono.iter().flat_map(|s| [*s, *s]).collect();
        let a = run(&mut MemorySource::new(1, 48000.0, mono));
        let b = run(&mut MemorySource::new(2, 48000.0, stereo));
        assert_eq!(a, b);
    }

    #[test]
    fn fade_in_starts_late() {
        let mut samples = vec![0.0; 5 * 44100];
        samples.extend(sine(44100.0, 1.0, 5 * 44100));
        let ramps = run(&mut MemorySource::new(1, 44100.0, samples));
        let first = ramps.start.rows()[0].unwrap();
        assert!((first.seconds - 5.0).abs() < 1e-9);
        let last = ramps.end.rows()[0].unwrap();
        assert!((last.seconds - 0.2).abs() < 1e-9);
    }

    #[test]
    fn unknown_length_is_measured_while_reading() {
        // 1.05 s: the partial tail still counts towards the length.
        let samples = sine(44100.0, 1.0, 44100 + 2205);
        let known = run(&mut MemorySource::new(1, 44100.0, samples.clone()));
        let unknown = run(&mut MemorySource::new(1, 44100.0, samples).without_length());
        assert_eq!(known, unknown);
        for point in unknown.end.rows().iter().flatten() {
            assert!((point.seconds - 0.25).abs() < 1e-9, "{:?}", point);
        }
    }

    #[test]
    fn unknown_length_keeps_end_times_positive() {
        let mut samples = sine(44100.0, 1.0, 2 * 44100);
        samples.extend(vec![0.0; 44100]);
        let ramps = run(&mut MemorySource::new(1, 44100.0, samples).without_length());
        let last = ramps.end.rows()[0].unwrap();
        // Last loud chunk starts at 1.9 s of a 3.1 s padded length.
        assert!((last.seconds - 1.2).abs() < 1e-9);
        assert!(ramps.end.rows().iter().flatten().all(|p| p.seconds > 0.0));
    }

    proptest! {
        #[test]
        fn tables_respect_ladder(levels in prop::collection::vec(-120.0f64..20.0, 1..60)) {
            let mut ex = extractor_for(1, 8000.0, levels.len() * 800);
            for (j, v) in levels.iter().enumerate() {
                ex.record(*v, j as f64 * 0.1);
            }
            for (i, (s, e)) in ex.ramps.start.rows().iter().zip(ex.ramps.end.rows()).enumerate() {
                prop_assert_eq!(s.is_some(), e.is_some());
                if let (Some(s), Some(e)) = (s, e) {
                    prop_assert!(s.db >= LADDER[i]);
                    prop_assert!(e.db >= LADDER[i]);
                }
            }
            // Higher thresholds are reached no earlier at the head and no later at the tail.
            let start: Vec<_> = ex.ramps.start.rows().iter().flatten().collect();
            prop_assert!(start.windows(2).all(|w| w[0].seconds <= w[1].seconds));
            let end: Vec<_> = ex.ramps.end.rows().iter().flatten().collect();
            prop_assert!(end.windows(2).all(|w| w[0].seconds >= w[1].seconds));
        }
    }
}
