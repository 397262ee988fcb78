use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

use crate::error::{MixRampError, Result};
use crate::veprintln;

// ─── Frame sources ───────────────────────────────────────────────────────────

/// 交错浮点 PCM 的来源，采样范围 (-1, 1)
pub trait FrameSource {
    fn channels(&self) -> usize;
    fn sample_rate(&self) -> f64;
    /// 总帧数，容器未给出时为 `None`
    fn frame_count(&self) -> Option<u64>;
    /// 读取至多 `frames` 帧到 `buf`，返回实际帧数；少于请求数表示流已结束
    fn read_frames(&mut self, buf: &mut [f64], frames: usize) -> Result<usize>;
}

/// 只接受单声道和立体声
pub fn check_channels(count: usize) -> Result<usize> {
    match count {
        1 | 2 => Ok(count),
        n => Err(MixRampError::UnsupportedChannels(n)),
    }
}

// ─── Symphonia decoder ───────────────────────────────────────────────────────

pub struct AudioFile {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: f64,
    frame_count: Option<u64>,
    time_base: Option<TimeBase>,
    /// 已解码但尚未读出的交错采样
    pending: VecDeque<f64>,
    finished: bool,
}

impl AudioFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path).map_err(|source| MixRampError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| MixRampError::Decode("无音频轨道".into()))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let channels = codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| MixRampError::Decode("未知声道数".into()))?;
        check_channels(channels)?;

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| MixRampError::Decode("未知采样率".into()))?;
        let frame_count = codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())?;

        veprintln!(
            "{}: {} 声道, {} Hz, {} 帧",
            path.display(),
            channels,
            sample_rate,
            frame_count.map_or_else(|| "未知".to_string(), |n| n.to_string())
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate: f64::from(sample_rate),
            frame_count,
            time_base: codec_params.time_base,
            pending: VecDeque::new(),
            finished: false,
        })
    }

    /// 解码下一个属于本轨道的数据包，流结束时返回 `false`
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
                Err(SymphoniaError::ResetRequired) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id { continue; }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Keep later chunks on time: the lost packet becomes silence.
                    let frames = packet_frames(self.time_base, packet.dur, self.sample_rate);
                    veprintln!("无法解码的数据包以 {} 帧静音代替: {}", frames, msg);
                    self.pending.extend(std::iter::repeat(0.0).take(frames * self.channels));
                    return Ok(true);
                }
                Err(e) => return Err(e.into()),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();
            let mut sample_buf = SampleBuffer::<f64>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.extend(sample_buf.samples());
            return Ok(true);
        }
    }
}

/// 数据包时长换算为帧数；没有时间基准时按帧计
fn packet_frames(time_base: Option<TimeBase>, dur: u64, sample_rate: f64) -> usize {
    match time_base {
        Some(tb) => {
            let time = tb.calc_time(dur);
            ((time.seconds as f64 + time.frac) * sample_rate).round() as usize
        }
        None => dur as usize,
    }
}

impl FrameSource for AudioFile {
    fn channels(&self) -> usize { self.channels }

    fn sample_rate(&self) -> f64 { self.sample_rate }

    fn frame_count(&self) -> Option<u64> { self.frame_count }

    fn read_frames(&mut self, buf: &mut [f64], frames: usize) -> Result<usize> {
        let wanted = frames * self.channels;
        while self.pending.len() < wanted && !self.finished {
            if !self.decode_next()? {
                self.finished = true;
            }
        }

        let available = (self.pending.len() / self.channels).min(frames);
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..available * self.channels)) {
            *dst = src;
        }
        Ok(available)
    }
}

// ─── In-memory source ────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) struct MemorySource {
    pub channels: usize,
    pub sample_rate: f64,
    pub samples: Vec<f64>,
    pub pos: usize,
    /// 模拟不报告长度的容器
    pub length_known: bool,
}

#[cfg(test)]
impl MemorySource {
    pub fn new(channels: usize, sample_rate: f64, samples: Vec<f64>) -> Self {
        Self { channels, sample_rate, samples, pos: 0, length_known: true }
    }

    pub fn without_length(mut self) -> Self {
        self.length_known = false;
        self
    }
}

#[cfg(test)]
impl FrameSource for MemorySource {
    fn channels(&self) -> usize { self.channels }

    fn sample_rate(&self) -> f64 { self.sample_rate }

    fn frame_count(&self) -> Option<u64> {
        self.length_known.then(|| (self.samples.len() / self.channels) as u64)
    }

    fn read_frames(&mut self, buf: &mut [f64], frames: usize) -> Result<usize> {
        let left = (self.samples.len() - self.pos) / self.channels;
        let n = left.min(frames);
        let len = n * self.channels;
        buf[..len].copy_from_slice(&self.samples[self.pos..self.pos + len]);
        self.pos += len;
        Ok(n)
    }
}
