use crate::error::{Result, SpeechError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;
pub const MP3_BITRATE_KBPS: u32 = 128;

/// Format of combined multi-voice output: 44.1 kHz, 16-bit, mono.
pub fn output_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.len() as f64 / f64::from(spec.channels);
    Ok(frames / f64::from(spec.sample_rate))
}

pub fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mp3"))
}

/// `{dir}/{stem}_{NNN}.{ext}`, numbered from 1.
pub fn numbered_path(base: &Path, number: usize, ext: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("{stem}_{number:03}.{ext}");
    match base.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Reads a WAV file as mono samples in `[-1, 1]` along with its sample rate.
fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Linear interpolation resampler.
fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from) / f64::from(to);
    let len = (samples.len() as f64 * f64::from(to) / f64::from(from)).round() as usize;
    (0..len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Appends `inputs`, in order, into one WAV at [`output_spec`].
pub fn concat_wavs(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let spec = output_spec();
    let mut writer = WavWriter::create(output, spec)?;
    for input in inputs {
        let (samples, rate) = read_mono(input)?;
        let samples = resample(&samples, rate, spec.sample_rate);
        debug!(input = %input.display(), rate, frames = samples.len(), "appending");
        for s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)?;
        }
    }
    writer.finalize()?;
    info!(output = %output.display(), parts = inputs.len(), "combined audio written");
    Ok(())
}

/// Encodes a WAV file to MP3 with ffmpeg.
pub async fn convert_to_mp3(wav: &Path, mp3: &Path) -> Result<()> {
    let bitrate = format!("{MP3_BITRATE_KBPS}k");
    let status = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-i"])
        .arg(wav)
        .args(["-codec:a", "libmp3lame", "-b:a", &bitrate])
        .arg(mp3)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| SpeechError::Convert(format!("could not run ffmpeg: {e}")))?;
    if !status.success() {
        return Err(SpeechError::Convert(format!(
            "ffmpeg exited with {status} for {}",
            mp3.display()
        )));
    }
    info!(output = %mp3.display(), "mp3 written");
    Ok(())
}
