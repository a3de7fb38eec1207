use crate::error::LoadError;
use crate::source::{SourceHandle, SourceInfo, SourceLoader};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::{
    core::{
        formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::get_probe,
};

/// Loader for local audio files (pre-recorded chapters, cached TTS output).
///
/// Only the container is probed for the duration; decoding stays with the platform player.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaProbe;

impl SourceLoader for SymphoniaProbe {
    fn load(&self, source: &SourceHandle) -> Result<SourceInfo, LoadError> {
        probe_file(source.as_path())
    }
}

/// Probes an audio file and reports the duration of its default track.
pub fn probe_file(path: &Path) -> Result<SourceInfo, LoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LoadError::Probe(format!("Failed to probe audio format: {:?}", e)))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| LoadError::Unsupported("No default audio track found".to_string()))?;

    let params = &track.codec_params;
    let duration = match (params.n_frames, params.time_base, params.sample_rate) {
        (Some(frames), Some(time_base), _) => {
            let time = time_base.calc_time(frames);
            Some(Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac))
        }
        (Some(frames), None, Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    };

    log::debug!(
        "Probed {}: {:?} ({:?} frames at {:?} Hz)",
        path.display(),
        duration,
        params.n_frames,
        params.sample_rate
    );

    Ok(SourceInfo { duration })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, frames: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 64) as i16 * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_probe_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapter.wav");
        write_wav(&path, 8000, 16000);

        let info = SymphoniaProbe
            .load(&SourceHandle::new(path.to_string_lossy().to_string()))
            .unwrap();
        let duration = info.duration.unwrap();
        assert!((duration.as_secs_f64() - 2.0).abs() < 0.01);
    }

    #[test]
    fn test_probe_missing_file() {
        let result = probe_file(Path::new("/definitely/not/here.wav"));
        assert!(matches!(result, Err(LoadError::Io(_))));
    }

    #[test]
    fn test_probe_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not audio at all").unwrap();

        assert!(probe_file(&path).is_err());
    }
}
