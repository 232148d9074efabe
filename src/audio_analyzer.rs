use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use theias_symphony::audio::sources::read_wav_mono;
use theias_symphony::audio::{BeatDetector, EnergyBands, FrequencyFeatures, SpectralAnalyzer};
use theias_symphony::config::{load_config, VisualizerConfig, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};

#[derive(Parser)]
#[command(name = "audio-analyzer")]
#[command(about = "Offline spectrum and beat analysis of a WAV file, written as a JSON report")]
struct Args {
    /// WAV file to analyze
    audio_file: PathBuf,

    /// Output JSON file path
    #[arg(long, short, default_value = "analysis_results.json")]
    output: PathBuf,

    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Samples to advance between frames (defaults to the FFT size)
    #[arg(long)]
    hop: Option<usize>,

    /// Include per-frame features (large output)
    #[arg(long)]
    frame_by_frame: bool,
}

#[derive(Debug, Default, Serialize)]
struct FeatureStats {
    min: f32,
    max: f32,
    mean: f32,
    std_dev: f32,
    samples: usize,
}

impl FeatureStats {
    fn from_values(data: &[f32]) -> Self {
        if data.is_empty() {
            return Self::default();
        }

        let min = data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = data.iter().sum::<f32>() / data.len() as f32;
        let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / data.len() as f32;

        Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
            samples: data.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportedBeat {
    /// Seconds from the start of the file.
    timestamp: f64,
    intensity: f32,
    normalized_intensity: f32,
    energy: f32,
    bands: EnergyBands,
}

#[derive(Debug, Default, Serialize)]
struct BeatStats {
    total_beats: usize,
    /// From the mean interval between consecutive beats.
    average_bpm: f32,
    /// 0-1, higher when beat intervals are regular.
    beat_consistency: f32,
    strongest_beat: f32,
}

impl BeatStats {
    fn from_beats(beats: &[ReportedBeat]) -> Self {
        let intervals: Vec<f64> = beats.windows(2).map(|w| w[1].timestamp - w[0].timestamp).collect();

        let (average_bpm, beat_consistency) = if intervals.is_empty() {
            (0.0, 0.0)
        } else {
            let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
            let variance =
                intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
            let bpm = if mean > 0.0 { 60.0 / mean } else { 0.0 };
            (bpm as f32, (1.0 / (1.0 + variance.sqrt() / mean.max(f64::EPSILON))) as f32)
        };

        Self {
            total_beats: beats.len(),
            average_bpm,
            beat_consistency,
            strongest_beat: beats.iter().map(|b| b.intensity).fold(0.0, f32::max),
        }
    }
}

#[derive(Debug, Serialize)]
struct FrameRecord {
    timestamp: f64,
    features: FrequencyFeatures,
    beat_detected: bool,
    beat_intensity: f32,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    filename: String,
    sample_rate: u32,
    duration_seconds: f64,
    total_samples: usize,
    total_frames: usize,
}

#[derive(Debug, Serialize)]
struct AnalysisReport {
    file_info: FileInfo,
    config: VisualizerConfig,
    hop: usize,
    feature_stats: BTreeMap<String, FeatureStats>,
    beat_stats: BeatStats,
    beat_events: Vec<ReportedBeat>,
    frame_data: Option<Vec<FrameRecord>>,
}

/// Runs the analyzer and detector over a whole file, block by block, with
/// timestamps taken from the sample position rather than wall time.
struct OfflineAnalysis {
    analyzer: SpectralAnalyzer,
    detector: BeatDetector,
    hop: usize,
    sample_rate: u32,
    collectors: BTreeMap<String, Vec<f32>>,
    beats: Vec<ReportedBeat>,
    frames: Option<Vec<FrameRecord>>,
}

impl OfflineAnalysis {
    fn new(config: &VisualizerConfig, hop: usize, include_frames: bool) -> Result<Self> {
        let analyzer = SpectralAnalyzer::new(config.analysis.clone())
            .context("Invalid analysis configuration")?;
        let detector = BeatDetector::new(config.beat.clone(), &config.analysis)
            .context("Invalid beat configuration")?;

        Ok(Self {
            analyzer,
            detector,
            hop,
            sample_rate: config.analysis.sample_rate,
            collectors: BTreeMap::new(),
            beats: Vec::new(),
            frames: include_frames.then(Vec::new),
        })
    }

    fn run(&mut self, samples: &[f32]) -> usize {
        let block_size = self.analyzer.config().fft_size;
        let total_seconds = samples.len() as f64 / self.sample_rate as f64;
        let mut frame_count = 0;
        let mut position = 0;

        while position + block_size <= samples.len() {
            let timestamp_ms = position as f64 * 1000.0 / self.sample_rate as f64;
            let analysis = self.analyzer.analyze(&samples[position..position + block_size]);
            let beat = self.detector.detect_beat(&analysis.snapshot.decibel, timestamp_ms);

            self.collect(&analysis.features, beat.intensity);
            if beat.detected {
                self.beats.push(ReportedBeat {
                    timestamp: timestamp_ms / 1000.0,
                    intensity: beat.intensity,
                    normalized_intensity: beat.normalized_intensity,
                    energy: beat.energy,
                    bands: beat.bands,
                });
            }
            if let Some(frames) = self.frames.as_mut() {
                frames.push(FrameRecord {
                    timestamp: timestamp_ms / 1000.0,
                    features: analysis.features,
                    beat_detected: beat.detected,
                    beat_intensity: beat.intensity,
                });
            }

            frame_count += 1;
            position += self.hop;

            if frame_count % 1000 == 0 {
                info!(
                    "Processed {} frames ({:.1}s of {:.1}s)",
                    frame_count,
                    timestamp_ms / 1000.0,
                    total_seconds
                );
            }
        }

        frame_count
    }

    fn collect(&mut self, features: &FrequencyFeatures, beat_intensity: f32) {
        let scalars = [
            ("dominant_frequency", features.dominant_frequency),
            ("spectral_centroid", features.spectral_centroid),
            ("spectral_rolloff", features.spectral_rolloff),
            ("spectral_spread", features.spectral_spread),
            ("total_energy", features.total_energy),
            ("beat_intensity", beat_intensity),
        ];
        for (name, value) in scalars.into_iter().chain(features.band_energies.iter()) {
            self.collectors.entry(name.to_string()).or_default().push(value);
        }
    }

    fn into_report(self, file_info: FileInfo, config: VisualizerConfig) -> AnalysisReport {
        let feature_stats = self
            .collectors
            .iter()
            .map(|(name, values)| (name.clone(), FeatureStats::from_values(values)))
            .collect();

        AnalysisReport {
            file_info,
            config,
            hop: self.hop,
            feature_stats,
            beat_stats: BeatStats::from_beats(&self.beats),
            beat_events: self.beats,
            frame_data: self.frames,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => VisualizerConfig::default(),
    };

    let (samples, sample_rate) = read_wav_mono(&args.audio_file)
        .with_context(|| format!("Failed to read {}", args.audio_file.display()))?;
    config.analysis.sample_rate = sample_rate.clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
    let config = config.validated()?;

    let fft_size = config.analysis.fft_size;
    let hop = args.hop.unwrap_or(fft_size).max(1);
    info!("File: {}", args.audio_file.display());
    info!("FFT size: {} samples, hop: {} samples", fft_size, hop);

    let mut engine = OfflineAnalysis::new(&config, hop, args.frame_by_frame)?;
    let total_frames = engine.run(&samples);

    let file_info = FileInfo {
        filename: args.audio_file.display().to_string(),
        sample_rate,
        duration_seconds: samples.len() as f64 / sample_rate.max(1) as f64,
        total_samples: samples.len(),
        total_frames,
    };
    let report = engine.into_report(file_info, config);

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writer.flush()?;

    info!("Analysis complete");
    info!("  Duration: {:.2}s", report.file_info.duration_seconds);
    info!("  Total frames: {}", report.file_info.total_frames);
    info!("  Beats detected: {}", report.beat_stats.total_beats);
    info!("  Average BPM: {:.1}", report.beat_stats.average_bpm);
    info!("Results written to {}", args.output.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn beat(timestamp: f64, intensity: f32) -> ReportedBeat {
        ReportedBeat {
            timestamp,
            intensity,
            normalized_intensity: 0.0,
            energy: 0.0,
            bands: EnergyBands::default(),
        }
    }

    #[test]
    fn test_feature_stats() {
        let stats = FeatureStats::from_values(&[1.0, 3.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std_dev, 1.0);
        assert_eq!(FeatureStats::from_values(&[]).samples, 0);
    }

    #[test]
    fn test_regular_beats_give_tempo() {
        let beats: Vec<_> = (0..5).map(|i| beat(i as f64 * 0.5, 1.0 + i as f32)).collect();
        let stats = BeatStats::from_beats(&beats);
        assert_eq!(stats.total_beats, 5);
        assert!((stats.average_bpm - 120.0).abs() < 1e-3);
        assert!((stats.beat_consistency - 1.0).abs() < 1e-6);
        assert_eq!(stats.strongest_beat, 5.0);
        assert_eq!(BeatStats::from_beats(&[beat(1.0, 1.0)]).average_bpm, 0.0);
    }

    #[test]
    fn test_offline_pass_finds_bursts() {
        let config = VisualizerConfig::default().validated().unwrap();
        let rate = config.analysis.sample_rate as f32;
        // One second of silence, then a short bass burst.
        let mut samples = vec![0.0f32; 44_100];
        samples.extend((0..4096).map(|n| 0.9 * (2.0 * PI * 80.0 * n as f32 / rate).sin()));

        let mut engine = OfflineAnalysis::new(&config, 1024, true).unwrap();
        let frames = engine.run(&samples);
        assert_eq!(frames, samples.len() / 1024);
        assert!(!engine.beats.is_empty());
        assert!(engine.beats[0].timestamp >= 1.0 - 1024.0 / 44_100.0);

        let report = engine.into_report(
            FileInfo {
                filename: "burst.wav".into(),
                sample_rate: 44_100,
                duration_seconds: 0.0,
                total_samples: 0,
                total_frames: frames,
            },
            config,
        );
        assert_eq!(report.feature_stats["bass"].samples, frames);
        assert_eq!(report.frame_data.map(|f| f.len()), Some(frames));
    }
}
