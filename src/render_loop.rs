use crossbeam_channel::{select, Receiver};
use log::{debug, info};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::audio::{
    AudioInput, AudioProcessor, BeatEvent, FrequencyFeatures, OnsetDetector, SpectralAnalyzer,
    SpectrumSnapshot,
};
use crate::config::VisualizerConfig;
use crate::error::ConfigError;

/// Everything the presentation layer gets for one tick.
#[derive(Debug, Clone, Serialize)]
pub struct VisualFrame {
    pub snapshot: SpectrumSnapshot,
    pub features: FrequencyFeatures,
    pub beat: BeatEvent,
    /// Milliseconds since the loop was created.
    pub timestamp: f64,
    /// No audio has arrived within the idle timeout; the frame shows silence.
    pub audio_idle: bool,
}

pub trait FramePresenter {
    fn present(&mut self, frame: &VisualFrame);
}

impl<F: FnMut(&VisualFrame)> FramePresenter for F {
    fn present(&mut self, frame: &VisualFrame) {
        self(frame)
    }
}

/// Drives analysis once per render tick.
///
/// Audio arrives asynchronously through the [`AudioInput`] returned by
/// [`RenderLoop::new`]; each tick takes whatever is newest and never waits
/// for more.
pub struct RenderLoop {
    processor: AudioProcessor,
    analyzer: SpectralAnalyzer,
    detector: Box<dyn OnsetDetector + Send>,
    frame_interval: Duration,
    started: Instant,
    frames: u64,
    beats: u64,
}

impl RenderLoop {
    pub fn new(config: VisualizerConfig) -> Result<(Self, AudioInput), ConfigError> {
        let config = config.validated()?;
        let analyzer = SpectralAnalyzer::new(config.analysis.clone())?;
        let detector = config.beat.algorithm.build(&config.beat, &config.analysis)?;
        let (processor, input) = AudioProcessor::new(
            config.analysis.fft_size,
            config.render.channel_capacity,
            Duration::from_millis(config.render.idle_timeout_ms),
        );

        let render_loop = Self {
            processor,
            analyzer,
            detector,
            frame_interval: Duration::from_secs_f64(1.0 / config.render.target_fps as f64),
            started: Instant::now(),
            frames: 0,
            beats: 0,
        };
        Ok((render_loop, input))
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn processor(&self) -> &AudioProcessor {
        &self.processor
    }

    /// Run one analysis pass on the newest audio.
    pub fn tick(&mut self, now: Instant) -> VisualFrame {
        let timestamp = now.saturating_duration_since(self.started).as_secs_f64() * 1000.0;

        let block = self.processor.latest_block(now);
        let analysis = self.analyzer.analyze(block);
        let beat = self.detector.detect(&analysis.snapshot.decibel, timestamp);

        self.frames += 1;
        if beat.detected {
            self.beats += 1;
        }
        if self.frames % 600 == 0 {
            debug!(
                "Rendered {} frames, {} beats, {} audio blocks",
                self.frames,
                self.beats,
                self.processor.received_blocks()
            );
        }

        VisualFrame {
            snapshot: analysis.snapshot,
            features: analysis.features,
            beat,
            timestamp,
            audio_idle: self.processor.is_idle(),
        }
    }

    /// Tick at the configured rate until `shutdown` fires or is dropped.
    ///
    /// Ticks that would overlap a slow presenter are skipped, not queued.
    pub fn run<P: FramePresenter>(&mut self, presenter: &mut P, shutdown: &Receiver<()>) {
        let ticker = crossbeam_channel::tick(self.frame_interval);
        info!(
            "Render loop started at {:.1} fps ({} detector)",
            1.0 / self.frame_interval.as_secs_f64(),
            self.detector.algorithm()
        );

        loop {
            select! {
                recv(ticker) -> now => match now {
                    Ok(now) => {
                        let frame = self.tick(now);
                        presenter.present(&frame);
                    }
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
            }
        }

        info!("Render loop stopped after {} frames, {} beats", self.frames, self.beats);
    }
}
