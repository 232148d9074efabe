use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use theias_symphony::audio::{sources, BandEnergies, OnsetAlgorithm};
use theias_symphony::config::{load_config, VisualizerConfig};
use theias_symphony::render_loop::{FramePresenter, RenderLoop, VisualFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Source {
    /// Zero-filled blocks at real-time pace
    Silence,
    /// Play a WAV file
    Wav,
    /// Raw little-endian f32 datagrams
    Udp,
    /// Default input device (requires the `capture` feature)
    Capture,
}

#[derive(Parser)]
#[command(name = "theias-symphony")]
#[command(about = "Real-time spectrum and beat analysis driving a terminal presenter")]
struct Args {
    /// Where audio comes from
    #[arg(long, short, value_enum, default_value = "silence")]
    source: Source,

    /// WAV file for the `wav` source
    #[arg(long, short)]
    file: Option<PathBuf>,

    /// Listen address for the `udp` source
    #[arg(long, default_value = "127.0.0.1:12345")]
    bind: SocketAddr,

    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the render rate
    #[arg(long)]
    fps: Option<u32>,

    /// Override the onset algorithm (energy, flux, hfc)
    #[arg(long)]
    algorithm: Option<OnsetAlgorithm>,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
}

/// Logs beats as they happen and a one-line spectrum summary every second.
struct TerminalPresenter {
    frames_per_summary: u64,
    frames: u64,
    was_idle: bool,
}

impl TerminalPresenter {
    fn new(fps: f64) -> Self {
        Self {
            frames_per_summary: fps.round().max(1.0) as u64,
            frames: 0,
            was_idle: true,
        }
    }

    fn meter(bands: &BandEnergies) -> String {
        const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
        bands
            .iter()
            .map(|(_, v)| LEVELS[((v / 255.0) * 7.0).round().clamp(0.0, 7.0) as usize])
            .collect()
    }
}

impl FramePresenter for TerminalPresenter {
    fn present(&mut self, frame: &VisualFrame) {
        self.frames += 1;

        if frame.audio_idle != self.was_idle {
            self.was_idle = frame.audio_idle;
            if frame.audio_idle {
                info!("Waiting for audio...");
            }
        }

        if frame.beat.detected {
            info!(
                "BEAT t={:.0}ms intensity={:.2} ({:.0}%) low={:.3} mid={:.3} high={:.3}",
                frame.timestamp,
                frame.beat.intensity,
                frame.beat.normalized_intensity * 100.0,
                frame.beat.bands.low.current,
                frame.beat.bands.mid.current,
                frame.beat.bands.high.current
            );
        }

        if self.frames % self.frames_per_summary == 0 && !frame.audio_idle {
            let features = &frame.features;
            info!(
                "{} peak {:.0} Hz, centroid {:.0} Hz, rolloff {:.0} Hz, energy {:.3}",
                Self::meter(&features.band_energies),
                features.dominant_frequency,
                features.spectral_centroid,
                features.spectral_rolloff,
                features.total_energy
            );
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    info!("Starting Theias Symphony");

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => VisualizerConfig::default(),
    };
    if let Some(fps) = args.fps {
        config.render.target_fps = fps;
    }
    if let Some(algorithm) = args.algorithm {
        config.beat.algorithm = algorithm;
    }

    // The WAV file's rate has to be known before the analyzer is built.
    let wav = match (args.source, &args.file) {
        (Source::Wav, Some(path)) => {
            let (samples, rate) = sources::read_wav_mono(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            config.analysis.sample_rate = rate;
            Some((samples, rate))
        }
        (Source::Wav, None) => anyhow::bail!("The wav source needs --file"),
        _ => None,
    };

    let (mut render_loop, input) = RenderLoop::new(config)?;
    let block_size = render_loop.analyzer().config().fft_size;
    let sample_rate = render_loop.analyzer().config().sample_rate;
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    // Keeps the capture stream alive for the lifetime of the loop.
    #[cfg(feature = "capture")]
    let mut _capture_stream = None;

    match args.source {
        Source::Silence => {
            sources::spawn_silence(input, block_size, sample_rate);
        }
        Source::Wav => {
            let (samples, rate) = wav.unwrap_or((Vec::new(), sample_rate));
            let (_, done) = sources::spawn_playback(samples, rate, input, block_size, true);
            let stop = stop_tx.clone();
            thread::spawn(move || {
                if done.recv().is_ok() {
                    let _ = stop.try_send(());
                }
            });
        }
        Source::Udp => {
            let (_, local) = sources::spawn_udp_receiver(args.bind, input)
                .with_context(|| format!("Failed to bind {}", args.bind))?;
            info!(
                "Expecting {} samples per datagram on {}",
                sources::DATAGRAM_SAMPLES,
                local
            );
        }
        Source::Capture => {
            #[cfg(feature = "capture")]
            {
                let (stream, rate) = sources::start_capture(input)?;
                if rate != sample_rate {
                    log::warn!(
                        "Device runs at {} Hz but analysis is configured for {} Hz",
                        rate,
                        sample_rate
                    );
                }
                _capture_stream = Some(stream);
            }
            #[cfg(not(feature = "capture"))]
            {
                drop(input);
                anyhow::bail!("Built without the `capture` feature");
            }
        }
    }

    if let Some(seconds) = args.duration.filter(|s| *s > 0.0) {
        let stop = stop_tx.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs_f64(seconds));
            let _ = stop.try_send(());
        });
    }

    let fps = 1.0 / render_loop.frame_interval().as_secs_f64();
    let mut presenter = TerminalPresenter::new(fps);
    render_loop.run(&mut presenter, &stop_rx);

    Ok(())
}
