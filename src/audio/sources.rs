//! Producers that feed an [`AudioInput`] from threads of their own.
//!
//! Every source pushes mono `f32` blocks and stops as soon as the processor
//! side has been dropped.

use crossbeam_channel::Receiver;
use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::processor::AudioInput;

/// Samples per datagram sent by the capture streamers.
pub const DATAGRAM_SAMPLES: usize = 1024;
const MAX_DATAGRAM_BYTES: usize = 65_507;
const UDP_POLL: Duration = Duration::from_millis(250);

/// Decode and downmix a WAV file to mono `f32` in [-1, 1].
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    info!(
        "Loaded {}: {} Hz, {} channel(s), {:.2}s",
        path.display(),
        spec.sample_rate,
        channels,
        mono.len() as f64 / spec.sample_rate.max(1) as f64
    );
    Ok((mono, spec.sample_rate))
}

/// Push zero blocks at real-time pace until the processor goes away.
pub fn spawn_silence(input: AudioInput, block_size: usize, sample_rate: u32) -> JoinHandle<()> {
    let interval = block_interval(block_size, sample_rate);
    thread::spawn(move || {
        let ticker = crossbeam_channel::tick(interval);
        while ticker.recv().is_ok() {
            if !input.push(vec![0.0; block_size]) {
                break;
            }
        }
        debug!("Silence source stopped");
    })
}

/// Play a WAV file into `input`. See [`spawn_playback`].
pub fn spawn_wav_file(
    path: PathBuf,
    input: AudioInput,
    block_size: usize,
    realtime: bool,
) -> Result<(JoinHandle<()>, Receiver<()>, u32), hound::Error> {
    let (samples, sample_rate) = read_wav_mono(&path)?;
    let (handle, done) = spawn_playback(samples, sample_rate, input, block_size, realtime);
    Ok((handle, done, sample_rate))
}

/// Push decoded samples into `input`, one `block_size` block per block
/// period when `realtime` is set. Otherwise every block is delivered as fast
/// as the consumer drains the queue, waiting for room instead of dropping.
///
/// The returned receiver fires once every block has been delivered.
pub fn spawn_playback(
    samples: Vec<f32>,
    sample_rate: u32,
    input: AudioInput,
    block_size: usize,
    realtime: bool,
) -> (JoinHandle<()>, Receiver<()>) {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let interval = block_interval(block_size, sample_rate);

    let handle = thread::spawn(move || {
        let ticker = realtime.then(|| crossbeam_channel::tick(interval));
        let mut blocks = 0usize;
        for block in samples.chunks(block_size.max(1)) {
            if let Some(ticker) = &ticker {
                if ticker.recv().is_err() {
                    break;
                }
            }
            let delivered = if realtime {
                input.push(block.to_vec())
            } else {
                input.send(block.to_vec())
            };
            if !delivered {
                debug!("Processor gone, stopping playback");
                break;
            }
            blocks += 1;
        }
        info!("Playback finished after {} blocks", blocks);
        let _ = done_tx.send(());
    });

    (handle, done_rx)
}

/// Listen for raw little-endian `f32` datagrams and forward each one as a
/// block.
pub fn spawn_udp_receiver(
    addr: SocketAddr,
    input: AudioInput,
) -> io::Result<(JoinHandle<()>, SocketAddr)> {
    let socket = UdpSocket::bind(addr)?;
    socket.set_read_timeout(Some(UDP_POLL))?;
    let local = socket.local_addr()?;
    info!("Listening for audio datagrams on {}", local);

    let handle = thread::spawn(move || {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        let mut malformed = 0u64;
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, peer)) => match decode_datagram(&buf[..len]) {
                    Some(block) => {
                        if !input.push(block) {
                            break;
                        }
                    }
                    None => {
                        malformed += 1;
                        if malformed == 1 {
                            warn!("Ignoring malformed datagram of {} bytes from {}", len, peer);
                        }
                    }
                },
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    if !input.is_connected() {
                        break;
                    }
                }
                Err(e) => {
                    error!("UDP receive failed: {}", e);
                    break;
                }
            }
        }
        debug!("UDP receiver on {} stopped ({} malformed datagrams)", local, malformed);
    });

    Ok((handle, local))
}

/// Interpret a datagram as little-endian `f32` samples. Empty or ragged
/// payloads are rejected, as are non-finite samples.
pub fn decode_datagram(payload: &[u8]) -> Option<Vec<f32>> {
    if payload.is_empty() || payload.len() % 4 != 0 {
        return None;
    }
    let samples: Vec<f32> = payload
        .chunks_exact(4)
        .map(|word| f32::from_bits(u32::from_le(bytemuck::pod_read_unaligned(word))))
        .collect();
    samples.iter().all(|s| s.is_finite()).then_some(samples)
}

fn block_interval(block_size: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(block_size.max(1) as f64 / sample_rate.max(1) as f64)
}

/// Open the default input device and stream its audio into `input`.
///
/// The stream stops when the returned handle is dropped.
#[cfg(feature = "capture")]
pub fn start_capture(input: AudioInput) -> anyhow::Result<(cpal::Stream, u32)> {
    use anyhow::Context;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device available"))?;
    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        anyhow::bail!("Unsupported input sample format {:?}", supported.sample_format());
    }

    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels.max(1) as usize;
    let sample_rate = config.sample_rate.0;
    info!(
        "Capturing from {} ({} channel(s) at {} Hz)",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        channels,
        sample_rate
    );

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = if channels == 1 {
                data.to_vec()
            } else {
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            };
            input.push(mono);
        },
        |err| warn!("Audio stream error: {}", err),
        None,
    )?;
    stream.play().context("Failed to start input stream")?;

    Ok((stream, sample_rate))
}
