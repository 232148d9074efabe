use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, TrySendError};
use log::{info, trace};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const SEND_POLL: Duration = Duration::from_millis(50);

/// Producer side of the audio slot, handed to capture threads and callbacks.
#[derive(Clone)]
pub struct AudioInput {
    sender: Sender<Vec<f32>>,
    // Lets a producer evict the oldest queued block when the queue is full.
    overflow: Receiver<Vec<f32>>,
    consumer: Weak<()>,
}

impl AudioInput {
    /// Queue a block of mono samples without blocking.
    ///
    /// A full queue evicts its oldest block so the newest audio always gets
    /// in. Returns `false` once the processor has gone away and the producer
    /// should stop.
    pub fn push(&self, block: Vec<f32>) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.sender.try_send(block) {
            Ok(()) => true,
            Err(TrySendError::Full(block)) => {
                if self.overflow.try_recv().is_ok() {
                    trace!("Audio queue full, dropped oldest block");
                }
                if self.sender.try_send(block).is_err() {
                    trace!("Audio queue still full, dropping block");
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a block, waiting for room instead of evicting anything.
    ///
    /// For producers that are not paced in real time, such as offline file
    /// playback. Returns `false` once the processor has gone away.
    pub fn send(&self, mut block: Vec<f32>) -> bool {
        loop {
            if !self.is_connected() {
                return false;
            }
            match self.sender.send_timeout(block, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => block = returned,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Whether the processor is still there to receive blocks.
    pub fn is_connected(&self) -> bool {
        self.consumer.strong_count() > 0
    }
}

/// Consumer side: keeps the most recent `block_size` samples for the render
/// tick and falls back to silence when audio stops arriving.
pub struct AudioProcessor {
    receiver: Receiver<Vec<f32>>,
    // Producers watch this through a `Weak` to notice the processor is gone.
    _alive: Arc<()>,
    block_size: usize,
    recent: VecDeque<f32>,
    block: Vec<f32>,
    idle_timeout: Duration,
    last_audio: Option<Instant>,
    idle: bool,
    disconnected: bool,
    received_blocks: u64,
}

impl AudioProcessor {
    pub fn new(block_size: usize, capacity: usize, idle_timeout: Duration) -> (Self, AudioInput) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let alive = Arc::new(());
        let input = AudioInput {
            sender,
            overflow: receiver.clone(),
            consumer: Arc::downgrade(&alive),
        };
        let processor = Self {
            receiver,
            _alive: alive,
            block_size,
            recent: VecDeque::with_capacity(block_size),
            block: vec![0.0; block_size],
            idle_timeout,
            last_audio: None,
            idle: true,
            disconnected: false,
            received_blocks: 0,
        };
        (processor, input)
    }

    /// Drain everything queued since the last tick and return the newest
    /// `block_size` samples, left-padded with zeros while the slot fills.
    ///
    /// Never waits for audio.
    pub fn latest_block(&mut self, now: Instant) -> &[f32] {
        let mut received = false;
        loop {
            match self.receiver.try_recv() {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    self.push_samples(&chunk);
                    self.received_blocks += 1;
                    received = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        info!("All audio sources disconnected");
                        self.disconnected = true;
                    }
                    break;
                }
            }
        }

        if received {
            self.last_audio = Some(now);
            if self.idle {
                info!("Audio input active");
                self.idle = false;
            }
        } else if !self.idle && self.timed_out(now) {
            info!(
                "No audio for {} ms, rendering silence",
                self.idle_timeout.as_millis()
            );
            self.idle = true;
            self.recent.clear();
        }

        let pad = self.block_size - self.recent.len();
        self.block[..pad].iter_mut().for_each(|s| *s = 0.0);
        for (slot, &sample) in self.block[pad..].iter_mut().zip(&self.recent) {
            *slot = sample;
        }
        &self.block
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// True once every [`AudioInput`] has been dropped.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn received_blocks(&self) -> u64 {
        self.received_blocks
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn push_samples(&mut self, chunk: &[f32]) {
        let keep = chunk.len().min(self.block_size);
        self.recent.extend(&chunk[chunk.len() - keep..]);
        while self.recent.len() > self.block_size {
            self.recent.pop_front();
        }
    }

    fn timed_out(&self, now: Instant) -> bool {
        self.last_audio
            .map_or(true, |last| now.saturating_duration_since(last) >= self.idle_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(block_size: usize) -> (AudioProcessor, AudioInput) {
        AudioProcessor::new(block_size, 8, Duration::from_millis(500))
    }

    #[test]
    fn test_starts_idle_with_silence() {
        let (mut processor, _input) = processor(16);
        let block = processor.latest_block(Instant::now());
        assert_eq!(block, &[0.0; 16]);
        assert!(processor.is_idle());
    }

    #[test]
    fn test_coalesces_to_most_recent_samples() {
        let (mut processor, input) = processor(4);
        assert!(input.push(vec![1.0, 2.0, 3.0]));
        assert!(input.push(vec![4.0, 5.0, 6.0]));

        let block = processor.latest_block(Instant::now()).to_vec();
        assert_eq!(block, vec![3.0, 4.0, 5.0, 6.0]);
        assert!(!processor.is_idle());
        assert_eq!(processor.received_blocks(), 2);
    }

    #[test]
    fn test_partial_slot_is_left_padded() {
        let (mut processor, input) = processor(4);
        input.push(vec![7.0, 8.0]);
        assert_eq!(processor.latest_block(Instant::now()), &[0.0, 0.0, 7.0, 8.0]);
    }

    #[test]
    fn test_stale_then_idle() {
        let (mut processor, input) = processor(2);
        let start = Instant::now();
        input.push(vec![0.5, 0.5]);
        processor.latest_block(start);

        // Stale data is reused until the idle timeout.
        let stale = processor.latest_block(start + Duration::from_millis(100)).to_vec();
        assert_eq!(stale, vec![0.5, 0.5]);
        assert!(!processor.is_idle());

        let idle = processor.latest_block(start + Duration::from_millis(600)).to_vec();
        assert_eq!(idle, vec![0.0, 0.0]);
        assert!(processor.is_idle());

        input.push(vec![0.25, 0.25]);
        processor.latest_block(start + Duration::from_millis(700));
        assert!(!processor.is_idle());
    }

    #[test]
    fn test_full_queue_keeps_newest_audio() {
        let (mut processor, input) = AudioProcessor::new(4, 2, Duration::from_millis(500));
        for i in 0..10 {
            assert!(input.push(vec![i as f32; 4]));
        }
        // The oldest blocks were evicted; the last two remain.
        assert_eq!(processor.latest_block(Instant::now()), &[9.0; 4]);
        assert_eq!(processor.received_blocks(), 2);
    }

    #[test]
    fn test_send_waits_for_room() {
        let (mut processor, input) = AudioProcessor::new(4, 2, Duration::from_millis(500));
        let producer = std::thread::spawn(move || (0..10).all(|i| input.send(vec![i as f32; 4])));

        let deadline = Instant::now() + Duration::from_secs(5);
        while processor.received_blocks() < 10 && Instant::now() < deadline {
            processor.latest_block(Instant::now());
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(producer.join().unwrap());
        assert_eq!(processor.received_blocks(), 10);
        assert_eq!(processor.latest_block(Instant::now()), &[9.0; 4]);
    }

    #[test]
    fn test_send_after_processor_dropped() {
        let (processor, input) = AudioProcessor::new(4, 1, Duration::from_millis(500));
        input.push(vec![0.0; 4]);
        drop(processor);
        // The queue is full and nobody drains it; send must not hang.
        assert!(!input.send(vec![1.0; 4]));
        assert!(!input.is_connected());
        assert!(!input.push(vec![1.0; 4]));
    }

    #[test]
    fn test_empty_blocks_carry_no_audio() {
        let (mut processor, input) = processor(4);
        input.push(Vec::new());
        processor.latest_block(Instant::now());
        assert!(processor.is_idle());
        assert_eq!(processor.received_blocks(), 0);
    }

    #[test]
    fn test_disconnect_is_reported() {
        let (mut processor, input) = processor(4);
        let other = input.clone();
        drop(input);
        processor.latest_block(Instant::now());
        assert!(!processor.is_disconnected());

        drop(other);
        processor.latest_block(Instant::now());
        assert!(processor.is_disconnected());
    }

    #[test]
    fn test_push_after_processor_dropped() {
        let (processor, input) = processor(4);
        drop(processor);
        assert!(!input.push(vec![0.0; 4]));
    }
}
