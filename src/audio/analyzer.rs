//! Loudness meter for agent playback.
//!
//! While agent audio is playing the analyzer runs a periodic task that takes
//! the most recent `fft_size` samples, computes their magnitude spectrum and
//! publishes the mean bin level in `[0, 1]`. The task exists only between
//! [`PlaybackAnalyzer::attach`] and [`PlaybackAnalyzer::detach`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::runtime::WidgetEvent;

/// Bin levels below this are silent.
const MIN_DB: f32 = -100.0;
/// Bin levels above this are full scale.
const MAX_DB: f32 = -30.0;
/// Smallest level change worth a UI event.
const LEVEL_EVENT_DELTA: f32 = 0.01;

/// Magnitude-spectrum meter with a fixed resolution.
pub struct LevelMeter {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    /// Normalises a bin magnitude to sinusoid amplitude.
    scale: f32,
}

impl LevelMeter {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 - 0.5 * phase.cos()
            })
            .collect();
        let window_sum: f32 = window.iter().sum();
        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scale: 2.0 / window_sum.max(f32::EPSILON),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Mean bin level of the last `fft_size` samples, zero-padded in front.
    pub fn measure(&mut self, samples: &[f32]) -> f32 {
        let n = self.window.len();
        let tail = &samples[samples.len().saturating_sub(n)..];
        let pad = n - tail.len();

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { tail[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let bins = n / 2;
        let total: f32 = self.buffer[..bins]
            .iter()
            .map(|c| {
                let magnitude = c.norm() * self.scale;
                let db = 20.0 * magnitude.max(1e-10).log10();
                ((db - MIN_DB) / (MAX_DB - MIN_DB)).clamp(0.0, 1.0)
            })
            .sum();
        total / bins as f32
    }
}

struct AnalysisLoop {
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Attaches a [`LevelMeter`] to agent playback for the duration of speech.
pub struct PlaybackAnalyzer {
    fft_size: usize,
    frame_interval: Duration,
    tap: Arc<Mutex<VecDeque<f32>>>,
    level_tx: watch::Sender<f32>,
    events: Option<broadcast::Sender<WidgetEvent>>,
    active: Option<AnalysisLoop>,
}

impl PlaybackAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let (level_tx, _) = watch::channel(0.0);
        Self {
            fft_size: config.fft_size.max(2),
            frame_interval: Duration::from_millis(config.frame_interval_ms.max(1)),
            tap: Arc::new(Mutex::new(VecDeque::with_capacity(config.fft_size))),
            level_tx,
            events: None,
            active: None,
        }
    }

    /// Also publish level changes as [`WidgetEvent::AudioLevel`].
    pub fn with_events(mut self, events: broadcast::Sender<WidgetEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start the analysis loop. No-op if already attached.
    ///
    /// Returns `false` when no tokio runtime is available to run the loop.
    pub fn attach(&mut self) -> bool {
        if self.active.is_some() {
            return true;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!("no async runtime, playback analyzer not attached");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let task = handle.spawn(analysis_loop(
            LevelMeter::new(self.fft_size),
            Arc::clone(&self.tap),
            self.frame_interval,
            self.level_tx.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        self.active = Some(AnalysisLoop {
            cancel,
            _task: task,
        });
        debug!("playback analyzer attached");
        true
    }

    /// Stop the analysis loop and reset the level to zero.
    pub fn detach(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // The loop publishes only while holding the tap, so once the lock is
        // ours after cancelling no further level can land.
        active.cancel.cancel();
        self.tap
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.level_tx.send_replace(0.0);
        debug!("playback analyzer detached");
    }

    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    /// Feed playback samples. Ignored while detached.
    pub fn feed(&self, samples: &[f32]) {
        if self.active.is_none() {
            return;
        }
        if let Ok(mut tap) = self.tap.lock() {
            tap.extend(samples.iter().copied());
            let excess = tap.len().saturating_sub(self.fft_size);
            tap.drain(..excess);
        }
    }

    /// Latest published level.
    pub fn level(&self) -> f32 {
        *self.level_tx.borrow()
    }
}

impl Drop for PlaybackAnalyzer {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn analysis_loop(
    mut meter: LevelMeter,
    tap: Arc<Mutex<VecDeque<f32>>>,
    frame_interval: Duration,
    level_tx: watch::Sender<f32>,
    events: Option<broadcast::Sender<WidgetEvent>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_reported = 0.0_f32;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(window) = tap.lock() else {
                    break;
                };
                if cancel.is_cancelled() {
                    break;
                }
                let samples: Vec<f32> = window.iter().copied().collect();
                let level = meter.measure(&samples);
                level_tx.send_replace(level);
                if (level - last_reported).abs() >= LEVEL_EVENT_DELTA {
                    last_reported = level;
                    if let Some(tx) = &events {
                        let _ = tx.send(WidgetEvent::AudioLevel { level });
                    }
                }
                drop(window);
            }
        }
    }
}
