use crate::error::GuardError;
use crate::platform::{AudioOutput, FocusPolicy, PlatformNotifier};
use crate::playback::{RouteChange, RouteChangeReason};
use crate::source::SourceHandle;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// What the fill callback is told about the output on each buffer.
#[derive(Debug, Clone, Copy)]
pub struct FillInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Current playback rate
    pub rate: f32,
    /// Set once after a seek; the producer should continue from this offset
    pub seek_to: Option<Duration>,
}

/// Callback function type for filling audio samples
///
/// The callback receives the interleaved buffer to fill and the current [`FillInfo`]. It
/// returns the number of frames actually filled (frames = samples / channels). It runs on
/// the device's real-time thread and must not block.
pub type OutputFillCallback = dyn Fn(&mut [f32], &FillInfo) -> usize + Send + Sync;

enum StreamCtl {
    Open(Sender<Result<(), GuardError>>),
    Play(Sender<Result<(), GuardError>>),
    Pause,
    Close,
}

struct Shared {
    is_active: AtomicBool,
    frames_rendered: AtomicUsize,
    rate_bits: AtomicU32,
    pending_seek: Mutex<Option<Duration>>,
    notifier: Mutex<Option<PlatformNotifier>>,
    fill_callback: Arc<OutputFillCallback>,
}

/// Output through the host's default device via cpal.
///
/// `cpal::Stream` cannot cross threads, so the stream lives on its own worker thread and
/// this handle drives it over a channel.
pub struct CpalOutput {
    ctl: Sender<StreamCtl>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Output that renders silence; useful when the platform player produces the sound.
    pub fn new() -> Self {
        Self::with_fill_callback(|buffer: &mut [f32], _info: &FillInfo| {
            buffer.fill(0.0);
            0
        })
    }

    /// Output that pulls narration samples from `callback`.
    pub fn with_fill_callback<F>(callback: F) -> Self
    where
        F: Fn(&mut [f32], &FillInfo) -> usize + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            is_active: AtomicBool::new(false),
            frames_rendered: AtomicUsize::new(0),
            rate_bits: AtomicU32::new(1.0f32.to_bits()),
            pending_seek: Mutex::new(None),
            notifier: Mutex::new(None),
            fill_callback: Arc::new(callback),
        });

        let (ctl, ctl_rx) = crossbeam_channel::unbounded();
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("narrator-cpal-output".to_string())
            .spawn(move || run_stream_worker(ctl_rx, worker_shared))
            .map_err(|e| log::error!("Failed to spawn cpal output thread: {}", e))
            .ok();

        Self {
            ctl,
            shared,
            worker,
        }
    }

    /// Number of frames the fill callback has produced since creation.
    pub fn frames_rendered(&self) -> usize {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    fn request(
        &self,
        make: impl FnOnce(Sender<Result<(), GuardError>>) -> StreamCtl,
    ) -> Result<(), GuardError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.ctl.send(make(reply_tx)).map_err(|_| {
            GuardError::ResourceUnavailable("cpal output thread is not running".to_string())
        })?;
        reply_rx.recv().unwrap_or_else(|_| {
            Err(GuardError::ResourceUnavailable(
                "cpal output thread exited".to_string(),
            ))
        })
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn subscribe(&mut self, notifier: PlatformNotifier) {
        *self
            .shared
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }

    fn acquire(&mut self, source: &SourceHandle, policy: FocusPolicy) -> Result<(), GuardError> {
        // cpal has no focus negotiation; every policy opens the shared default device
        log::debug!("Opening default output for {} ({:?})", source, policy);
        self.request(StreamCtl::Open)
    }

    fn activate(&mut self) -> Result<(), GuardError> {
        self.request(StreamCtl::Play)?;
        self.shared.is_active.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn suspend(&mut self) {
        self.shared.is_active.store(false, Ordering::Relaxed);
        let _ = self.ctl.send(StreamCtl::Pause);
    }

    fn release(&mut self) {
        self.shared.is_active.store(false, Ordering::Relaxed);
        let _ = self.ctl.send(StreamCtl::Close);
    }

    fn seek(&mut self, offset: Duration) {
        *self
            .shared
            .pending_seek
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(offset);
    }

    fn set_rate(&mut self, rate: f32) {
        self.shared.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.ctl.send(StreamCtl::Close);
        // Dropping the last sender ends the worker loop
        let (closed, _) = crossbeam_channel::bounded(0);
        self.ctl = closed;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_stream_worker(ctl: Receiver<StreamCtl>, shared: Arc<Shared>) {
    let mut stream: Option<cpal::Stream> = None;

    while let Ok(msg) = ctl.recv() {
        match msg {
            StreamCtl::Open(reply) => {
                let result = match open_default_stream(&shared) {
                    Ok(opened) => {
                        stream = Some(opened);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            StreamCtl::Play(reply) => {
                let result = match stream.as_ref() {
                    Some(s) => s.play().map_err(|e| {
                        GuardError::ResourceUnavailable(format!("Failed to start stream: {}", e))
                    }),
                    None => Err(GuardError::ResourceUnavailable(
                        "stream not open".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            StreamCtl::Pause => {
                if let Some(s) = stream.as_ref() {
                    if let Err(e) = s.pause() {
                        log::warn!("Failed to pause stream: {}", e);
                    }
                }
            }
            StreamCtl::Close => {
                // Dropping the stream stops it
                stream = None;
            }
        }
    }

    drop(stream);
    log::debug!("cpal output thread exited");
}

fn open_default_stream(shared: &Arc<Shared>) -> Result<cpal::Stream, GuardError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| {
        GuardError::ResourceUnavailable("No default output device available".into())
    })?;

    let default_config = device.default_output_config().map_err(|e| {
        GuardError::ResourceUnavailable(format!("Failed to get default config: {}", e))
    })?;
    let config = default_config.config();

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => create_stream::<f32>(&device, &config, shared.clone())?,
        cpal::SampleFormat::I16 => create_stream::<i16>(&device, &config, shared.clone())?,
        cpal::SampleFormat::U16 => create_stream::<u16>(&device, &config, shared.clone())?,
        other => {
            return Err(GuardError::ResourceUnavailable(format!(
                "Unsupported sample format {:?}",
                other
            )));
        }
    };

    // Streams may start running on creation; hold silent until activated
    if let Err(e) = stream.pause() {
        log::debug!("Stream could not be paused after creation: {}", e);
    }
    Ok(stream)
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Shared>,
) -> Result<cpal::Stream, GuardError>
where
    T: SizedSample + FromSample<f32>,
{
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let error_shared = shared.clone();
    let mut temp_buffer: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !shared.is_active.load(Ordering::Relaxed) {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0f32);
                    }
                    return;
                }

                temp_buffer.clear();
                temp_buffer.resize(data.len(), 0.0);

                let seek_to = shared
                    .pending_seek
                    .try_lock()
                    .ok()
                    .and_then(|mut pending| pending.take());
                let info = FillInfo {
                    sample_rate,
                    channels,
                    rate: f32::from_bits(shared.rate_bits.load(Ordering::Relaxed)),
                    seek_to,
                };
                let frames_filled = (shared.fill_callback)(&mut temp_buffer, &info);

                for (sample, value) in data.iter_mut().zip(temp_buffer.iter()) {
                    *sample = T::from_sample(*value);
                }
                shared
                    .frames_rendered
                    .fetch_add(frames_filled, Ordering::Relaxed);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    log::error!("Output device went away");
                    let notifier = error_shared
                        .notifier
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(notifier) = notifier {
                        notifier.route_changed(RouteChange::new(
                            RouteChangeReason::OldDeviceUnavailable,
                            false,
                        ));
                    }
                }
                other => log::error!("Audio stream error: {}", other),
            },
            None,
        )
        .map_err(|e| GuardError::ResourceUnavailable(format!("Failed to build stream: {}", e)))
}
