//! Native pipeline backend (symphonia + rubato + cpal)
//!
//! Each pipeline runs two threads:
//! - decode: [`TrackReader`] chunks → `NewBuffer` events → ring buffer
//! - output: owns the cpal stream; its callback pops the ring buffer, runs
//!   the [`DspChain`] and applies volume × fade modifier
//!
//! Control values (state, volume, seek requests, post-processing) cross
//! threads through atomics and short-held mutexes in [`Shared`]. The output
//! callback never blocks: it only `try_lock`s.

use super::{
    OutputDetails, Pipeline, PipelineBackend, PipelineEventKind, PipelineEventSender,
    PipelineRequest, PipelineState, TrackBounds,
};
use crate::audio::decoder::StreamingDecoder;
use crate::audio::dsp::{DspChain, ReplayGainTags};
use crate::audio::output::{list_outputs, map_stereo_frames, OutputDevice};
use crate::audio::reader::TrackReader;
use crate::audio::AudioChunk;
use crate::error::{Error, Result};
use crate::post_processing::PostProcessing;
use crate::source::local_path;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use segue_common::config::{BufferSettings, OutputSettings};
use segue_common::events::{
    core_codes, resource_codes, stream_codes, ErrorDomain, MetaBundle, PipelineId,
};
use segue_common::time::{frames_to_nanos, ms_to_nanos, nanos_to_frames};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Initial fill may take this long before it is reported as buffering
const PREFILL_GRACE: Duration = Duration::from_millis(250);

/// Decode thread sleep when there is nothing to do
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Smallest ring buffer, whatever the settings say
const MIN_BUFFER_MS: u64 = 200;

fn encode_state(state: PipelineState) -> u8 {
    match state {
        PipelineState::Ready => 0,
        PipelineState::Paused => 1,
        PipelineState::Playing => 2,
        PipelineState::Null => 3,
    }
}

fn decode_state(value: u8) -> PipelineState {
    match value {
        0 => PipelineState::Ready,
        1 => PipelineState::Paused,
        2 => PipelineState::Playing,
        _ => PipelineState::Null,
    }
}

/// State shared by the control side and both pipeline threads
struct Shared {
    state: AtomicU8,
    volume: AtomicU8,
    modifier_bits: AtomicU64,

    /// Source position at the last flush, plus frames output since
    base_nanosec: AtomicU64,
    frames_played: AtomicU64,
    output_rate: AtomicU32,
    length_nanosec: AtomicU64,

    buffering: AtomicBool,
    stopped: AtomicBool,

    /// Decode thread asks the output callback to drop queued audio
    flush: AtomicBool,
    /// Everything decoded is in the ring buffer
    decode_finished: AtomicBool,
    /// Output found the ring empty after decode finished
    drained: AtomicBool,
    /// Output underran while playing
    starved: AtomicBool,

    seek_request: Mutex<Option<u64>>,
    pending_params: Mutex<Option<PostProcessing>>,
}

impl Shared {
    fn new(length_nanosec: u64, begin_nanosec: u64) -> Self {
        Self {
            state: AtomicU8::new(encode_state(PipelineState::Ready)),
            volume: AtomicU8::new(100),
            modifier_bits: AtomicU64::new(1.0f64.to_bits()),
            base_nanosec: AtomicU64::new(begin_nanosec),
            frames_played: AtomicU64::new(0),
            output_rate: AtomicU32::new(0),
            length_nanosec: AtomicU64::new(length_nanosec),
            buffering: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            decode_finished: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            starved: AtomicBool::new(false),
            seek_request: Mutex::new(None),
            pending_params: Mutex::new(None),
        }
    }

    fn state(&self) -> PipelineState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    fn modifier(&self) -> f64 {
        f64::from_bits(self.modifier_bits.load(Ordering::Acquire))
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn position_nanosec(&self) -> u64 {
        let base = self.base_nanosec.load(Ordering::Acquire);
        let frames = self.frames_played.load(Ordering::Acquire);
        base + frames_to_nanos(frames, self.output_rate.load(Ordering::Acquire))
    }
}

/// Output callback state
struct Renderer {
    consumer: HeapCons<f32>,
    shared: Arc<Shared>,
    dsp: DspChain,
    scratch: Vec<f32>,
}

impl Renderer {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let shared = &self.shared;
        if shared.flush.load(Ordering::Acquire) {
            self.consumer.clear();
            self.dsp.reset();
            shared.frames_played.store(0, Ordering::Release);
            shared.flush.store(false, Ordering::Release);
        }
        if let Ok(mut pending) = shared.pending_params.try_lock() {
            if let Some(params) = pending.take() {
                self.dsp.configure(&params);
            }
        }

        if shared.state() != PipelineState::Playing {
            out.fill(0.0);
            return;
        }

        let frames = out.len() / channels.max(1);
        self.scratch.resize(frames * 2, 0.0);
        let popped = self.consumer.pop_slice(&mut self.scratch[..frames * 2]) / 2;

        let audio = &mut self.scratch[..popped * 2];
        self.dsp.process(audio);
        let gain = shared.volume.load(Ordering::Relaxed) as f32 / 100.0 * shared.modifier() as f32;
        for sample in audio.iter_mut() {
            *sample *= gain;
        }
        self.scratch[popped * 2..].fill(0.0);
        map_stereo_frames(&self.scratch, out, channels);

        shared.frames_played.fetch_add(popped as u64, Ordering::AcqRel);
        if popped < frames {
            if shared.decode_finished.load(Ordering::Acquire) {
                shared.drained.store(true, Ordering::Release);
            } else {
                shared.starved.store(true, Ordering::Release);
            }
        }
    }
}

/// Decode thread state
struct DecodeWorker {
    id: PipelineId,
    reader: TrackReader,
    producer: HeapProd<f32>,
    capacity: usize,
    min_fill: usize,
    min_fill_percent: u8,
    shared: Arc<Shared>,
    events: PipelineEventSender,
    metadata: MetaBundle,

    /// Chunk being pushed and how much of it is already in the ring
    pending: Option<(Arc<AudioChunk>, usize)>,
    source_done: bool,
    failed: bool,
    prefilled: bool,
    last_progress: Option<u8>,
}

impl DecodeWorker {
    fn run(mut self) {
        if self.metadata != MetaBundle::default() {
            self.events
                .emit(PipelineEventKind::MetadataChanged(self.metadata.clone()));
        }

        let started = Instant::now();
        let mut eos_sent = false;
        while !self.shared.is_stopped() {
            let seek = self.shared.seek_request.lock().unwrap().take();
            if let Some(target) = seek {
                self.seek(target);
                eos_sent = false;
            }

            if self.shared.drained.load(Ordering::Acquire) && !eos_sent {
                eos_sent = true;
                debug!(pipeline_id = %self.id, "End of stream");
                self.events.emit(PipelineEventKind::EndOfStream);
            }

            if self.shared.starved.swap(false, Ordering::AcqRel) && self.prefilled && !self.is_done() {
                self.start_buffering();
            }

            let progressed = if self.failed { false } else { self.fill() };
            self.update_buffering(started);

            if !progressed {
                thread::sleep(IDLE_WAIT);
            }
        }
        debug!(pipeline_id = %self.id, "Decode thread finished");
    }

    fn is_done(&self) -> bool {
        self.source_done && self.pending.is_none()
    }

    /// Move decoded audio into the ring buffer. Returns whether anything
    /// happened.
    fn fill(&mut self) -> bool {
        if self.pending.is_none() && !self.source_done {
            match self.reader.next_chunk() {
                Ok(Some(chunk)) => {
                    let chunk = Arc::new(chunk);
                    self.events.emit(PipelineEventKind::NewBuffer(chunk.clone()));
                    self.pending = Some((chunk, 0));
                }
                Ok(None) => self.source_done = true,
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            }
        }

        let mut progressed = false;
        if let Some((chunk, offset)) = &mut self.pending {
            let written = self.producer.push_slice(&chunk.samples[*offset..]);
            *offset += written;
            progressed = written > 0;
            if *offset >= chunk.samples.len() {
                self.pending = None;
            }
        }
        if self.is_done() && !self.shared.decode_finished.swap(true, Ordering::AcqRel) {
            debug!(pipeline_id = %self.id, "Decoding finished");
            progressed = true;
        }
        progressed
    }

    fn seek(&mut self, target: u64) {
        match self.reader.seek(target) {
            Ok(resumed) => {
                self.pending = None;
                self.source_done = false;
                self.failed = false;
                self.shared.decode_finished.store(false, Ordering::Release);
                self.shared.drained.store(false, Ordering::Release);
                self.shared.base_nanosec.store(resumed, Ordering::Release);
                self.shared.frames_played.store(0, Ordering::Release);
                self.shared.flush.store(true, Ordering::Release);
                while self.shared.flush.load(Ordering::Acquire) && !self.shared.is_stopped() {
                    thread::sleep(Duration::from_millis(1));
                }
                debug!(pipeline_id = %self.id, target, resumed, "Seek complete");
            }
            Err(e) => {
                warn!(pipeline_id = %self.id, target, error = %e, "Seek failed");
                self.events.emit(PipelineEventKind::Error {
                    message: e.to_string(),
                    domain: ErrorDomain::Resource,
                    code: resource_codes::SEEK,
                });
            }
        }
    }

    fn fail(&mut self, e: Error) {
        let (domain, code) = match &e {
            Error::Io(_) => (ErrorDomain::Resource, resource_codes::READ),
            Error::Decode(_) => (ErrorDomain::Stream, stream_codes::DECODE),
            other => other.domain_and_code(),
        };
        error!(pipeline_id = %self.id, error = %e, "Decoding failed");
        self.failed = true;
        self.events.emit(PipelineEventKind::Error {
            message: e.to_string(),
            domain,
            code,
        });
    }

    fn fill_level(&self) -> usize {
        self.producer.occupied_len()
    }

    fn start_buffering(&mut self) {
        if !self.shared.buffering.swap(true, Ordering::AcqRel) {
            debug!(pipeline_id = %self.id, "Buffering");
            self.last_progress = None;
            self.events.emit(PipelineEventKind::BufferingStarted);
        }
    }

    fn update_buffering(&mut self, started: Instant) {
        let filled = self.fill_level() >= self.min_fill || self.is_done() || self.failed;

        if !self.prefilled {
            if filled {
                self.prefilled = true;
            } else if started.elapsed() > PREFILL_GRACE {
                self.start_buffering();
            }
        }

        if !self.shared.buffering.load(Ordering::Acquire) {
            return;
        }
        if filled {
            self.prefilled = true;
            self.shared.buffering.store(false, Ordering::Release);
            debug!(pipeline_id = %self.id, "Buffering finished");
            self.events.emit(PipelineEventKind::BufferingFinished);
            return;
        }
        let percent = (self.fill_level() * 100 / self.min_fill.max(1)).min(100) as u8;
        if self.last_progress != Some(percent) {
            self.last_progress = Some(percent);
            self.events.emit(PipelineEventKind::BufferingProgress(percent));
        }
    }
}

/// One native decode-to-output chain
pub struct NativePipeline {
    id: PipelineId,
    url: String,
    bounds: TrackBounds,
    events: PipelineEventSender,
    shared: Arc<Shared>,
    output_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl NativePipeline {
    /// Open the source, start the output stream and the decode thread
    pub fn open(
        request: PipelineRequest,
        events: PipelineEventSender,
        params: &PostProcessing,
    ) -> Result<Arc<Self>> {
        let PipelineRequest {
            id,
            url,
            bounds,
            output,
            buffer,
            ..
        } = request;
        let construction = |reason: &str, domain: ErrorDomain, code: i32| Error::Construction {
            url: url.clone(),
            reason: reason.to_string(),
            domain,
            code,
        };

        let path = local_path(&url).ok_or_else(|| {
            construction("unsupported source", ErrorDomain::Resource, resource_codes::NOT_FOUND)
        })?;
        if !path.is_file() {
            return Err(construction("no such file", ErrorDomain::Resource, resource_codes::NOT_FOUND));
        }

        let decoder = StreamingDecoder::open(&path, &url)?;
        let metadata = decoder.metadata().clone();
        let tags = ReplayGainTags {
            track_gain_db: metadata.track_gain_db,
            album_gain_db: metadata.album_gain_db,
        };
        let shared = Arc::new(Shared::new(decoder.length_nanosec(), bounds.begin_nanosec));
        let min_fill_percent = buffer.min_fill_percent;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        {
            let shared = shared.clone();
            let events = events.clone();
            let params = params.clone();
            thread::Builder::new()
                .name(format!("segue-output-{}", id.0))
                .spawn(move || {
                    match start_output(&output, &buffer, shared, &params, tags, events) {
                        Ok((stream, producer, rate, min_fill)) => {
                            let _ = ready_tx.send(Ok((producer, rate, min_fill)));
                            // Held until teardown drops the sender
                            let _ = stop_rx.recv();
                            drop(stream);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })?;
        }

        let (producer, rate, min_fill) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("output thread exited".to_string()))
            .and_then(|r| r)
            .map_err(|e| construction(&e.to_string(), ErrorDomain::Core, core_codes::FAILED))?;

        let reader = TrackReader::new(decoder, bounds, rate)?;
        let capacity = producer.capacity().get();
        let worker = DecodeWorker {
            id,
            reader,
            producer,
            capacity,
            min_fill,
            min_fill_percent,
            shared: shared.clone(),
            events: events.clone(),
            metadata,
            pending: None,
            source_done: false,
            failed: false,
            prefilled: false,
            last_progress: None,
        };
        debug!(
            pipeline_id = %id,
            capacity = worker.capacity,
            min_fill_percent = worker.min_fill_percent,
            "Starting decode thread"
        );
        thread::Builder::new()
            .name(format!("segue-decode-{}", id.0))
            .spawn(move || worker.run())?;

        info!(pipeline_id = %id, url = %url, output_rate = rate, "Native pipeline ready");
        Ok(Arc::new(Self {
            id,
            url,
            bounds,
            events,
            shared,
            output_stop: Mutex::new(Some(stop_tx)),
        }))
    }
}

/// Runs on the output thread: pick the device, size the ring buffer for
/// its rate and start the stream
fn start_output(
    output: &OutputSettings,
    buffer: &BufferSettings,
    shared: Arc<Shared>,
    params: &PostProcessing,
    tags: ReplayGainTags,
    events: PipelineEventSender,
) -> Result<(cpal::Stream, HeapProd<f32>, u32, usize)> {
    let device = OutputDevice::select(output)?;
    let rate = device.sample_rate();
    let channels = device.channels() as usize;

    let buffer_ms = buffer.duration_ms.max(MIN_BUFFER_MS);
    let frames = nanos_to_frames(ms_to_nanos(buffer_ms), rate).max(1) as usize;
    let min_fill = frames * 2 * buffer.min_fill_percent.min(100) as usize / 100;
    let (producer, consumer) = HeapRb::<f32>::new(frames * 2).split();

    shared.output_rate.store(rate, Ordering::Release);
    let mut renderer = Renderer {
        consumer,
        shared,
        dsp: DspChain::new(rate, params, tags),
        scratch: Vec::with_capacity(frames * 2),
    };

    let stream = device.start(
        move |out| renderer.render(out, channels),
        move |message| {
            error!(pipeline_id = %events.pipeline_id(), %message, "Output stream error");
            events.emit(output_stream_error(message));
        },
    )?;
    Ok((stream, producer, rate, min_fill))
}

/// Event for a failure reported by the running output stream
fn output_stream_error(message: String) -> PipelineEventKind {
    PipelineEventKind::Error {
        message,
        domain: ErrorDomain::Core,
        code: core_codes::FAILED,
    }
}

impl Pipeline for NativePipeline {
    fn id(&self) -> PipelineId {
        self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn bounds(&self) -> TrackBounds {
        self.bounds
    }

    fn state(&self) -> PipelineState {
        self.shared.state()
    }

    fn set_state(&self, state: PipelineState) -> Result<()> {
        if self.shared.is_stopped() {
            return Err(Error::Runtime {
                pipeline_id: self.id,
                domain: ErrorDomain::Core,
                code: core_codes::STATE_CHANGE,
                message: "pipeline is torn down".to_string(),
            });
        }
        if state == PipelineState::Null {
            self.teardown();
            return Ok(());
        }
        debug!(pipeline_id = %self.id, ?state, "Pipeline state");
        self.shared.state.store(encode_state(state), Ordering::Release);
        Ok(())
    }

    fn seek(&self, nanosec: u64) -> Result<()> {
        if self.shared.is_stopped() {
            return Err(Error::InvalidState(format!("{} is torn down", self.id)));
        }
        *self.shared.seek_request.lock().unwrap() = Some(nanosec);
        self.shared.base_nanosec.store(nanosec, Ordering::Release);
        self.shared.frames_played.store(0, Ordering::Release);
        Ok(())
    }

    fn position_nanosec(&self) -> u64 {
        self.shared.position_nanosec()
    }

    fn length_nanosec(&self) -> u64 {
        self.shared.length_nanosec.load(Ordering::Acquire)
    }

    fn set_volume(&self, percent: u8) {
        self.shared.volume.store(percent.min(100), Ordering::Release);
    }

    fn volume(&self) -> u8 {
        self.shared.volume.load(Ordering::Acquire)
    }

    fn set_volume_modifier(&self, modifier: f64) {
        let modifier = if modifier.is_finite() {
            modifier.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.shared
            .modifier_bits
            .store(modifier.to_bits(), Ordering::Release);
    }

    fn volume_modifier(&self) -> f64 {
        self.shared.modifier()
    }

    fn apply_post_processing(&self, params: &PostProcessing) {
        *self.shared.pending_params.lock().unwrap() = Some(params.clone());
    }

    fn is_buffering(&self) -> bool {
        self.shared.buffering.load(Ordering::Acquire)
    }

    fn teardown(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.events.silence();
        self.shared
            .state
            .store(encode_state(PipelineState::Null), Ordering::Release);
        // Dropping the sender ends the output thread and its stream
        self.output_stop.lock().unwrap().take();
        debug!(pipeline_id = %self.id, "Native pipeline torn down");
    }
}

impl Drop for NativePipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Backend building [`NativePipeline`]s
#[derive(Default)]
pub struct NativeBackend {
    outputs: Mutex<Option<Vec<OutputDetails>>>,
}

impl NativeBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineBackend for NativeBackend {
    fn initialise(&self) -> Result<()> {
        let outputs = list_outputs();
        info!(count = outputs.len(), "Discovered audio outputs");
        *self.outputs.lock().unwrap() = Some(outputs);
        Ok(())
    }

    fn create(
        &self,
        request: PipelineRequest,
        events: PipelineEventSender,
        params: &PostProcessing,
    ) -> Result<Arc<dyn Pipeline>> {
        let pipeline: Arc<dyn Pipeline> = NativePipeline::open(request, events, params)?;
        Ok(pipeline)
    }

    fn outputs(&self) -> Vec<OutputDetails> {
        if let Some(outputs) = self.outputs.lock().unwrap().as_ref() {
            return outputs.clone();
        }
        list_outputs()
    }
}
