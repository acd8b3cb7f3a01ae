//! Audio output using cpal
//!
//! Device selection, stream construction and output enumeration. The
//! stream pulls interleaved f32 frames from a render closure; integer
//! device formats are converted after rendering.
//!
//! `cpal::Stream` is not `Send` on every host, so a stream must stay on
//! the thread that built it.

use crate::error::{Error, Result};
use crate::pipeline::OutputDetails;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream, StreamConfig};
use segue_common::config::OutputSettings;
use tracing::{debug, info, warn};

/// Sink name that selects the default host
pub const AUTO_SINK: &str = "auto";

/// A chosen device and the configuration its stream will use
pub struct OutputDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    name: String,
}

impl OutputDevice {
    /// Pick the host named by `settings.sink` and the device named by
    /// `settings.device`, falling back to defaults with a warning
    pub fn select(settings: &OutputSettings) -> Result<Self> {
        let host = select_host(&settings.sink);

        let device = match settings.device.as_deref() {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(device) => device,
                    None => {
                        warn!(device = name, "Requested output device not found, using default");
                        default_device(&host)?
                    }
                }
            }
            None => default_device(&host)?,
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let supported = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config = supported.config();

        debug!(
            device = %name,
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            format = ?sample_format,
            "Selected output device"
        );

        Ok(Self {
            device,
            config,
            sample_format,
            name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build and start the stream. `render` fills an interleaved f32 buffer
    /// with `channels()` channels; `on_error` receives stream errors.
    pub fn start<R, E>(self, render: R, on_error: E) -> Result<Stream>
    where
        R: FnMut(&mut [f32]) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        let stream = match self.sample_format {
            SampleFormat::F32 => self.build_f32(render, on_error)?,
            SampleFormat::I16 => self.build_converted::<i16, _, _>(render, on_error, |s| {
                (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
            })?,
            SampleFormat::U16 => self.build_converted::<u16, _, _>(render, on_error, |s| {
                ((s.clamp(-1.0, 1.0) + 1.0) * 32767.5) as u16
            })?,
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        info!(device = %self.name, "Audio stream started");
        Ok(stream)
    }

    fn build_f32<R, E>(&self, mut render: R, mut on_error: E) -> Result<Stream>
    where
        R: FnMut(&mut [f32]) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render(data);
                    for sample in data.iter_mut() {
                        *sample = sample.clamp(-1.0, 1.0);
                    }
                },
                move |err| on_error(err.to_string()),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    fn build_converted<T, R, E>(
        &self,
        mut render: R,
        mut on_error: E,
        convert: fn(f32) -> T,
    ) -> Result<Stream>
    where
        T: cpal::SizedSample + Send + 'static,
        R: FnMut(&mut [f32]) + Send + 'static,
        E: FnMut(String) + Send + 'static,
    {
        let mut scratch: Vec<f32> = Vec::new();
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    render(&mut scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = convert(sample);
                    }
                },
                move |err| on_error(err.to_string()),
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }
}

fn select_host(sink: &str) -> Host {
    if sink.is_empty() || sink.eq_ignore_ascii_case(AUTO_SINK) {
        return cpal::default_host();
    }
    let wanted = cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(sink));
    match wanted.map(cpal::host_from_id) {
        Some(Ok(host)) => host,
        Some(Err(e)) => {
            warn!(sink, error = %e, "Output sink unavailable, using default");
            cpal::default_host()
        }
        None => {
            warn!(sink, "Unknown output sink, using default");
            cpal::default_host()
        }
    }
}

fn default_device(host: &Host) -> Result<Device> {
    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))
}

/// Outputs this machine offers: the automatic choice plus every available
/// host, with its devices in the description
pub fn list_outputs() -> Vec<OutputDetails> {
    let mut outputs = vec![OutputDetails {
        name: AUTO_SINK.to_string(),
        description: "Choose automatically".to_string(),
        icon_name: "soundcard".to_string(),
    }];

    for id in cpal::available_hosts() {
        let devices: Vec<String> = match cpal::host_from_id(id) {
            Ok(host) => match host.output_devices() {
                Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
                Err(e) => {
                    warn!(host = id.name(), error = %e, "Failed to enumerate output devices");
                    continue;
                }
            },
            Err(e) => {
                debug!(host = id.name(), error = %e, "Output host unavailable");
                continue;
            }
        };
        outputs.push(OutputDetails {
            name: id.name().to_lowercase(),
            description: if devices.is_empty() {
                id.name().to_string()
            } else {
                format!("{} ({})", id.name(), devices.join(", "))
            },
            icon_name: "audio-card".to_string(),
        });
    }

    debug!(count = outputs.len(), "Enumerated outputs");
    outputs
}

/// Copy stereo frames into a device buffer of `channels` channels. Extra
/// device channels are silent; a mono device gets the average.
pub fn map_stereo_frames(stereo: &[f32], out: &mut [f32], channels: usize) {
    let channels = channels.max(1);
    for (frame, src) in out.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
        if channels == 1 {
            frame[0] = (src[0] + src[1]) * 0.5;
        } else {
            frame[0] = src[0];
            frame[1] = src[1];
            for extra in frame.iter_mut().skip(2) {
                *extra = 0.0;
            }
        }
    }
}
