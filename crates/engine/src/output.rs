use std::thread::{self, JoinHandle};
use std::time::Instant;

use basedrop::{Collector, Handle, Shared};
use beatgrid_transport::{AudioArc, TrackId};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::mix::VoiceMixer;
use crate::{AudioSink, PlayRequest};

const COMMAND_QUEUE_SIZE: usize = 256;

enum Command {
    Play {
        audio: Shared<AudioArc>,
        gain: f32,
        pan: f32,
        start_frame: u64,
        channel: Option<TrackId>,
    },
    MasterGain(f32),
    Release(TrackId),
}

/// Producer side of the command queue. Only one writer may push at a time.
struct Writer {
    commands: rtrb::Producer<Command>,
    collector: Collector,
    handle: Handle,
}

struct Started {
    sample_rate: u32,
    /// Wall-clock time of output frame 0.
    origin: Instant,
}

/// Plays through the default output device.
///
/// The cpal stream lives on its own thread for as long as the sink exists.
/// Commands reach the output callback through a lock-free ring buffer, and
/// decoded buffers are wrapped in [`basedrop::Shared`] so that dropping the
/// last reference inside the callback defers the free to
/// [`Collector::collect`] on the writer side.
pub struct CpalSink {
    sample_rate: u32,
    origin: Instant,
    writer: Mutex<Writer>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn start() -> anyhow::Result<Self> {
        let collector = Collector::new();
        let handle = collector.handle();
        let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(COMMAND_QUEUE_SIZE);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<anyhow::Result<Started>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

        let thread = thread::Builder::new()
            .name("beatgrid-output".to_string())
            .spawn(move || run_output(command_rx, started_tx, shutdown_rx))?;

        let started = match started_rx.recv() {
            Ok(result) => result?,
            Err(_) => anyhow::bail!("output thread exited before the stream started"),
        };

        info!(sample_rate = started.sample_rate, "Audio output started");
        Ok(Self {
            sample_rate: started.sample_rate,
            origin: started.origin,
            writer: Mutex::new(Writer {
                commands: command_tx,
                collector,
                handle,
            }),
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn frame_at(&self, at: Instant) -> u64 {
        let offset = at.saturating_duration_since(self.origin);
        (offset.as_secs_f64() * self.sample_rate as f64) as u64
    }
}

impl Writer {
    fn push(&mut self, command: Command) {
        self.collector.collect();
        if self.commands.push(command).is_err() {
            warn!("Output command queue full, dropping command");
        }
    }
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&self, request: PlayRequest) {
        let start_frame = self.frame_at(request.at);
        let mut writer = self.writer.lock();
        let audio = Shared::new(&writer.handle, request.audio);
        writer.push(Command::Play {
            audio,
            gain: request.gain,
            pan: request.pan,
            start_frame,
            channel: request.channel,
        });
    }

    fn set_master_gain(&self, gain: f32) {
        self.writer.lock().push(Command::MasterGain(gain));
    }

    fn release_channel(&self, channel: TrackId) {
        self.writer.lock().push(Command::Release(channel));
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        // disconnecting the shutdown channel wakes the output thread
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Output thread panicked");
            }
        }
        debug!("Audio output stopped");
    }
}

fn run_output(
    command_rx: rtrb::Consumer<Command>,
    started_tx: Sender<anyhow::Result<Started>>,
    shutdown_rx: Receiver<()>,
) {
    let stream = match open_stream(command_rx) {
        Ok((stream, started)) => {
            let _ = started_tx.send(Ok(started));
            stream
        }
        Err(err) => {
            let _ = started_tx.send(Err(err));
            return;
        }
    };

    // blocks until the sink is dropped
    let _ = shutdown_rx.recv();
    drop(stream);
}

fn open_stream(command_rx: rtrb::Consumer<Command>) -> anyhow::Result<(cpal::Stream, Started)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0;

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), command_rx)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), command_rx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), command_rx)?,
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;
    let started = Started {
        sample_rate,
        origin: Instant::now(),
    };
    Ok((stream, started))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut command_rx: rtrb::Consumer<Command>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let mut mixer = VoiceMixer::<Shared<AudioArc>>::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(command) = command_rx.pop() {
                match command {
                    Command::Play {
                        audio,
                        gain,
                        pan,
                        start_frame,
                        channel,
                    } => {
                        mixer.add(audio, gain, pan, start_frame, channel);
                    }
                    Command::MasterGain(gain) => mixer.set_master_gain(gain),
                    Command::Release(channel) => mixer.release_channel(channel),
                }
            }

            for frame in data.chunks_mut(output_channels) {
                let (left, right) = mixer.next_frame();
                match frame {
                    [mono] => *mono = T::from_sample((left + right) * 0.5),
                    [l, r, rest @ ..] => {
                        *l = T::from_sample(left);
                        *r = T::from_sample(right);
                        for sample in rest {
                            *sample = T::from_sample(0.0);
                        }
                    }
                    [] => {}
                }
            }
            mixer.reap();
        },
        |err| error!("Output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
