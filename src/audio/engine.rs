use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};

use super::buffer::BufferReader;
use super::processor::{ChopProcessor, EngineShared, ProcessorOutputs};
use crate::command::{Command, CommandReceiver};
use crate::midi::{MidiEvent, MidiMessage};
use crate::sequencer::Transport;

/// Largest block handed to the processor in one call
pub const MAX_BLOCK: usize = 4096;
/// Most MIDI input events taken per callback
const MIDI_PER_CALLBACK: usize = 512;

/// Channel ends the audio callback talks to
pub struct EngineIo {
    pub commands: CommandReceiver,
    pub midi_in: Option<Receiver<MidiEvent>>,
    pub midi_out: Option<Sender<MidiMessage>>,
}

/// Audio engine owning the cpal streams and the chopper running inside them
pub struct AudioEngine {
    _output: Stream,
    _input: Option<Stream>,
    sample_rate: f64,
    reader: BufferReader,
}

impl AudioEngine {
    /// Open the default output device, plus the default input unless `with_input` is false
    pub fn new(
        shared: EngineShared,
        outputs: ProcessorOutputs,
        io: EngineIo,
        with_input: bool,
        transport_bpm: f64,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("No output device available")?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0 as f64;
        log::info!(
            target: "audio",
            "Output: {} @ {} Hz, {} channels",
            device.name().unwrap_or_default(),
            sample_rate,
            config.channels()
        );

        let (input, frames) = if with_input {
            match open_input(&host, config.sample_rate()) {
                Ok((stream, rx)) => (Some(stream), Some(rx)),
                Err(e) => {
                    log::warn!(target: "audio", "Running without live input: {:#}", e);
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let processor = ChopProcessor::new(sample_rate, shared, outputs);
        let reader = processor.buffer_reader();
        let transport = Transport::new(transport_bpm);

        let stream = match config.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config.into(), processor, transport, io, frames)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config.into(), processor, transport, io, frames)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config.into(), processor, transport, io, frames)?,
            format => anyhow::bail!("Unsupported sample format: {:?}", format),
        };

        stream.play()?;
        if let Some(input) = &input {
            input.play()?;
        }

        Ok(Self {
            _output: stream,
            _input: input,
            sample_rate,
            reader,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer_reader(&self) -> BufferReader {
        self.reader.clone()
    }

    /// Build the output stream for a specific sample format
    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut processor: ChopProcessor,
        mut transport: Transport,
        io: EngineIo,
        input: Option<Receiver<(f32, f32)>>,
    ) -> Result<Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = config.channels as usize;
        let sample_rate = processor.sample_rate();
        let EngineIo {
            commands,
            midi_in,
            midi_out,
        } = io;

        let mut left = vec![0.0f32; MAX_BLOCK];
        let mut right = vec![0.0f32; MAX_BLOCK];
        let mut midi_events: Vec<MidiEvent> = Vec::with_capacity(MIDI_PER_CALLBACK);

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                commands.drain(|cmd| match cmd {
                    Command::Play => transport.play(),
                    Command::Pause => transport.pause(),
                    Command::Stop => transport.stop(),
                    Command::SetTransportBpm(bpm) => transport.set_bpm(bpm as f64),
                    other => processor.apply_command(other),
                });

                midi_events.clear();
                if let Some(rx) = &midi_in {
                    while midi_events.len() < midi_events.capacity() {
                        match rx.try_recv() {
                            Ok(event) => midi_events.push(event),
                            Err(_) => break,
                        }
                    }
                }

                let frames = data.len() / channels;
                let mut done = 0;
                while done < frames {
                    let n = (frames - done).min(MAX_BLOCK);
                    let (l, r) = (&mut left[..n], &mut right[..n]);
                    for i in 0..n {
                        let (a, b) = input
                            .as_ref()
                            .and_then(|rx| rx.try_recv().ok())
                            .unwrap_or((0.0, 0.0));
                        l[i] = a;
                        r[i] = b;
                    }

                    // MIDI input is applied with the first chunk of the callback
                    let midi: &[MidiEvent] = if done == 0 { &midi_events } else { &[] };
                    let produced = processor.process_block(l, r, Some(transport.snapshot()), midi);
                    if let Some(tx) = &midi_out {
                        for event in produced {
                            let _ = tx.try_send(event.message);
                        }
                    }
                    transport.advance(n, sample_rate);

                    let out = &mut data[done * channels..(done + n) * channels];
                    for (i, frame) in out.chunks_mut(channels).enumerate() {
                        for (ch, sample) in frame.iter_mut().enumerate() {
                            let v = match ch {
                                0 => l[i],
                                1 => r[i],
                                _ => (l[i] + r[i]) * 0.5,
                            };
                            *sample = T::from_sample(v);
                        }
                    }
                    done += n;
                }
            },
            |err| {
                log::error!(target: "audio", "Output stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}

/// Default input device at the output rate, delivering stereo frames
fn open_input(
    host: &cpal::Host,
    rate: cpal::SampleRate,
) -> Result<(Stream, Receiver<(f32, f32)>)> {
    let device = host
        .default_input_device()
        .context("No input device available")?;
    let supported = device.default_input_config()?;
    if supported.sample_rate() != rate {
        anyhow::bail!(
            "Input runs at {} Hz, output at {} Hz",
            supported.sample_rate().0,
            rate.0
        );
    }
    // One second of slack between the two callbacks
    let (tx, rx) = bounded(rate.0 as usize);
    let config: StreamConfig = supported.clone().into();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input::<f32>(&device, &config, tx)?,
        SampleFormat::I16 => build_input::<i16>(&device, &config, tx)?,
        SampleFormat::U16 => build_input::<u16>(&device, &config, tx)?,
        format => anyhow::bail!("Unsupported input sample format: {:?}", format),
    };
    log::info!(
        target: "audio",
        "Input: {} @ {} Hz, {} channels",
        device.name().unwrap_or_default(),
        rate.0,
        config.channels
    );
    Ok((stream, rx))
}

fn build_input<T>(device: &Device, config: &StreamConfig, tx: Sender<(f32, f32)>) -> Result<Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let l: f32 = cpal::Sample::from_sample(frame[0]);
                let r: f32 = match frame.get(1) {
                    Some(s) => cpal::Sample::from_sample(*s),
                    None => l,
                };
                // Full queue means the output side stalled; drop rather than block
                let _ = tx.try_send((l, r));
            }
        },
        |err| {
            log::error!(target: "audio", "Input stream error: {}", err);
        },
        None,
    )?;
    Ok(stream)
}
