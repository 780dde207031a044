use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::error;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::playback::{AudioOutput, AudioOutputDevice, OutputSpec, PlaybackError};

enum AudioCommand {
    PlayAudio(Vec<i16>),
    Finish,
}

/// Host speaker driven through CPAL.
///
/// `cpal::Stream` cannot leave the thread that built it, so every opened clip
/// gets an audio thread that owns the stream and is fed over a channel.
pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    fn open_device(&self) -> Result<cpal::Device, PlaybackError> {
        let host = cpal::default_host();
        log::debug!("AudioSink: Using audio host: {:?}", host.id());

        let device = match self.device_name {
            Some(ref name) => host
                .output_devices()
                .map_err(|e| PlaybackError::Output(e.to_string()))?
                .find(|dev| dev.name().unwrap_or_default() == *name),
            None => host.default_output_device(),
        };
        device.ok_or_else(|| {
            log::error!("AudioSink: No output device found!");
            PlaybackError::Output("No output device found".to_string())
        })
    }
}

impl AudioOutputDevice for CpalSpeaker {
    fn open(&mut self, spec: &OutputSpec) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        let device = self.open_device()?;
        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        log::debug!("AudioSink: Using output config: {:?}", supported_config);

        let (audio_sender, audio_receiver) = unbounded();
        let (ready_sender, ready_receiver) = bounded(1);
        let input = *spec;

        let audio_thread = thread::spawn(move || {
            run_audio_thread(device, supported_config, input, audio_receiver, ready_sender)
        });

        match ready_receiver.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalOutput {
                audio_sender,
                audio_thread: Some(audio_thread),
            })),
            Ok(Err(message)) => Err(PlaybackError::Output(message)),
            Err(_) => Err(PlaybackError::Output("Audio thread exited".to_string())),
        }
    }
}

fn run_audio_thread(
    device: cpal::Device,
    supported_config: cpal::SupportedStreamConfig,
    input: OutputSpec,
    audio_receiver: Receiver<AudioCommand>,
    ready: Sender<Result<(), String>>,
) {
    let output_sample_rate = supported_config.sample_rate().0;
    let output_channels = supported_config.channels() as usize;
    let input_channels = input.channels.max(1) as usize;
    let step = input.sample_rate as f32 / output_sample_rate as f32;

    let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
    let queue_clone = Arc::clone(&queue);
    let mut position = 0.0f32;

    let stream = match device.build_output_stream(
        &supported_config.config(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queue = queue_clone.lock().unwrap();

            // Linear interpolation from the clip rate to the device rate
            for frame in data.chunks_mut(output_channels) {
                let idx = position as usize;
                let frac = position.fract();
                let sample = match (queue.get(idx), queue.get(idx + 1)) {
                    (Some(a), Some(b)) => a + (b - a) * frac,
                    (Some(a), None) => *a,
                    _ => 0.0,
                };
                for channel in frame.iter_mut() {
                    *channel = sample;
                }
                if idx < queue.len() {
                    position += step;
                }
            }

            let consumed = (position as usize).min(queue.len());
            queue.drain(..consumed);
            position -= consumed as f32;
        },
        move |err| {
            log::error!("AudioSink: Stream error: {}", err);
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(format!("Failed to create audio stream: {}", e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(format!("Failed to start audio stream: {}", e)));
        return;
    }
    let _ = ready.send(Ok(()));

    while let Ok(command) = audio_receiver.recv() {
        match command {
            AudioCommand::PlayAudio(samples) => {
                let mut queue = queue.lock().unwrap();
                // Downmix to mono
                for frame in samples.chunks(input_channels) {
                    let sum: f32 = frame.iter().map(|&s| s as f32 / i16::MAX as f32).sum();
                    queue.push_back(sum / frame.len() as f32);
                }
            }
            AudioCommand::Finish => {
                while !queue.lock().unwrap().is_empty() {
                    thread::sleep(Duration::from_millis(10));
                }
                break;
            }
        }
    }

    log::debug!("AudioSink: Audio thread exiting");
}

struct CpalOutput {
    audio_sender: Sender<AudioCommand>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl AudioOutput for CpalOutput {
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError> {
        self.audio_sender
            .send(AudioCommand::PlayAudio(samples.to_vec()))
            .map_err(|e| PlaybackError::Output(e.to_string()))
    }

    fn finish(mut self: Box<Self>) -> Result<(), PlaybackError> {
        self.audio_sender
            .send(AudioCommand::Finish)
            .map_err(|e| PlaybackError::Output(e.to_string()))?;
        if let Some(thread) = self.audio_thread.take() {
            thread
                .join()
                .map_err(|_| PlaybackError::Output("Audio thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(thread) = self.audio_thread.take() {
            let _ = self.audio_sender.send(AudioCommand::Finish);
            if let Err(e) = thread.join() {
                error!("Failed to join audio thread: {:?}", e);
            }
        }
    }
}
