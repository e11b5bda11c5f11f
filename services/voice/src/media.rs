//! Raw PCM pipes standing in for audio devices.
//!
//! The microphone is read from stdin and the speaker written to stdout, both
//! mono PCM16 LE at the realtime sample rate. Pipe through `sox`/`aplay` or
//! similar to use real hardware.

use crate::audio_utils::{self, REALTIME_PCM16_SAMPLE_RATE};
use async_trait::async_trait;
use kelion_core::{MediaDevices, MediaError, MediaStreams};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tracing::{debug, warn};

/// Samples per microphone frame (100ms).
const FRAME_SAMPLES: usize = (REALTIME_PCM16_SAMPLE_RATE / 10) as usize;

#[derive(Debug, Clone)]
pub struct PipeMedia {
    microphone: bool,
}

impl PipeMedia {
    /// With `microphone` off the session still runs but never hears the user.
    pub fn new(microphone: bool) -> Self {
        Self { microphone }
    }
}

#[async_trait]
impl MediaDevices for PipeMedia {
    async fn open(&self) -> Result<MediaStreams, MediaError> {
        let (mic_tx, microphone) = mpsc::channel(32);
        let (speaker, speaker_rx) = mpsc::channel(256);

        if self.microphone {
            tokio::spawn(capture(tokio::io::stdin(), mic_tx));
        } else {
            // Keep the lane open and silent until the session lets go of it.
            tokio::spawn(async move { mic_tx.closed().await });
        }
        tokio::spawn(playback(tokio::io::stdout(), speaker_rx));

        Ok(MediaStreams {
            microphone,
            speaker,
        })
    }
}

async fn capture<R>(mut input: R, frames: mpsc::Sender<Vec<i16>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; FRAME_SAMPLES * 2];
    let mut filled = 0;
    loop {
        let read = tokio::select! {
            _ = frames.closed() => break,
            read = input.read(&mut buf[filled..]) => read,
        };
        match read {
            Ok(0) => {
                debug!("microphone input reached end of stream");
                break;
            }
            Ok(n) => {
                filled += n;
                if filled == buf.len() {
                    filled = 0;
                    if frames.send(audio_utils::le_bytes_to_i16(&buf)).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "microphone read failed");
                break;
            }
        }
    }
}

async fn playback<W>(mut output: W, mut frames: mpsc::Receiver<Vec<f32>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(samples) = frames.recv().await {
        let pcm = audio_utils::convert_f32_to_i16(&samples);
        let written = output.write_all(&audio_utils::i16_to_le_bytes(&pcm)).await;
        if let Err(e) = written.and(output.flush().await) {
            warn!(error = %e, "speaker write failed");
            break;
        }
    }
}
