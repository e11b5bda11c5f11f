//! WebSocket transport to the realtime service.

use crate::audio_utils;
use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kelion_core::{Connection, Credential, Transport, TransportError, TransportLink};
use kelion_realtime_types::{ControlMessage, decode, encode};
use secrecy::ExposeSecret;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

/// Connects with the ephemeral credential as a bearer token.
///
/// Assistant audio deltas are split off the control lane and decoded into
/// samples; microphone frames are sent as `input_audio_buffer.append`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    model: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, credential: &Credential) -> Result<Connection, TransportError> {
        let url = format!("{}?model={}", self.url, self.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Other(e.into()))?;
        let bearer = format!("Bearer {}", credential.token.expose_secret())
            .parse::<HeaderValue>()
            .map_err(|_| TransportError::Rejected("credential is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", bearer);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => {
                TransportError::Rejected(format!("handshake refused with HTTP {}", response.status()))
            }
            other => TransportError::Other(anyhow!(other).context("websocket handshake failed")),
        })?;
        info!(model = %self.model, "connected to the realtime service");
        let (mut sink, mut stream) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound) = mpsc::channel::<String>(256);
        let (remote_tx, remote_audio) = mpsc::channel::<Vec<f32>>(256);
        let (local_audio, mut local_rx) = mpsc::channel::<Vec<i16>>(64);

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        let delivered = match audio_samples(&text) {
                            Some(samples) => remote_tx.send(samples).await.is_ok(),
                            None => inbound_tx.send(text).await.is_ok(),
                        };
                        if !delivered {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        info!(?frame, "realtime service closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "realtime websocket failed");
                        break;
                    }
                }
            }
            debug!("websocket reader stopped");
        });

        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = &mut close_rx => break,
                    Some(frame) = outbound_rx.recv() => frame,
                    Some(samples) = local_rx.recv() => {
                        let append = ControlMessage::InputAudioBufferAppend {
                            audio: audio_utils::encode_i16(&samples),
                        };
                        match encode(&append) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "failed to encode microphone frame");
                                continue;
                            }
                        }
                    }
                    else => break,
                };
                if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                    warn!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.close().await;
            debug!("websocket writer stopped");
        });

        Ok(Connection {
            outbound,
            inbound,
            remote_audio,
            local_audio,
            link: Box::new(WebSocketLink {
                reader: Some(reader),
                writer: Some(writer),
                close: Some(close_tx),
            }),
        })
    }
}

/// Samples carried by a `response.audio.delta` frame, or `None` for any
/// other frame.
fn audio_samples(frame: &str) -> Option<Vec<f32>> {
    if !frame.contains("response.audio.delta") {
        return None;
    }
    match decode(frame) {
        Ok(ControlMessage::ResponseAudioDelta { delta }) => {
            Some(audio_utils::decode_f32_from_base64_i16(&delta))
        }
        _ => None,
    }
}

struct WebSocketLink {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    close: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        // The writer sends a close frame on its way out.
        if let Some(mut writer) = self.writer.take() {
            let graceful = tokio::time::timeout(std::time::Duration::from_secs(1), &mut writer).await;
            if graceful.is_err() {
                writer.abort();
            }
        }
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        for task in [self.reader.take(), self.writer.take()].into_iter().flatten() {
            task.abort();
        }
    }
}
