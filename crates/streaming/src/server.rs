//! Framed mTLS listener: one [`Protocol`]/[`Streamer`] pair per
//! accepted connection, running the configured [`RoutedApplication`].

use crate::flow_control::FlowControl;
use crate::message::Message;
use crate::protocol::{Decoded, Protocol, ProtocolConfig};
use crate::router::RoutedApplication;
use crate::streamer::Streamer;
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

pub struct MessageServerConfig {
    pub max_message_size: u32,
    pub max_buffer_size: usize,
    pub timeout_graceful_shutdown: Duration,
}

impl Default for MessageServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: ProtocolConfig::default().max_message_size,
            max_buffer_size: ProtocolConfig::default().max_buffer_size,
            timeout_graceful_shutdown: Duration::from_secs(30),
        }
    }
}

pub struct MessageServer {
    tls_config: Arc<ServerConfig>,
    app: Arc<RoutedApplication>,
    config: MessageServerConfig,
}

impl MessageServer {
    pub fn new(tls_config: Arc<ServerConfig>, app: Arc<RoutedApplication>, config: MessageServerConfig) -> Self {
        Self {
            tls_config,
            app,
            config,
        }
    }

    /// Accepts connections until `stop` fires, then waits for
    /// in-flight connection tasks (bounded by
    /// `timeout_graceful_shutdown`) before returning.
    pub async fn serve(&self, listener: TcpListener, mut stop: watch::Receiver<bool>) -> std::io::Result<()> {
        let acceptor = TlsAcceptor::from(self.tls_config.clone());
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _addr) = accepted?;
                    let acceptor = acceptor.clone();
                    let app = self.app.clone();
                    let max_message_size = self.config.max_message_size;
                    let max_buffer_size = self.config.max_buffer_size;
                    tasks.spawn(async move {
                        if let Ok(tls_stream) = acceptor.accept(stream).await {
                            handle_connection(tls_stream, app, max_message_size, max_buffer_size).await;
                        }
                    });
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.timeout_graceful_shutdown, drain)
            .await
            .is_err()
        {
            tasks.shutdown().await;
        }
        Ok(())
    }
}

fn generate_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

async fn handle_connection<S>(stream: S, app: Arc<RoutedApplication>, max_message_size: u32, max_buffer_size: usize)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (in_tx, in_rx) = mpsc::channel::<Option<Message>>(64);
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let flow_control = Arc::new(FlowControl::new());

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(framed) = Protocol::encode_frame(&msg) else {
                continue;
            };
            if writer.write_all(&framed).await.is_err() {
                break;
            }
        }
    });

    let reader_task = tokio::spawn(async move {
        let mut protocol = Protocol::new(ProtocolConfig {
            max_message_size,
            max_buffer_size,
        });
        let mut buf = [0u8; 8192];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => {
                    let _ = in_tx.send(None).await;
                    return;
                }
                Ok(n) => n,
            };
            if protocol.feed(&buf[..n]).is_err() {
                let _ = in_tx.send(None).await;
                return;
            }
            loop {
                match protocol.decode_next() {
                    Ok(Decoded::Message(msg)) => {
                        if in_tx.send(Some(msg)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Decoded::Invalid) => {
                        if in_tx.send(Some(Message::ko("Invalid frame format"))).await.is_err() {
                            return;
                        }
                    }
                    Ok(Decoded::NeedMore) => break,
                    Err(_) => {
                        let _ = in_tx.send(None).await;
                        return;
                    }
                }
            }
        }
    });

    let mut streamer = Streamer::new(in_rx, out_tx, flow_control);
    streamer.run(&app, generate_request_id).await;
    drop(streamer);

    let _ = reader_task.await;
    let _ = writer_task.await;
}
