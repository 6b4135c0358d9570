//! TCP client listener: one connection per captured client,
//! newline-delimited JSON in both directions.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use crate::transport::{Inbound, decode_line};

/// How long a closing connection may keep flushing queued frames.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Accept clients forever, forwarding their frames to the coordinator task.
pub async fn serve(listener: TcpListener, inbound: mpsc::Sender<Inbound>) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "client connection accepted");
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, inbound).await {
                tracing::debug!(%peer, "connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    inbound: mpsc::Sender<Inbound>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let mut writer_task = tokio::spawn(async move {
        while let Some(line) = outbound_rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                tracing::debug!("write to client failed: {e}");
                return;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut lines = BufReader::new(reader).lines();
    let mut speaking_for: Option<String> = None;
    let result = async {
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let msg = match decode_line(&line) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!("skipping malformed frame: {e}");
                    continue;
                }
            };

            if speaking_for.as_deref() != Some(msg.client_id.as_str()) {
                if let Some(previous) = speaking_for.replace(msg.client_id.clone()) {
                    forward(&inbound, detach(previous, &outbound)).await?;
                }
                let attach = Inbound::Attach {
                    client_id: msg.client_id.clone(),
                    outbound: outbound.clone(),
                };
                forward(&inbound, attach).await?;
            }
            forward(&inbound, Inbound::Message(msg)).await?;
        }
        anyhow::Ok(())
    }
    .await;

    if let Some(client_id) = speaking_for {
        // coordinator may already be gone
        let _ = inbound.send(detach(client_id, &outbound)).await;
    }
    // frames queued before the detach still go out
    drop(outbound);
    if timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
        tracing::debug!("client writer did not drain, aborting");
        writer_task.abort();
    }
    result
}

fn detach(client_id: String, outbound: &mpsc::UnboundedSender<String>) -> Inbound {
    Inbound::Detach {
        client_id,
        outbound: outbound.clone(),
    }
}

async fn forward(inbound: &mpsc::Sender<Inbound>, frame: Inbound) -> anyhow::Result<()> {
    inbound
        .send(frame)
        .await
        .map_err(|_| anyhow::anyhow!("coordinator stopped"))
}
