use std::io;
use std::path::Path;

use futures::StreamExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::ipc::protocol::{self, Reply, Request};
use crate::scheduler::SchedulerEvent;

/// Accept loop for the daemon's Unix socket.
///
/// Each connection gets a reader task (this function's body) and a writer
/// task draining that connection's reply channel, so replies from the
/// scheduler and from runners share one ordered sink per client.
pub struct IpcServer {
    listener: UnixListener,
    events: mpsc::Sender<SchedulerEvent>,
}

impl IpcServer {
    /// Bind the socket, unlinking a stale one left by a previous run.
    pub fn bind(path: &Path, events: mpsc::Sender<SchedulerEvent>) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(socket = %path.display(), "removed stale socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let listener = UnixListener::bind(path)?;
        tracing::info!(socket = %path.display(), "listening");
        Ok(Self { listener, events })
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut next_conn_id: u64 = 0;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        next_conn_id += 1;
                        tokio::spawn(handle_connection(
                            next_conn_id,
                            stream,
                            self.events.clone(),
                        ));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                },
            }
        }
        tracing::debug!("accept loop stopped");
    }
}

async fn handle_connection(
    conn_id: u64,
    stream: UnixStream,
    events: mpsc::Sender<SchedulerEvent>,
) {
    tracing::debug!(conn_id, "client connected");
    let (mut sink, mut stream) = protocol::framed(stream).split();
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<Reply>();

    // Writer: the only task touching this connection's sink, so replies
    // stay in the order they were produced.
    let writer = tokio::spawn(async move {
        while let Some(reply) = replies_rx.recv().await {
            if protocol::send_frame(&mut sink, &reply).await.is_err() {
                break;
            }
        }
    });

    loop {
        match protocol::recv_frame::<_, Request>(&mut stream).await {
            Ok(Some(request)) => {
                let event = match request {
                    Request::Submit(submission) => SchedulerEvent::Submit {
                        submission,
                        conn_id,
                        replies: replies_tx.clone(),
                    },
                    Request::Status => SchedulerEvent::Status { replies: replies_tx.clone() },
                    Request::Cancel { job_id } => SchedulerEvent::Cancel {
                        job_id,
                        replies: replies_tx.clone(),
                    },
                    Request::Shutdown => {
                        let _ = replies_tx.send(Reply::ShuttingDown);
                        SchedulerEvent::Shutdown
                    }
                };
                if events.send(event).await.is_err() {
                    // Scheduler already drained and exited.
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(conn_id, error = %err, "malformed frame, dropping connection");
                break;
            }
        }
    }

    // Hanging up is an implicit cancel for this connection's jobs.
    let _ = events.send(SchedulerEvent::Disconnected { conn_id }).await;
    tracing::debug!(conn_id, "client disconnected");

    // The writer ends once every reply sink clone held by job records has
    // been dropped.
    drop(replies_tx);
    let _ = writer.await;
}
