use std::path::Path;

use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{Result, SdstoreError};
use crate::ipc::protocol::{self, Reply, Request, StatusSnapshot};
use crate::scheduler::{JobId, JobSubmission};

/// Client side of the daemon's framed Unix-socket protocol.
///
/// One connection carries one conversation: a submission followed by its
/// progress and terminal replies, or a single status/cancel exchange.
pub struct DaemonClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl DaemonClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|source| SdstoreError::Connect {
                path: socket_path.to_path_buf(),
                source,
            })?;
        Ok(Self { framed: protocol::framed(stream) })
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        protocol::send_frame(&mut self.framed, request).await
    }

    /// Next reply frame; `None` once the daemon closes the connection.
    pub async fn next_reply(&mut self) -> Result<Option<Reply>> {
        protocol::recv_frame(&mut self.framed).await
    }

    pub async fn submit(&mut self, submission: JobSubmission) -> Result<()> {
        self.send(&Request::Submit(submission)).await
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot> {
        self.send(&Request::Status).await?;
        loop {
            match self.next_reply().await? {
                Some(Reply::Status(snapshot)) => return Ok(snapshot),
                Some(_) => continue,
                None => return Err(SdstoreError::ConnectionClosed),
            }
        }
    }

    /// Returns `CancelAck` or `NotCancellable`.
    pub async fn cancel(&mut self, job_id: JobId) -> Result<Reply> {
        self.send(&Request::Cancel { job_id }).await?;
        loop {
            match self.next_reply().await? {
                Some(reply @ (Reply::CancelAck { .. } | Reply::NotCancellable { .. })) => {
                    return Ok(reply)
                }
                Some(_) => continue,
                None => return Err(SdstoreError::ConnectionClosed),
            }
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.send(&Request::Shutdown).await?;
        match self.next_reply().await? {
            Some(Reply::ShuttingDown) | None => Ok(()),
            Some(other) => Err(SdstoreError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}
