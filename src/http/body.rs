//! Streamed HTTP bodies.

use async_trait::async_trait;
use std::io;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pipeline::{BodyReader, BodyWriter};

/// Chunks buffered between a [`HttpWriter`] and the request body.
pub(super) const WRITE_QUEUE_DEPTH: usize = 4;

pub(super) type BodyChunk = std::result::Result<Vec<u8>, io::Error>;

/// Response body read chunk by chunk under the call context.
pub(super) struct HttpReader {
    rsp: reqwest::Response,
    ctx: Context,
}

impl HttpReader {
    pub(super) fn new(rsp: reqwest::Response, ctx: Context) -> Self {
        HttpReader { rsp, ctx }
    }
}

#[async_trait]
impl BodyReader for HttpReader {
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let rsp = &mut self.rsp;
        self.ctx
            .run(async { Ok(rsp.chunk().await?.map(|chunk| chunk.to_vec())) })
            .await
    }
}

/// Request body fed through a bounded channel while the request runs in a
/// background task.
pub(super) struct HttpWriter {
    tx: Option<mpsc::Sender<BodyChunk>>,
    request: Option<JoinHandle<Result<()>>>,
    ctx: Context,
}

impl HttpWriter {
    pub(super) fn new(tx: mpsc::Sender<BodyChunk>, request: JoinHandle<Result<()>>, ctx: Context) -> Self {
        HttpWriter {
            tx: Some(tx),
            request: Some(request),
            ctx,
        }
    }

    /// Outcome of the request task.
    async fn verdict(&mut self) -> Result<()> {
        let request = self
            .request
            .take()
            .ok_or_else(|| Error::Protocol("writer is already finished".to_string()))?;
        match request.await {
            Ok(res) => res,
            Err(err) => Err(Error::Protocol(format!("request task failed: {err}"))),
        }
    }

    /// Fail the body stream so the server never sees a complete request,
    /// then stop the request task.
    fn abort(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(Err(io::Error::new(io::ErrorKind::Interrupted, "body write aborted")));
        }
        if let Some(request) = self.request.take() {
            request.abort();
        }
    }
}

#[async_trait]
impl BodyWriter for HttpWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let Some(tx) = self.tx.clone() else {
            return Err(Error::Protocol("write after finish".to_string()));
        };

        let sent = self
            .ctx
            .run(async { Ok(tx.send(Ok(data.to_vec())).await.is_ok()) })
            .await;
        match sent {
            Ok(true) => Ok(()),
            // The request ended before consuming the body; report why.
            Ok(false) => {
                self.tx = None;
                match self.verdict().await {
                    Ok(()) => Err(Error::Protocol("request completed before the body was written".to_string())),
                    Err(err) => Err(err),
                }
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    async fn finish(&mut self) -> Result<()> {
        // Dropping the sender ends the body stream.
        self.tx = None;
        self.verdict().await
    }
}

impl Drop for HttpWriter {
    fn drop(&mut self) {
        self.abort();
    }
}
