//! Call Pipeline
//!
//! An ordered list of [`Interceptor`]s in front of a [`Transport`]. Each
//! interceptor receives a [`Next`] handle to the rest of the chain and may
//! invoke it zero or more times.
//!
//! ## Order
//!
//! Interceptors run in insertion order, outermost first. Clients build:
//!
//! ```text
//! logging -> mutation retry -> read retry -> error classification -> [proxy ban] -> transport
//! ```
//!
//! Streaming reads and writes go through the same chain; the retriers pass
//! them through untouched.

use async_trait::async_trait;
use std::sync::Arc;

use crate::call::{Call, CallResult};
use crate::context::Context;
use crate::error::{Error, Result};

// ============================================================================
// Streaming bodies
// ============================================================================

/// Consumer side of a streamed response body.
#[async_trait]
pub trait BodyReader: Send {
    /// Next chunk of the body, `None` at end of stream.
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Drain the rest of the body.
    async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Producer side of a streamed request body.
///
/// Dropping a writer without calling [`BodyWriter::finish`] aborts the
/// request.
#[async_trait]
pub trait BodyWriter: Send {
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Half-close the body and wait for the server's verdict.
    async fn finish(&mut self) -> Result<()>;
}

/// Reader over chunks that are already in memory.
#[derive(Debug, Default)]
pub struct BufferedReader {
    chunks: std::collections::VecDeque<Vec<u8>>,
}

impl BufferedReader {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        BufferedReader {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
        }
    }
}

#[async_trait]
impl BodyReader for BufferedReader {
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Innermost invoker: sends a call over the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn invoke(&self, ctx: &Context, call: &mut Call) -> Result<CallResult>;

    async fn invoke_read(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>>;

    async fn invoke_write(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyWriter>>;
}

/// One layer of the pipeline. Every method defaults to passing the call on.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
        next.invoke(ctx, call).await
    }

    async fn intercept_read(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyReader>> {
        next.invoke_read(ctx, call).await
    }

    async fn intercept_write(
        &self,
        ctx: &Context,
        call: &mut Call,
        next: Next<'_>,
    ) -> Result<Box<dyn BodyWriter>> {
        next.invoke_write(ctx, call).await
    }
}

/// The remainder of the chain below the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    fn split(self) -> Option<(&'a Arc<dyn Interceptor>, Next<'a>)> {
        self.interceptors.split_first().map(|(first, rest)| {
            (
                first,
                Next {
                    interceptors: rest,
                    transport: self.transport,
                },
            )
        })
    }

    pub async fn invoke(self, ctx: &Context, call: &mut Call) -> Result<CallResult> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        match self.split() {
            Some((first, rest)) => first.intercept(ctx, call, rest).await,
            None => self.transport.invoke(ctx, call).await,
        }
    }

    pub async fn invoke_read(self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        match self.split() {
            Some((first, rest)) => first.intercept_read(ctx, call, rest).await,
            None => self.transport.invoke_read(ctx, call).await,
        }
    }

    pub async fn invoke_write(self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyWriter>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        match self.split() {
            Some((first, rest)) => first.intercept_write(ctx, call, rest).await,
            None => self.transport.invoke_write(ctx, call).await,
        }
    }
}

/// Interceptors composed in front of a transport.
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("interceptors", &self.interceptor_names())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Pipeline {
            interceptors: Vec::new(),
            transport,
        }
    }

    /// Append an interceptor below the ones already added.
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    fn head(&self) -> Next<'_> {
        Next {
            interceptors: &self.interceptors,
            transport: self.transport.as_ref(),
        }
    }

    pub async fn invoke(&self, ctx: &Context, call: &mut Call) -> Result<CallResult> {
        self.head().invoke(ctx, call).await
    }

    pub async fn invoke_read(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyReader>> {
        self.head().invoke_read(ctx, call).await
    }

    pub async fn invoke_write(&self, ctx: &Context, call: &mut Call) -> Result<Box<dyn BodyWriter>> {
        self.head().invoke_write(ctx, call).await
    }
}

/// Map errors surfacing from a streamed body.
pub(crate) struct MapReaderErr<F> {
    pub(crate) inner: Box<dyn BodyReader>,
    pub(crate) map: F,
}

#[async_trait]
impl<F> BodyReader for MapReaderErr<F>
where
    F: Fn(Error) -> Error + Send,
{
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner.chunk().await.map_err(&self.map)
    }
}

pub(crate) struct MapWriterErr<F> {
    pub(crate) inner: Box<dyn BodyWriter>,
    pub(crate) map: F,
}

#[async_trait]
impl<F> BodyWriter for MapWriterErr<F>
where
    F: Fn(Error) -> Error + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write(data).await.map_err(&self.map)
    }

    async fn finish(&mut self) -> Result<()> {
        self.inner.finish().await.map_err(&self.map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Params, Verb};
    use parking_lot::Mutex;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn invoke(&self, _ctx: &Context, call: &mut Call) -> Result<CallResult> {
            Ok(CallResult::from_payload(call.verb.name().as_bytes().to_vec()))
        }

        async fn invoke_read(&self, _ctx: &Context, _call: &mut Call) -> Result<Box<dyn BodyReader>> {
            Ok(Box::new(BufferedReader::new(vec![b"a".to_vec(), Vec::new(), b"b".to_vec()])))
        }

        async fn invoke_write(&self, _ctx: &Context, _call: &mut Call) -> Result<Box<dyn BodyWriter>> {
            Err(Error::Protocol("read only".into()))
        }
    }

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn intercept(&self, ctx: &Context, call: &mut Call, next: Next<'_>) -> Result<CallResult> {
            self.seen.lock().push(self.name);
            next.invoke(ctx, call).await
        }
    }

    #[tokio::test]
    async fn test_interceptors_run_outermost_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(Echo))
            .with(Arc::new(Recorder {
                name: "outer",
                seen: Arc::clone(&seen),
            }))
            .with(Arc::new(Recorder {
                name: "inner",
                seen: Arc::clone(&seen),
            }));

        let mut call = Call::new(Verb::GetNode, Params::new());
        let res = pipeline.invoke(&Context::background(), &mut call).await.unwrap();
        assert_eq!(res.payload, b"get");
        assert_eq!(*seen.lock(), vec!["outer", "inner"]);
        assert_eq!(pipeline.interceptor_names(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_default_read_passes_through() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Arc::new(Echo)).with(Arc::new(Recorder { name: "r", seen }));
        let mut call = Call::new(Verb::ReadTable, Params::new());
        let mut reader = pipeline.invoke_read(&Context::background(), &mut call).await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), b"ab");
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let pipeline = Pipeline::new(Arc::new(Echo));
        let mut call = Call::new(Verb::GetNode, Params::new());
        let err = pipeline.invoke(&ctx, &mut call).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
