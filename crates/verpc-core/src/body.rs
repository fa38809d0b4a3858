//! Request bodies.
//!
//! A [`Body`] is either bytes already in memory or a stream of chunks still
//! arriving from the transport. Reading is single-pass: [`Body::collect`]
//! drains it, and middleware that needs to look at the bytes hands a fresh
//! `Body::from(bytes)` downstream.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use tokio_stream::{Stream, StreamExt};

use crate::error::{codes, RpcError};

type ChunkStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

pub struct Body {
    /// Bytes read ahead of the stream (or the whole body when buffered).
    head: Bytes,
    stream: Option<ChunkStream>,
    limit: Option<usize>,
}

impl Body {
    pub fn empty() -> Self {
        Self {
            head: Bytes::new(),
            stream: None,
            limit: None,
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            head: Bytes::new(),
            stream: Some(Box::pin(stream)),
            limit: None,
        }
    }

    /// Cap the number of bytes [`collect`](Self::collect) will accept.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether at least one byte is available, without consuming it.
    pub async fn has_content(&mut self) -> Result<bool, RpcError> {
        while self.head.is_empty() {
            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return Ok(false),
            };
            match next {
                Some(chunk) => self.head = chunk.map_err(RpcError::from)?,
                None => {
                    self.stream = None;
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Read the remaining body to the end.
    pub async fn collect(&mut self) -> Result<Bytes, RpcError> {
        let head = std::mem::take(&mut self.head);
        self.check_limit(head.len())?;
        let Some(mut stream) = self.stream.take() else {
            return Ok(head);
        };

        let mut buf = BytesMut::from(&head[..]);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(RpcError::from)?;
            self.check_limit(buf.len() + chunk.len())?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    fn check_limit(&self, size: usize) -> Result<(), RpcError> {
        match self.limit {
            Some(limit) if size > limit => {
                Err(RpcError::new(codes::REQUEST_TOO_LARGE).with_meta("limit", limit))
            }
            _ => Ok(()),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            head: bytes,
            stream: None,
            limit: None,
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from(Bytes::from(s))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("buffered", &self.head.len())
            .field("streaming", &self.stream.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}
