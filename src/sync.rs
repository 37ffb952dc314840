//! Blocking adapter over the async session surface.
//!
//! The retry algorithm is implemented once, against the async core; this
//! module runs it to completion on the calling thread using an owned tokio
//! runtime. Do not use these types from inside an async context.

use std::sync::Arc;

use futures::FutureExt;

use crate::cancellation::CancellationToken;
use crate::core::{DriverError, Result};
use crate::dispatch::CommandDispatcher;
use crate::session::handle::SessionHandle;
use crate::session::options::{ClientConfig, SessionOptions, TransactionOptions};
use crate::{Client, PoolStats};

/// Blocking counterpart of [`Client`].
pub struct BlockingClient {
    client: Client,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl BlockingClient {
    pub fn new(dispatcher: Arc<dyn CommandDispatcher>, config: ClientConfig) -> Result<Self> {
        Self::from_client(Client::new(dispatcher, config)?)
    }

    /// Wrap an existing async client
    pub fn from_client(client: Client) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| {
                DriverError::Configuration(format!("failed to start driver runtime: {err}"))
            })?;
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn start_session(&self, options: SessionOptions) -> Result<BlockingSessionHandle> {
        Ok(BlockingSessionHandle {
            handle: self.client.start_session(options)?,
            runtime: Arc::clone(&self.runtime),
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.client.pool_stats()
    }

    pub fn shutdown(&self) {
        self.runtime.block_on(self.client.shutdown());
    }
}

/// Blocking counterpart of [`SessionHandle`].
///
/// Synchronous operations pass straight through; suspending operations are
/// driven to completion on the calling thread.
pub struct BlockingSessionHandle {
    handle: SessionHandle,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl BlockingSessionHandle {
    /// Create another blocking handle aliasing the same logical session
    pub fn fork(&self) -> Result<BlockingSessionHandle> {
        Ok(BlockingSessionHandle {
            handle: self.handle.fork()?,
            runtime: Arc::clone(&self.runtime),
        })
    }

    /// The underlying async handle
    pub fn as_async(&mut self) -> &mut SessionHandle {
        &mut self.handle
    }

    pub fn release(&mut self) {
        self.handle.release();
    }

    pub fn start_transaction(&mut self, options: Option<TransactionOptions>) -> Result<()> {
        self.handle.start_transaction(options)
    }

    pub fn commit_transaction(&mut self, cancel: &CancellationToken) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.handle.commit_transaction(cancel))
    }

    pub fn abort_transaction(&mut self, cancel: &CancellationToken) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.handle.abort_transaction(cancel))
    }

    /// Blocking [`SessionHandle::with_transaction`] with a synchronous
    /// callback. The same callback contract applies: it may run more than
    /// once, and it must surface every error it observes.
    pub fn with_transaction<R, F>(
        &mut self,
        mut callback: F,
        options: Option<TransactionOptions>,
        cancel: &CancellationToken,
    ) -> Result<R>
    where
        F: FnMut(&mut SessionHandle, CancellationToken) -> Result<R> + Send,
        R: Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.handle.with_transaction(
            move |handle, token| {
                let result = callback(handle, token);
                futures::future::ready(result).boxed()
            },
            options,
            cancel,
        ))
    }
}

impl std::ops::Deref for BlockingSessionHandle {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
