//! The single contract every agent adapter implements.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tessera_core::{Message, Response};

use crate::error::AgentResult;

/// Handles one dispatched message.
///
/// The router awaits the call, so an implementation may do as much async
/// work as it needs. Returning `Err` (or panicking) is reported to the
/// caller as `AGENT_COMMUNICATION_ERROR` and flips the agent to `error`.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn handle_message(&self, message: &Message) -> AgentResult<Response>;
}

/// Adapter turning an async closure into an [`AgentExecutor`].
///
/// ```rust
/// use tessera_agent::FnExecutor;
/// use tessera_core::Response;
///
/// let echo = FnExecutor::new(|message| async move {
///     Ok(Response::success(&message.message_id, message.content.clone()))
/// });
/// # let _ = echo;
/// ```
pub struct FnExecutor<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Response>> + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> AgentExecutor for FnExecutor<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Response>> + Send,
{
    async fn handle_message(&self, message: &Message) -> AgentResult<Response> {
        (self.func)(message.clone()).await
    }
}
