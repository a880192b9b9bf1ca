use async_trait::async_trait;

use crate::error::ConversationError;
use crate::models::{MessageRequest, Response, StartRequest};

/// Black-box collaborator: consumes a `StartRequest`/`MessageRequest` and
/// returns a `Response`. LLM prompt construction, RAG retrieval, and
/// qualification heuristics live behind this trait, entirely outside
/// this crate — the worker only needs the contract.
#[async_trait]
pub trait ConversationProcessor: Send + Sync {
    async fn start_conversation(&self, request: StartRequest) -> Result<Response, ConversationError>;
    async fn process_message(&self, request: MessageRequest) -> Result<Response, ConversationError>;
}
