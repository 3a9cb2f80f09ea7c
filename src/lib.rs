pub mod config;
pub mod error;
pub mod host;
pub mod protocol;
pub mod provider;
pub mod stream;
pub mod transport;

mod util;

pub use config::{AdapterConfig, ModelInfo};
pub use error::AdapterError;
pub use host::{
    ChatMessage, ContentPart, ImageCaptioner, OutputEvent, ResponseSink, Role, ToolCall,
    ToolDefinition,
};
pub use provider::{ChatProvider, RequestOptions};
