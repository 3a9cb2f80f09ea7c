pub mod budget;
pub mod normalize;
pub mod request;
pub mod vision;

pub use request::RequestOptions;

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::{AdapterConfig, ModelInfo};
use crate::error::AdapterError;
use crate::host::{ChatMessage, ImageCaptioner, ResponseSink};
use crate::stream::{SseFrame, SseFrameReader, TurnControl, TurnDispatcher};
use crate::transport::HttpTransport;

use vision::VisionRoute;

/// The chat-completion provider: one instance serves the host for the
/// lifetime of the session.
///
/// All per-request parser state lives in a fresh [`TurnDispatcher`] built
/// inside each `provide_response` call, so overlapping invocations on the
/// same provider never share mutable state.
pub struct ChatProvider {
    config: AdapterConfig,
    transport: HttpTransport,
    captioner: Option<Arc<dyn ImageCaptioner>>,
}

impl ChatProvider {
    /// Build a provider from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] when the HTTP client cannot be
    /// constructed from the configured API settings.
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let transport = HttpTransport::new(&config.api)?;
        Ok(Self {
            config,
            transport,
            captioner: None,
        })
    }

    /// Attach the external captioning collaborator for the vision fallback.
    #[must_use]
    pub fn with_captioner(mut self, captioner: Arc<dyn ImageCaptioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    /// Chat-information query: capability metadata for one model id.
    #[must_use]
    pub fn model_info(&self, model_id: &str) -> Option<ModelInfo> {
        self.config.model_info(model_id)
    }

    /// Models offered for user selection.
    #[must_use]
    pub fn available_models(&self) -> Vec<ModelInfo> {
        self.config.user_selectable_models()
    }

    /// Token-counting query over a raw string.
    #[must_use]
    pub fn count_text_tokens(&self, text: &str) -> u64 {
        budget::estimate_text_tokens(text)
    }

    /// Token-counting query over a single message.
    #[must_use]
    pub fn count_message_tokens(&self, message: &ChatMessage) -> u64 {
        budget::estimate_message_tokens(message)
    }

    /// Run one full request/response cycle, pushing output events to the
    /// host's progress sink. Returning `Ok` is the end-of-turn signal.
    ///
    /// # Errors
    ///
    /// Validation errors surface before any network call; upstream HTTP
    /// failures arrive categorized; mid-stream protocol violations abort the
    /// turn (text already streamed is not retracted); cancellation surfaces
    /// as [`AdapterError::Cancelled`].
    pub async fn provide_response(
        &self,
        model_id: &str,
        mut messages: Vec<ChatMessage>,
        options: RequestOptions,
        sink: &mut dyn ResponseSink,
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4();

        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }

        let requested = self.config.model_info(model_id).ok_or_else(|| {
            AdapterError::InvalidRequest(format!("unknown model id '{model_id}'"))
        })?;

        // The reroute decision is pure; only captioning costs network, and
        // that runs after the budget check below.
        let route = vision::resolve_route(
            &messages,
            &requested,
            &self.config,
            self.captioner.is_some(),
        )?;
        let model = match &route {
            VisionRoute::PassThrough | VisionRoute::NeedsCaptions => requested,
            VisionRoute::Reroute(id) => self
                .config
                .model_info(id)
                .ok_or_else(|| {
                    AdapterError::InvalidRequest(format!("vision fallback model '{id}' unknown"))
                })?,
        };

        budget::validate_request(&messages, &options.tools, &model)?;

        if route == VisionRoute::NeedsCaptions {
            // resolve_route only chooses this path when a captioner exists.
            if let Some(captioner) = self.captioner.as_deref() {
                vision::caption_images(&mut messages, captioner, cancel).await?;
            }
        }

        let wire_messages = normalize::normalize_messages(&messages);
        let body = request::build_request(
            &model,
            wire_messages,
            &options,
            self.config.show_reasoning,
            self.config.default_max_output_tokens,
        );

        let estimated_input = budget::estimate_messages_tokens(&messages)
            + budget::estimate_tool_tokens(&options.tools);
        tracing::debug!(
            %request_id,
            model = %model.id,
            message_count = messages.len(),
            tool_count = options.tools.len(),
            estimated_input,
            "sending chat completion request"
        );

        let byte_stream = tokio::select! {
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            result = self.transport.post_chat_completions(&body) => result?,
        };
        futures_util::pin_mut!(byte_stream);

        let mut reader = SseFrameReader::new();
        let mut dispatcher = TurnDispatcher::new(self.config.show_reasoning);
        let mut frames: Vec<SseFrame> = Vec::with_capacity(8);

        'turn: loop {
            let next = tokio::select! {
                () = cancel.cancelled() => return Err(AdapterError::Cancelled),
                chunk = byte_stream.next() => chunk,
            };
            match next {
                Some(Ok(bytes)) => {
                    frames.clear();
                    reader.feed_bytes(&bytes, &mut frames);
                    for frame in &frames {
                        if dispatcher.handle_frame(frame, sink)? == TurnControl::Done {
                            break 'turn;
                        }
                    }
                }
                Some(Err(e)) => {
                    return Err(AdapterError::Transport(format!("stream read failed: {e}")));
                }
                None => {
                    dispatcher.finish(sink);
                    break 'turn;
                }
            }
        }

        let usage = dispatcher.usage();
        let (input_tokens, output_tokens) = match usage {
            Some(u) if u.total_tokens > 0 => (u.prompt_tokens, u.completion_tokens),
            _ => (estimated_input, 0),
        };
        tracing::info!(
            %request_id,
            model = %model.id,
            input_tokens,
            output_tokens,
            duration_seconds = started.elapsed().as_secs_f64(),
            "turn completed"
        );
        Ok(())
    }
}
