//! Handler served by `wsreq serve`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;
use wsreq_server::{HandlerError, RequestContext, RequestHandler};

/// Demonstrates every part of the protocol, chosen by payload:
///
/// - `{"confirm": q}` asks the client `["confirm", q]` and returns
///   `{"confirmed": <bool>}`
/// - `{"prompt": q}` asks the client `["prompt", q]` and returns
///   `{"answer": <value>}`
/// - `{"fail": m}` fails with `m`
/// - anything else is echoed back
pub struct DemoHandler;

#[async_trait]
impl RequestHandler for DemoHandler {
    async fn handle(&self, request: RequestContext) -> Result<Value, HandlerError> {
        info!(connection_id = %request.peer.id, "demo request");
        let data = &request.data;

        if let Some(question) = data.get("confirm") {
            let answer = request
                .callback
                .call(json!(["confirm", question]))
                .await?;
            let confirmed = answer.as_bool().ok_or_else(|| {
                HandlerError::with_code(
                    "INVALID_ANSWER",
                    format!("confirm expects a boolean answer, got {answer}"),
                )
            })?;
            return Ok(json!({ "confirmed": confirmed }));
        }

        if let Some(question) = data.get("prompt") {
            let answer = request.callback.call(json!(["prompt", question])).await?;
            return Ok(json!({ "answer": answer }));
        }

        if let Some(message) = data.get("fail") {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            return Err(HandlerError::msg(message));
        }

        Ok(request.data)
    }
}
