use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::Response,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{StudioError, SystemError},
    rollout::{self, StepRecord, driver::RolloutOptions},
    service::{
        AppContext,
        routes::{RolloutRequest, resolve_model, validate_max_steps},
    },
    sim::TerminationReason,
};

/// Close code sent when the producer dies mid-stream.
const INTERNAL_ERROR_CLOSE: u16 = 1011;

/// Queue depth between the rollout producer and the socket consumer.
const STREAM_QUEUE_DEPTH: usize = 64;

/// Frames written to a streaming-rollout socket: one `step` frame per tick,
/// then a single `summary` frame.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum StreamFrame<'a> {
    Step {
        #[serde(flatten)]
        record: &'a StepRecord,
    },
    #[serde(rename_all = "camelCase")]
    Summary {
        total_reward: f64,
        episode_length: u32,
        success: bool,
        termination_reason: Option<&'a TerminationReason>,
    },
}

/// Upgrades to a WebSocket that streams one rollout: the client sends a
/// rollout request as its first text message, then receives ordered step
/// frames terminated by a summary frame.
pub async fn stream_rollout(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<AppContext>) {
    let request = match read_request(&mut socket).await {
        Some(request) => request,
        None => return,
    };

    if let Err(e) = validate_max_steps(request.max_steps) {
        send_error_and_close(&mut socket, e.0).await;
        return;
    }
    let env = match ctx.compiled_env(&request.env_spec) {
        Ok(env) => env,
        Err(e) => {
            send_error_and_close(&mut socket, e).await;
            return;
        }
    };
    let model = match resolve_model(&ctx, &request).await {
        Ok(model) => model,
        Err(e) => {
            send_error_and_close(&mut socket, e.0).await;
            return;
        }
    };

    let factory = ctx.policy_factory(request.policy, model);
    let seed = request.seed.unwrap_or_else(|| rand::random());
    let opts = RolloutOptions::default().with_max_steps(request.max_steps);

    // One producer feeding a bounded queue, one consumer on the socket.
    // Cancellation flows both ways: a dead consumer trips the token, a
    // finished producer closes the queue.
    let (tx, rx) = async_channel::bounded::<StepRecord>(STREAM_QUEUE_DEPTH);
    let cancel = CancellationToken::new();
    let producer_cancel = cancel.clone();

    let producer = tokio::task::spawn_blocking(move || {
        let mut policy = factory(seed)?;
        let mut on_step = |record: &StepRecord| -> crate::error::StudioResult<()> {
            if tx.send_blocking(record.clone()).is_err() {
                // Consumer went away; stop at the next step boundary.
                producer_cancel.cancel();
            }
            Ok(())
        };
        Ok::<_, StudioError>(rollout::run_rollout(
            &env,
            policy.as_mut(),
            &opts,
            &producer_cancel,
            Some(&mut on_step),
        ))
    });

    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Ok(record) => {
                    let frame = StreamFrame::Step { record: &record };
                    if send_json(&mut socket, &frame).await.is_err() {
                        cancel.cancel();
                        break;
                    }
                }
                // Producer finished and dropped the sender.
                Err(_) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("stream consumer disconnected; cancelling rollout");
                    cancel.cancel();
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    match producer.await {
        Ok(Ok(result)) => {
            // Drain anything buffered after the consumer loop exited.
            while let Ok(record) = rx.try_recv() {
                let frame = StreamFrame::Step { record: &record };
                if send_json(&mut socket, &frame).await.is_err() {
                    return;
                }
            }
            let summary = StreamFrame::Summary {
                total_reward: result.total_reward,
                episode_length: result.episode_length,
                success: result.success,
                termination_reason: result.termination_reason.as_ref(),
            };
            let _ = send_json(&mut socket, &summary).await;
            let _ = socket.send(Message::Close(None)).await;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "stream producer failed");
            close_internal(&mut socket).await;
        }
        Err(e) => {
            warn!(error = %e, "stream producer panicked");
            close_internal(&mut socket).await;
        }
    }
}

async fn read_request(socket: &mut WebSocket) -> Option<RolloutRequest> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                Ok(request) => return Some(request),
                Err(e) => {
                    let err: StudioError =
                        crate::error::SpecError::validation("request", e.to_string()).into();
                    send_error_and_close(socket, err).await;
                    return None;
                }
            },
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => {}
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), StudioError> {
    let text = serde_json::to_string(value)
        .map_err(|e| SystemError::Generic(format!("encode frame: {e}")))?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| SystemError::Generic(format!("socket send: {e}")))?;
    Ok(())
}

async fn send_error_and_close(socket: &mut WebSocket, error: StudioError) {
    let body = serde_json::json!({
        "type": "error",
        "code": error.code(),
        "message": error.to_string(),
    });
    if let Ok(text) = serde_json::to_string(&body) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn close_internal(socket: &mut WebSocket) {
    let frame = CloseFrame {
        code: INTERNAL_ERROR_CLOSE,
        reason: "internal server error".into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
