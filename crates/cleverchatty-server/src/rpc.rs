//! A2A JSON-RPC endpoint: message/send, message/stream, tasks/get.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cleverchatty_agent::EngineEvent;
use cleverchatty_protocol::a2a::{
    codes, A2aMessage, MessageSendParams, Part, Task, TaskState, TaskStatusUpdateEvent,
    METHOD_GET_TASK, METHOD_SEND_MESSAGE, METHOD_STREAM_MESSAGE, SUBSCRIBE_NOTIFICATIONS,
};
use cleverchatty_protocol::jsonrpc::{RpcRequest, RpcResponse, METHOD_NOT_FOUND, PARSE_ERROR};

use crate::app::AppState;
use crate::stream::SUBSCRIBER_BUFFER;

const QUIT_COMMANDS: [&str; 3] = ["/quit", "/exit", "/bye"];

/// POST / — one JSON-RPC request per call.
pub async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RpcRequest>,
) -> Response {
    let id = req.id.clone().unwrap_or(Value::Null);
    match req.method.as_str() {
        METHOD_SEND_MESSAGE => handle_send(state, id, req.params).await.into_response(),
        METHOD_STREAM_MESSAGE => handle_stream(state, id, req.params).await,
        METHOD_GET_TASK => handle_get_task(state, id, req.params).into_response(),
        other => Json(RpcResponse::err(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ))
        .into_response(),
    }
}

struct Inbound {
    text: String,
    context_id: String,
    client_agent_id: Option<String>,
}

fn parse_inbound(
    state: &AppState,
    params: Option<Value>,
) -> Result<Inbound, String> {
    let params: MessageSendParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| format!("invalid message params: {e}"))?;

    let client_agent_id = params
        .message
        .metadata
        .as_ref()
        .and_then(|m| m.get("agent_id"))
        .and_then(|v| v.as_str())
        .map(String::from);

    if state.config.a2a_settings.agent_id_required && client_agent_id.is_none() {
        return Err("agent_id metadata is required".to_string());
    }

    let context_id = params
        .message
        .context_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(Inbound {
        text: params.message.text(),
        context_id,
        client_agent_id,
    })
}

fn reply_message(context_id: &str, text: &str) -> Value {
    let msg = A2aMessage::agent_text(vec![Part::text(text)], Some(context_id.to_string()), None);
    let mut value = serde_json::to_value(&msg).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("kind".to_string(), Value::String("message".to_string()));
    }
    value
}

async fn handle_send(state: Arc<AppState>, id: Value, params: Option<Value>) -> Json<RpcResponse> {
    let inbound = match parse_inbound(&state, params) {
        Ok(i) => i,
        Err(e) => return Json(RpcResponse::err(id, PARSE_ERROR, e)),
    };

    if inbound.text == "/hello" {
        return Json(RpcResponse::ok(id, reply_message(&inbound.context_id, "hello!")));
    }
    if QUIT_COMMANDS.contains(&inbound.text.as_str()) {
        state.sessions.finish(&inbound.context_id).await;
        return Json(RpcResponse::ok(id, reply_message(&inbound.context_id, "Bye!")));
    }
    if inbound.text == SUBSCRIBE_NOTIFICATIONS {
        return Json(RpcResponse::err(
            id,
            PARSE_ERROR,
            "notification subscription requires message/stream",
        ));
    }

    let session = match state
        .sessions
        .get_or_create(&inbound.context_id, inbound.client_agent_id.clone())
        .await
    {
        Ok(s) => s,
        Err(e) => return Json(RpcResponse::err(id, -32000, e.to_string())),
    };

    match session.engine.prompt(&inbound.text).await {
        Ok(response) => Json(RpcResponse::ok(
            id,
            reply_message(&inbound.context_id, &response),
        )),
        Err(e) => {
            warn!(context_id = %inbound.context_id, error = %e, "prompt failed");
            Json(RpcResponse::err(id, -32000, e.to_string()))
        }
    }
}

async fn handle_stream(state: Arc<AppState>, id: Value, params: Option<Value>) -> Response {
    let inbound = match parse_inbound(&state, params) {
        Ok(i) => i,
        Err(e) => return Json(RpcResponse::err(id, PARSE_ERROR, e)).into_response(),
    };

    let (tx, rx) = mpsc::channel::<TaskStatusUpdateEvent>(SUBSCRIBER_BUFFER);
    let task = Task::new(&inbound.context_id, TaskState::Working);

    if inbound.text == SUBSCRIBE_NOTIFICATIONS {
        // Persistent subscription: confirm, keep alive, never complete.
        state
            .subscribers
            .subscribe(&inbound.context_id, &task.id, tx.clone());
        let confirm = TaskStatusUpdateEvent::working(
            &task.id,
            &inbound.context_id,
            vec![
                Part::text(codes::NOTIFICATION_SUBSCRIBED),
                Part::text("notification subscription active"),
            ],
        );
        let _ = tx.try_send(confirm);
        info!(context_id = %inbound.context_id, "notification subscription opened");
        return sse_response(id, task, rx);
    }

    // Chat turn: run the prompt on a worker, relaying engine callbacks
    // as Working status updates until the terminal event.
    let worker_state = Arc::clone(&state);
    let task_clone = task.clone();
    let worker_tx = tx.clone();
    tokio::spawn(async move {
        run_streaming_prompt(worker_state, inbound, task_clone, worker_tx).await;
    });

    sse_response(id, task, rx)
}

async fn run_streaming_prompt(
    state: Arc<AppState>,
    inbound: Inbound,
    task: Task,
    tx: mpsc::Sender<TaskStatusUpdateEvent>,
) {
    let context_id = inbound.context_id.clone();

    // Commands resolve without a session round-trip.
    let command_reply = if inbound.text == "/hello" {
        Some("hello!".to_string())
    } else if QUIT_COMMANDS.contains(&inbound.text.as_str()) {
        state.sessions.finish(&context_id).await;
        Some("Bye!".to_string())
    } else {
        None
    };
    if let Some(reply) = command_reply {
        let event =
            TaskStatusUpdateEvent::terminal(&task.id, &context_id, TaskState::Completed, Some(reply));
        store_terminal(&state, &task, &event);
        let _ = tx.send(event).await;
        return;
    }

    let session = match state
        .sessions
        .get_or_create(&context_id, inbound.client_agent_id.clone())
        .await
    {
        Ok(s) => s,
        Err(e) => {
            let event = TaskStatusUpdateEvent::terminal(
                &task.id,
                &context_id,
                TaskState::Failed,
                Some(e.to_string()),
            );
            store_terminal(&state, &task, &event);
            let _ = tx.send(event).await;
            return;
        }
    };

    // Rebind the engine's callback to this stream.
    let cb_tx = tx.clone();
    let cb_task_id = task.id.clone();
    let cb_context_id = context_id.clone();
    session
        .engine
        .set_callback(Arc::new(move |event: EngineEvent| {
            let (code, message, extra) = event.parts();
            let update = TaskStatusUpdateEvent::working(
                &cb_task_id,
                &cb_context_id,
                vec![Part::text(code), Part::text(message), Part::text(extra)],
            );
            let _ = cb_tx.try_send(update);
        }));

    let event = match session.engine.prompt(&inbound.text).await {
        Ok(response) => {
            TaskStatusUpdateEvent::terminal(&task.id, &context_id, TaskState::Completed, Some(response))
        }
        Err(e) => {
            warn!(context_id = %context_id, error = %e, "streaming prompt failed");
            TaskStatusUpdateEvent::terminal(
                &task.id,
                &context_id,
                TaskState::Failed,
                Some(e.to_string()),
            )
        }
    };
    store_terminal(&state, &task, &event);
    let _ = tx.send(event).await;
}

fn store_terminal(state: &AppState, task: &Task, event: &TaskStatusUpdateEvent) {
    let mut stored = task.clone();
    stored.status = event.status.clone();
    state.tasks.insert(task.id.clone(), stored);
}

/// Wrap the event channel as an SSE body. Every data line is a JSON-RPC
/// response carrying either the initial task or a status-update event.
fn sse_response(
    id: Value,
    task: Task,
    mut rx: mpsc::Receiver<TaskStatusUpdateEvent>,
) -> Response {
    let stream = async_stream::stream! {
        let first = RpcResponse::ok(id.clone(), serde_json::to_value(&task).unwrap_or(Value::Null));
        yield Ok::<_, std::convert::Infallible>(
            Event::default().data(serde_json::to_string(&first).unwrap_or_default()),
        );

        while let Some(event) = rx.recv().await {
            let is_final = event.is_final;
            let res = RpcResponse::ok(
                id.clone(),
                serde_json::to_value(&event).unwrap_or(Value::Null),
            );
            yield Ok(Event::default().data(serde_json::to_string(&res).unwrap_or_default()));
            if is_final {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn handle_get_task(state: Arc<AppState>, id: Value, params: Option<Value>) -> Json<RpcResponse> {
    let task_id = params
        .as_ref()
        .and_then(|p| p.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match state.tasks.get(task_id) {
        Some(task) => Json(RpcResponse::ok(
            id,
            serde_json::to_value(task.value()).unwrap_or(Value::Null),
        )),
        None => Json(RpcResponse::err(id, -32001, format!("unknown task: {task_id}"))),
    }
}
