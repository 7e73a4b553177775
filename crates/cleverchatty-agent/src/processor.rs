//! Notification processor: a queued subagent that triages server pushes.
//!
//! Monitored notifications enter a bounded FIFO queue; a single worker
//! drains it, composing one prompt per notification from the user's
//! instructions plus the serialised notification. The subagent may call
//! its `notification_feedback` tool, which surfaces an agent message to
//! whoever registered the callback.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cleverchatty_core::types::{Notification, ProcessingStatus, Tool, ToolSchema};

use crate::engine::ConversationEngine;
use crate::error::Result;

/// Queue capacity; enqueue never blocks, overflow drops with a log line.
const QUEUE_CAPACITY: usize = 100;

const FEEDBACK_TOOL: &str = "notification_feedback";

const PROCESSOR_INSTRUCTION: &str = "You are a notification triage assistant. \
You receive notifications pushed by tool servers together with the user's \
monitoring instructions. Decide whether each notification matters according \
to those instructions. When the user should be told, call the \
notification_feedback tool with a short message; otherwise reply with a \
brief reason for staying silent.";

struct QueueItem {
    notification: Notification,
    instructions: Vec<String>,
}

pub struct NotificationProcessor {
    tx: StdMutex<Option<mpsc::Sender<QueueItem>>>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    agent: Arc<ConversationEngine>,
}

impl NotificationProcessor {
    /// Spawn the processor subagent off `parent` and start the worker.
    pub async fn start(parent: &Arc<ConversationEngine>) -> Result<Arc<Self>> {
        let agent = parent
            .spawn_subagent("notification-processor", PROCESSOR_INSTRUCTION)
            .await?;

        // The feedback tool fires the parent's agent-message callback.
        let slot = parent.agent_message_slot();
        agent.set_tool(
            Tool {
                name: FEEDBACK_TOOL.to_string(),
                description: "Deliver a short alert message to the user about a \
                              notification that matters to them."
                    .to_string(),
                input_schema: feedback_schema(),
            },
            Arc::new(move |args| {
                let message = args
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if message.is_empty() {
                    return Err("missing required parameter: message".to_string());
                }
                let cb = slot.read().unwrap().clone();
                if let Some(cb) = cb {
                    cb(message);
                }
                Ok("feedback delivered".to_string())
            }),
        );

        let (tx, mut rx) = mpsc::channel::<QueueItem>(QUEUE_CAPACITY);

        let worker_agent = Arc::clone(&agent);
        let worker = tokio::spawn(async move {
            while let Some(mut item) = rx.recv().await {
                item.notification.processing_status = ProcessingStatus::Processing;
                let prompt = match compose_prompt(&item) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "notification serialisation failed");
                        continue;
                    }
                };
                match worker_agent.prompt(&prompt).await {
                    Ok(response) => {
                        item.notification.processing_status = ProcessingStatus::Processed;
                        info!(
                            server = %item.notification.server,
                            method = %item.notification.method,
                            response = %response,
                            "notification processed"
                        );
                    }
                    Err(e) => {
                        item.notification.processing_status = ProcessingStatus::Failed;
                        error!(
                            server = %item.notification.server,
                            method = %item.notification.method,
                            error = %e,
                            "notification processing failed"
                        );
                    }
                }
            }
            info!("notification queue drained");
        });

        Ok(Arc::new(Self {
            tx: StdMutex::new(Some(tx)),
            worker: StdMutex::new(Some(worker)),
            agent,
        }))
    }

    /// Non-blocking enqueue; a full queue drops the notification.
    pub fn enqueue(&self, notification: Notification, instructions: Vec<String>) {
        let guard = self.tx.lock().unwrap();
        let Some(tx) = guard.as_ref() else {
            warn!("processor stopped, notification dropped");
            return;
        };
        if tx
            .try_send(QueueItem {
                notification,
                instructions,
            })
            .is_err()
        {
            warn!("notification queue full, dropping notification");
        }
    }

    /// Close the queue, wait for the drain, finish the subagent.
    /// Safe to call more than once.
    pub async fn stop(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);

        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "notification worker join failed");
            }
        }
        self.agent.finish().await;
    }
}

fn compose_prompt(item: &QueueItem) -> std::result::Result<String, serde_json::Error> {
    let serialised = serde_json::to_string(&item.notification)?;
    Ok(format!(
        "Instructions from the user:\n{}\n\nNotification content:\n{}",
        item.instructions.join("\n"),
        serialised
    ))
}

fn feedback_schema() -> ToolSchema {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "message".to_string(),
        serde_json::json!({
            "type": "string",
            "description": "The message to show the user",
        }),
    );
    ToolSchema {
        schema_type: "object".to_string(),
        properties,
        required: vec!["message".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use cleverchatty_core::config::*;
    use cleverchatty_core::types::MonitoringStatus;

    use super::*;

    fn config_with_monitored_server() -> CleverChattyConfig {
        let mut instructions = HashMap::new();
        instructions.insert(
            "notifications/new_email".to_string(),
            vec!["Tell me if urgent".to_string()],
        );
        let mut tools_servers = HashMap::new();
        tools_servers.insert(
            "email".to_string(),
            ToolServerConfig {
                transport: TransportKind::Internal,
                command: None,
                args: Vec::new(),
                env: HashMap::new(),
                url: None,
                headers: HashMap::new(),
                auth_token: None,
                interface: ServerInterface::None,
                disabled: false,
                required: false,
                notification_instructions: instructions,
                a2a_metadata: HashMap::new(),
            },
        );
        CleverChattyConfig {
            agent_id: "tester".to_string(),
            model: "mock:mock".to_string(),
            system_instruction: String::new(),
            message_window: 10,
            log_file_path: String::new(),
            debug_mode: false,
            providers: ProvidersConfig::default(),
            server: ServerSettings::default(),
            rag_settings: RagSettings::default(),
            a2a_settings: A2aSettings::default(),
            reverse_mcp_settings: ReverseMcpSettings::default(),
            tools_servers,
        }
    }

    fn monitored_notification() -> Notification {
        let mut params = HashMap::new();
        params.insert(
            "subject".to_string(),
            serde_json::json!("URGENT: server down"),
        );
        let mut n = Notification::new("email", "notifications/new_email", params);
        n.monitoring_status = MonitoringStatus::Monitored;
        n.processing_status = ProcessingStatus::Pending;
        n
    }

    #[tokio::test]
    async fn queue_drains_through_the_subagent() {
        let parent = ConversationEngine::start(config_with_monitored_server(), None)
            .await
            .unwrap();
        let processor = NotificationProcessor::start(&parent).await.unwrap();

        processor.enqueue(
            monitored_notification(),
            vec!["Tell me if urgent".to_string()],
        );

        // the worker runs the prompt through the mock provider
        tokio::time::sleep(Duration::from_millis(50)).await;
        let history = processor.agent.history().await;
        assert!(!history.is_empty());
        let prompt_text = history
            .iter()
            .find(|m| m.sub_role == Some(cleverchatty_core::types::SubRole::Prompt))
            .map(|m| m.text_content())
            .unwrap_or_default();
        assert!(prompt_text.contains("Tell me if urgent"));
        assert!(prompt_text.contains("URGENT: server down"));

        processor.stop().await;
        parent.finish().await;
    }

    #[tokio::test]
    async fn feedback_tool_fires_agent_message_callback() {
        let parent = ConversationEngine::start(config_with_monitored_server(), None)
            .await
            .unwrap();
        let received = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&received);
        parent.set_agent_message_callback(Arc::new(move |msg| {
            sink.lock().unwrap().push(msg);
        }));

        let processor = NotificationProcessor::start(&parent).await.unwrap();

        // drive the feedback tool directly through the subagent's host
        let result = processor
            .agent
            .tools_host()
            .call_tool(
                FEEDBACK_TOOL,
                serde_json::json!({ "message": "mail server is down" }),
            )
            .await
            .unwrap();
        assert_eq!(result.text_content(), "feedback delivered");
        assert_eq!(received.lock().unwrap().as_slice(), ["mail server is down"]);

        processor.stop().await;
        parent.finish().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let parent = ConversationEngine::start(config_with_monitored_server(), None)
            .await
            .unwrap();
        let processor = NotificationProcessor::start(&parent).await.unwrap();
        processor.stop().await;
        processor.stop().await;
        parent.finish().await;
    }
}
