use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use cleverchatty_core::config::CleverChattyConfig;
use cleverchatty_protocol::a2a::{
    AgentCapabilities, AgentCard, AgentProvider, AgentSkill,
};

use crate::app::AppState;

/// GET /.well-known/agent.json
pub async fn agent_card_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(build_card(&state.config))
}

/// GET /health
pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

pub fn build_card(config: &CleverChattyConfig) -> AgentCard {
    let a2a = &config.a2a_settings;
    AgentCard {
        name: if a2a.title.is_empty() {
            config.agent_id.clone()
        } else {
            a2a.title.clone()
        },
        description: a2a.description.clone(),
        url: a2a.url.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: AgentCapabilities { streaming: true },
        skills: vec![AgentSkill {
            id: a2a.chat_skill_name.clone(),
            name: a2a.chat_skill_name.clone(),
            description: a2a.chat_skill_description.clone(),
        }],
        provider: if a2a.organization.is_empty() {
            None
        } else {
            Some(AgentProvider {
                organization: a2a.organization.clone(),
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cleverchatty_core::config::*;

    use super::*;

    #[test]
    fn card_declares_streaming_and_the_chat_skill() {
        let config = CleverChattyConfig {
            agent_id: "agent-1".to_string(),
            model: "mock:mock".to_string(),
            system_instruction: String::new(),
            message_window: 10,
            log_file_path: String::new(),
            debug_mode: false,
            providers: ProvidersConfig::default(),
            server: ServerSettings::default(),
            rag_settings: RagSettings::default(),
            a2a_settings: A2aSettings {
                enabled: true,
                listen_host: "127.0.0.1:8080".to_string(),
                url: "http://localhost:8080".to_string(),
                title: "Helper".to_string(),
                description: "A helpful agent".to_string(),
                organization: "Acme".to_string(),
                agent_id_required: false,
                chat_skill_name: "ai_chat".to_string(),
                chat_skill_description: "General AI chat".to_string(),
            },
            reverse_mcp_settings: ReverseMcpSettings::default(),
            tools_servers: HashMap::new(),
        };

        let card = build_card(&config);
        assert!(card.capabilities.streaming);
        assert_eq!(card.skills.len(), 1);
        assert_eq!(card.skills[0].id, "ai_chat");
        assert_eq!(card.provider.clone().unwrap().organization, "Acme");

        let json = serde_json::to_string(&card).unwrap();
        assert!(json.contains(r#""streaming":true"#));
    }
}
