//! Agent Card generation for `.well-known/agent-card.json`.
//!
//! Builds the descriptor each role publishes from its runtime base URL, so
//! callers resolving the card learn where to POST and what is on offer.

use crate::a2a::types::*;

const PROVIDER_ORGANIZATION: &str = "a2a-dispatch contributors";

fn text_modes() -> Vec<String> {
    vec!["text".to_string(), "text/plain".to_string()]
}

fn base_card(name: String, description: &str, base_url: &str, streaming: bool) -> AgentCard {
    AgentCard {
        name,
        description: description.to_string(),
        version: crate::VERSION.to_string(),
        protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        preferred_transport: TRANSPORT_JSONRPC.to_string(),
        url: format!("{}/", base_url.trim_end_matches('/')),
        capabilities: AgentCapabilities {
            streaming,
            push_notifications: false,
            state_transition_history: false,
        },
        default_input_modes: text_modes(),
        default_output_modes: text_modes(),
        skills: vec![],
        provider: Some(AgentProvider {
            organization: PROVIDER_ORGANIZATION.to_string(),
            url: None,
        }),
        documentation_url: None,
    }
}

/// Card for the Capability Provider.
pub fn build_provider_card(
    base_url: &str,
    skills: Vec<AgentSkill>,
    streaming: bool,
) -> AgentCard {
    AgentCard {
        skills,
        ..base_card(
            "Calculator Agent".to_string(),
            "Evaluates arithmetic problems delegated by other agents.",
            base_url,
            streaming,
        )
    }
}

/// Card for the Coordinator. It answers atomically, never streams.
pub fn build_coordinator_card(base_url: &str, target_name: &str) -> AgentCard {
    AgentCard {
        skills: vec![AgentSkill {
            id: "delegate".to_string(),
            name: "Delegate".to_string(),
            description: format!(
                "Forwards problems to the {} agent and relays its answer.",
                target_name
            ),
            tags: vec!["delegation".to_string(), "orchestration".to_string()],
            examples: vec!["What is 384 * 35?".to_string()],
            input_modes: vec!["text".to_string()],
            output_modes: vec!["text".to_string()],
        }],
        ..base_card(
            "Coordinator Agent".to_string(),
            "Routes tasks to specialised agents over A2A.",
            base_url,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::calculator::{Calculator, Skill};

    #[test]
    fn test_build_provider_card() {
        let skills = vec![Calculator.descriptor()];
        let card = build_provider_card("http://127.0.0.1:9000", skills, true);
        assert_eq!(card.name, "Calculator Agent");
        assert_eq!(card.url, "http://127.0.0.1:9000/");
        assert_eq!(card.preferred_transport, "JSONRPC");
        assert!(card.supports_streaming());
        assert!(card.find_skill("calculate").is_some());
        let provider = card.provider.as_ref().expect("provider");
        assert_eq!(provider.organization, "a2a-dispatch contributors");
        assert!(provider.url.is_none());
    }

    #[test]
    fn test_build_coordinator_card() {
        let card = build_coordinator_card("http://coordinator:8080/", "calculator");
        assert_eq!(card.url, "http://coordinator:8080/");
        assert!(!card.supports_streaming());
        assert!(card.skills[0].description.contains("calculator"));
    }

    #[test]
    fn test_card_wire_field_names() {
        let card = build_provider_card("http://localhost:9000", vec![], false);
        let value = serde_json::to_value(&card).expect("json");
        for field in [
            "name",
            "description",
            "version",
            "protocolVersion",
            "preferredTransport",
            "url",
            "capabilities",
            "defaultInputModes",
            "defaultOutputModes",
            "skills",
        ] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(value["capabilities"]["streaming"], false);
    }
}
