pub mod agents;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

/// Something that turns a prompt into completion text.
#[async_trait(?Send)]
pub trait Completer {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Name recorded as the author of generated content.
    fn model_name(&self) -> String;
}

/// A mixtape agent plus the model name it was built for.
pub struct AgentCompleter {
    agent: mixtape_core::Agent,
    model: String,
}

#[async_trait(?Send)]
impl Completer for AgentCompleter {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .agent
            .run(prompt)
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(response.text().trim().to_string())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Create a completer configured from the database's LLM settings.
pub async fn create_agent(db: &Database) -> Result<AgentCompleter> {
    let (provider, model) = db
        .reader()
        .call(|conn| {
            let provider = repository::get_config(conn, "llm_provider")?;
            let model = repository::get_config(conn, "llm_model")?;
            Ok::<(Option<String>, Option<String>), rusqlite::Error>((provider, model))
        })
        .await?;

    let provider = provider.as_deref().unwrap_or("bedrock");
    let model_name = model.as_deref().unwrap_or("claude-sonnet-4-5");
    log::debug!("Building {provider} agent for {model_name}");

    let agent = build_agent(provider, model_name).await?;
    Ok(AgentCompleter {
        agent,
        model: model_name.to_string(),
    })
}

async fn build_agent(provider: &str, model_name: &str) -> Result<mixtape_core::Agent> {
    // Each combination needs its own builder call since the model types are different.
    match (provider, model_name) {
        ("bedrock", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("bedrock", _) => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", _) => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        (other, _) => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a canned reply, or an error when `reply` is `None`.
    pub struct StubCompleter {
        pub reply: Option<String>,
    }

    impl StubCompleter {
        pub fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
            }
        }

        pub fn failing() -> Self {
            Self { reply: None }
        }
    }

    #[async_trait(?Send)]
    impl Completer for StubCompleter {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.reply
                .clone()
                .ok_or_else(|| Error::Llm("stub completer unavailable".into()))
        }

        fn model_name(&self) -> String {
            "stub-model".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let db = Database::open_memory().await.unwrap();
        db.writer()
            .call(|conn| repository::set_config(conn, "llm_provider", "openai"))
            .await
            .unwrap();

        match create_agent(&db).await {
            Err(Error::Config(msg)) => assert!(msg.contains("openai")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a config error"),
        }
    }
}
