//! LLM provider interface and registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::BoxFuture;
use crate::{AppError, Result};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Context supplied by the engine.
    User,
    /// Earlier model replies.
    Assistant,
}

/// One conversation turn sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// Engine-authored turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Model-authored turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion capable model.
pub trait LlmProvider: Send + Sync {
    /// Provider name used for registry lookup and logging.
    fn name(&self) -> &str;

    /// Complete `conversation` under `system_prompt`, returning the reply text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Llm`] if the provider call fails.
    fn complete<'a>(
        &'a self,
        system_prompt: &'a str,
        conversation: &'a [ChatMessage],
    ) -> BoxFuture<'a, Result<String>>;
}

/// Named providers with an optional default.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default: Option<String>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default", &self.default)
            .finish()
    }
}

impl ProviderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding just `provider`, which is also the default.
    #[must_use]
    pub fn single(provider: Arc<dyn LlmProvider>) -> Self {
        let mut registry = Self::new();
        registry.register(provider);
        registry
    }

    /// Register a provider; the first one registered becomes the default.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_owned();
        info!(provider = %name, "registered llm provider");
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Make `name` the default provider.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no provider has that name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            return Err(AppError::NotFound(format!("llm provider {name} not registered")));
        }
        self.default = Some(name.to_owned());
        Ok(())
    }

    /// Look up a provider by name, or the default when `name` is `None`.
    #[must_use]
    pub fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn LlmProvider>> {
        let key = name.or(self.default.as_deref())?;
        self.providers.get(key).cloned()
    }

    /// Like [`resolve`](Self::resolve) but a missing provider is an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if no provider is available.
    pub fn require(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        self.resolve(name).ok_or_else(|| {
            AppError::Validation(match name {
                Some(n) => format!("llm provider {n} is not configured"),
                None => "no llm provider configured".into(),
            })
        })
    }
}
