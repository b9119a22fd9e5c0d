//! Explicit integration registry.
//!
//! The program entry point constructs the registry, owns it, and hands it
//! to the ingestion dispatcher; nothing registers itself at module load.

use std::collections::BTreeMap;

use crate::claude::{ClaudeCodeHook, ClaudeCodePull};
use crate::codex::CodexNotify;
use crate::error::{AgentError, Result};
use crate::hook::HookIntegration;
use crate::notify::NotifyIntegration;
use crate::pull::PullIntegration;

/// Dispatch table over the three integration paradigms.
pub struct IntegrationRegistry {
    hooks: BTreeMap<String, Box<dyn HookIntegration>>,
    notifiers: BTreeMap<String, Box<dyn NotifyIntegration>>,
    pullers: BTreeMap<String, Box<dyn PullIntegration>>,
}

impl IntegrationRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The registry with every built-in integration.
    pub fn with_defaults() -> Self {
        let mut builder = Self::builder()
            .hook(Box::new(ClaudeCodeHook))
            .notify(Box::new(CodexNotify));
        if let Ok(pull) = ClaudeCodePull::new() {
            builder = builder.pull(Box::new(pull));
        }
        builder.build()
    }

    pub fn hook(&self, agent: &str) -> Result<&dyn HookIntegration> {
        self.hooks
            .get(agent)
            .map(|b| b.as_ref())
            .ok_or_else(|| AgentError::UnknownAgent(agent.to_string()))
    }

    pub fn notify(&self, agent: &str) -> Result<&dyn NotifyIntegration> {
        self.notifiers
            .get(agent)
            .map(|b| b.as_ref())
            .ok_or_else(|| AgentError::UnknownAgent(agent.to_string()))
    }

    pub fn pull(&self, agent: &str) -> Result<&dyn PullIntegration> {
        self.pullers
            .get(agent)
            .map(|b| b.as_ref())
            .ok_or_else(|| AgentError::UnknownAgent(agent.to_string()))
    }

    pub fn hook_agents(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn notify_agents(&self) -> impl Iterator<Item = &str> {
        self.notifiers.keys().map(String::as_str)
    }

    pub fn pull_agents(&self) -> impl Iterator<Item = &str> {
        self.pullers.keys().map(String::as_str)
    }
}

/// Builder the entry point uses to assemble the registry.
#[derive(Default)]
pub struct RegistryBuilder {
    hooks: BTreeMap<String, Box<dyn HookIntegration>>,
    notifiers: BTreeMap<String, Box<dyn NotifyIntegration>>,
    pullers: BTreeMap<String, Box<dyn PullIntegration>>,
}

impl RegistryBuilder {
    pub fn hook(mut self, integration: Box<dyn HookIntegration>) -> Self {
        self.hooks
            .insert(integration.agent().to_string(), integration);
        self
    }

    pub fn notify(mut self, integration: Box<dyn NotifyIntegration>) -> Self {
        self.notifiers
            .insert(integration.agent().to_string(), integration);
        self
    }

    pub fn pull(mut self, integration: Box<dyn PullIntegration>) -> Self {
        self.pullers
            .insert(integration.agent().to_string(), integration);
        self
    }

    pub fn build(self) -> IntegrationRegistry {
        IntegrationRegistry {
            hooks: self.hooks,
            notifiers: self.notifiers,
            pullers: self.pullers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_known_agents() {
        let registry = IntegrationRegistry::with_defaults();
        assert!(registry.hook("claude-code").is_ok());
        assert!(registry.notify("codex").is_ok());
        assert!(matches!(
            registry.hook("unknown"),
            Err(AgentError::UnknownAgent(_))
        ));
    }

    #[test]
    fn builder_registers_by_agent_name() {
        let registry = IntegrationRegistry::builder()
            .hook(Box::new(crate::claude::ClaudeCodeHook))
            .build();
        assert_eq!(registry.hook_agents().collect::<Vec<_>>(), vec!["claude-code"]);
        assert_eq!(registry.notify_agents().count(), 0);
    }
}
