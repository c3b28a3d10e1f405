//! Settings read from the process environment.

use crate::{
    engine::{EngineOptions, TimedOutOutputPolicy},
    errors::AgentError,
    orchestrator::OrchestratorOptions,
};
use dealdesk_sdk::{OpenAIAssistantClientOptions, TaskClientOptions};
use std::{str::FromStr, time::Duration};

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_ASSISTANT_ID: &str = "OPENAI_ASSISTANT_ID";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const TASK_API_KEY: &str = "TASK_API_KEY";
pub const TASK_API_BASE_URL: &str = "TASK_API_BASE_URL";
pub const TASK_POLL_INTERVAL_SECS: &str = "TASK_POLL_INTERVAL_SECS";
pub const TASK_MAX_POLL_ATTEMPTS: &str = "TASK_MAX_POLL_ATTEMPTS";
pub const TIMED_OUT_OUTPUT_POLICY: &str = "TIMED_OUT_OUTPUT_POLICY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub assistant_id: String,
    pub task_api_key: String,
    pub task_api_base_url: Option<String>,
    pub orchestrator: OrchestratorOptions,
    pub timed_out_output_policy: TimedOutOutputPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str| {
            optional(key).ok_or_else(|| AgentError::Config(format!("{key} must be set")))
        };

        let defaults = OrchestratorOptions::default();
        let poll_interval = optional(TASK_POLL_INTERVAL_SECS)
            .map(|value| parse::<u64>(TASK_POLL_INTERVAL_SECS, &value))
            .transpose()?
            .map_or(defaults.poll_interval, Duration::from_secs);
        let max_attempts = optional(TASK_MAX_POLL_ATTEMPTS)
            .map(|value| parse::<u32>(TASK_MAX_POLL_ATTEMPTS, &value))
            .transpose()?
            .unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(AgentError::Config(format!(
                "{TASK_MAX_POLL_ATTEMPTS} must be at least 1"
            )));
        }

        let timed_out_output_policy = optional(TIMED_OUT_OUTPUT_POLICY)
            .map(|value| value.parse::<TimedOutOutputPolicy>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            openai_api_key: required(OPENAI_API_KEY)?,
            openai_base_url: optional(OPENAI_BASE_URL),
            assistant_id: required(OPENAI_ASSISTANT_ID)?,
            task_api_key: required(TASK_API_KEY)?,
            task_api_base_url: optional(TASK_API_BASE_URL),
            orchestrator: OrchestratorOptions {
                poll_interval,
                max_attempts,
            },
            timed_out_output_policy,
        })
    }

    #[must_use]
    pub fn task_client_options(&self) -> TaskClientOptions {
        TaskClientOptions {
            base_url: self.task_api_base_url.clone(),
            api_key: self.task_api_key.clone(),
            client: None,
        }
    }

    #[must_use]
    pub fn assistant_client_options(&self) -> OpenAIAssistantClientOptions {
        OpenAIAssistantClientOptions {
            base_url: self.openai_base_url.clone(),
            api_key: self.openai_api_key.clone(),
            client: None,
        }
    }

    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            assistant_id: self.assistant_id.clone(),
            timed_out_output_policy: self.timed_out_output_policy,
            ..EngineOptions::default()
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, AgentError> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentError::Config(format!("{key} has an invalid value: {value}")))
}
