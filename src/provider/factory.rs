// Toolflow — Provider factory

use super::{http::HTTPProvider, LLMProvider};
use crate::config::Config;

/// Create an LLM provider from the loaded config.
pub fn create_provider(cfg: &Config) -> anyhow::Result<Box<dyn LLMProvider>> {
    let (api_key, api_base, provider_name) = cfg.resolve_provider().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured. Set a provider key in ~/.toolflow/config.json or via environment variables.\n\
             Example: TOOLFLOW_PROVIDERS_OPENAI_API_KEY=sk-..."
        )
    })?;

    tracing::info!(
        provider = %provider_name,
        model = %cfg.agent.model,
        api_base = %if api_base.is_empty() { "(default)" } else { &api_base },
        "Creating LLM provider"
    );

    let provider = HTTPProvider::new(api_key, api_base, cfg.agent.model.clone())?;
    Ok(Box::new(provider))
}
