//! AI analysis of extracted frames.
//!
//! [`AiConnector`] picks a provider, retries transient failures through the
//! [`retry`] state machine and moves on to configured fallback providers once
//! the primary's retries are exhausted.

pub mod prompt;
pub mod provider;
pub mod retry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};
use vsum_models::{ModelName, Provider};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;

pub use prompt::{build_prompt, parse_response, AnalysisText, PromptContext};
pub use provider::{AiProvider, ClaudeCli, GeminiCli, Invocation, InvocationError, InvocationOutput};
pub use retry::{run_with_retry, RetryPolicy, RetryState};

/// Frames and prompt for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub frames_dir: PathBuf,
    pub frame_paths: Vec<PathBuf>,
    pub prompt: String,
    /// Overrides the configured default provider
    pub provider: Option<Provider>,
    /// Overrides the configured default model
    pub model: Option<ModelName>,
}

/// Successful analysis and who produced it.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub text: AnalysisText,
    pub provider: Provider,
    pub model: ModelName,
    /// Invocations made against the provider that answered
    pub attempts: u32,
    pub fallback_used: bool,
}

pub struct AiConnector {
    providers: HashMap<Provider, Arc<dyn AiProvider>>,
    default_provider: Provider,
    default_model: ModelName,
    fallbacks: Vec<Provider>,
    policy: RetryPolicy,
    timeout: Duration,
    transient_exit_codes: Vec<i32>,
}

impl AiConnector {
    pub fn new(config: &PipelineConfig, providers: Vec<Arc<dyn AiProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.provider(), p)).collect(),
            default_provider: config.default_provider,
            default_model: config.default_model.clone(),
            fallbacks: config.fallback_providers.clone(),
            policy: RetryPolicy::from_config(config),
            timeout: config.ai_timeout,
            transient_exit_codes: config.ai_transient_exit_codes.clone(),
        }
    }

    pub fn default_provider(&self) -> Provider {
        self.default_provider
    }

    pub fn is_available(&self, provider: Provider) -> bool {
        self.providers
            .get(&provider)
            .map(|p| p.is_available())
            .unwrap_or(false)
    }

    /// Model used for `provider` when the request names none.
    ///
    /// The configured default model only applies to the default provider.
    pub fn resolve_model(&self, provider: Provider, requested: Option<&ModelName>) -> ModelName {
        match requested {
            Some(model) => model.clone(),
            None if provider == self.default_provider => self.default_model.clone(),
            None => ModelName::auto(),
        }
    }

    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> PipelineResult<AnalysisOutcome> {
        let primary = request.provider.unwrap_or(self.default_provider);
        if !self.is_available(primary) {
            return Err(PipelineError::provider_unavailable(format!(
                "{} CLI ('{}') is not installed or not on PATH",
                primary.display_name(),
                primary.command_name()
            )));
        }

        let mut candidates = vec![(primary, self.resolve_model(primary, request.model.as_ref()))];
        for fallback in &self.fallbacks {
            if candidates.iter().all(|(p, _)| p != fallback) {
                candidates.push((*fallback, ModelName::auto()));
            }
        }

        let mut last_failure: Option<(Provider, InvocationError)> = None;
        for (index, (provider, model)) in candidates.into_iter().enumerate() {
            if index > 0 {
                if !self.is_available(provider) {
                    warn!(provider = %provider, "Skipping unavailable fallback provider");
                    continue;
                }
                let from = last_failure.as_ref().map(|(p, _)| p.as_str()).unwrap_or("");
                warn!(from = %from, to = %provider, "Switching to fallback provider");
                metrics::record_ai_fallback(from, provider.as_str());
            }

            match self.invoke_with_retry(provider, &model, request, cancel.clone()).await {
                Ok((raw, attempts)) => {
                    info!(provider = %provider, model = %model, attempts = attempts, "Analysis complete");
                    return Ok(AnalysisOutcome {
                        text: parse_response(&raw),
                        provider,
                        model,
                        attempts,
                        fallback_used: index > 0,
                    });
                }
                Err(InvocationError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) if e.is_transient() => {
                    warn!(provider = %provider, error = %e, "Retries exhausted");
                    last_failure = Some((provider, e));
                }
                Err(e) => {
                    return Err(PipelineError::analysis(format!("{}: {}", provider.display_name(), e)));
                }
            }
        }

        Err(match last_failure {
            Some((provider, e)) => PipelineError::analysis(format!(
                "all providers failed, last error from {}: {}",
                provider.display_name(),
                e
            )),
            None => PipelineError::provider_unavailable("no AI provider available"),
        })
    }

    async fn invoke_with_retry(
        &self,
        provider: Provider,
        model: &ModelName,
        request: &AnalysisRequest,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<(String, u32), InvocationError> {
        let handle = self
            .providers
            .get(&provider)
            .ok_or_else(|| InvocationError::Permanent(format!("{} is not configured", provider)))?;

        let invocation = Invocation {
            prompt: request.prompt.clone(),
            frames_dir: request.frames_dir.clone(),
            frame_paths: request.frame_paths.clone(),
            model: model.clone(),
            timeout: self.timeout,
        };
        let invocation = &invocation;
        let codes = self.transient_exit_codes.as_slice();

        run_with_retry(&self.policy, provider.as_str(), cancel.clone(), |attempt| {
            let cancel = cancel.clone();
            async move {
                info!(provider = %provider, model = %invocation.model, attempt = attempt, "Invoking AI provider");
                let started = Instant::now();
                let result = match handle.invoke(invocation, cancel).await {
                    Ok(output) => output.into_text(codes),
                    Err(e) => Err(InvocationError::from_media(e)),
                };
                let outcome = match &result {
                    Ok(_) => "success",
                    Err(InvocationError::Transient(_)) => "transient",
                    Err(InvocationError::Cancelled) => "cancelled",
                    Err(_) => "failed",
                };
                metrics::record_ai_invocation(
                    provider.as_str(),
                    outcome,
                    started.elapsed().as_secs_f64() * 1000.0,
                );
                result
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use vsum_media::MediaResult;

    struct ScriptedProvider {
        provider: Provider,
        available: bool,
        script: Mutex<VecDeque<InvocationOutput>>,
        calls: Mutex<Vec<ModelName>>,
    }

    impl ScriptedProvider {
        fn new(provider: Provider, available: bool, script: Vec<InvocationOutput>) -> Arc<Self> {
            Arc::new(Self {
                provider,
                available,
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn invoke(
            &self,
            invocation: &Invocation,
            _cancel: Option<watch::Receiver<bool>>,
        ) -> MediaResult<InvocationOutput> {
            self.calls.lock().unwrap().push(invocation.model.clone());
            Ok(self.script.lock().unwrap().pop_front().unwrap_or(ok("## Summary\nfallthrough")))
        }
    }

    fn ok(text: &str) -> InvocationOutput {
        InvocationOutput {
            exit_code: Some(0),
            stdout: text.as_bytes().to_vec(),
            stderr: String::new(),
        }
    }

    fn rate_limited() -> InvocationOutput {
        InvocationOutput {
            exit_code: Some(1),
            stdout: Vec::new(),
            stderr: "429 Too Many Requests".to_string(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default().with_retry(3, Duration::from_millis(1))
    }

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            frames_dir: PathBuf::from("/tmp/frames"),
            frame_paths: vec![PathBuf::from("/tmp/frames/frame_0001.jpg")],
            prompt: "Summarize".to_string(),
            provider: None,
            model: None,
        }
    }

    #[tokio::test]
    async fn test_two_transient_failures_then_success() {
        let gemini = ScriptedProvider::new(
            Provider::Gemini,
            true,
            vec![rate_limited(), rate_limited(), ok("preamble\n## Summary\nA talk.")],
        );
        let connector = AiConnector::new(&config(), vec![gemini.clone()]);

        let outcome = connector.analyze(&request(), None).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(gemini.calls(), 3);
        assert_eq!(outcome.text.summary.as_deref(), Some("A talk."));
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn test_unavailable_primary_fails_immediately() {
        let gemini = ScriptedProvider::new(Provider::Gemini, false, vec![]);
        let connector = AiConnector::new(&config(), vec![gemini.clone()]);

        let err = connector.analyze(&request(), None).await.unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_after_exhaustion() {
        let gemini = ScriptedProvider::new(Provider::Gemini, true, vec![rate_limited(); 4]);
        let claude = ScriptedProvider::new(Provider::Claude, true, vec![ok("## Summary\nFrom Claude.")]);
        let config = config()
            .with_fallback_providers(vec![Provider::Claude]);
        let connector = AiConnector::new(&config, vec![gemini.clone(), claude.clone()]);

        let mut req = request();
        req.model = Some(ModelName::new("gemini-2.5-pro"));
        let outcome = connector.analyze(&req, None).await.unwrap();

        assert_eq!(gemini.calls(), 4);
        assert_eq!(outcome.provider, Provider::Claude);
        assert!(outcome.model.is_auto());
        assert!(outcome.fallback_used);
        assert_eq!(claude.calls.lock().unwrap()[0], ModelName::auto());
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_fallback() {
        let gemini = ScriptedProvider::new(
            Provider::Gemini,
            true,
            vec![InvocationOutput {
                exit_code: Some(2),
                stdout: Vec::new(),
                stderr: "unknown model".to_string(),
            }],
        );
        let claude = ScriptedProvider::new(Provider::Claude, true, vec![]);
        let config = config().with_fallback_providers(vec![Provider::Claude]);
        let connector = AiConnector::new(&config, vec![gemini.clone(), claude.clone()]);

        let err = connector.analyze(&request(), None).await.unwrap_err();
        assert_eq!(err.kind(), "analysis");
        assert!(err.to_string().contains("unknown model"));
        assert_eq!(claude.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_malformed() {
        let gemini = ScriptedProvider::new(Provider::Gemini, true, vec![ok("   ")]);
        let connector = AiConnector::new(&config(), vec![gemini.clone()]);
        let err = connector.analyze(&request(), None).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
        assert_eq!(gemini.calls(), 1);
    }

    #[test]
    fn test_default_model_only_for_default_provider() {
        let config = PipelineConfig {
            default_model: ModelName::new("gemini-2.5-flash"),
            ..PipelineConfig::default()
        };
        let connector = AiConnector::new(&config, vec![]);
        assert_eq!(connector.resolve_model(Provider::Gemini, None).as_str(), "gemini-2.5-flash");
        assert!(connector.resolve_model(Provider::Claude, None).is_auto());
        assert_eq!(
            connector.resolve_model(Provider::Claude, Some(&ModelName::new("sonnet"))).as_str(),
            "sonnet"
        );
    }
}
