//! One analysis run from source reference to persisted record.
//!
//! ```text
//! Resolving → Optimizing → Extracting → Analyzing → Persisting → Cleaning → Done
//! ```
//!
//! A failing stage ends the run but Persisting still happens, so every run
//! leaves a record. Cancellation is checked before each stage and is raced
//! against every external process inside the stages.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, Instrument};
use vsum_models::{
    AnalysisRecord, ExtractionPlan, Language, ModelName, Provider, RecordId, RecordStatus,
    SourceRef, VideoSource,
};

use crate::cache::CacheManager;
use crate::config::PipelineConfig;
use crate::connector::{
    build_prompt, AiConnector, AiProvider, AnalysisOutcome, AnalysisRequest, ClaudeCli, GeminiCli,
    PromptContext,
};
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::{ExtractedFrames, FfmpegFrameTool, FrameExtractor, FrameTool};
use crate::logging::RunLogger;
use crate::metrics;
use crate::optimizer::{ContextOptimizer, PlanValidation, ProviderLimits};
use crate::source::{Downloader, FfprobeProbe, MediaProbe, SourceResolver, YtDlpDownloader};
use crate::store::MetadataStore;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolving,
    Optimizing,
    Extracting,
    Analyzing,
    Persisting,
    Cleaning,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::Optimizing => "optimizing",
            Stage::Extracting => "extracting",
            Stage::Analyzing => "analyzing",
            Stage::Persisting => "persisting",
            Stage::Cleaning => "cleaning",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sampling interval requested by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalChoice {
    #[default]
    Auto,
    Seconds(u32),
}

impl FromStr for IntervalChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(IntervalChoice::Auto);
        }
        match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(IntervalChoice::Seconds(n)),
            _ => Err(format!("invalid interval '{}': expected 'auto' or a positive number of seconds", s)),
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// Local path or URL
    pub source: String,
    /// `None` uses the configured default
    pub interval: Option<IntervalChoice>,
    pub provider: Option<Provider>,
    pub model: Option<ModelName>,
    pub language: Option<Language>,
    pub custom_prompt: Option<String>,
    pub write_sidecar: bool,
    pub write_history: bool,
    /// Skip the cleaning stage
    pub keep_cache: bool,
}

impl AnalyzeRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            interval: None,
            provider: None,
            model: None,
            language: None,
            custom_prompt: None,
            write_sidecar: true,
            write_history: true,
            keep_cache: false,
        }
    }
}

/// Where and why a run stopped.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Result of a run.
#[derive(Debug)]
pub struct RunReport {
    pub record: AnalysisRecord,
    /// Stages entered, in order
    pub trace: Vec<Stage>,
    pub failure: Option<StageFailure>,
    pub source: Option<VideoSource>,
    pub plan: Option<ExtractionPlan>,
    pub analysis: Option<AnalysisOutcome>,
    pub cache_hit: bool,
    /// Approximate prompt tokens for the run's frames
    pub estimated_tokens: Option<u64>,
    pub sidecar_path: Option<PathBuf>,
    /// The run's frames were evicted by the cleaning stage
    pub cleaned: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// `Done`, or the stage that failed.
    pub fn final_stage(&self) -> Stage {
        self.failure.as_ref().map(|f| f.stage).unwrap_or(Stage::Done)
    }
}

/// External capabilities the pipeline drives.
pub struct Collaborators {
    pub probe: Arc<dyn MediaProbe>,
    pub downloader: Arc<dyn Downloader>,
    pub frame_tool: Arc<dyn FrameTool>,
    pub providers: Vec<Arc<dyn AiProvider>>,
}

impl Collaborators {
    /// ffprobe, yt-dlp, ffmpeg and the gemini/claude CLIs.
    pub fn system(config: &PipelineConfig) -> Self {
        Self {
            probe: Arc::new(FfprobeProbe::new(config.probe_timeout)),
            downloader: Arc::new(YtDlpDownloader::new(config.download_timeout)),
            frame_tool: Arc::new(FfmpegFrameTool::new(config.extract_timeout)),
            providers: vec![Arc::new(GeminiCli), Arc::new(ClaudeCli)],
        }
    }
}

/// Mutable state threaded through the stages of one run.
struct RunState {
    request: AnalyzeRequest,
    reference: SourceRef,
    provider: Provider,
    model: ModelName,
    language: Language,
    logger: RunLogger,
    cancel: watch::Receiver<bool>,
    trace: Vec<Stage>,
    source: Option<VideoSource>,
    plan: Option<ExtractionPlan>,
    frames: Option<ExtractedFrames>,
    prompt: Option<String>,
    analysis: Option<AnalysisOutcome>,
}

impl RunState {
    fn enter(&mut self, stage: Stage) -> Result<(), StageFailure> {
        if *self.cancel.borrow() {
            return Err(StageFailure {
                stage,
                error: PipelineError::Cancelled,
            });
        }
        self.trace.push(stage);
        self.logger.log_stage(stage.as_str());
        Ok(())
    }
}

fn at(stage: Stage) -> impl FnOnce(PipelineError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

pub struct AnalysisOrchestrator {
    config: PipelineConfig,
    optimizer: ContextOptimizer,
    resolver: SourceResolver,
    extractor: FrameExtractor,
    connector: AiConnector,
    store: Arc<MetadataStore>,
    cache: Arc<CacheManager>,
}

impl AnalysisOrchestrator {
    /// Orchestrator using the real external tools.
    pub async fn open(config: PipelineConfig) -> PipelineResult<Self> {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(config, collaborators).await
    }

    pub async fn with_collaborators(config: PipelineConfig, collaborators: Collaborators) -> PipelineResult<Self> {
        let cache = Arc::new(
            CacheManager::open_with(config.cache_dir(), config.max_cache_bytes, config.cache_stale_after()).await?,
        );
        let store = Arc::new(MetadataStore::new(config.history_path()));

        Ok(Self {
            optimizer: ContextOptimizer::new(config.average_keyframe_period),
            resolver: SourceResolver::new(collaborators.probe, collaborators.downloader, config.downloads_dir()),
            extractor: FrameExtractor::new(Arc::clone(&cache), collaborators.frame_tool, config.max_frame_width),
            connector: AiConnector::new(&config, collaborators.providers),
            store,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.store
    }

    pub fn connector(&self) -> &AiConnector {
        &self.connector
    }

    /// Execute one run. Never returns an error: failures are reported in
    /// [`RunReport::failure`] and recorded in history.
    pub async fn run(&self, request: AnalyzeRequest, cancel: watch::Receiver<bool>) -> RunReport {
        let record_id = RecordId::new();
        let logger = RunLogger::new(&record_id, &request.source);
        let span = logger.create_span();
        self.run_inner(record_id, logger, request, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        record_id: RecordId,
        logger: RunLogger,
        request: AnalyzeRequest,
        cancel: watch::Receiver<bool>,
    ) -> RunReport {
        let started = Instant::now();
        let provider = request.provider.unwrap_or(self.config.default_provider);
        let model = self.connector.resolve_model(provider, request.model.as_ref());
        let language = request.language.unwrap_or(self.config.default_language);
        logger.log_start(&format!("provider={} model={} language={}", provider, model, language));

        let mut state = RunState {
            reference: SourceRef::parse(&request.source),
            request,
            provider,
            model,
            language,
            logger,
            cancel,
            trace: Vec::new(),
            source: None,
            plan: None,
            frames: None,
            prompt: None,
            analysis: None,
        };

        let mut failure = self.execute(&mut state).await.err();
        if let Some(f) = &failure {
            state
                .logger
                .log_failure(f.stage.as_str(), f.error.kind(), &f.error.to_string());
        }

        // Persisting runs for failed runs too
        state.trace.push(Stage::Persisting);
        state.logger.log_stage(Stage::Persisting.as_str());
        let mut record = self.build_record(&record_id, &state, failure.as_ref());

        if state.request.write_history {
            if let Err(e) = self.store.append(&record).await {
                state
                    .logger
                    .log_failure(Stage::Persisting.as_str(), e.kind(), &e.to_string());
                if failure.is_none() {
                    failure = Some(StageFailure {
                        stage: Stage::Persisting,
                        error: e,
                    });
                    // The sidecar and the report must not claim success
                    record = self.build_record(&record_id, &state, failure.as_ref());
                }
            }
        }

        let mut sidecar_path = None;
        if state.request.write_sidecar && !state.reference.is_remote() {
            if let Some(source) = &state.source {
                match self.store.write_sidecar(source.local_path(), &record).await {
                    Ok(path) => sidecar_path = Some(path),
                    Err(e) => state
                        .logger
                        .log_warning(Stage::Persisting.as_str(), &format!("Sidecar not written: {}", e)),
                }
            }
        }

        let cache_hit = state.frames.as_ref().map(|f| f.cache_hit).unwrap_or(false);
        let mut cleaned = false;
        if failure.is_none() {
            if self.config.auto_cleanup && !state.request.keep_cache {
                state.trace.push(Stage::Cleaning);
                state.logger.log_stage(Stage::Cleaning.as_str());
                cleaned = self.clean(&mut state).await;
            }
            state.trace.push(Stage::Done);
        }

        let final_stage = failure.as_ref().map(|f| f.stage).unwrap_or(Stage::Done);
        metrics::record_run(if failure.is_none() { "success" } else { "failed" }, final_stage.as_str());
        state.logger.log_completion(&format!(
            "status={} stage={} elapsed_ms={}",
            record.status.as_str(),
            final_stage,
            started.elapsed().as_millis()
        ));

        let estimated_tokens = state.plan.map(|plan| {
            let limits = ProviderLimits::for_provider(record.provider);
            let frames = if record.frame_count > 0 {
                record.frame_count
            } else {
                plan.target_frame_count
            };
            self.optimizer.estimate_tokens(frames, &limits)
        });

        RunReport {
            record,
            trace: state.trace,
            failure,
            source: state.source,
            plan: state.plan,
            analysis: state.analysis,
            cache_hit,
            estimated_tokens,
            sidecar_path,
            cleaned,
            elapsed: started.elapsed(),
        }
    }

    async fn execute(&self, state: &mut RunState) -> Result<(), StageFailure> {
        state.enter(Stage::Resolving)?;
        let source = self
            .resolver
            .resolve(&state.reference, Some(state.cancel.clone()))
            .await
            .map_err(at(Stage::Resolving))?;
        state.source = Some(source.clone());

        state.enter(Stage::Optimizing)?;
        let plan = self.plan_for(&source, state);
        state.plan = Some(plan);

        state.enter(Stage::Extracting)?;
        let frames = self
            .extractor
            .extract(&source, &plan, Some(state.cancel.clone()))
            .await
            .map_err(at(Stage::Extracting))?;

        state.enter(Stage::Analyzing)?;
        let prompt = build_prompt(&PromptContext {
            plan: &plan,
            frame_count: frames.entry.frame_count(),
            duration_seconds: source.duration_seconds,
            language: state.language,
            custom_prompt: state.request.custom_prompt.as_deref(),
        });
        let request = AnalysisRequest {
            frames_dir: frames.entry.frames_dir(),
            frame_paths: frames.entry.frame_paths.clone(),
            prompt: prompt.clone(),
            provider: Some(state.provider),
            model: Some(state.model.clone()),
        };
        state.prompt = Some(prompt);
        state.frames = Some(frames);

        let outcome = self
            .connector
            .analyze(&request, Some(state.cancel.clone()))
            .await
            .map_err(at(Stage::Analyzing))?;
        state.analysis = Some(outcome);
        Ok(())
    }

    fn plan_for(&self, source: &VideoSource, state: &RunState) -> ExtractionPlan {
        let choice = state.request.interval.unwrap_or(match self.config.default_interval {
            Some(seconds) => IntervalChoice::Seconds(seconds),
            None => IntervalChoice::Auto,
        });

        let plan = match choice {
            IntervalChoice::Seconds(seconds) => self.optimizer.with_interval(source.duration_seconds, seconds),
            IntervalChoice::Auto => {
                let budget = self.config.frame_budgets.budget_for(state.provider, &state.model);
                self.optimizer.plan(source.duration_seconds, budget)
            }
        };

        let limits = ProviderLimits::for_provider(state.provider);
        match self.optimizer.validate(&plan, &limits) {
            PlanValidation::WithinBudget => {}
            PlanValidation::OverRecommended { frames, recommended } => state.logger.log_warning(
                Stage::Optimizing.as_str(),
                &format!("{} frames exceeds the recommended {} for {}", frames, recommended, state.provider),
            ),
            PlanValidation::OverMaximum { frames, max } => state.logger.log_warning(
                Stage::Optimizing.as_str(),
                &format!("{} frames exceeds the {} image limit of {}", frames, max, state.provider),
            ),
        }

        state.logger.log_progress(
            Stage::Optimizing.as_str(),
            &format!(
                "Plan: {} for {:.1}s, about {} prompt tokens",
                plan.describe(),
                source.duration_seconds,
                self.optimizer.estimate_tokens(plan.target_frame_count, &limits)
            ),
        );
        plan
    }

    /// Release the run's pin and evict its entry.
    async fn clean(&self, state: &mut RunState) -> bool {
        let Some(frames) = state.frames.take() else {
            return false;
        };
        let key = frames.entry.key.clone();
        drop(frames);

        match self.cache.evict(&key).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(key = %key.dir_name(), "Entry in use by another run, kept");
                false
            }
            Err(e) => {
                state
                    .logger
                    .log_warning(Stage::Cleaning.as_str(), &format!("Cache cleanup failed: {}", e));
                false
            }
        }
    }

    fn build_record(&self, id: &RecordId, state: &RunState, failure: Option<&StageFailure>) -> AnalysisRecord {
        let source = state.source.as_ref();
        let analysis = state.analysis.as_ref();

        AnalysisRecord {
            id: id.clone(),
            timestamp: Utc::now(),
            source_reference: state.request.source.clone(),
            video_name: source
                .map(|s| s.display_name())
                .unwrap_or_else(|| state.reference.display_name()),
            content_hash: source.map(|s| s.content_hash.clone()),
            provider: analysis.map(|a| a.provider).unwrap_or(state.provider),
            model: analysis.map(|a| a.model.clone()).unwrap_or_else(|| state.model.clone()),
            language: state.language,
            plan: state.plan,
            frame_count: state
                .frames
                .as_ref()
                .map(|f| f.entry.frame_count() as u32)
                .unwrap_or(0),
            duration_seconds: source.map(|s| s.duration_seconds),
            resolution: source.and_then(|s| s.info.resolution()),
            size_bytes: source.map(|s| s.info.size_bytes),
            prompt_used: state.prompt.clone(),
            summary_text: analysis.map(|a| a.text.markdown.clone()).unwrap_or_default(),
            status: if failure.is_none() {
                RecordStatus::Success
            } else {
                RecordStatus::Failed
            },
            failed_stage: failure.map(|f| f.stage.as_str().to_string()),
            error: failure.map(|f| f.error.to_string()),
        }
    }
}
