//! End-to-end request pipeline: reset, save, separate, transcode, respond.

use std::{
    fmt,
    path::Path,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use crate::{
    core::{
        intake,
        resolver,
        separation::SeparationEngine,
        transcode::Transcoder,
        url::UrlSynthesizer,
        workspace::{Isolation, WorkspaceManager},
    },
    error::Result,
    types::{
        ResultManifest, SplitOutcome, StemArtifact, StemMode, StemSpec, StemStatus, UploadedAsset,
    },
};

pub const DEFAULT_DECODED_EXTENSION: &str = "wav";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Resetting,
    Saving,
    Separating,
    Transcoding,
    Responding,
    Succeeded,
    Failed(String),
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Resetting => f.write_str("resetting"),
            PipelineState::Saving => f.write_str("saving"),
            PipelineState::Separating => f.write_str("separating"),
            PipelineState::Transcoding => f.write_str("transcoding"),
            PipelineState::Responding => f.write_str("responding"),
            PipelineState::Succeeded => f.write_str("succeeded"),
            PipelineState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

type ProgressFn = Box<dyn Fn(&PipelineState) + Send + Sync>;

/// Ends the request's in-flight claim however `run` exits, panics included.
struct ReleaseOnDrop<'a> {
    workspace: &'a WorkspaceManager,
    request_id: &'a str,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.workspace.release(self.request_id);
    }
}

pub struct RequestOrchestrator {
    workspace: WorkspaceManager,
    engine: Box<dyn SeparationEngine>,
    transcoder: Transcoder,
    urls: UrlSynthesizer,
    spec: StemSpec,
    decoded_ext: String,
    single_flight: Mutex<()>,
    progress: Option<ProgressFn>,
}

impl RequestOrchestrator {
    pub fn new(
        workspace: WorkspaceManager,
        engine: Box<dyn SeparationEngine>,
        transcoder: Transcoder,
        urls: UrlSynthesizer,
        mode: StemMode,
    ) -> Self {
        Self {
            workspace,
            engine,
            transcoder,
            urls,
            spec: StemSpec::for_mode(mode),
            decoded_ext: DEFAULT_DECODED_EXTENSION.to_string(),
            single_flight: Mutex::new(()),
            progress: None,
        }
    }

    /// Extension the engine uses for its decoded stems.
    pub fn with_decoded_extension(mut self, ext: impl Into<String>) -> Self {
        self.decoded_ext = ext.into().trim_start_matches('.').to_string();
        self
    }

    /// Observer called on every state transition.
    pub fn with_progress(mut self, cb: impl Fn(&PipelineState) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(cb));
        self
    }

    pub fn spec(&self) -> &StemSpec {
        &self.spec
    }

    pub fn output_root(&self) -> &Path {
        self.workspace.output_root()
    }

    /// Run one upload through the whole pipeline.
    ///
    /// In shared-workspace mode this holds the single-flight lock for the entire
    /// run, so concurrent callers wait their turn.
    pub fn run(&self, asset: UploadedAsset) -> Result<SplitOutcome> {
        let _guard = match self.workspace.isolation() {
            Isolation::Shared => Some(
                self.single_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            ),
            Isolation::PerRequest => None,
        };

        let request_id = WorkspaceManager::new_request_id();
        let _release = ReleaseOnDrop {
            workspace: &self.workspace,
            request_id: &request_id,
        };
        let span = tracing::info_span!("split", request_id = %request_id);
        let _enter = span.enter();
        let started = Instant::now();

        match self.run_stages(&request_id, &asset) {
            Ok(outcome) => {
                self.enter(PipelineState::Succeeded);
                tracing::info!(
                    ready = outcome.manifest.urls().len(),
                    expected = self.spec.slots.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request succeeded"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "request failed");
                self.enter(PipelineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn run_stages(&self, request_id: &str, asset: &UploadedAsset) -> Result<SplitOutcome> {
        self.enter(PipelineState::Resetting);
        let ws = self.workspace.reset(request_id)?;

        self.enter(PipelineState::Saving);
        let input = intake::save(&ws, asset)?;

        self.enter(PipelineState::Separating);
        self.engine.separate(&input, self.spec.mode, &ws.output_dir)?;

        self.enter(PipelineState::Transcoding);
        let base = input.file_stem().unwrap_or_default();
        let found = resolver::resolve(&ws.output_dir.join(base), &self.spec, &self.decoded_ext);

        let mut manifest = ResultManifest::default();
        for label in self.spec.labels() {
            let Some((_, decoded)) = found.iter().find(|(l, _)| l == label) else {
                manifest.record(label, StemStatus::Missing);
                continue;
            };
            let mut artifact = StemArtifact {
                label: label.to_string(),
                decoded_path: decoded.clone(),
                compressed_path: None,
            };

            match self.transcoder.transcode(&artifact.label, &artifact.decoded_path) {
                Ok(path) => artifact.compressed_path = Some(path),
                Err(e) if !e.is_fatal() => {
                    tracing::warn!(stem = label, error = %e, "dropping stem");
                    manifest.record(label, StemStatus::TranscodeFailed { reason: e.to_string() });
                    continue;
                }
                Err(e) => return Err(e),
            }

            if let Some(compressed) = &artifact.compressed_path {
                let url = self.urls.synthesize(compressed)?;
                tracing::info!(stem = label, %url, "stem ready");
                manifest.record(label, StemStatus::Ready { url });
            }
        }

        self.enter(PipelineState::Responding);
        Ok(SplitOutcome {
            request_id: request_id.to_string(),
            spec: self.spec,
            manifest,
        })
    }

    fn enter(&self, state: PipelineState) {
        tracing::info!(state = %state, "pipeline state");
        if let Some(cb) = &self.progress {
            cb(&state);
        }
    }
}
