//! # stem-splitter-server
//!
//! Accepts an uploaded audio file, runs it through an external separation
//! engine, transcodes the resulting stems for streaming and returns a URL for
//! each one.

pub mod config;
pub mod core;
pub mod error;
pub mod server;
mod types;

pub use crate::{
    config::ServiceConfig,
    core::{
        audio::{read_audio, write_audio},
        intake::normalize,
        orchestrator::{PipelineState, RequestOrchestrator},
        separation::{CommandEngine, SeparationEngine},
        transcode::{TargetFormat, Transcoder},
        url::{PublicEndpoint, UrlSynthesizer},
        workspace::{Isolation, Workspace, WorkspaceManager},
    },
    error::{Result, SplitError},
    types::{
        AbsentStem, AudioData, ResultManifest, SplitOutcome, StemArtifact, StemMode, StemSlot,
        StemSpec, StemStatus, UploadedAsset, SUCCESS_MESSAGE,
    },
};
