pub mod audio;
pub mod intake;
pub mod orchestrator;
pub mod resolver;
pub mod separation;
pub mod transcode;
pub mod url;
pub mod workspace;
