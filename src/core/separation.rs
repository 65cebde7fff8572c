use std::{
    ffi::OsString,
    path::Path,
    process::Command,
    time::Instant,
};

use crate::{
    error::{Result, SplitError},
    types::StemMode,
};

pub const DEFAULT_PROGRAM: &str = "spleeter";

pub const DEFAULT_ARGS: &[&str] = &[
    "separate",
    "-p",
    "spleeter:{stems}stems",
    "-o",
    "{output}",
    "{input}",
];

const STDERR_TAIL_LINES: usize = 20;

/// Opaque batch separator: one input file in, `<output_root>/<name>/<label>.<ext>` out.
pub trait SeparationEngine: Send + Sync {
    fn separate(&self, input: &Path, mode: StemMode, output_root: &Path) -> Result<()>;
}

/// Runs an external separator program once per request.
///
/// Arguments are templates: `{input}`, `{output}`, `{stems}` and `{name}` (input
/// file stem) are substituted before spawning.
#[derive(Clone, Debug)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn spleeter() -> Self {
        Self::new(
            DEFAULT_PROGRAM,
            DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn render_args(&self, input: &Path, mode: StemMode, output_root: &Path) -> Vec<OsString> {
        let name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                // Whole-argument paths are passed through untouched.
                "{input}" => input.as_os_str().to_owned(),
                "{output}" => output_root.as_os_str().to_owned(),
                _ => arg
                    .replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output_root.to_string_lossy())
                    .replace("{stems}", &mode.to_string())
                    .replace("{name}", &name)
                    .into(),
            })
            .collect()
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::spleeter()
    }
}

impl SeparationEngine for CommandEngine {
    fn separate(&self, input: &Path, mode: StemMode, output_root: &Path) -> Result<()> {
        let args = self.render_args(input, mode, output_root);
        tracing::info!(
            program = %self.program,
            args = ?args,
            stems = mode.count(),
            "running separation engine"
        );

        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                SplitError::Separation(format!("failed to start `{}`: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SplitError::Separation(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                tail(&stderr, STDERR_TAIL_LINES)
            )));
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "separation engine finished"
        );
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
