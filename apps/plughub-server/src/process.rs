//! Subprocess transport for the processing engine
//!
//! Each command gets its own temporary workspace: inputs are written there,
//! the engine binary is spawned once with file arguments, and the output
//! file is read back. The workspace is removed when the run ends, whatever
//! the outcome.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use plughub_core::bridge::sniff_image;
use plughub_core::{
    Artifact, BridgeError, ContentKind, EngineCommand, InputFile, OperationKind, ProcessingEngine,
};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs `plughub-engine` (or a compatible binary) per command
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    binary: PathBuf,
    timeout: Duration,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

/// Arguments and output path for one engine invocation
struct Invocation {
    args: Vec<OsString>,
    output: PathBuf,
}

#[async_trait]
impl ProcessingEngine for ProcessEngine {
    async fn run(&self, command: EngineCommand) -> Result<Artifact, BridgeError> {
        let kind = command.kind();
        let workspace = tempfile::Builder::new()
            .prefix("plughub-")
            .tempdir()
            .map_err(|e| {
                warn!(error = %e, "Unable to create workspace");
                BridgeError::processing("Unable to prepare temporary file.")
            })?;

        let invocation = prepare(&workspace, &command).await?;
        debug!(operation = %kind, args = invocation.args.len(), "Spawning engine");

        let child = Command::new(&self.binary)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                warn!(binary = %self.binary.display(), error = %e, "Spawn failed");
                BridgeError::processing("Unable to start process.")
            })?;

        // Dropping the future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "Engine wait failed");
                return Err(BridgeError::processing(kind.fallback_error()));
            }
            Err(_) => {
                warn!(operation = %kind, timeout_secs = self.timeout.as_secs(), "Engine timed out");
                return Err(BridgeError::Timeout(format!(
                    "Processing timed out after {} seconds.",
                    self.timeout.as_secs()
                )));
            }
        };

        let produced = match tokio::fs::read(&invocation.output).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            _ => None,
        };
        let bytes = match (output.status.success(), produced) {
            (true, Some(bytes)) => bytes,
            (success, _) => {
                let message = failure_message(&output.stderr, &output.stdout, kind);
                warn!(operation = %kind, status = ?output.status.code(), success, error = %message, "Engine failed");
                return Err(BridgeError::processing(message));
            }
        };

        info!(operation = %kind, bytes = bytes.len(), "Engine finished");
        let filename = command.artifact_name();
        Ok(match kind.output() {
            ContentKind::Pdf => Artifact::pdf(bytes, filename),
            ContentKind::Zip => Artifact::zip(bytes, filename),
        })
    }
}

/// Write inputs into `workspace` and build the argument list
async fn prepare(workspace: &TempDir, command: &EngineCommand) -> Result<Invocation, BridgeError> {
    let dir = workspace.path();
    let kind = command.kind();
    let output = dir.join(format!("output.{}", kind.output().extension()));

    let mut inputs = Vec::new();
    for (index, file) in command.inputs().into_iter().enumerate() {
        let path = dir.join(input_name(index, file, kind));
        tokio::fs::write(&path, &file.bytes).await.map_err(|e| {
            warn!(error = %e, "Unable to write input");
            BridgeError::processing("Unable to prepare temporary file.")
        })?;
        inputs.push(path);
    }

    let mut args: Vec<OsString> = vec![subcommand(kind).into(), "--".into()];
    match command {
        EngineCommand::Lock { password, .. } | EngineCommand::Unlock { password, .. } => {
            args.extend(paths(&inputs));
            args.push(output.clone().into());
            args.push(password.into());
        }
        EngineCommand::Split { .. } | EngineCommand::ConvertToImage { .. } => {
            args.extend(paths(&inputs));
            args.push(output.clone().into());
        }
        EngineCommand::Redact { terms, .. } => {
            args.extend(paths(&inputs));
            args.push(output.clone().into());
            args.extend(terms.iter().map(OsString::from));
        }
        EngineCommand::Merge { .. } | EngineCommand::ConvertToPdf { .. } => {
            args.push(output.clone().into());
            args.extend(paths(&inputs));
        }
    }
    Ok(Invocation { args, output })
}

fn subcommand(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Lock => "lock",
        OperationKind::Unlock => "unlock",
        OperationKind::Split => "split",
        OperationKind::Merge => "merge",
        OperationKind::Redact => "redact",
        OperationKind::ConvertToImage => "pdf-to-images",
        OperationKind::ConvertToPdf => "images-to-pdf",
    }
}

fn input_name(index: usize, file: &InputFile, kind: OperationKind) -> String {
    if kind != OperationKind::ConvertToPdf {
        return format!("input-{}.pdf", index);
    }
    let extension = match sniff_image(&file.bytes) {
        Some(image::ImageFormat::Jpeg) => "jpg",
        Some(image::ImageFormat::WebP) => "webp",
        _ => "png",
    };
    format!("image-{}.{}", index, extension)
}

fn paths(inputs: &[PathBuf]) -> impl Iterator<Item = OsString> + '_ {
    inputs.iter().map(|path: &PathBuf| path.as_os_str().to_owned())
}

/// Trimmed stderr, else trimmed stdout, else the operation's fallback
fn failure_message(stderr: &[u8], stdout: &[u8], kind: OperationKind) -> String {
    [stderr, stdout]
        .iter()
        .map(|stream| String::from_utf8_lossy(stream).trim().to_string())
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| kind.fallback_error().to_string())
}
