//! Request contract for the external processing engine
//!
//! Everything a request needs is checked here before any processing starts:
//! file presence, decoding, size, content sniffing and per-operation shape.
//! The result is an [`EngineCommand`] carrying exactly the parameters its
//! operation takes. Running it is the job of a [`ProcessingEngine`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::ImageFormat;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::assemble::{first_stem, MERGED_FILENAME};
use crate::operation::{download_name, Artifact, OperationKind};

/// Default per-file upload limit
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// How far into a file the `%PDF-` marker is searched for
const PDF_SNIFF_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    pub max_upload_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The request itself is unacceptable
    #[error("{0}")]
    Client(String),

    /// The engine failed or produced nothing
    #[error("{0}")]
    Processing(String),

    #[error("{0}")]
    Timeout(String),
}

impl BridgeError {
    pub fn client(message: impl Into<String>) -> Self {
        BridgeError::Client(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        BridgeError::Processing(message.into())
    }

    pub fn is_client(&self) -> bool {
        matches!(self, BridgeError::Client(_))
    }
}

/// Decoded input with its original name when one was uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: Option<String>, bytes: Vec<u8>) -> Self {
        Self { name, bytes }
    }

    fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// One validated unit of engine work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Lock { file: InputFile, password: String },
    Unlock { file: InputFile, password: String },
    Split { file: InputFile },
    Merge { files: Vec<InputFile> },
    Redact { file: InputFile, terms: Vec<String> },
    ConvertToImage { file: InputFile },
    ConvertToPdf { images: Vec<InputFile> },
}

impl EngineCommand {
    pub fn kind(&self) -> OperationKind {
        match self {
            EngineCommand::Lock { .. } => OperationKind::Lock,
            EngineCommand::Unlock { .. } => OperationKind::Unlock,
            EngineCommand::Split { .. } => OperationKind::Split,
            EngineCommand::Merge { .. } => OperationKind::Merge,
            EngineCommand::Redact { .. } => OperationKind::Redact,
            EngineCommand::ConvertToImage { .. } => OperationKind::ConvertToImage,
            EngineCommand::ConvertToPdf { .. } => OperationKind::ConvertToPdf,
        }
    }

    /// Input files in the order the engine receives them
    pub fn inputs(&self) -> Vec<&InputFile> {
        match self {
            EngineCommand::Lock { file, .. }
            | EngineCommand::Unlock { file, .. }
            | EngineCommand::Split { file }
            | EngineCommand::Redact { file, .. }
            | EngineCommand::ConvertToImage { file } => vec![file],
            EngineCommand::Merge { files } => files.iter().collect(),
            EngineCommand::ConvertToPdf { images } => images.iter().collect(),
        }
    }

    /// Download name derived from the first input
    pub fn artifact_name(&self) -> String {
        match self {
            EngineCommand::Lock { file, .. } => download_name(file.name_or_default(), "-locked.pdf"),
            EngineCommand::Unlock { file, .. } => {
                download_name(file.name_or_default(), "-unlocked.pdf")
            }
            EngineCommand::Split { file } => download_name(file.name_or_default(), "-split.zip"),
            EngineCommand::Redact { file, .. } => {
                download_name(file.name_or_default(), "-redacted.pdf")
            }
            EngineCommand::ConvertToImage { file } => {
                download_name(file.name_or_default(), "-images.zip")
            }
            EngineCommand::Merge { .. } => MERGED_FILENAME.to_string(),
            EngineCommand::ConvertToPdf { images } => {
                let first = images.first().map(InputFile::name_or_default).unwrap_or("");
                format!("{}-converted.pdf", first_stem(first))
            }
        }
    }
}

/// Runs validated commands
#[async_trait]
pub trait ProcessingEngine: Send + Sync {
    async fn run(&self, command: EngineCommand) -> Result<Artifact, BridgeError>;
}

/// JSON body of the unified endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Base64 file contents
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub text: Option<Vec<String>>,
    #[serde(default)]
    pub order: Option<Vec<i64>>,
}

impl OperationRequest {
    pub fn from_json(body: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(body).map_err(|e| {
            debug!(error = %e, "Rejected request body");
            BridgeError::client("Invalid JSON payload.")
        })
    }

    /// Check the request and turn it into an engine command.
    ///
    /// Files are decoded and checked before the operation is resolved, so an
    /// unknown operation with a broken file reports the file first.
    pub fn validate(self, limits: &RequestLimits) -> Result<EngineCommand, BridgeError> {
        let name = self.operation.as_deref().map(str::trim).unwrap_or("");
        if name.is_empty() {
            return Err(BridgeError::client("Operation is required."));
        }
        if self.files.is_empty() {
            return Err(BridgeError::client("At least one file (base64) is required."));
        }

        let kind = name.parse::<OperationKind>().ok();
        let needs_pdf = kind.is_some_and(|k| k.consumes_pdf());
        let needs_image = kind == Some(OperationKind::ConvertToPdf);

        let mut files = Vec::with_capacity(self.files.len());
        for (index, data) in self.files.iter().enumerate() {
            let bytes = decode_base64(data).ok_or_else(|| {
                BridgeError::client(format!("Unable to decode file at index {}.", index))
            })?;
            if bytes.is_empty() {
                return Err(BridgeError::client(format!(
                    "Uploaded file at index {} is empty.",
                    index
                )));
            }
            if bytes.len() > limits.max_upload_bytes {
                return Err(BridgeError::client(format!(
                    "File at index {} exceeds size limit.",
                    index
                )));
            }
            if needs_pdf && !looks_like_pdf(&bytes, None) {
                return Err(BridgeError::client(format!(
                    "File at index {} must be a PDF.",
                    index
                )));
            }
            if needs_image && sniff_image(&bytes).is_none() {
                return Err(BridgeError::client(format!(
                    "File at index {} must be an image (PNG/JPEG/WebP).",
                    index
                )));
            }
            files.push(InputFile::new(None, bytes));
        }

        let Some(kind) = kind else {
            return Err(BridgeError::client("Unsupported operation."));
        };
        let password = self
            .password
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_string();

        let command = match kind {
            OperationKind::Lock | OperationKind::Unlock => {
                if password.is_empty() {
                    return Err(BridgeError::client(format!(
                        "Password is required for {}.",
                        kind
                    )));
                }
                let file = single(files, kind)?;
                if kind == OperationKind::Lock {
                    EngineCommand::Lock { file, password }
                } else {
                    EngineCommand::Unlock { file, password }
                }
            }
            OperationKind::Merge => {
                if files.len() < 2 {
                    return Err(BridgeError::client("At least two PDFs are required to merge."));
                }
                let files = match self.order.as_deref() {
                    Some(order) => apply_order(files, order),
                    None => files,
                };
                EngineCommand::Merge { files }
            }
            OperationKind::Redact => {
                let terms: Vec<String> = self
                    .text
                    .unwrap_or_default()
                    .into_iter()
                    .map(|term| term.trim().to_string())
                    .filter(|term| !term.is_empty())
                    .collect();
                if terms.is_empty() {
                    return Err(BridgeError::client("Redaction text list is required."));
                }
                let file = single(files, kind)?;
                EngineCommand::Redact { file, terms }
            }
            OperationKind::Split => EngineCommand::Split {
                file: first(files)?,
            },
            OperationKind::ConvertToImage => EngineCommand::ConvertToImage {
                file: first(files)?,
            },
            OperationKind::ConvertToPdf => EngineCommand::ConvertToPdf { images: files },
        };

        debug!(operation = %kind, inputs = command.inputs().len(), "Validated request");
        Ok(command)
    }
}

/// Check one multipart upload for the single-file endpoints
pub fn validate_upload(
    name: Option<String>,
    bytes: Option<Vec<u8>>,
    limits: &RequestLimits,
) -> Result<InputFile, BridgeError> {
    let bytes = bytes.ok_or_else(|| BridgeError::client("PDF upload missing."))?;
    if bytes.is_empty() {
        return Err(BridgeError::client("Uploaded file is empty."));
    }
    if bytes.len() > limits.max_upload_bytes {
        return Err(BridgeError::client("Uploaded file exceeds size limit."));
    }
    if !looks_like_pdf(&bytes, name.as_deref()) {
        return Err(BridgeError::client("Uploaded file must be a PDF."));
    }
    Ok(InputFile::new(name, bytes))
}

/// Trimmed password, required to be non-empty
pub fn require_password(password: Option<&str>) -> Result<String, BridgeError> {
    match password.map(str::trim) {
        Some(password) if !password.is_empty() => Ok(password.to_string()),
        _ => Err(BridgeError::client("Password is required.")),
    }
}

/// `%PDF-` near the start of the data, or a `.pdf` file name
pub fn looks_like_pdf(bytes: &[u8], name: Option<&str>) -> bool {
    let window = &bytes[..bytes.len().min(PDF_SNIFF_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
        || name.is_some_and(|n| n.to_lowercase().ends_with(".pdf"))
}

/// Image format accepted for conversion, by content
pub fn sniff_image(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)) => Some(format),
        _ => None,
    }
}

/// Base64 with whitespace and an optional data-URL prefix tolerated
fn decode_base64(data: &str) -> Option<Vec<u8>> {
    let payload = match data.find("base64,") {
        Some(pos) if data.starts_with("data:") => &data[pos + "base64,".len()..],
        _ => data,
    };
    let compact: String = payload.split_ascii_whitespace().collect();
    BASE64.decode(compact).ok()
}

fn single(files: Vec<InputFile>, kind: OperationKind) -> Result<InputFile, BridgeError> {
    if files.len() != 1 {
        let verb = match kind {
            OperationKind::Lock => "Lock",
            OperationKind::Unlock => "Unlock",
            _ => "Redact",
        };
        return Err(BridgeError::client(format!("{} one PDF at a time.", verb)));
    }
    first(files)
}

fn first(files: Vec<InputFile>) -> Result<InputFile, BridgeError> {
    files
        .into_iter()
        .next()
        .ok_or_else(|| BridgeError::client("At least one file (base64) is required."))
}

/// Reorder `files` when `order` is a permutation of their indices
fn apply_order(files: Vec<InputFile>, order: &[i64]) -> Vec<InputFile> {
    let mut slots: Vec<Option<InputFile>> = files.into_iter().map(Some).collect();
    if order.len() != slots.len() {
        debug!(?order, "Ignoring merge order of the wrong length");
        return slots.into_iter().flatten().collect();
    }

    let mut ordered = Vec::with_capacity(slots.len());
    for &idx in order {
        let taken = usize::try_from(idx)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .and_then(Option::take);
        match taken {
            Some(file) => ordered.push(file),
            None => {
                debug!(?order, "Ignoring merge order that is not a permutation");
                // Put the taken files back where they came from
                for (&i, file) in order.iter().zip(ordered) {
                    slots[i as usize] = Some(file);
                }
                return slots.into_iter().flatten().collect();
            }
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{build_pdf, jpeg_bytes, png_bytes, PageSpec};
    use pretty_assertions::assert_eq;

    fn encoded(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    fn pdf() -> String {
        encoded(&build_pdf(&[PageSpec::blank()]))
    }

    fn request(operation: &str, files: Vec<String>) -> OperationRequest {
        OperationRequest {
            operation: Some(operation.to_string()),
            files,
            ..Default::default()
        }
    }

    fn client_error(result: Result<EngineCommand, BridgeError>) -> String {
        match result {
            Err(BridgeError::Client(message)) => message,
            other => panic!("expected client error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_client_fault() {
        let err = OperationRequest::from_json(b"{not json").unwrap_err();
        assert_eq!(err, BridgeError::client("Invalid JSON payload."));
    }

    #[test]
    fn test_operation_and_files_required() {
        let limits = RequestLimits::default();
        assert_eq!(
            client_error(request("  ", vec![pdf()]).validate(&limits)),
            "Operation is required."
        );
        assert_eq!(
            client_error(request("merge", vec![]).validate(&limits)),
            "At least one file (base64) is required."
        );
    }

    #[test]
    fn test_merge_with_one_file_is_rejected() {
        let result = request("merge", vec![pdf()]).validate(&RequestLimits::default());
        assert_eq!(client_error(result), "At least two PDFs are required to merge.");
    }

    #[test]
    fn test_file_checks_report_index() {
        let limits = RequestLimits {
            max_upload_bytes: 2048,
        };
        let big = encoded(&vec![b'%'; 4096]);
        assert_eq!(
            client_error(request("split", vec![pdf(), "!!".into()]).validate(&limits)),
            "Unable to decode file at index 1."
        );
        assert_eq!(
            client_error(request("split", vec![String::new()]).validate(&limits)),
            "Uploaded file at index 0 is empty."
        );
        assert_eq!(
            client_error(request("split", vec![big]).validate(&limits)),
            "File at index 0 exceeds size limit."
        );
        assert_eq!(
            client_error(request("split", vec![encoded(b"plain text")]).validate(&limits)),
            "File at index 0 must be a PDF."
        );
        assert_eq!(
            client_error(request("convert to pdf", vec![pdf()]).validate(&limits)),
            "File at index 0 must be an image (PNG/JPEG/WebP)."
        );
    }

    #[test]
    fn test_unknown_operation_after_file_checks() {
        let result = request("compress", vec![pdf()]).validate(&RequestLimits::default());
        assert_eq!(client_error(result), "Unsupported operation.");
    }

    #[test]
    fn test_lock_requires_password_and_single_file() {
        let limits = RequestLimits::default();
        assert_eq!(
            client_error(request("lock", vec![pdf()]).validate(&limits)),
            "Password is required for lock."
        );

        let mut req = request("Unlock", vec![pdf(), pdf()]);
        req.password = Some("secret".into());
        assert_eq!(client_error(req.validate(&limits)), "Unlock one PDF at a time.");

        let mut req = request("LOCK", vec![pdf()]);
        req.password = Some("  secret ".into());
        match req.validate(&limits).unwrap() {
            EngineCommand::Lock { password, .. } => assert_eq!(password, "secret"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_redact_drops_blank_terms() {
        let limits = RequestLimits::default();
        let mut req = request("redact", vec![pdf()]);
        req.text = Some(vec![" ".into(), "".into()]);
        assert_eq!(client_error(req.validate(&limits)), "Redaction text list is required.");

        let mut req = request("redact", vec![pdf()]);
        req.text = Some(vec![" Mike ".into(), " ".into()]);
        match req.validate(&limits).unwrap() {
            EngineCommand::Redact { terms, .. } => assert_eq!(terms, vec!["Mike"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_merge_order_applied_only_for_permutations() {
        let a = build_pdf(&[PageSpec::text("A")]);
        let b = build_pdf(&[PageSpec::text("B")]);
        let files = vec![encoded(&a), encoded(&b)];

        let mut req = request("merge", files.clone());
        req.order = Some(vec![1, 0]);
        match req.validate(&RequestLimits::default()).unwrap() {
            EngineCommand::Merge { files } => assert_eq!(files[0].bytes, b),
            other => panic!("unexpected {:?}", other),
        }

        for order in [vec![1, 1], vec![0], vec![0, 2], vec![-1, 0]] {
            let mut req = request("merge", files.clone());
            req.order = Some(order);
            match req.validate(&RequestLimits::default()).unwrap() {
                EngineCommand::Merge { files } => assert_eq!(files[0].bytes, a),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_convert_to_pdf_accepts_images() {
        let req = request(
            "convert to pdf",
            vec![encoded(&png_bytes(4, 4)), encoded(&jpeg_bytes(4, 4))],
        );
        let command = req.validate(&RequestLimits::default()).unwrap();
        assert_eq!(command.kind(), OperationKind::ConvertToPdf);
        assert_eq!(command.inputs().len(), 2);
        assert_eq!(command.artifact_name(), "images-converted.pdf");
    }

    #[test]
    fn test_data_url_payload_decodes() {
        let data = format!("data:application/pdf;base64,{}", pdf());
        let command = request("split", vec![data])
            .validate(&RequestLimits::default())
            .unwrap();
        assert_eq!(command.kind(), OperationKind::Split);
    }

    #[test]
    fn test_upload_checks() {
        let limits = RequestLimits::default();
        let err = |name: Option<&str>, bytes: Option<Vec<u8>>| {
            validate_upload(name.map(String::from), bytes, &limits).unwrap_err()
        };
        assert_eq!(err(None, None), BridgeError::client("PDF upload missing."));
        assert_eq!(err(Some("a.pdf"), Some(vec![])), BridgeError::client("Uploaded file is empty."));
        assert_eq!(
            err(Some("a.txt"), Some(b"hello".to_vec())),
            BridgeError::client("Uploaded file must be a PDF.")
        );

        // A .pdf name is enough
        let file = validate_upload(Some("a.pdf".into()), Some(b"hello".to_vec()), &limits).unwrap();
        assert_eq!(file.name.as_deref(), Some("a.pdf"));
    }

    #[test]
    fn test_require_password() {
        assert_eq!(require_password(Some(" pw ")).unwrap(), "pw");
        assert!(require_password(Some("   ")).is_err());
        assert!(require_password(None).is_err());
    }

    #[test]
    fn test_artifact_names() {
        let file = InputFile::new(Some("Report.pdf".into()), vec![1]);
        let lock = EngineCommand::Lock {
            file: file.clone(),
            password: "pw".into(),
        };
        assert_eq!(lock.artifact_name(), "Report-locked.pdf");
        assert_eq!(
            EngineCommand::Split { file: file.clone() }.artifact_name(),
            "Report-split.zip"
        );
        assert_eq!(
            EngineCommand::Merge { files: vec![file] }.artifact_name(),
            "plughub-merged.pdf"
        );
    }
}
