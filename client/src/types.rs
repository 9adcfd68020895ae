use crate::service::{ClientError, ClientResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Markdown shorter than this is treated as an empty conversion
pub const MIN_MARKDOWN_LEN: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub max_new_tokens: u32,
    pub do_sample: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PictureDescriptionLocal {
    pub repo_id: String,
    pub prompt: String,
    pub generation_config: GenerationConfig,
}

impl Default for PictureDescriptionLocal {
    fn default() -> Self {
        Self {
            repo_id: "ds4sd/SmolDocling-256M-preview".to_string(),
            prompt: "Describe this image in a few sentences.".to_string(),
            generation_config: GenerationConfig {
                max_new_tokens: 200,
                do_sample: false,
            },
        }
    }
}

/// Conversion options accepted by `/v1/convert/*`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvertOptions {
    pub from_formats: Vec<String>,
    pub to_formats: Vec<String>,
    pub image_export_mode: String,
    pub do_ocr: bool,
    pub force_ocr: bool,
    pub ocr_engine: String,
    pub pdf_backend: String,
    pub table_mode: String,
    pub table_cell_matching: bool,
    pub pipeline: String,
    pub page_range: (u64, u64),
    pub document_timeout: u64,
    pub abort_on_error: bool,
    pub do_table_structure: bool,
    pub include_images: bool,
    pub images_scale: f32,
    pub md_page_break_placeholder: String,
    pub do_code_enrichment: bool,
    pub do_formula_enrichment: bool,
    pub do_picture_classification: bool,
    pub do_picture_description: bool,
    pub picture_description_area_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_description_local: Option<PictureDescriptionLocal>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            from_formats: [
                "docx", "pptx", "html", "image", "pdf", "asciidoc", "md", "csv", "xlsx",
                "xml_uspto", "xml_jats", "json_docling", "audio",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            to_formats: vec!["md".to_string(), "json".to_string()],
            image_export_mode: "embedded".to_string(),
            do_ocr: true,
            force_ocr: false,
            ocr_engine: "easyocr".to_string(),
            pdf_backend: "dlparse_v4".to_string(),
            table_mode: "accurate".to_string(),
            table_cell_matching: true,
            pipeline: "standard".to_string(),
            page_range: (1, i64::MAX as u64),
            document_timeout: 604_800,
            abort_on_error: false,
            do_table_structure: true,
            include_images: true,
            images_scale: 2.0,
            md_page_break_placeholder: String::new(),
            do_code_enrichment: true,
            do_formula_enrichment: true,
            do_picture_classification: true,
            do_picture_description: true,
            picture_description_area_threshold: 0.05,
            picture_description_local: Some(PictureDescriptionLocal::default()),
        }
    }
}

impl ConvertOptions {
    pub fn with_to_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ocr_engine(mut self, engine: impl Into<String>) -> Self {
        self.ocr_engine = engine.into();
        self
    }

    pub fn without_picture_description(mut self) -> Self {
        self.do_picture_description = false;
        self.picture_description_local = None;
        self
    }

    /// Options flattened into multipart form fields.
    ///
    /// Lists repeat their field name once per item and nested objects are
    /// sent as a JSON string, which is how the `/v1/convert/file` routes read
    /// form data.
    pub fn form_fields(&self) -> ClientResult<Vec<(String, String)>> {
        let value = serde_json::to_value(self)?;
        let serde_json::Value::Object(map) = value else {
            return Err(ClientError::InvalidRequest {
                message: "conversion options must serialize to an object".to_string(),
            });
        };

        let mut fields = Vec::new();
        for (name, value) in map {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::Array(items) => {
                    for item in items {
                        fields.push((name.clone(), form_value(&item)));
                    }
                }
                other => fields.push((name, form_value(&other))),
            }
        }
        Ok(fields)
    }
}

fn form_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A local file sent as multipart `files` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime = mime_for(&filename).to_string();
        Self {
            filename,
            bytes,
            mime,
        }
    }

    pub fn from_path(path: &Path) -> ClientResult<Self> {
        let bytes = std::fs::read(path)?;
        let filename = file_name(path)?;
        Ok(Self::new(filename, bytes))
    }
}

fn file_name(path: &Path) -> ClientResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ClientError::InvalidRequest {
            message: format!("'{}' has no file name", path.display()),
        })
}

fn mime_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "html" | "htm" => "text/html",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    File {
        base64_string: String,
        filename: String,
    },
    Http {
        url: String,
    },
}

impl Source {
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Source::File {
            base64_string: STANDARD.encode(bytes),
            filename: filename.into(),
        }
    }

    pub fn from_path(path: &Path) -> ClientResult<Self> {
        let bytes = std::fs::read(path)?;
        let filename = file_name(path)?;
        Ok(Self::from_bytes(filename, &bytes))
    }

    pub fn url(url: impl Into<String>) -> Self {
        Source::Http { url: url.into() }
    }

    /// HTTP source, rejecting anything that is not an http(s) URL
    pub fn parse_url(url: &str) -> ClientResult<Self> {
        let url = url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ClientError::InvalidRequest {
                message: format!("'{}' is not an http(s) URL", url),
            });
        }
        Ok(Self::url(url))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    #[default]
    InBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvertSourceRequest {
    pub options: ConvertOptions,
    pub sources: Vec<Source>,
    pub target: Target,
}

impl ConvertSourceRequest {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            options: ConvertOptions::default(),
            sources,
            target: Target::InBody,
        }
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Started => "started",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub task_status: TaskStatus,
    #[serde(default)]
    pub task_position: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ExportDocument {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub md_content: Option<String>,
    #[serde(default)]
    pub json_content: Option<serde_json::Value>,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub text_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvertDocumentResponse {
    pub document: ExportDocument,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub processing_time: Option<f64>,
}

/// Files written by [`ConvertDocumentResponse::save_outputs`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedOutputs {
    pub json: Option<std::path::PathBuf>,
    pub markdown: Option<std::path::PathBuf>,
}

impl ConvertDocumentResponse {
    /// Write `output.json` and `output.md` into `dir` when the content is usable
    pub fn save_outputs(&self, dir: &Path) -> ClientResult<SavedOutputs> {
        let mut saved = SavedOutputs::default();

        if let Some(json) = self
            .document
            .json_content
            .as_ref()
            .filter(|v| !json_is_empty(v))
        {
            let path = dir.join("output.json");
            std::fs::write(&path, serde_json::to_string_pretty(json)?)?;
            saved.json = Some(path);
        }

        if let Some(md) = self
            .document
            .md_content
            .as_ref()
            .filter(|md| md.chars().count() > MIN_MARKDOWN_LEN)
        {
            let path = dir.join("output.md");
            std::fs::write(&path, md)?;
            saved.markdown = Some(path);
        }

        Ok(saved)
    }
}

fn json_is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}
