pub mod config;
pub mod docling;
pub mod endpoint;
pub mod service;
pub mod types;

pub use config::ServeConfig;
pub use docling::{
    check_endpoints, convert_and_wait, upload_and_wait, wait_for_result, DoclingClient,
};
pub use endpoint::{Endpoint, EndpointReport, EndpointStatus};
pub use service::{ClientError, ClientResult, DocumentService};
pub use types::{
    ConvertDocumentResponse, ConvertOptions, ConvertSourceRequest, ExportDocument, FileUpload,
    SavedOutputs, Source, Target, Task, TaskStatus,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::docling::*;
    pub use crate::endpoint::*;
    pub use crate::service::*;
    pub use crate::types::*;
}
