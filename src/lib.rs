// Tabular Exchange - Core Library
// Import/export engine for delimited files: codec, shapes, templates, pipelines.
// Exposes all modules for use in CLI, API server, and tests

pub mod attributes; // Attribute catalog per record kind
pub mod codec; // Delimited-text codec (tokenizer + writer)
pub mod config;
pub mod error;
pub mod export; // Export pipeline
pub mod import; // Import pipeline + previews
pub mod logging;
pub mod records; // Persistence collaborator + SQLite store
pub mod rules; // Validation & coercion ruleset, import shapes
pub mod store; // Template store
pub mod template;

// Re-export commonly used types
pub use attributes::{AttributeCatalog, AttributeDescriptor};
pub use codec::{parse, serialize, ParsedFile, Row};
pub use config::{ExchangeConfig, LogFormat, LogSettings, ServerSettings};
pub use error::{ExchangeError, Result, StoreError};
pub use export::{
    artifact_file_name, Audience, ExportArtifact, ExportCriteria, ExportFormat, ExportPipeline,
    ExportPreview, ExportQuery, ExportRow, ExportSession, ProjectionPlan,
};
pub use import::{
    preview_rows, preview_with_template, Callbacks, ImportObserver, ImportOutcome, ImportPipeline,
    RowError, TemplatePreview,
};
pub use records::{ImportRun, Record, RecordStore, SqliteRecordStore};
pub use rules::{ImportShape, ShapeDescriptor, ShapeRegistry, UserKind};
pub use store::{SqliteTemplateStore, TemplateRepository};
pub use template::{EntityKind, FieldTemplate, Template, TemplateFamily, ValueType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
