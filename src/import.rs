// 📥 Import Pipeline
// Delimited file → validated records, one row at a time.
//
// A bad row never aborts the batch: validation failures and store rejections
// both end up in `error_details` and the loop moves on. Only a file that
// cannot be read at all is fatal.

use crate::codec::{self, ParsedFile, Row};
use crate::error::{ExchangeError, Result};
use crate::records::RecordStore;
use crate::rules::{self, ImportShape, ShapeDescriptor, ShapeRegistry};
use crate::template::{Template, TemplateFamily};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

/// Rows shown by the raw file preview unless the caller asks otherwise
pub const DEFAULT_PREVIEW_ROWS: usize = 3;

// ============================================================================
// OUTCOME
// ============================================================================

/// Per-row failure: source line number (header = 1) and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub error: String,
}

/// Summary of one import run. `total == success + errors` always.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    pub error_details: Vec<RowError>,
}

impl ImportOutcome {
    fn starting(total: usize) -> Self {
        ImportOutcome {
            total,
            ..Default::default()
        }
    }

    fn record_failure(&mut self, row: usize, error: String) {
        self.errors += 1;
        self.error_details.push(RowError { row, error });
    }

    fn processed(&self) -> usize {
        self.success + self.errors
    }
}

// ============================================================================
// OBSERVER
// ============================================================================

/// Receives progress and completion of an import run.
///
/// Either `on_error` fires once (file-level failure), or `on_progress` fires
/// after every row followed by exactly one `on_complete`.
pub trait ImportObserver {
    fn on_progress(&mut self, _percent: u8) {}

    fn on_complete(&mut self, _outcome: &ImportOutcome) {}

    fn on_error(&mut self, _error: &ExchangeError) {}
}

/// No-op observer
impl ImportObserver for () {}

/// Observer built from three closures
pub struct Callbacks<P, C, E> {
    pub on_progress: P,
    pub on_complete: C,
    pub on_error: E,
}

impl<P, C, E> ImportObserver for Callbacks<P, C, E>
where
    P: FnMut(u8),
    C: FnMut(&ImportOutcome),
    E: FnMut(&ExchangeError),
{
    fn on_progress(&mut self, percent: u8) {
        (self.on_progress)(percent)
    }

    fn on_complete(&mut self, outcome: &ImportOutcome) {
        (self.on_complete)(outcome)
    }

    fn on_error(&mut self, error: &ExchangeError) {
        (self.on_error)(error)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ImportPipeline<'a, S: RecordStore + ?Sized> {
    store: &'a S,
    registry: &'a ShapeRegistry,
}

impl<'a, S: RecordStore + ?Sized> ImportPipeline<'a, S> {
    pub fn new(store: &'a S, registry: &'a ShapeRegistry) -> Self {
        ImportPipeline { store, registry }
    }

    /// Import `contents` as `shape`, reporting through `observer`.
    ///
    /// The returned outcome is the same one handed to `on_complete`. A
    /// file-level failure goes to `on_error` and is also returned as `Err`.
    pub fn run(
        &self,
        contents: &[u8],
        shape: ImportShape,
        observer: &mut dyn ImportObserver,
    ) -> Result<ImportOutcome> {
        let prepared = std::str::from_utf8(contents)
            .map_err(ExchangeError::from)
            .and_then(|text| Ok((self.registry.require(shape)?, codec::parse(text))));

        let (descriptor, parsed) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(shape = %shape, "import failed before any row: {}", e);
                observer.on_error(&e);
                return Err(e);
            }
        };

        let mut outcome = ImportOutcome::starting(parsed.rows.len());
        info!(shape = %shape, rows = outcome.total, "import started");

        if parsed.is_empty() {
            observer.on_complete(&outcome);
            return Ok(outcome);
        }

        for row in &parsed.rows {
            match self.import_row(descriptor, row) {
                Ok(()) => {
                    outcome.success += 1;
                    debug!(row = row.line, "row imported");
                }
                Err(rejection) => {
                    // Reasons quote cell values; keep them below warn
                    warn!(row = row.line, stage = rejection.stage(), "row rejected");
                    trace!(row = row.line, "row rejected: {}", rejection.reason());
                    outcome.record_failure(row.line, rejection.into_reason());
                }
            }

            observer.on_progress(progress(outcome.processed(), outcome.total));
        }

        info!(
            shape = %shape,
            total = outcome.total,
            success = outcome.success,
            errors = outcome.errors,
            "import finished"
        );
        observer.on_complete(&outcome);
        Ok(outcome)
    }

    fn import_row(&self, descriptor: &ShapeDescriptor, row: &Row) -> std::result::Result<(), Rejection> {
        let record = descriptor.validate(row).map_err(Rejection::Invalid)?;
        self.store
            .create(descriptor.kind(), record)
            .map(|_| ())
            .map_err(|e| Rejection::Refused(e.to_string()))
    }
}

/// Why one row was turned away
enum Rejection {
    /// Failed the shape's checks
    Invalid(String),
    /// Valid, but the store would not take it
    Refused(String),
}

impl Rejection {
    fn stage(&self) -> &'static str {
        match self {
            Rejection::Invalid(_) => "validation",
            Rejection::Refused(_) => "store",
        }
    }

    fn reason(&self) -> &str {
        match self {
            Rejection::Invalid(reason) | Rejection::Refused(reason) => reason,
        }
    }

    fn into_reason(self) -> String {
        match self {
            Rejection::Invalid(reason) | Rejection::Refused(reason) => reason,
        }
    }
}

/// `round(100 * processed / total)`
fn progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((100.0 * processed as f64) / total as f64).round() as u8
}

// ============================================================================
// PREVIEW
// ============================================================================

/// Headers plus the first `limit` data rows, unvalidated
pub fn preview_rows(text: &str, limit: usize) -> ParsedFile {
    let mut parsed = codec::parse(text);
    parsed.rows.truncate(limit);
    parsed
}

/// One cell of a template-driven preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewCell {
    pub column: String,
    pub value: Option<String>,
    /// Generic type check or missing-required marker; `None` when the cell looks fine
    pub issue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub line: usize,
    pub cells: Vec<PreviewCell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePreview {
    /// Template columns in template order
    pub columns: Vec<String>,
    /// Required template columns the file does not have
    pub missing_columns: Vec<String>,
    /// File columns the template does not know
    pub unexpected_columns: Vec<String>,
    pub rows: Vec<PreviewRow>,
}

/// Show how the first rows of a file line up with a user-authored import template.
///
/// Display only: nothing is persisted and no shape defaulting runs.
pub fn preview_with_template(text: &str, template: &Template, limit: usize) -> Result<TemplatePreview> {
    if template.family != TemplateFamily::Import {
        return Err(ExchangeError::InvalidTemplate(format!(
            "'{}' is not an import template",
            template.name
        )));
    }

    let parsed = preview_rows(text, limit);
    let fields: Vec<_> = template.complete_fields().collect();

    let missing_columns = fields
        .iter()
        .filter(|f| f.required && !parsed.headers.iter().any(|h| h == &f.display_name))
        .map(|f| f.display_name.clone())
        .collect();
    let unexpected_columns = parsed
        .headers
        .iter()
        .filter(|h| !fields.iter().any(|f| &f.display_name == *h))
        .cloned()
        .collect();

    let rows = parsed
        .rows
        .iter()
        .map(|row| PreviewRow {
            line: row.line,
            cells: fields
                .iter()
                .map(|field| {
                    let value = row.get(&field.display_name);
                    PreviewCell {
                        column: field.display_name.clone(),
                        value: value.map(str::to_string),
                        issue: rules::check_field(field, value).err(),
                    }
                })
                .collect(),
        })
        .collect();

    Ok(TemplatePreview {
        columns: fields.iter().map(|f| f.display_name.clone()).collect(),
        missing_columns,
        unexpected_columns,
        rows,
    })
}

// ============================================================================
// TESTS
// ============================================================================
