// 📤 Export Pipeline
// Template + criteria → filtered, projected, de-blanked rows → CSV or JSON.
//
// Preview and full export share one code path; the only difference is the
// row cap, so a preview is always a prefix of the full artifact.

use crate::codec;
use crate::error::{ExchangeError, Result};
use crate::records::{Record, RecordStore};
use crate::rules::UserKind;
use crate::template::{underscored, EntityKind, Template, TemplateFamily};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

// ============================================================================
// CRITERIA
// ============================================================================

/// Who an export is about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Audience {
    #[default]
    All,
    Users(UserKind),
    Students,
}

/// Which equality filters an audience exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterScope {
    None,
    CenterOnly,
    Full,
}

impl Audience {
    fn scope(&self) -> FilterScope {
        match self {
            Audience::Students | Audience::Users(UserKind::Family) => FilterScope::Full,
            Audience::Users(UserKind::Counselor) => FilterScope::CenterOnly,
            _ => FilterScope::None,
        }
    }

    pub fn admits(&self, kind: EntityKind, record: &Record) -> bool {
        match self {
            Audience::All => true,
            Audience::Students => kind == EntityKind::Student,
            Audience::Users(user_kind) => {
                kind == EntityKind::User
                    && record.get("user_kind").and_then(Value::as_str) == Some(user_kind.code())
            }
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::All => f.write_str("all"),
            Audience::Students => f.write_str("alumnos"),
            Audience::Users(kind) => f.write_str(kind.code()),
        }
    }
}

impl FromStr for Audience {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" | "todos" => Ok(Audience::All),
            "alumnos" | "students" | "student" => Ok(Audience::Students),
            other => UserKind::parse(other)
                .map(Audience::Users)
                .ok_or_else(|| format!("unknown audience: '{}'", other)),
        }
    }
}

impl TryFrom<String> for Audience {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Audience> for String {
    fn from(audience: Audience) -> Self {
        audience.to_string()
    }
}

/// Export filters. `None` on an equality filter means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportCriteria {
    pub audience: Audience,
    pub center: Option<String>,
    pub stage: Option<String>,
    pub course: Option<String>,
    pub group: Option<String>,
}

impl ExportCriteria {
    pub fn matches(&self, kind: EntityKind, record: &Record) -> bool {
        if !self.audience.admits(kind, record) {
            return false;
        }

        let filters: Vec<(&Option<String>, &str)> = match self.audience.scope() {
            FilterScope::None => Vec::new(),
            FilterScope::CenterOnly => vec![(&self.center, "center_id")],
            FilterScope::Full => vec![
                (&self.center, "center_id"),
                (&self.stage, "stage"),
                (&self.course, "course"),
                (&self.group, "class_group"),
            ],
        };

        filters.iter().all(|(wanted, attribute)| match wanted {
            None => true,
            Some(wanted) => record.get(*attribute).map(cell_text).as_deref() == Some(wanted.as_str()),
        })
    }
}

// ============================================================================
// FORMAT & ROWS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv;charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format: '{}'", other)),
        }
    }
}

/// String form of a projected value: null → "", strings verbatim, others as JSON
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One projected row, columns in template order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    cells: Vec<(String, Value)>,
}

impl ExportRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn cells(&self) -> &[(String, Value)] {
        &self.cells
    }

    /// Cell values as strings, in column order
    pub fn texts(&self) -> Vec<String> {
        self.cells.iter().map(|(_, v)| cell_text(v)).collect()
    }

    /// Every value is empty, "null" or "undefined" once stringified and trimmed
    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| {
            let text = cell_text(v);
            matches!(text.trim(), "" | "null" | "undefined")
        })
    }
}

impl Serialize for ExportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// ============================================================================
// PROJECTION PLAN
// ============================================================================

#[derive(Debug, Clone)]
struct Projection {
    column: usize,
    attribute: String,
}

/// Per-kind projections built once per run.
///
/// Columns a kind has no field for simply keep their empty default; there is
/// no kind check at row time.
#[derive(Debug, Clone)]
pub struct ProjectionPlan {
    columns: Vec<String>,
    by_kind: HashMap<EntityKind, Vec<Projection>>,
}

impl ProjectionPlan {
    /// `included = None` keeps every column of the template
    pub fn new(template: &Template, included: Option<&[String]>) -> Self {
        let columns: Vec<String> = template
            .display_names()
            .into_iter()
            .filter(|name| included.map_or(true, |inc| inc.iter().any(|i| i.trim() == name)))
            .collect();

        let mut by_kind: HashMap<EntityKind, Vec<Projection>> = HashMap::new();
        for field in template.complete_fields() {
            let (Some(kind), Some(column)) = (
                field.source_kind,
                columns.iter().position(|c| c == field.display_name.trim()),
            ) else {
                continue;
            };
            by_kind.entry(kind).or_default().push(Projection {
                column,
                attribute: field.source_attribute.trim().to_string(),
            });
        }

        ProjectionPlan { columns, by_kind }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn project(&self, kind: EntityKind, record: &Record) -> ExportRow {
        let mut values = vec![Value::String(String::new()); self.columns.len()];

        // Later projections overwrite earlier ones on a shared column
        for projection in self.by_kind.get(&kind).into_iter().flatten() {
            values[projection.column] = match record.get(&projection.attribute) {
                None | Some(Value::Null) => Value::String(String::new()),
                Some(value) => value.clone(),
            };
        }

        ExportRow {
            cells: self.columns.iter().cloned().zip(values).collect(),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// What to export from a template
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportQuery {
    pub criteria: ExportCriteria,
    /// Display names to keep; `None` keeps all
    pub included_fields: Option<Vec<String>>,
}

/// Columns plus rows, as returned by a preview
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPreview {
    pub columns: Vec<String>,
    pub rows: Vec<ExportRow>,
}

/// A finished download
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub format: ExportFormat,
    pub row_count: usize,
    pub content: String,
}

pub struct ExportPipeline<'a, S: RecordStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> ExportPipeline<'a, S> {
    pub fn new(store: &'a S) -> Self {
        ExportPipeline { store }
    }

    /// Filtered, projected, non-blank rows; at most `limit` when given.
    pub fn rows(
        &self,
        template: &Template,
        query: &ExportQuery,
        limit: Option<usize>,
    ) -> Result<ExportPreview> {
        if template.family != TemplateFamily::Export {
            return Err(ExchangeError::InvalidTemplate(format!(
                "'{}' is not an export template",
                template.name
            )));
        }

        let plan = ProjectionPlan::new(template, query.included_fields.as_deref());

        // One fetch per referenced kind; any failure aborts the export
        let mut candidates: Vec<(EntityKind, Record)> = Vec::new();
        for kind in template.source_kinds() {
            let records = self.store.list(kind)?;
            debug!(kind = %kind, count = records.len(), "records fetched");
            candidates.extend(records.into_iter().map(|r| (kind, r)));
        }

        let mut suppressed = 0usize;
        let rows: Vec<ExportRow> = candidates
            .iter()
            .filter(|(kind, record)| query.criteria.matches(*kind, record))
            .map(|(kind, record)| plan.project(*kind, record))
            .filter(|row| {
                let keep = !row.is_blank();
                if !keep {
                    suppressed += 1;
                }
                keep
            })
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        debug!(rows = rows.len(), suppressed, "rows projected");
        Ok(ExportPreview {
            columns: plan.columns().to_vec(),
            rows,
        })
    }

    /// First `limit` rows. Zero rows is a valid, empty preview.
    pub fn preview(&self, template: &Template, query: &ExportQuery, limit: usize) -> Result<ExportPreview> {
        self.rows(template, query, Some(limit))
    }

    /// Preview serialized exactly like the full artifact, cut to `limit` rows
    pub fn render_preview(
        &self,
        template: &Template,
        query: &ExportQuery,
        limit: usize,
        format: ExportFormat,
    ) -> Result<String> {
        render(&self.preview(template, query, limit)?, format)
    }

    /// Full artifact; fails with `NothingToExport` when no row survives.
    pub fn export(
        &self,
        template: &Template,
        query: &ExportQuery,
        format: ExportFormat,
    ) -> Result<ExportArtifact> {
        let data = self.rows(template, query, None)?;
        if data.rows.is_empty() {
            info!(template = %template.name, "nothing to export");
            return Err(ExchangeError::NothingToExport);
        }

        let content = render(&data, format)?;
        info!(
            template = %template.name,
            rows = data.rows.len(),
            format = format.extension(),
            "export rendered"
        );

        Ok(ExportArtifact {
            file_name: artifact_file_name(&template.name, format, Utc::now()),
            mime_type: format.mime_type().to_string(),
            format,
            row_count: data.rows.len(),
            content,
        })
    }
}

/// Serialize rows as delimited text (force-quoted, BOM) or indented JSON
pub fn render(data: &ExportPreview, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => {
            let cells: Vec<Vec<String>> = data.rows.iter().map(ExportRow::texts).collect();
            codec::serialize(&data.columns, &cells)
        }
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&data.rows)?),
    }
}

/// `<name with whitespace runs as _>_<unix millis>.<ext>`
pub fn artifact_file_name(name: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        underscored(name),
        at.timestamp_millis(),
        format.extension()
    )
}

// ============================================================================
// SESSION
// ============================================================================

/// Caller-side selection state: chosen template and included columns.
#[derive(Debug, Clone, Default)]
pub struct ExportSession {
    selected: Option<Template>,
    included: Vec<String>,
}

impl ExportSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a template; every one of its columns becomes included
    pub fn select(&mut self, template: Template) {
        self.included = template.display_names();
        self.selected = Some(template);
    }

    pub fn selected(&self) -> Option<&Template> {
        self.selected.as_ref()
    }

    pub fn included(&self) -> &[String] {
        &self.included
    }

    /// Flip one column in or out, keeping template order
    pub fn toggle(&mut self, column: &str) {
        let Some(template) = &self.selected else {
            return;
        };

        if self.included.iter().any(|c| c == column) {
            self.included.retain(|c| c != column);
        } else if template.display_names().iter().any(|c| c == column) {
            let mut next = template.display_names();
            next.retain(|c| c == column || self.included.contains(c));
            self.included = next;
        }
    }

    /// Clear the selection if the removed template was the selected one
    pub fn on_template_removed(&mut self, id: Uuid) {
        if self.selected.as_ref().and_then(|t| t.id) == Some(id) {
            self.selected = None;
            self.included.clear();
        }
    }

    pub fn query(&self, criteria: ExportCriteria) -> ExportQuery {
        ExportQuery {
            criteria,
            included_fields: Some(self.included.clone()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
