// 🧩 Templates - Declarative column mappings
// A Template is a named, ordered list of FieldTemplates. Import templates
// describe inbound columns; export templates project records into flat rows.

use crate::codec;
use crate::error::{ExchangeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// RECORD KINDS & VALUE TYPES
// ============================================================================

/// Record kinds this engine reads from and writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Student,
}

impl EntityKind {
    /// Fetch order for mixed-kind exports
    pub const ALL: [EntityKind; 2] = [EntityKind::User, EntityKind::Student];

    pub fn code(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Student => "student",
        }
    }

    /// Human-readable name for display
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::User => "Usuario",
            EntityKind::Student => "Alumno",
        }
    }

    /// Name used for destination attribute choices ("User.email")
    pub fn entity_name(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Student => "Student",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" | "users" | "usuario" | "usuarios" => Ok(EntityKind::User),
            "student" | "students" | "alumno" | "alumnos" => Ok(EntityKind::Student),
            other => Err(format!("unknown record kind: '{}'", other)),
        }
    }
}

/// Value type of a column. Accepts the Spanish editor names on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    #[serde(alias = "texto")]
    Text,
    #[serde(alias = "numero")]
    Number,
    #[serde(alias = "fecha")]
    Date,
    #[serde(alias = "booleano")]
    Boolean,
    Email,
    #[serde(alias = "telefono")]
    Phone,
    #[serde(alias = "lista")]
    List,
}

impl ValueType {
    pub fn label(&self) -> &'static str {
        match self {
            ValueType::Text => "Texto",
            ValueType::Number => "Número",
            ValueType::Date => "Fecha",
            ValueType::Boolean => "Booleano",
            ValueType::Email => "Email",
            ValueType::Phone => "Teléfono",
            ValueType::List => "Lista",
        }
    }
}

/// The two independent template families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    Import,
    Export,
}

impl TemplateFamily {
    pub fn code(&self) -> &'static str {
        match self {
            TemplateFamily::Import => "import",
            TemplateFamily::Export => "export",
        }
    }
}

impl FromStr for TemplateFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "import" => Ok(TemplateFamily::Import),
            "export" => Ok(TemplateFamily::Export),
            other => Err(format!("unknown template family: '{}'", other)),
        }
    }
}

// ============================================================================
// FIELD TEMPLATE
// ============================================================================

/// One column-level mapping rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTemplate {
    /// Record kind the value is read from (export). Implicit on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_kind: Option<EntityKind>,

    /// Attribute name on the source record
    #[serde(default)]
    pub source_attribute: String,

    /// Column header in output, or the column that feeds a destination on import
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub value_type: ValueType,

    /// Import only
    #[serde(default)]
    pub required: bool,

    /// Allowed values when `value_type` is `List`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Import only: attribute on the persisted record this column feeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_attribute: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldTemplate {
    /// Export column: `kind.attribute` rendered under `display_name`
    pub fn export(
        kind: EntityKind,
        attribute: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        FieldTemplate {
            source_kind: Some(kind),
            source_attribute: attribute.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Import column named `display_name`
    pub fn import(display_name: impl Into<String>, value_type: ValueType) -> Self {
        FieldTemplate {
            display_name: display_name.into(),
            value_type,
            ..Default::default()
        }
    }

    /// Builder: mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Builder: list options (switches the type to `List`)
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_type = ValueType::List;
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: destination attribute ("Student.course")
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination_attribute = Some(destination.into());
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Whether this entry carries everything its family needs
    pub fn is_complete(&self, family: TemplateFamily) -> bool {
        let named = !self.display_name.trim().is_empty();
        match family {
            TemplateFamily::Import => named,
            TemplateFamily::Export => {
                named && self.source_kind.is_some() && !self.source_attribute.trim().is_empty()
            }
        }
    }

    fn tidy(&mut self) {
        self.display_name = self.display_name.trim().to_string();
        self.source_attribute = self.source_attribute.trim().to_string();
        if self.value_type == ValueType::List {
            self.options.retain(|o| !o.trim().is_empty());
        } else {
            self.options.clear();
        }
    }
}

// ============================================================================
// TEMPLATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Assigned by the store on first save, stable across edits
    #[serde(default)]
    pub id: Option<Uuid>,

    pub family: TemplateFamily,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Free-form grouping ("pruebas", "resultados", "usuarios", ...)
    #[serde(default)]
    pub category: Option<String>,

    /// Output column order
    #[serde(default)]
    pub fields: Vec<FieldTemplate>,

    /// Set once at creation
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token; 0 until first save
    #[serde(default)]
    pub version: u32,
}

impl Template {
    pub fn new(family: TemplateFamily, name: impl Into<String>) -> Self {
        Template {
            id: None,
            family,
            name: name.into(),
            description: None,
            category: None,
            fields: Vec::new(),
            created_at: None,
            version: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_field(mut self, field: FieldTemplate) -> Self {
        self.fields.push(field);
        self
    }

    /// Drop incomplete fields and check what is left.
    ///
    /// Fails when the name is blank or no usable field remains.
    pub fn normalized(mut self) -> Result<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ExchangeError::InvalidTemplate(
                "template name is required".to_string(),
            ));
        }

        let family = self.family;
        self.fields.retain(|f| f.is_complete(family));
        for field in &mut self.fields {
            field.tidy();
        }

        if self.fields.is_empty() {
            return Err(ExchangeError::InvalidTemplate(format!(
                "template '{}' has no complete fields",
                self.name
            )));
        }

        Ok(self)
    }

    /// Fields usable right now, without mutating the template
    pub fn complete_fields(&self) -> impl Iterator<Item = &FieldTemplate> {
        let family = self.family;
        self.fields.iter().filter(move |f| f.is_complete(family))
    }

    /// Distinct source kinds referenced by complete fields, in fetch order
    pub fn source_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| self.complete_fields().any(|f| f.source_kind == Some(*kind)))
            .collect()
    }

    /// Display names of complete fields, first occurrence wins
    pub fn display_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for field in self.complete_fields() {
            let name = field.display_name.trim();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Header-only delimited file for users to fill in
    pub fn header_file(&self) -> Result<String> {
        codec::serialize(&self.display_names(), &[])
    }

    /// Download name for [`Template::header_file`]
    pub fn header_file_name(&self) -> String {
        format!("{}.csv", underscored(&self.name))
    }

    /// Unsaved copy with a marked name
    pub fn duplicate(&self) -> Template {
        Template {
            id: None,
            name: format!("{} (copia)", self.name),
            created_at: None,
            version: 0,
            ..self.clone()
        }
    }

    /// Case-insensitive match on name or description
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&term)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&term))
    }
}

/// Replace each whitespace run with `_`
pub(crate) fn underscored(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn export_template() -> Template {
        Template::new(TemplateFamily::Export, "  Listado familias ")
            .with_field(FieldTemplate::export(EntityKind::User, "email", "Email"))
            .with_field(FieldTemplate::export(EntityKind::Student, "full_name", "Nombre"))
            .with_field(FieldTemplate {
                source_kind: Some(EntityKind::Student),
                source_attribute: String::new(),
                display_name: "Sin origen".to_string(),
                ..Default::default()
            })
    }

    #[test]
    fn test_normalized_drops_incomplete_export_fields() {
        let template = export_template().normalized().unwrap();

        assert_eq!(template.name, "Listado familias");
        assert_eq!(template.fields.len(), 2);
        assert_eq!(template.display_names(), vec!["Email", "Nombre"]);
    }

    #[test]
    fn test_normalized_rejects_blank_name_and_empty_fields() {
        let blank = Template::new(TemplateFamily::Export, "   ")
            .with_field(FieldTemplate::export(EntityKind::User, "email", "Email"));
        assert!(matches!(blank.normalized(), Err(ExchangeError::InvalidTemplate(_))));

        let empty = Template::new(TemplateFamily::Export, "x")
            .with_field(FieldTemplate::import("Solo nombre", ValueType::Text));
        assert!(matches!(empty.normalized(), Err(ExchangeError::InvalidTemplate(_))));
    }

    #[test]
    fn test_import_fields_only_need_a_name() {
        let template = Template::new(TemplateFamily::Import, "Pruebas")
            .with_field(FieldTemplate::import("Código", ValueType::Text).required())
            .with_field(FieldTemplate::import("  ", ValueType::Number))
            .normalized()
            .unwrap();

        assert_eq!(template.fields.len(), 1);
        assert!(template.fields[0].required);
    }

    #[test]
    fn test_options_only_kept_for_lists() {
        let mut field = FieldTemplate::import("Nivel", ValueType::Text);
        field.options = vec!["A".to_string()];
        let list = FieldTemplate::import("Grupo", ValueType::Text).with_options(["A", " ", "B"]);

        let template = Template::new(TemplateFamily::Import, "t")
            .with_field(field)
            .with_field(list)
            .normalized()
            .unwrap();

        assert!(template.fields[0].options.is_empty());
        assert_eq!(template.fields[1].options, vec!["A", "B"]);
    }

    #[test]
    fn test_source_kinds_in_fetch_order() {
        let template = Template::new(TemplateFamily::Export, "mixed")
            .with_field(FieldTemplate::export(EntityKind::Student, "course", "Curso"))
            .with_field(FieldTemplate::export(EntityKind::User, "email", "Email"))
            .with_field(FieldTemplate::export(EntityKind::Student, "stage", "Etapa"));

        assert_eq!(template.source_kinds(), vec![EntityKind::User, EntityKind::Student]);
    }

    #[test]
    fn test_header_file() {
        let template = Template::new(TemplateFamily::Import, "Resultados  Junio")
            .with_field(FieldTemplate::import("Alumno", ValueType::Text))
            .with_field(FieldTemplate::import("Nota \"final\"", ValueType::Number));

        assert_eq!(
            template.header_file().unwrap(),
            "\u{FEFF}\"Alumno\";\"Nota \"\"final\"\"\""
        );
        assert_eq!(template.header_file_name(), "Resultados_Junio.csv");
    }

    #[test]
    fn test_duplicate_clears_identity() {
        let mut original = export_template();
        original.id = Some(Uuid::new_v4());
        original.version = 3;
        original.created_at = Some(Utc::now());

        let copy = original.duplicate();
        assert_eq!(copy.id, None);
        assert_eq!(copy.version, 0);
        assert_eq!(copy.created_at, None);
        assert!(copy.name.ends_with("(copia)"));
        assert_eq!(copy.fields, original.fields);
    }

    #[test]
    fn test_matches_name_or_description() {
        let template = Template::new(TemplateFamily::Import, "Resultados WISC")
            .with_description("Puntuaciones por subtest");

        assert!(template.matches("wisc"));
        assert!(template.matches("SUBTEST"));
        assert!(template.matches(""));
        assert!(!template.matches("bayley"));
    }

    #[test]
    fn test_spanish_value_type_names_deserialize() {
        let field: FieldTemplate = serde_json::from_str(
            r#"{"displayName":"Fecha prueba","valueType":"fecha","required":true}"#,
        )
        .unwrap();

        assert_eq!(field.value_type, ValueType::Date);
        assert!(field.required);
    }

    #[test]
    fn test_entity_kind_parsing() {
        assert_eq!("alumnos".parse::<EntityKind>(), Ok(EntityKind::Student));
        assert_eq!("User".parse::<EntityKind>(), Ok(EntityKind::User));
        assert!("center".parse::<EntityKind>().is_err());
    }
}
