// 📐 Validation & Coercion Ruleset
// Generic per-type format checks plus the built-in import shapes.
//
// Generic checks only say yes/no. Shapes go further: they require columns,
// check formats, and default some values silently instead of rejecting them.

use crate::codec::{self, Row};
use crate::error::{ExchangeError, Result};
use crate::records::Record;
use crate::template::{EntityKind, FieldTemplate, ValueType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// ============================================================================
// GENERIC FORMAT CHECKS
// ============================================================================

/// `local@domain.tld`: no whitespace, something before `@`, a dot with text
/// on both sides somewhere after it.
pub fn is_valid_email(value: &str) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }

    value.char_indices().any(|(at, c)| {
        if c != '@' || at == 0 {
            return false;
        }
        let domain = &value[at + 1..];
        domain
            .char_indices()
            .any(|(dot, d)| d == '.' && dot > 0 && dot + 1 < domain.len())
    })
}

/// Literal `YYYY-MM-DD` shape (digits and dashes only, no calendar check)
pub fn is_iso_date_literal(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Accepts `YYYY-MM-DD` and `DD/MM/YYYY` calendar dates
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

/// Number with either `.` or `,` as decimal separator
pub fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "sí" | "si" | "yes" | "1" | "verdadero" => Some(true),
        "false" | "no" | "0" | "falso" => Some(false),
        _ => None,
    }
}

/// Digits with optional `+`, spaces, dashes, dots and parentheses; 6 to 15 digits
pub fn is_valid_phone(value: &str) -> bool {
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'));
    let digits = value.chars().filter(char::is_ascii_digit).count();
    allowed && (6..=15).contains(&digits)
}

/// Format check for one value of a given type. Never clamps or defaults.
pub fn check_value(
    value_type: ValueType,
    value: &str,
    options: &[String],
) -> std::result::Result<(), String> {
    let ok = match value_type {
        ValueType::Text => true,
        ValueType::Number => parse_number(value).is_some(),
        ValueType::Date => parse_date(value).is_some(),
        ValueType::Boolean => parse_boolean(value).is_some(),
        ValueType::Email => is_valid_email(value),
        ValueType::Phone => is_valid_phone(value),
        ValueType::List => options.iter().any(|o| o.trim() == value.trim()),
    };

    if ok {
        Ok(())
    } else if value_type == ValueType::List {
        Err(format!(
            "'{}' is not one of: {}",
            value,
            options.join(", ")
        ))
    } else {
        Err(format!("'{}' is not a valid {}", value, value_type.label().to_lowercase()))
    }
}

/// Check a cell against a template field, including the required flag.
pub fn check_field(field: &FieldTemplate, value: Option<&str>) -> std::result::Result<(), String> {
    match value {
        None if field.required => Err(format!("{} is required", field.display_name)),
        None => Ok(()),
        Some(v) => check_value(field.value_type, v, &field.options),
    }
}

// ============================================================================
// ENUMERATIONS USED BY THE SHAPES
// ============================================================================

/// Fixed set of user kinds accepted by the user-like shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Administrator,
    Clinic,
    Counselor,
    Examiner,
    Family,
}

impl UserKind {
    pub const ALL: [UserKind; 5] = [
        UserKind::Administrator,
        UserKind::Clinic,
        UserKind::Counselor,
        UserKind::Examiner,
        UserKind::Family,
    ];

    /// Value stored on records and written in files
    pub fn code(&self) -> &'static str {
        match self {
            UserKind::Administrator => "administrador",
            UserKind::Clinic => "clinica",
            UserKind::Counselor => "orientador",
            UserKind::Examiner => "examinador",
            UserKind::Family => "familia",
        }
    }

    /// Case-insensitive lookup by stored code or English name
    pub fn parse(value: &str) -> Option<UserKind> {
        let lower = value.trim().to_lowercase();
        UserKind::ALL.into_iter().find(|k| {
            k.code() == lower || format!("{:?}", k).to_lowercase() == lower
        })
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub const CONSENT_DEFAULT: &str = "Pendiente";
pub const PAYMENT_DEFAULT: &str = "B2B";

/// Consent normalized to `Sí`, `No`, `Pendiente` or `N/A`; anything else is `Pendiente`
pub fn normalize_consent(value: Option<&str>) -> &'static str {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("sí") | Some("si") => "Sí",
        Some("no") => "No",
        Some("pendiente") => "Pendiente",
        Some("n/a") | Some("na") => "N/A",
        _ => CONSENT_DEFAULT,
    }
}

/// Payment type normalized to `B2B` or `B2B2C` (case-insensitive), default `B2B`
pub fn normalize_payment_type(value: Option<&str>) -> &'static str {
    match value.map(|v| v.trim().to_uppercase()).as_deref() {
        Some("B2B2C") => "B2B2C",
        _ => PAYMENT_DEFAULT,
    }
}

/// Percentage in `[0, 100]`; missing, non-numeric or out-of-range becomes 0
pub fn coerce_percentage(value: Option<&str>) -> f64 {
    value
        .and_then(parse_number)
        .filter(|n| (0.0..=100.0).contains(n))
        .unwrap_or(0.0)
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ============================================================================
// SHAPES
// ============================================================================

/// Built-in import shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportShape {
    #[serde(alias = "usuarios")]
    Users,
    #[serde(alias = "alumnos")]
    Students,
}

impl ImportShape {
    pub const ALL: [ImportShape; 2] = [ImportShape::Users, ImportShape::Students];

    pub fn code(&self) -> &'static str {
        match self {
            ImportShape::Users => "users",
            ImportShape::Students => "students",
        }
    }

    /// Record kind created by this shape
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ImportShape::Users => EntityKind::User,
            ImportShape::Students => EntityKind::Student,
        }
    }

    /// Guess the shape from an uploaded file name
    ///
    /// "alumnos_3B.csv" → Students, "usuarios.csv" → Users, otherwise None.
    pub fn detect(file_name: &str) -> Option<ImportShape> {
        let lower = file_name.to_lowercase();
        if lower.contains("alumnos") {
            Some(ImportShape::Students)
        } else if lower.contains("usuarios") {
            Some(ImportShape::Users)
        } else {
            None
        }
    }

    /// Download name of the blank starter file
    pub fn blank_file_name(&self) -> &'static str {
        match self {
            ImportShape::Users => "plantilla_usuarios.csv",
            ImportShape::Students => "plantilla_alumnos.csv",
        }
    }
}

impl fmt::Display for ImportShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ImportShape {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "users" | "user" | "usuarios" => Ok(ImportShape::Users),
            "students" | "student" | "alumnos" => Ok(ImportShape::Students),
            other => Err(ExchangeError::UnknownShape(other.to_string())),
        }
    }
}

/// How one column's raw cell becomes a record value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Text,
    Lowercase,
    Email,
    UserKind,
    /// Literal YYYY-MM-DD
    IsoDate,
    /// Silent default to 0 outside [0, 100]
    Percentage,
    /// Silent default to `Pendiente`
    Consent,
    /// Silent default to `B2B`
    PaymentType,
}

impl Coercion {
    /// Enumerated values are checked before free-form formats
    fn precedence(&self) -> u8 {
        match self {
            Coercion::UserKind => 0,
            _ => 1,
        }
    }

    fn apply(&self, raw: Option<&str>) -> std::result::Result<Option<Value>, String> {
        let text = |s: &str| Some(Value::String(s.to_string()));

        match (self, raw) {
            (Coercion::Percentage, _) => {
                let pct = coerce_percentage(raw);
                if pct == 0.0 && raw.is_some_and(|v| parse_number(v) != Some(0.0)) {
                    debug!("percentage outside [0, 100] defaulted to 0");
                }
                Ok(Some(number_value(pct)))
            }
            (Coercion::Consent, _) => Ok(text(normalize_consent(raw))),
            (Coercion::PaymentType, _) => Ok(text(normalize_payment_type(raw))),
            (_, None) => Ok(None),
            (Coercion::Text, Some(v)) => Ok(text(v)),
            (Coercion::Lowercase, Some(v)) => Ok(text(&v.to_lowercase())),
            (Coercion::Email, Some(v)) => {
                if is_valid_email(v) {
                    Ok(text(v))
                } else {
                    Err(format!("invalid email format: '{}'", v))
                }
            }
            (Coercion::UserKind, Some(v)) => UserKind::parse(v)
                .map(|k| text(k.code()))
                .ok_or_else(|| format!("invalid user kind: '{}'", v)),
            (Coercion::IsoDate, Some(v)) => {
                if is_iso_date_literal(v) {
                    Ok(text(v))
                } else {
                    Err(format!("invalid date format: '{}', expected YYYY-MM-DD", v))
                }
            }
        }
    }
}

/// One column of a built-in shape.
#[derive(Debug, Clone)]
pub struct ColumnRule {
    /// Header in the delimited file
    pub header: &'static str,
    /// Attribute on the created record
    pub attribute: &'static str,
    pub required: bool,
    pub coercion: Coercion,
    /// Example value for the blank starter file
    pub sample: &'static str,
}

impl ColumnRule {
    fn new(header: &'static str, attribute: &'static str, coercion: Coercion, sample: &'static str) -> Self {
        ColumnRule {
            header,
            attribute,
            required: false,
            coercion,
            sample,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Validation table of one shape: columns, coercions and derived attributes.
#[derive(Clone)]
pub struct ShapeDescriptor {
    pub shape: ImportShape,
    pub columns: Vec<ColumnRule>,
    derive: fn(&Row, &mut Record),
}

impl fmt::Debug for ShapeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShapeDescriptor")
            .field("shape", &self.shape)
            .field("columns", &self.columns.len())
            .finish()
    }
}

impl ShapeDescriptor {
    pub fn kind(&self) -> EntityKind {
        self.shape.entity_kind()
    }

    /// Column headers in file order
    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.header.to_string()).collect()
    }

    /// Turn a parsed row into the record to persist, or explain why not.
    ///
    /// Required columns are checked first (all missing ones reported together),
    /// then enumerated values, then each column's format in file order.
    /// Defaulting columns never fail.
    pub fn validate(&self, row: &Row) -> std::result::Result<Record, String> {
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.required && row.get(c.header).is_none())
            .map(|c| c.header)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required fields: {}", missing.join(", ")));
        }

        let mut ordered: Vec<&ColumnRule> = self.columns.iter().collect();
        ordered.sort_by_key(|c| c.coercion.precedence());

        let mut record = Record::new();
        for column in ordered {
            if let Some(value) = column.coercion.apply(row.get(column.header))? {
                record.insert(column.attribute.to_string(), value);
            }
        }

        (self.derive)(row, &mut record);
        Ok(record)
    }

    /// Starter file: all headers plus one sample row
    pub fn blank_file(&self) -> Result<String> {
        let sample: Vec<String> = self.columns.iter().map(|c| c.sample.to_string()).collect();
        codec::serialize(&self.headers(), &[sample])
    }

    fn users() -> Self {
        use Coercion::{Email, Text, UserKind as Kind};

        ShapeDescriptor {
            shape: ImportShape::Users,
            columns: vec![
                ColumnRule::new("Nombre Completo", "full_name", Text, "Ana García López"),
                ColumnRule::new("Email", "email", Email, "ana.garcia@email.com").required(),
                ColumnRule::new("Teléfono", "phone", Text, "612345678"),
                ColumnRule::new("Tipo de Usuario", "user_kind", Kind, "familia").required(),
                ColumnRule::new("DNI", "dni", Text, "12345678A"),
                ColumnRule::new("Fecha de Nacimiento (YYYY-MM-DD)", "birth_date", Text, "1985-06-20"),
                ColumnRule::new("Nacionalidad", "nationality", Text, "Española"),
                ColumnRule::new("Dirección", "address", Text, "Calle Falsa 123"),
                ColumnRule::new("Código Postal", "postal_code", Text, "28001"),
                ColumnRule::new("Localidad", "city", Text, "Madrid"),
                ColumnRule::new("Provincia", "province", Text, "Madrid"),
                ColumnRule::new("País", "country", Text, "España"),
                ColumnRule::new("ID Centro (Si aplica)", "center_id", Text, "CENTRO_001"),
                ColumnRule::new("Especialidad (Para clínica/orientador)", "specialty", Text, ""),
                ColumnRule::new("Número Colegiado (Para clínica/orientador)", "license_number", Text, ""),
                ColumnRule::new("Contraseña (Opcional)", "password", Text, "micontraseña123"),
                ColumnRule::new("ID Responsable (Email/DNI, si aplica)", "responsible_id", Text, ""),
                ColumnRule::new("Observaciones", "observations", Text, "Notas adicionales para Ana"),
            ],
            derive: |row, record| {
                let status = if row.get("Contraseña (Opcional)").is_some() {
                    "active_with_password"
                } else {
                    "pending_invitation"
                };
                record.insert("status".to_string(), Value::from(status));
            },
        }
    }

    fn students() -> Self {
        use Coercion::{Consent, IsoDate, Lowercase, PaymentType, Percentage, Text};

        ShapeDescriptor {
            shape: ImportShape::Students,
            columns: vec![
                ColumnRule::new("Nombre Completo", "full_name", Text, "Juan Pérez Martín").required(),
                ColumnRule::new("Fecha de Nacimiento (YYYY-MM-DD)", "birth_date", IsoDate, "2015-03-15")
                    .required(),
                ColumnRule::new("Género", "gender", Lowercase, "masculino"),
                ColumnRule::new("DNI (Opcional)", "dni", Text, "98765432B"),
                ColumnRule::new("Nacionalidad", "nationality", Text, "Española"),
                ColumnRule::new("Dirección", "address", Text, "Avenida Siempre Viva 742"),
                ColumnRule::new("Código Postal", "postal_code", Text, "08001"),
                ColumnRule::new("Localidad", "city", Text, "Barcelona"),
                ColumnRule::new("Provincia", "province", Text, "Barcelona"),
                ColumnRule::new("País", "country", Text, "España"),
                ColumnRule::new("Etapa", "stage", Text, "Educación Primaria").required(),
                ColumnRule::new("Curso", "course", Text, "3º Primaria").required(),
                ColumnRule::new("Grupo/Clase", "class_group", Text, "A"),
                ColumnRule::new("ID Centro", "center_id", Text, "CENTRO_001").required(),
                ColumnRule::new("ID Padre/Madre/Tutor 1 (Email o DNI)", "family_user_id", Text, "padre.juan@email.com"),
                ColumnRule::new("ID Padre/Madre/Tutor 2 (Email o DNI)", "family_user_id_2", Text, "madre.juan@email.com"),
                ColumnRule::new("Grado de Discapacidad (%)", "disability_degree", Percentage, "0"),
                ColumnRule::new("Necesidades Educativas Especiales (NEE)", "special_educational_needs", Text, "Dislexia"),
                ColumnRule::new("Observaciones Médicas", "medical_observations", Text, "Alergia al cacahuete"),
                ColumnRule::new("Observaciones Generales", "general_observations", Text, "Necesita atención especial en lectura"),
                ColumnRule::new("Consentimiento Informado (Sí, No, Pendiente, N/A)", "consent_given", Consent, "Pendiente"),
                ColumnRule::new("Tipo de Pago (B2B/B2B2C)", "payment_type", PaymentType, "B2B"),
            ],
            derive: |_, record| {
                record.insert("active".to_string(), Value::Bool(true));
            },
        }
    }
}

// ============================================================================
// SHAPE REGISTRY
// ============================================================================

/// Shape descriptors keyed by shape tag.
pub struct ShapeRegistry {
    shapes: HashMap<ImportShape, ShapeDescriptor>,
}

impl ShapeRegistry {
    pub fn empty() -> Self {
        ShapeRegistry {
            shapes: HashMap::new(),
        }
    }

    /// Registry with the user-like and student-like shapes
    pub fn builtin() -> Self {
        let mut registry = ShapeRegistry::empty();
        registry.register(ShapeDescriptor::users());
        registry.register(ShapeDescriptor::students());
        registry
    }

    pub fn register(&mut self, descriptor: ShapeDescriptor) {
        self.shapes.insert(descriptor.shape, descriptor);
    }

    pub fn get(&self, shape: ImportShape) -> Option<&ShapeDescriptor> {
        self.shapes.get(&shape)
    }

    pub fn require(&self, shape: ImportShape) -> Result<&ShapeDescriptor> {
        self.get(shape)
            .ok_or_else(|| ExchangeError::UnknownShape(shape.code().to_string()))
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> Row {
        let cells = pairs
            .iter()
            .map(|(h, v)| {
                let value = if v.is_empty() { None } else { Some(v.to_string()) };
                (h.to_string(), value)
            })
            .collect();
        Row::new(2, cells)
    }

    fn student_row(extra: &[(&str, &str)]) -> Row {
        let mut pairs = vec![
            ("Nombre Completo", "Juan Pérez"),
            ("Fecha de Nacimiento (YYYY-MM-DD)", "2015-03-15"),
            ("Etapa", "Educación Primaria"),
            ("Curso", "3º Primaria"),
            ("ID Centro", "CENTRO_001"),
        ];
        pairs.extend_from_slice(extra);
        row(&pairs)
    }

    fn users() -> ShapeDescriptor {
        ShapeRegistry::builtin().get(ImportShape::Users).unwrap().clone()
    }

    fn students() -> ShapeDescriptor {
        ShapeRegistry::builtin().get(ImportShape::Students).unwrap().clone()
    }

    #[test]
    fn test_email_pattern() {
        assert!(is_valid_email("ana@x.com"));
        assert!(is_valid_email("a.b+c@sub.domain.es"));
        assert!(!is_valid_email("ana@x"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("ana @x.com"));
        assert!(!is_valid_email("ana@x."));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn test_iso_date_literal() {
        assert!(is_iso_date_literal("2015-03-15"));
        // Shape only: no calendar check
        assert!(is_iso_date_literal("2015-13-45"));
        assert!(!is_iso_date_literal("15/03/2015"));
        assert!(!is_iso_date_literal("2015-3-15"));
        assert!(!is_iso_date_literal("2015-03-15 "));
    }

    #[test]
    fn test_generic_checks_do_not_default() {
        let options = vec!["A".to_string(), "B".to_string()];

        assert!(check_value(ValueType::Number, "12,5", &[]).is_ok());
        assert!(check_value(ValueType::Number, "doce", &[]).is_err());
        assert!(check_value(ValueType::Date, "2024-02-30", &[]).is_err());
        assert!(check_value(ValueType::Date, "15/03/2015", &[]).is_ok());
        assert!(check_value(ValueType::Boolean, "Sí", &[]).is_ok());
        assert!(check_value(ValueType::Boolean, "quizá", &[]).is_err());
        assert!(check_value(ValueType::Phone, "+34 612 345 678", &[]).is_ok());
        assert!(check_value(ValueType::Phone, "12ab", &[]).is_err());
        assert!(check_value(ValueType::List, "B", &options).is_ok());
        assert!(check_value(ValueType::List, "C", &options).is_err());
        assert!(check_value(ValueType::Text, "anything", &[]).is_ok());
    }

    #[test]
    fn test_check_field_required() {
        let field = FieldTemplate::import("Nota", ValueType::Number).required();

        let err = check_field(&field, None).unwrap_err();
        assert!(err.contains("Nota"));
        assert!(check_field(&field, Some("7")).is_ok());
    }

    #[test]
    fn test_user_kind_parse() {
        assert_eq!(UserKind::parse("Administrador"), Some(UserKind::Administrator));
        assert_eq!(UserKind::parse("familia"), Some(UserKind::Family));
        assert_eq!(UserKind::parse("counselor"), Some(UserKind::Counselor));
        assert_eq!(UserKind::parse("director"), None);
    }

    #[test]
    fn test_user_missing_email_is_rejected() {
        let err = users()
            .validate(&row(&[("Email", ""), ("Tipo de Usuario", "administrador")]))
            .unwrap_err();

        assert!(err.contains("Email"));
        assert!(!err.contains("Tipo de Usuario"));
    }

    #[test]
    fn test_user_unknown_kind_is_rejected() {
        let err = users()
            .validate(&row(&[("Email", "a@b.com"), ("Tipo de Usuario", "director")]))
            .unwrap_err();
        assert!(err.contains("director"));
    }

    #[test]
    fn test_user_bad_email_is_rejected() {
        let err = users()
            .validate(&row(&[("Email", "not-an-email"), ("Tipo de Usuario", "familia")]))
            .unwrap_err();
        assert!(err.contains("email"));
    }

    #[test]
    fn test_user_kind_is_checked_before_email_format() {
        let err = users()
            .validate(&row(&[("Email", "not-an-email"), ("Tipo de Usuario", "director")]))
            .unwrap_err();

        assert!(err.contains("invalid user kind"));
        assert!(!err.contains("not-an-email"));
    }

    #[test]
    fn test_user_status_from_password() {
        let shape = users();

        let pending = shape
            .validate(&row(&[("Email", "a@b.com"), ("Tipo de Usuario", "FAMILIA")]))
            .unwrap();
        assert_eq!(pending["status"], "pending_invitation");
        assert_eq!(pending["user_kind"], "familia");
        assert!(!pending.contains_key("phone"));

        let active = shape
            .validate(&row(&[
                ("Email", "a@b.com"),
                ("Tipo de Usuario", "clinica"),
                ("Contraseña (Opcional)", "s3cret"),
            ]))
            .unwrap();
        assert_eq!(active["status"], "active_with_password");
    }

    #[test]
    fn test_student_requires_core_fields() {
        let err = students()
            .validate(&row(&[("Nombre Completo", "Juan"), ("Etapa", "ESO")]))
            .unwrap_err();

        assert!(err.contains("Fecha de Nacimiento"));
        assert!(err.contains("Curso"));
        assert!(err.contains("ID Centro"));
        assert!(!err.contains("Etapa"));
    }

    #[test]
    fn test_student_birth_date_must_be_literal_iso() {
        let bad = row(&[
            ("Nombre Completo", "Juan"),
            ("Fecha de Nacimiento (YYYY-MM-DD)", "15/03/2015"),
            ("Etapa", "ESO"),
            ("Curso", "1º ESO"),
            ("ID Centro", "C1"),
        ]);
        let err = students().validate(&bad).unwrap_err();
        assert!(err.contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_student_defaults() {
        let record = students().validate(&student_row(&[])).unwrap();

        assert_eq!(record["disability_degree"], 0);
        assert_eq!(record["consent_given"], "Pendiente");
        assert_eq!(record["payment_type"], "B2B");
        assert_eq!(record["active"], true);
        assert!(!record.contains_key("class_group"));
    }

    #[test]
    fn test_disability_out_of_range_defaults_to_zero() {
        let shape = students();

        for raw in ["150", "-5", "mucho", "NaN"] {
            let record = shape
                .validate(&student_row(&[("Grado de Discapacidad (%)", raw)]))
                .unwrap();
            assert_eq!(record["disability_degree"], 0, "value {raw}");
        }

        let record = shape
            .validate(&student_row(&[("Grado de Discapacidad (%)", "33,5")]))
            .unwrap();
        assert_eq!(record["disability_degree"], 33.5);
    }

    #[test]
    fn test_consent_and_payment_normalization() {
        assert_eq!(normalize_consent(Some("si")), "Sí");
        assert_eq!(normalize_consent(Some("NO")), "No");
        assert_eq!(normalize_consent(Some("n/a")), "N/A");
        assert_eq!(normalize_consent(Some("quizá")), "Pendiente");
        assert_eq!(normalize_consent(None), "Pendiente");

        assert_eq!(normalize_payment_type(Some("b2b2c")), "B2B2C");
        assert_eq!(normalize_payment_type(Some("B2C")), "B2B");
        assert_eq!(normalize_payment_type(None), "B2B");
    }

    #[test]
    fn test_defaulting_is_idempotent() {
        let shape = students();
        let first = shape
            .validate(&student_row(&[
                ("Grado de Discapacidad (%)", "150"),
                ("Consentimiento Informado (Sí, No, Pendiente, N/A)", "tal vez"),
                ("Tipo de Pago (B2B/B2B2C)", "b2b2c"),
            ]))
            .unwrap();

        // Feed the defaulted values back through the same shape
        let again: Vec<(&str, String)> = shape
            .columns
            .iter()
            .filter_map(|c| {
                first
                    .get(c.attribute)
                    .map(|v| (c.header, v.as_str().map_or_else(|| v.to_string(), str::to_string)))
            })
            .collect();
        let pairs: Vec<(&str, &str)> = again.iter().map(|(h, v)| (*h, v.as_str())).collect();
        let second = shape.validate(&row(&pairs)).unwrap();

        assert_eq!(first, second);
        assert_eq!(second["disability_degree"], 0);
        assert_eq!(second["consent_given"], "Pendiente");
        assert_eq!(second["payment_type"], "B2B2C");
    }

    #[test]
    fn test_blank_file_has_headers_and_sample() {
        let text = students().blank_file().unwrap();
        let parsed = codec::parse(&text);

        assert_eq!(parsed.headers, students().headers());
        assert_eq!(parsed.rows.len(), 1);
        // The sample row itself passes validation
        assert!(students().validate(&parsed.rows[0]).is_ok());
        assert!(users().validate(&codec::parse(&users().blank_file().unwrap()).rows[0]).is_ok());
    }

    #[test]
    fn test_detect_shape_from_file_name() {
        assert_eq!(ImportShape::detect("Alumnos_3B.csv"), Some(ImportShape::Students));
        assert_eq!(ImportShape::detect("nuevos_usuarios.csv"), Some(ImportShape::Users));
        assert_eq!(ImportShape::detect("datos.csv"), None);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ShapeRegistry::builtin();
        assert_eq!(registry.require(ImportShape::Users).unwrap().kind(), EntityKind::User);

        let empty = ShapeRegistry::empty();
        assert!(matches!(
            empty.require(ImportShape::Students),
            Err(ExchangeError::UnknownShape(_))
        ));
    }
}
