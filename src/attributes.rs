// 🏛️ Attribute Catalog
// Which attributes each record kind carries, what they mean, how they are typed.
//
// The catalog answers `schema(kind)` for the persistence layer, feeds the
// source-field list of the export template editor and the destination
// choices of the import template editor. It never drives runtime validation.

use crate::template::{EntityKind, ValueType};
use serde::{Deserialize, Serialize};

// ============================================================================
// ATTRIBUTE DESCRIPTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub kind: EntityKind,

    /// Attribute name on the stored record (e.g. "birth_date")
    pub name: String,

    /// Default column label (e.g. "Fecha Nacimiento")
    pub label: String,

    pub value_type: ValueType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Never offered as an export source
    #[serde(default)]
    pub sensitive: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl AttributeDescriptor {
    pub fn new(
        kind: EntityKind,
        name: impl Into<String>,
        label: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        AttributeDescriptor {
            kind,
            name: name.into(),
            label: label.into(),
            value_type,
            description: String::new(),
            sensitive: false,
            examples: Vec::new(),
        }
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Builder: add example
    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    /// Builder: hide from export sources
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// "User.email" style reference used by import templates
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.kind.entity_name(), self.name)
    }
}

// ============================================================================
// ATTRIBUTE CATALOG
// ============================================================================

pub struct AttributeCatalog {
    attributes: Vec<AttributeDescriptor>,
}

impl AttributeCatalog {
    /// Catalog with the attributes of every built-in record kind
    pub fn new() -> Self {
        let mut catalog = AttributeCatalog {
            attributes: Vec::new(),
        };

        catalog.register_user_attributes();
        catalog.register_student_attributes();
        catalog
    }

    fn register_user_attributes(&mut self) {
        use EntityKind::User;
        use ValueType::{Boolean, Date, Email, List, Phone, Text};

        self.register(
            AttributeDescriptor::new(User, "full_name", "Nombre Completo", Text)
                .with_example("Ana García López"),
        );
        self.register(
            AttributeDescriptor::new(User, "email", "Email", Email)
                .with_description("Login identity, unique among users")
                .with_example("ana.garcia@email.com"),
        );
        self.register(AttributeDescriptor::new(User, "phone", "Teléfono", Phone));
        self.register(
            AttributeDescriptor::new(User, "user_kind", "Tipo de Usuario", List)
                .with_description("administrador, clinica, orientador, examinador or familia")
                .with_example("familia"),
        );
        self.register(AttributeDescriptor::new(User, "dni", "DNI", Text));
        self.register(AttributeDescriptor::new(User, "birth_date", "Fecha de Nacimiento", Date));
        self.register(AttributeDescriptor::new(User, "nationality", "Nacionalidad", Text));
        self.register(AttributeDescriptor::new(User, "address", "Dirección", Text));
        self.register(AttributeDescriptor::new(User, "postal_code", "Código Postal", Text));
        self.register(AttributeDescriptor::new(User, "city", "Localidad", Text));
        self.register(AttributeDescriptor::new(User, "province", "Provincia", Text));
        self.register(AttributeDescriptor::new(User, "country", "País", Text));
        self.register(
            AttributeDescriptor::new(User, "center_id", "Centro", Text).with_example("CENTRO_001"),
        );
        self.register(AttributeDescriptor::new(User, "specialty", "Especialidad", Text));
        self.register(AttributeDescriptor::new(User, "license_number", "Nº Colegiado", Text));
        self.register(AttributeDescriptor::new(User, "password", "Contraseña", Text).sensitive());
        self.register(AttributeDescriptor::new(User, "responsible_id", "ID Responsable", Text));
        self.register(AttributeDescriptor::new(User, "observations", "Observaciones", Text));
        self.register(
            AttributeDescriptor::new(User, "status", "Estado", List)
                .with_description("active_with_password or pending_invitation"),
        );
        self.register(AttributeDescriptor::new(User, "active", "Activo", Boolean));
        self.register(
            AttributeDescriptor::new(User, "created_date", "Fecha Creación", Date)
                .with_description("Set by the store on create"),
        );
        self.register(AttributeDescriptor::new(User, "last_access", "Último Acceso", Date));
    }

    fn register_student_attributes(&mut self) {
        use EntityKind::Student;
        use ValueType::{Boolean, Date, List, Number, Text};

        self.register(AttributeDescriptor::new(Student, "full_name", "Nombre Completo", Text));
        self.register(
            AttributeDescriptor::new(Student, "birth_date", "Fecha Nacimiento", Date)
                .with_example("2015-03-15"),
        );
        self.register(
            AttributeDescriptor::new(Student, "gender", "Género", List)
                .with_description("masculino, femenino or otro"),
        );
        self.register(AttributeDescriptor::new(Student, "dni", "DNI", Text));
        self.register(AttributeDescriptor::new(Student, "nationality", "Nacionalidad", Text));
        self.register(AttributeDescriptor::new(Student, "address", "Dirección", Text));
        self.register(AttributeDescriptor::new(Student, "postal_code", "Código Postal", Text));
        self.register(AttributeDescriptor::new(Student, "city", "Localidad", Text));
        self.register(AttributeDescriptor::new(Student, "province", "Provincia", Text));
        self.register(AttributeDescriptor::new(Student, "country", "País", Text));
        self.register(
            AttributeDescriptor::new(Student, "stage", "Etapa Educativa", Text)
                .with_example("Educación Primaria"),
        );
        self.register(
            AttributeDescriptor::new(Student, "course", "Curso", Text).with_example("3º Primaria"),
        );
        self.register(AttributeDescriptor::new(Student, "class_group", "Grupo/Clase", Text));
        self.register(AttributeDescriptor::new(Student, "center_id", "Centro", Text));
        self.register(AttributeDescriptor::new(Student, "family_user_id", "Tutor 1", Text));
        self.register(AttributeDescriptor::new(Student, "family_user_id_2", "Tutor 2", Text));
        self.register(
            AttributeDescriptor::new(Student, "disability_degree", "Grado de Discapacidad", Number)
                .with_description("Percentage in [0, 100]"),
        );
        self.register(AttributeDescriptor::new(
            Student,
            "special_educational_needs",
            "Necesidades Educativas Especiales",
            Text,
        ));
        self.register(AttributeDescriptor::new(
            Student,
            "medical_observations",
            "Observaciones Médicas",
            Text,
        ));
        self.register(AttributeDescriptor::new(
            Student,
            "general_observations",
            "Observaciones Generales",
            Text,
        ));
        self.register(AttributeDescriptor::new(Student, "active", "Estado Activo", Boolean));
        self.register(
            AttributeDescriptor::new(Student, "consent_given", "Consentimiento", List)
                .with_description("Sí, No, Pendiente or N/A"),
        );
        self.register(
            AttributeDescriptor::new(Student, "payment_type", "Tipo de Pago", List)
                .with_description("B2B or B2B2C"),
        );
        self.register(AttributeDescriptor::new(Student, "created_date", "Fecha Creación", Date));
    }

    /// Register a new attribute (replaces an existing one with the same kind and name)
    pub fn register(&mut self, attr: AttributeDescriptor) {
        self.attributes
            .retain(|a| !(a.kind == attr.kind && a.name == attr.name));
        self.attributes.push(attr);
    }

    pub fn get(&self, kind: EntityKind, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes
            .iter()
            .find(|a| a.kind == kind && a.name == name)
    }

    /// Every attribute of `kind`, in registration order
    pub fn schema(&self, kind: EntityKind) -> Vec<&AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.kind == kind).collect()
    }

    /// Attributes offered as export sources for `kind`
    pub fn exportable(&self, kind: EntityKind) -> Vec<&AttributeDescriptor> {
        self.attributes
            .iter()
            .filter(|a| a.kind == kind && !a.sensitive)
            .collect()
    }

    /// `(value, label)` pairs for an import template's destination selector
    pub fn destination_choices(&self, kind: EntityKind) -> Vec<(String, String)> {
        self.schema(kind)
            .into_iter()
            .map(|a| (a.qualified_name(), a.label.clone()))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.attributes.len()
    }
}

impl Default for AttributeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_has_both_kinds() {
        let catalog = AttributeCatalog::new();

        assert!(!catalog.schema(EntityKind::User).is_empty());
        assert!(!catalog.schema(EntityKind::Student).is_empty());
        assert_eq!(
            catalog.count(),
            catalog.schema(EntityKind::User).len() + catalog.schema(EntityKind::Student).len()
        );
    }

    #[test]
    fn test_get_by_kind_and_name() {
        let catalog = AttributeCatalog::new();

        let attr = catalog.get(EntityKind::Student, "disability_degree").unwrap();
        assert_eq!(attr.value_type, ValueType::Number);
        assert!(catalog.get(EntityKind::User, "disability_degree").is_none());
    }

    #[test]
    fn test_password_not_exportable() {
        let catalog = AttributeCatalog::new();

        assert!(catalog.get(EntityKind::User, "password").is_some());
        assert!(catalog
            .exportable(EntityKind::User)
            .iter()
            .all(|a| a.name != "password"));
    }

    #[test]
    fn test_destination_choices_are_qualified() {
        let catalog = AttributeCatalog::new();
        let choices = catalog.destination_choices(EntityKind::Student);

        assert!(choices
            .iter()
            .any(|(value, label)| value == "Student.course" && label == "Curso"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut catalog = AttributeCatalog::new();
        let before = catalog.count();

        catalog.register(
            AttributeDescriptor::new(EntityKind::User, "phone", "Móvil", ValueType::Phone)
                .with_example("612345678"),
        );

        assert_eq!(catalog.count(), before);
        assert_eq!(catalog.get(EntityKind::User, "phone").unwrap().label, "Móvil");
    }
}
