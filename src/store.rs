// 📚 Template Store
// Durable keyed storage of templates with per-id upsert.
//
// Every save carries the version it was read at. A stale version fails with
// `StoreError::Conflict` instead of overwriting somebody else's edit.

use crate::error::{Result, StoreError};
use crate::template::{Template, TemplateFamily};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Repository over saved templates.
pub trait TemplateRepository {
    /// Templates in storage order, optionally restricted to one family
    fn list(&self, family: Option<TemplateFamily>) -> Result<Vec<Template>>;

    fn get(&self, id: Uuid) -> Result<Template>;

    /// Insert (no id) or replace (id + matching version). Returns the stored copy.
    fn save(&self, template: Template) -> Result<Template>;

    fn remove(&self, id: Uuid) -> Result<()>;

    fn search(&self, family: Option<TemplateFamily>, term: &str) -> Result<Vec<Template>> {
        Ok(self
            .list(family)?
            .into_iter()
            .filter(|t| t.matches(term))
            .collect())
    }
}

pub struct SqliteTemplateStore {
    conn: Connection,
}

impl SqliteTemplateStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path).map_err(StoreError::from)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(StoreError::from)?)
    }

    pub fn with_connection(conn: Connection) -> Result<Self> {
        setup_templates(&conn)?;
        Ok(SqliteTemplateStore { conn })
    }

    fn insert(&self, mut template: Template) -> Result<Template> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        template.id = Some(id);
        template.created_at = Some(now);
        template.version = 1;

        self.conn
            .execute(
                "INSERT INTO templates (
                    id, family, name, description, category, fields,
                    created_at, updated_at, version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
                params![
                    id.to_string(),
                    template.family.code(),
                    template.name,
                    template.description,
                    template.category,
                    serde_json::to_string(&template.fields).map_err(StoreError::from)?,
                    now.to_rfc3339(),
                    template.version,
                ],
            )
            .map_err(StoreError::from)?;

        info!(id = %id, name = %template.name, "template created");
        Ok(template)
    }

    fn replace(&self, id: Uuid, mut template: Template) -> Result<Template> {
        let expected = template.version;
        let affected = self
            .conn
            .execute(
                "UPDATE templates
                 SET family = ?1, name = ?2, description = ?3, category = ?4,
                     fields = ?5, updated_at = ?6, version = version + 1
                 WHERE id = ?7 AND version = ?8",
                params![
                    template.family.code(),
                    template.name,
                    template.description,
                    template.category,
                    serde_json::to_string(&template.fields).map_err(StoreError::from)?,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected,
                ],
            )
            .map_err(StoreError::from)?;

        if affected == 0 {
            let found: Option<u32> = self
                .conn
                .query_row(
                    "SELECT version FROM templates WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)?;

            return Err(match found {
                Some(found) => StoreError::Conflict { id, expected, found },
                None => StoreError::NotFound { id: id.to_string() },
            }
            .into());
        }

        // Identity and creation time always come from storage
        let stored = self.get(id)?;
        template.created_at = stored.created_at;
        template.version = stored.version;
        debug!(id = %id, version = template.version, "template replaced");
        Ok(template)
    }
}

impl TemplateRepository for SqliteTemplateStore {
    fn list(&self, family: Option<TemplateFamily>) -> Result<Vec<Template>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM templates ORDER BY seq", COLUMNS))
            .map_err(StoreError::from)?;

        let rows = stmt
            .query_map([], raw_template)
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let templates = rows
            .into_iter()
            .map(RawTemplate::decode)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(templates
            .into_iter()
            .filter(|t| family.map_or(true, |f| t.family == f))
            .collect())
    }

    fn get(&self, id: Uuid) -> Result<Template> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {} FROM templates WHERE id = ?1", COLUMNS),
                params![id.to_string()],
                raw_template,
            )
            .optional()
            .map_err(StoreError::from)?;

        match raw {
            Some(raw) => Ok(raw.decode()?),
            None => Err(StoreError::NotFound { id: id.to_string() }.into()),
        }
    }

    fn save(&self, template: Template) -> Result<Template> {
        let template = template.normalized()?;
        match template.id {
            None => self.insert(template),
            Some(id) => self.replace(id, template),
        }
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        let affected = self
            .conn
            .execute("DELETE FROM templates WHERE id = ?1", params![id.to_string()])
            .map_err(StoreError::from)?;

        if affected == 0 {
            return Err(StoreError::NotFound { id: id.to_string() }.into());
        }

        info!(id = %id, "template removed");
        Ok(())
    }
}

pub fn setup_templates(conn: &Connection) -> std::result::Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS templates (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            family TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_templates_family ON templates(family)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW DECODING
// ============================================================================

const COLUMNS: &str = "id, family, name, description, category, fields, created_at, version";

struct RawTemplate {
    id: String,
    family: String,
    name: String,
    description: Option<String>,
    category: Option<String>,
    fields: String,
    created_at: String,
    version: u32,
}

fn raw_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTemplate> {
    Ok(RawTemplate {
        id: row.get(0)?,
        family: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        fields: row.get(5)?,
        created_at: row.get(6)?,
        version: row.get(7)?,
    })
}

impl RawTemplate {
    fn decode(self) -> std::result::Result<Template, StoreError> {
        let id: Uuid = serde_json::from_value(Value::String(self.id))?;
        let family: TemplateFamily = serde_json::from_value(Value::String(self.family))?;
        let created_at: DateTime<Utc> = serde_json::from_value(Value::String(self.created_at))?;

        Ok(Template {
            id: Some(id),
            family,
            name: self.name,
            description: self.description,
            category: self.category,
            fields: serde_json::from_str(&self.fields)?,
            created_at: Some(created_at),
            version: self.version,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::template::{EntityKind, FieldTemplate, ValueType};

    fn export_template(name: &str) -> Template {
        Template::new(TemplateFamily::Export, name)
            .with_description("Contactos de familias")
            .with_field(FieldTemplate::export(EntityKind::User, "email", "Email"))
            .with_field(FieldTemplate::export(EntityKind::User, "", "Incompleto"))
    }

    fn import_template(name: &str) -> Template {
        Template::new(TemplateFamily::Import, name)
            .with_category("pruebas")
            .with_field(FieldTemplate::import("Código", ValueType::Text).required())
    }

    #[test]
    fn test_save_assigns_identity() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let saved = store.save(export_template("Familias")).unwrap();

        assert!(saved.id.is_some());
        assert!(saved.created_at.is_some());
        assert_eq!(saved.version, 1);
        // Incomplete fields never reach storage
        assert_eq!(saved.fields.len(), 1);

        let fetched = store.get(saved.id.unwrap()).unwrap();
        assert_eq!(fetched, saved);
    }

    #[test]
    fn test_save_rejects_invalid_template() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let empty = Template::new(TemplateFamily::Export, "Vacía");

        assert!(matches!(store.save(empty), Err(ExchangeError::InvalidTemplate(_))));
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_replace_keeps_id_and_created_at() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let saved = store.save(export_template("Familias")).unwrap();

        let mut edited = saved.clone();
        edited.name = "Familias 2024".to_string();
        edited.created_at = None;
        let updated = store.save(edited).unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(updated.created_at, saved.created_at);
        assert_eq!(updated.version, 2);
        assert_eq!(store.list(None).unwrap().len(), 1);
        assert_eq!(store.get(saved.id.unwrap()).unwrap().name, "Familias 2024");
    }

    #[test]
    fn test_stale_save_conflicts() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let saved = store.save(export_template("Familias")).unwrap();

        let mut first = saved.clone();
        first.name = "Editor A".to_string();
        let mut second = saved.clone();
        second.name = "Editor B".to_string();

        store.save(first).unwrap();
        let err = store.save(second).unwrap_err();

        match err {
            ExchangeError::Store(StoreError::Conflict { expected, found, .. }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get(saved.id.unwrap()).unwrap().name, "Editor A");
    }

    #[test]
    fn test_save_with_unknown_id_is_not_found() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let mut ghost = export_template("Fantasma");
        ghost.id = Some(Uuid::new_v4());
        ghost.version = 1;

        assert!(matches!(
            store.save(ghost),
            Err(ExchangeError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_list_in_storage_order_by_family() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.save(export_template("B")).unwrap();
        store.save(import_template("A")).unwrap();
        store.save(export_template("C")).unwrap();

        let names: Vec<String> = store.list(None).unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["B", "A", "C"]);

        let exports = store.list(Some(TemplateFamily::Export)).unwrap();
        assert_eq!(exports.len(), 2);
        let imports = store.list(Some(TemplateFamily::Import)).unwrap();
        assert_eq!(imports[0].category.as_deref(), Some("pruebas"));
    }

    #[test]
    fn test_remove() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let saved = store.save(import_template("Pruebas")).unwrap();
        let id = saved.id.unwrap();

        store.remove(id).unwrap();
        assert!(matches!(
            store.get(id),
            Err(ExchangeError::Store(StoreError::NotFound { .. }))
        ));
        assert!(store.remove(id).is_err());
    }

    #[test]
    fn test_duplicate_saves_as_new_entry() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        let saved = store.save(import_template("Pruebas")).unwrap();

        let copy = store.save(saved.duplicate()).unwrap();

        assert_ne!(copy.id, saved.id);
        assert_eq!(copy.name, "Pruebas (copia)");
        assert_eq!(copy.version, 1);
        assert_eq!(store.list(None).unwrap().len(), 2);
    }

    #[test]
    fn test_search() {
        let store = SqliteTemplateStore::open_in_memory().unwrap();
        store.save(export_template("Listado familias")).unwrap();
        store.save(import_template("Resultados WISC")).unwrap();

        assert_eq!(store.search(None, "wisc").unwrap().len(), 1);
        assert_eq!(store.search(None, "CONTACTOS").unwrap().len(), 1);
        assert_eq!(store.search(Some(TemplateFamily::Import), "familias").unwrap().len(), 0);
        assert_eq!(store.search(None, "").unwrap().len(), 2);
    }
}
