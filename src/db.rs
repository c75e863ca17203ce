use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::{
    Field, FieldChanges, FieldRow, FieldType, Form, FormRow, FormStatus, NewField, now_rfc3339,
};

/// Async-safe handle to the forms database.
///
/// Wraps `FormsDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads. The mutex also serializes the
/// read-max-then-insert pair in `create_field`, so concurrent creates cannot
/// observe the same order snapshot in-process.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<FormsDb>>,
}

impl DbHandle {
    pub fn new(db: FormsDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&FormsDb) -> Result<R, ApiError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| ApiError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Database task panicked: {}", e)))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

/// Slug uniqueness is enforced by the index, not a pre-check; the constraint
/// violation is what turns into a Conflict.
fn map_slug_conflict(err: rusqlite::Error) -> ApiError {
    if is_unique_violation(&err) {
        ApiError::SlugTaken
    } else {
        ApiError::Database(err)
    }
}

pub struct FormsDb {
    conn: Connection,
}

impl FormsDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> anyhow::Result<()> {
        // Cascade delete of a form's fields depends on this pragma.
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS forms (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'DRAFT',
                    published_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS fields (
                    id TEXT PRIMARY KEY,
                    form_id TEXT NOT NULL REFERENCES forms(id) ON DELETE CASCADE,
                    field_type TEXT NOT NULL DEFAULT 'TEXT',
                    label TEXT NOT NULL,
                    required INTEGER NOT NULL DEFAULT 0,
                    position INTEGER NOT NULL DEFAULT 0,
                    config TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_forms_slug ON forms(slug);
                CREATE INDEX IF NOT EXISTS idx_forms_status ON forms(status);
                CREATE INDEX IF NOT EXISTS idx_forms_updated_at ON forms(updated_at);
                CREATE INDEX IF NOT EXISTS idx_fields_form ON fields(form_id);
                CREATE INDEX IF NOT EXISTS idx_fields_form_position ON fields(form_id, position);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Form CRUD ─────────────────────────────────────────────────────

    pub fn list_forms(&self) -> Result<Vec<Form>, ApiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug, status, published_at, created_at, updated_at FROM forms",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FormRow {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
                status: row.get(3)?,
                published_at: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        let mut forms = Vec::new();
        for row in rows {
            forms.push(row?.into_form()?);
        }
        Ok(forms)
    }

    pub fn create_form(&self, name: &str, slug: &str) -> Result<Form, ApiError> {
        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO forms (id, name, slug, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'DRAFT', ?4, ?4)",
                params![id, name, slug, now],
            )
            .map_err(map_slug_conflict)?;
        let form = self.get_form(&id)?.context("Form not found after insert")?;
        Ok(form)
    }

    pub fn get_form(&self, id: &str) -> Result<Option<Form>, ApiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, slug, status, published_at, created_at, updated_at
             FROM forms WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(FormRow {
                id: row.get(0)?,
                name: row.get(1)?,
                slug: row.get(2)?,
                status: row.get(3)?,
                published_at: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_form()?)),
            None => Ok(None),
        }
    }

    pub fn update_form(
        &self,
        id: &str,
        name: Option<&str>,
        slug: Option<&str>,
    ) -> Result<Form, ApiError> {
        self.ensure_form_editable(id)?;

        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE forms SET updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )?;
        if let Some(n) = name {
            tx.execute("UPDATE forms SET name = ?1 WHERE id = ?2", params![n, id])?;
        }
        if let Some(s) = slug {
            tx.execute("UPDATE forms SET slug = ?1 WHERE id = ?2", params![s, id])
                .map_err(map_slug_conflict)?;
        }

        tx.commit()?;
        let form = self.get_form(id)?.context("Form not found after update")?;
        Ok(form)
    }

    /// DRAFT → PUBLISHED, the only status transition. A second publish is a
    /// Conflict, never a no-op; `published_at` is set exactly once.
    pub fn publish_form(&self, id: &str) -> Result<Form, ApiError> {
        let status = self.form_status(id)?;
        if status == FormStatus::Published {
            return Err(ApiError::AlreadyPublished);
        }

        let now = now_rfc3339();
        self.conn.execute(
            "UPDATE forms SET status = 'PUBLISHED', published_at = ?1, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        let form = self.get_form(id)?.context("Form not found after publish")?;
        Ok(form)
    }

    // ── Field CRUD ────────────────────────────────────────────────────

    pub fn list_fields(&self, form_id: &str) -> Result<Vec<Field>, ApiError> {
        self.ensure_form_exists(form_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, form_id, field_type, label, required, position, config, created_at, updated_at
             FROM fields WHERE form_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![form_id], |row| {
            Ok(FieldRow {
                id: row.get(0)?,
                form_id: row.get(1)?,
                field_type: row.get(2)?,
                label: row.get(3)?,
                required: row.get(4)?,
                position: row.get(5)?,
                config: row.get(6)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            })
        })?;
        let mut fields = Vec::new();
        for row in rows {
            fields.push(row?.into_field()?);
        }
        Ok(fields)
    }

    pub fn create_field(
        &self,
        form_id: &str,
        field_type: FieldType,
        label: &str,
        required: bool,
        config: Option<&serde_json::Value>,
    ) -> Result<Field, ApiError> {
        self.ensure_form_editable(form_id)?;

        // Append after the current maximum, or at 0 for an empty form.
        let max_position: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) FROM fields WHERE form_id = ?1",
            params![form_id],
            |row| row.get(0),
        )?;
        let position = max_position + 1;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let config_json = config.map(serde_json::Value::to_string);
        self.conn.execute(
            "INSERT INTO fields (id, form_id, field_type, label, required, position, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![id, form_id, field_type.as_str(), label, required, position, config_json, now],
        )?;
        let field = self
            .get_field(form_id, &id)?
            .context("Field not found after insert")?;
        Ok(field)
    }

    pub fn get_field(&self, form_id: &str, field_id: &str) -> Result<Option<Field>, ApiError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, form_id, field_type, label, required, position, config, created_at, updated_at
             FROM fields WHERE id = ?1 AND form_id = ?2",
        )?;
        let mut rows = stmt.query_map(params![field_id, form_id], |row| {
            Ok(FieldRow {
                id: row.get(0)?,
                form_id: row.get(1)?,
                field_type: row.get(2)?,
                label: row.get(3)?,
                required: row.get(4)?,
                position: row.get(5)?,
                config: row.get(6)?,
                created_at: row.get(7)?,
                updated_at: row.get(8)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_field()?)),
            None => Ok(None),
        }
    }

    pub fn update_field(
        &self,
        form_id: &str,
        field_id: &str,
        changes: &FieldChanges,
    ) -> Result<Field, ApiError> {
        self.ensure_form_editable(form_id)?;

        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        let touched = tx.execute(
            "UPDATE fields SET updated_at = ?1 WHERE id = ?2 AND form_id = ?3",
            params![now, field_id, form_id],
        )?;
        if touched == 0 {
            return Err(ApiError::FieldNotFound {
                id: field_id.to_string(),
            });
        }

        if let Some(t) = changes.field_type {
            tx.execute(
                "UPDATE fields SET field_type = ?1 WHERE id = ?2 AND form_id = ?3",
                params![t.as_str(), field_id, form_id],
            )?;
        }
        if let Some(ref l) = changes.label {
            tx.execute(
                "UPDATE fields SET label = ?1 WHERE id = ?2 AND form_id = ?3",
                params![l, field_id, form_id],
            )?;
        }
        if let Some(r) = changes.required {
            tx.execute(
                "UPDATE fields SET required = ?1 WHERE id = ?2 AND form_id = ?3",
                params![r, field_id, form_id],
            )?;
        }
        if let Some(p) = changes.position {
            tx.execute(
                "UPDATE fields SET position = ?1 WHERE id = ?2 AND form_id = ?3",
                params![p, field_id, form_id],
            )?;
        }
        if let Some(ref c) = changes.config {
            let config_json = c.as_ref().map(serde_json::Value::to_string);
            tx.execute(
                "UPDATE fields SET config = ?1 WHERE id = ?2 AND form_id = ?3",
                params![config_json, field_id, form_id],
            )?;
        }

        tx.commit()?;
        let field = self
            .get_field(form_id, field_id)?
            .context("Field not found after update")?;
        Ok(field)
    }

    /// Remove a single field. Remaining fields keep their positions; gaps
    /// are permitted until the next reorder.
    pub fn delete_field(&self, form_id: &str, field_id: &str) -> Result<(), ApiError> {
        self.ensure_form_editable(form_id)?;

        let deleted = self.conn.execute(
            "DELETE FROM fields WHERE id = ?1 AND form_id = ?2",
            params![field_id, form_id],
        )?;
        if deleted == 0 {
            return Err(ApiError::FieldNotFound {
                id: field_id.to_string(),
            });
        }
        Ok(())
    }

    /// Assign position = index for each supplied id, all inside one
    /// transaction, then return the re-listed set. Ids not belonging to this
    /// form are silent no-ops; fields left out of the list keep their old
    /// positions.
    pub fn reorder_fields(
        &self,
        form_id: &str,
        ordered_field_ids: &[String],
    ) -> Result<Vec<Field>, ApiError> {
        self.ensure_form_editable(form_id)?;

        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for (index, field_id) in ordered_field_ids.iter().enumerate() {
            tx.execute(
                "UPDATE fields SET position = ?1, updated_at = ?2 WHERE id = ?3 AND form_id = ?4",
                params![index as i64, now, field_id, form_id],
            )?;
        }
        tx.commit()?;

        self.list_fields(form_id)
    }

    /// Commit protocol for AI regeneration: delete every existing field,
    /// update the form's name/slug/updated_at, insert the generated set with
    /// position = array index. One transaction; readers never observe a
    /// partially replaced form.
    pub fn replace_fields(
        &self,
        form_id: &str,
        name: &str,
        slug: &str,
        new_fields: &[NewField],
    ) -> Result<Vec<Field>, ApiError> {
        let now = now_rfc3339();
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM fields WHERE form_id = ?1", params![form_id])?;
        tx.execute(
            "UPDATE forms SET name = ?1, slug = ?2, updated_at = ?3 WHERE id = ?4",
            params![name, slug, now, form_id],
        )
        .map_err(map_slug_conflict)?;

        for (index, field) in new_fields.iter().enumerate() {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO fields (id, form_id, field_type, label, required, position, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    id,
                    form_id,
                    field.field_type.as_str(),
                    field.label,
                    field.required,
                    index as i64,
                    field.config.to_string(),
                    now
                ],
            )?;
        }

        tx.commit()?;
        self.list_fields(form_id)
    }

    /// All other forms' slugs starting with the candidate, for the
    /// generation slug de-duplication scan.
    pub fn slugs_with_prefix(
        &self,
        prefix: &str,
        exclude_form_id: &str,
    ) -> Result<Vec<String>, ApiError> {
        let mut stmt = self
            .conn
            .prepare("SELECT slug FROM forms WHERE slug LIKE ?1 || '%' AND id <> ?2")?;
        let rows = stmt.query_map(params![prefix, exclude_form_id], |row| row.get(0))?;
        let mut slugs = Vec::new();
        for row in rows {
            slugs.push(row?);
        }
        Ok(slugs)
    }

    // ── Guards ────────────────────────────────────────────────────────

    fn form_status(&self, form_id: &str) -> Result<FormStatus, ApiError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status FROM forms WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![form_id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => {
                let raw = row?;
                let status = FormStatus::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!(e))
                    .context("Invalid status column")?;
                Ok(status)
            }
            None => Err(ApiError::FormNotFound {
                id: form_id.to_string(),
            }),
        }
    }

    fn ensure_form_exists(&self, form_id: &str) -> Result<(), ApiError> {
        self.form_status(form_id).map(|_| ())
    }

    /// PUBLISHED is terminal for the whole mutation surface: the form's
    /// attributes and every one of its fields become read-only.
    fn ensure_form_editable(&self, form_id: &str) -> Result<(), ApiError> {
        match self.form_status(form_id)? {
            FormStatus::Draft => Ok(()),
            FormStatus::Published => Err(ApiError::AlreadyPublished),
        }
    }
}
