use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use uuid::Uuid;

use super::Store;
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, tenant_id, created_at, expires_at, last_used_at";
const PROJECT_COLUMNS: &str = "id, tenant_id, slug, display_name, description, storage_path, \
     content_size_bytes, content_version, status, settings, created_at, updated_at";
const ASSET_COLUMNS: &str = "id, project_id, relative_path, asset_type, size_bytes, content_hash, \
     declared_dependencies, load_order, is_critical";
const SESSION_COLUMNS: &str =
    "id, tenant_id, slug, filename, total_chunks, display_name, description, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and throwaway tooling.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _)
        if err.code == rusqlite::ErrorCode::ConstraintViolation)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| conversion_error(idx, e))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(&row.get::<_, String>(idx)?)
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn row_to_tenant(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        tenant_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        slug: row.get(2)?,
        display_name: row.get(3)?,
        description: row.get(4)?,
        storage_path: row.get(5)?,
        content_size_bytes: row.get(6)?,
        content_version: row.get(7)?,
        status: parse_column(row, 8)?,
        settings: json_column(row, 9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        relative_path: row.get(2)?,
        asset_type: parse_column(row, 3)?,
        size_bytes: row.get(4)?,
        content_hash: row.get(5)?,
        declared_dependencies: json_column(row, 6)?,
        load_order: row.get(7)?,
        is_critical: row.get(8)?,
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<UploadSession> {
    Ok(UploadSession {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        slug: row.get(2)?,
        filename: row.get(3)?,
        total_chunks: row.get(4)?,
        display_name: row.get(5)?,
        description: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Replaces the asset rows of a project inside an open transaction and
/// returns the records as stored, with fresh ids.
fn write_assets(
    tx: &Transaction<'_>,
    project_id: &str,
    records: &[AssetRecord],
) -> Result<Vec<AssetRecord>> {
    tx.execute("DELETE FROM assets WHERE project_id = ?1", params![project_id])?;

    let mut stmt = tx.prepare(&format!(
        "INSERT INTO assets ({ASSET_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?;

    let mut stored = Vec::with_capacity(records.len());
    for record in records {
        let record = AssetRecord {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            ..record.clone()
        };
        let dependencies = serde_json::to_string(&record.declared_dependencies)
            .map_err(|e| Error::Persistence(e.to_string()))?;
        stmt.execute(params![
            record.id,
            record.project_id,
            record.relative_path,
            record.asset_type.as_str(),
            record.size_bytes,
            record.content_hash,
            dependencies,
            record.load_order,
            record.is_critical,
        ])
        .map_err(|e| {
            if is_constraint_violation(&e) {
                Error::Persistence(format!("duplicate asset path '{}'", record.relative_path))
            } else {
                Error::from(e)
            }
        })?;
        stored.push(record);
    }
    Ok(stored)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Tenant operations

    fn create_tenant(&self, tenant: &Tenant) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tenants (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![tenant.id, tenant.name, format_datetime(&tenant.created_at)],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM tenants WHERE id = ?1",
            params![id],
            row_to_tenant,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, created_at FROM tenants WHERE name = ?1",
            params![name],
            row_to_tenant,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM tenants ORDER BY name")?;
        let rows = stmt.query_map([], row_to_tenant)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_tenant(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tenants WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, tenant_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                token.id,
                token.token_hash,
                token.token_lookup,
                token.is_admin,
                token.tenant_id,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_token_by_id(&self, id: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
            params![id],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            row_to_token,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_tokens(&self, cursor: &str, limit: i32) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![cursor, limit], row_to_token)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_tenant_tokens(&self, tenant_id: &str) -> Result<Vec<Token>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE tenant_id = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![tenant_id], row_to_token)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Project registry

    fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_project_by_slug(&self, tenant_id: &str, slug: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE tenant_id = ?1 AND slug = ?2"),
            params![tenant_id, slug],
            row_to_project,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE tenant_id = ?1 ORDER BY slug"
        ))?;
        let rows = stmt.query_map(params![tenant_id], row_to_project)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        let settings = serde_json::to_string(&project.settings)
            .map_err(|e| Error::Validation(e.to_string()))?;
        let rows = self.conn().execute(
            "UPDATE projects SET display_name = ?1, description = ?2, status = ?3, settings = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                project.display_name,
                project.description,
                project.status.as_str(),
                settings,
                format_datetime(&project.updated_at),
                project.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_project(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn count_projects(&self, tenant_id: &str) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )
        .map_err(Error::from)
    }

    fn commit_project(
        &self,
        project: &Project,
        assets: &[AssetRecord],
        expected_version: Option<&str>,
    ) -> Result<Vec<AssetRecord>> {
        let settings = serde_json::to_string(&project.settings)
            .map_err(|e| Error::Validation(e.to_string()))?;

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match expected_version {
            None => {
                let result = tx.execute(
                    &format!(
                        "INSERT INTO projects ({PROJECT_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                    ),
                    params![
                        project.id,
                        project.tenant_id,
                        project.slug,
                        project.display_name,
                        project.description,
                        project.storage_path,
                        project.content_size_bytes,
                        project.content_version,
                        project.status.as_str(),
                        settings,
                        format_datetime(&project.created_at),
                        format_datetime(&project.updated_at),
                    ],
                );
                match result {
                    Ok(_) => {}
                    Err(e) if is_constraint_violation(&e) => {
                        return Err(Error::Conflict(format!(
                            "project '{}' already exists",
                            project.slug
                        )));
                    }
                    Err(e) => return Err(Error::from(e)),
                }
            }
            Some(previous) => {
                let rows = tx.execute(
                    "UPDATE projects SET display_name = ?1, description = ?2, storage_path = ?3,
                         content_size_bytes = ?4, content_version = ?5, status = ?6, settings = ?7,
                         updated_at = ?8
                     WHERE id = ?9 AND content_version = ?10",
                    params![
                        project.display_name,
                        project.description,
                        project.storage_path,
                        project.content_size_bytes,
                        project.content_version,
                        project.status.as_str(),
                        settings,
                        format_datetime(&project.updated_at),
                        project.id,
                        previous,
                    ],
                )?;
                if rows == 0 {
                    return Err(Error::Conflict(format!(
                        "project '{}' was changed by another upload",
                        project.slug
                    )));
                }
            }
        }

        let stored = write_assets(&tx, &project.id, assets)?;
        tx.commit()?;
        Ok(stored)
    }

    // Asset catalog

    fn replace_assets(&self, project_id: &str, records: &[AssetRecord]) -> Result<Vec<AssetRecord>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let stored = write_assets(&tx, project_id, records)?;
        tx.commit()?;
        Ok(stored)
    }

    fn get_ordered_assets(&self, project_id: &str) -> Result<Vec<AssetRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE project_id = ?1
             ORDER BY is_critical DESC, load_order ASC"
        ))?;
        let rows = stmt.query_map(params![project_id], row_to_asset)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Upload sessions

    fn create_upload_session(&self, session: &UploadSession) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT INTO upload_sessions ({SESSION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ),
            params![
                session.id,
                session.tenant_id,
                session.slug,
                session.filename,
                session.total_chunks,
                session.display_name,
                session.description,
                format_datetime(&session.created_at),
            ],
        )?;
        Ok(())
    }

    fn get_upload_session(&self, id: &str) -> Result<Option<UploadSession>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM upload_sessions WHERE id = ?1"),
            params![id],
            row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_upload_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM upload_sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn list_upload_sessions_before(&self, before: &DateTime<Utc>) -> Result<Vec<UploadSession>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM upload_sessions ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_session)?;

        let sessions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.created_at < *before)
            .collect())
    }

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
