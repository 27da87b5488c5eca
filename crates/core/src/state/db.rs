//! # Requirement Database
//!
//! SQLite persistence for generated requirements, their test cases, and
//! customized prompt templates. Lives at `.reqflow/reqflow.db` by default.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::repository::{RequirementRepository, StoredRequirement, StoredTestCase};
use crate::error::{PipelineError, PipelineResult};
use crate::skills::prompts::{self, Prompts};
use crate::skills::{RequirementDraft, TestCaseDraft};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

pub struct RequirementDb {
    conn: Arc<Mutex<Connection>>,
}

impl RequirementDb {
    /// Open database at a specific path, creating it if needed
    pub fn open_at<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Persistence(format!(
                        "Failed to create database directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path.as_ref()).map_err(|e| {
            PipelineError::Persistence(format!("Failed to open requirement database: {}", e))
        })?;
        Self::with_connection(conn)
    }

    /// In-memory database
    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> PipelineResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> PipelineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PipelineError::Persistence(format!("Lock error: {}", e)))
    }

    /// Run schema migrations
    fn run_migrations(&self) -> PipelineResult<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
            tracing::info!(
                "RequirementDb initialized with schema version {}",
                SCHEMA_VERSION
            );
        }

        Ok(())
    }

    // =========================================================================
    // Prompt Template Methods
    // =========================================================================

    /// Seed default prompts if the table is empty
    pub fn seed_prompts(&self) -> PipelineResult<usize> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prompt_templates", [], |row| {
            row.get(0)
        })?;
        if count > 0 {
            tracing::debug!("Prompts already seeded ({} found)", count);
            return Ok(0);
        }

        let mut inserted = 0;
        for (slug, content) in prompts::all_defaults() {
            conn.execute(
                "INSERT INTO prompt_templates (slug, version, content) VALUES (?1, 1, ?2)",
                params![slug, content],
            )?;
            inserted += 1;
        }

        tracing::info!("Seeded {} default prompts", inserted);
        Ok(inserted)
    }

    /// Active prompt set: stored templates over the bundled defaults
    pub fn load_prompts(&self) -> PipelineResult<Prompts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT slug, content FROM prompt_templates ORDER BY slug")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut stored = Vec::new();
        for row in rows {
            stored.push(row?);
        }
        Ok(Prompts::from_stored(stored))
    }

    /// Run a query against the connection on the blocking pool
    async fn run_blocking<T, F>(&self, query: F) -> PipelineResult<T>
    where
        F: FnOnce(&Connection) -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| PipelineError::Persistence(format!("Lock error: {}", e)))?;
            query(&guard)
        })
        .await
        .map_err(|e| PipelineError::Persistence(format!("Database task failed: {}", e)))?
    }
}

// =========================================================================
// Requirement Queries
// =========================================================================

fn insert_requirement(
    conn: &Connection,
    project_id: &str,
    document_id: Option<&str>,
    draft: &RequirementDraft,
) -> PipelineResult<StoredRequirement> {
    draft.validate()?;
    let stored = StoredRequirement {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        document_id: document_id.map(str::to_string),
        draft: draft.clone(),
        created_at: Utc::now(),
    };
    let criteria = serde_json::to_string(&draft.acceptance_criteria)
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

    conn.execute(
        r#"
        INSERT INTO requirements
            (id, project_id, document_id, title, description, priority, category,
             acceptance_criteria_json, source, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            stored.id,
            stored.project_id,
            stored.document_id,
            draft.title,
            draft.description,
            draft.priority,
            draft.category,
            criteria,
            draft.source,
            stored.created_at.to_rfc3339(),
        ],
    )?;
    Ok(stored)
}

fn insert_test_case(
    conn: &Connection,
    requirement_id: &str,
    draft: &TestCaseDraft,
) -> PipelineResult<StoredTestCase> {
    require_requirement(conn, requirement_id)?;

    let stored = StoredTestCase {
        id: Uuid::new_v4().to_string(),
        requirement_id: requirement_id.to_string(),
        draft: draft.clone(),
        created_at: Utc::now(),
    };
    let preconditions = serde_json::to_string(&draft.preconditions)
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;
    let steps = serde_json::to_string(&draft.steps)
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

    conn.execute(
        r#"
        INSERT INTO test_cases
            (id, requirement_id, title, description, preconditions_json, steps_json,
             expected_result, priority, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            stored.id,
            stored.requirement_id,
            draft.title,
            draft.description,
            preconditions,
            steps,
            draft.expected_result,
            draft.priority,
            stored.created_at.to_rfc3339(),
        ],
    )?;
    Ok(stored)
}

fn require_requirement(conn: &Connection, requirement_id: &str) -> PipelineResult<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM requirements WHERE id = ?1",
            params![requirement_id],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(()),
        None => Err(PipelineError::NotFound(format!(
            "Requirement not found: {}",
            requirement_id
        ))),
    }
}

fn select_requirements(conn: &Connection, project_id: &str) -> PipelineResult<Vec<StoredRequirement>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, project_id, document_id, title, description, priority, category,
               acceptance_criteria_json, source, created_at
        FROM requirements WHERE project_id = ?1
        ORDER BY created_at, rowid
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], requirement_from_row)?;

    let mut requirements = Vec::new();
    for row in rows {
        requirements.push(row?);
    }
    Ok(requirements)
}

fn select_test_cases(conn: &Connection, requirement_id: &str) -> PipelineResult<Vec<StoredTestCase>> {
    require_requirement(conn, requirement_id)?;
    let mut stmt = conn.prepare(
        r#"
        SELECT id, requirement_id, title, description, preconditions_json, steps_json,
               expected_result, priority, created_at
        FROM test_cases WHERE requirement_id = ?1
        ORDER BY created_at, rowid
        "#,
    )?;
    let rows = stmt.query_map(params![requirement_id], test_case_from_row)?;

    let mut cases = Vec::new();
    for row in rows {
        cases.push(row?);
    }
    Ok(cases)
}

/// Migration to version 1 - complete schema
fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS requirements (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            document_id TEXT,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'medium',
            category TEXT NOT NULL DEFAULT 'functional',
            acceptance_criteria_json TEXT NOT NULL DEFAULT '[]',
            source TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS test_cases (
            id TEXT PRIMARY KEY,
            requirement_id TEXT NOT NULL REFERENCES requirements(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            preconditions_json TEXT NOT NULL DEFAULT '[]',
            steps_json TEXT NOT NULL DEFAULT '[]',
            expected_result TEXT NOT NULL DEFAULT '',
            priority TEXT NOT NULL DEFAULT 'medium',
            created_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    // Prompt templates (model prompts with version control)
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_templates (
            slug TEXT PRIMARY KEY,
            version INTEGER NOT NULL DEFAULT 1,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_requirements_project ON requirements(project_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_test_cases_requirement ON test_cases(requirement_id)",
        [],
    )?;
    Ok(())
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_list(idx: usize, raw: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn requirement_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRequirement> {
    Ok(StoredRequirement {
        id: row.get(0)?,
        project_id: row.get(1)?,
        document_id: row.get(2)?,
        draft: RequirementDraft {
            title: row.get(3)?,
            description: row.get(4)?,
            priority: row.get(5)?,
            category: row.get(6)?,
            acceptance_criteria: parse_list(7, row.get(7)?)?,
            source: row.get(8)?,
        },
        created_at: parse_timestamp(9, row.get(9)?)?,
    })
}

fn test_case_from_row(row: &Row<'_>) -> rusqlite::Result<StoredTestCase> {
    Ok(StoredTestCase {
        id: row.get(0)?,
        requirement_id: row.get(1)?,
        draft: TestCaseDraft {
            title: row.get(2)?,
            description: row.get(3)?,
            preconditions: parse_list(4, row.get(4)?)?,
            steps: parse_list(5, row.get(5)?)?,
            expected_result: row.get(6)?,
            priority: row.get(7)?,
        },
        created_at: parse_timestamp(8, row.get(8)?)?,
    })
}

#[async_trait]
impl RequirementRepository for RequirementDb {
    async fn create_requirement(
        &self,
        project_id: &str,
        document_id: Option<&str>,
        draft: &RequirementDraft,
    ) -> PipelineResult<StoredRequirement> {
        let project_id = project_id.to_string();
        let document_id = document_id.map(str::to_string);
        let draft = draft.clone();
        self.run_blocking(move |conn| {
            insert_requirement(conn, &project_id, document_id.as_deref(), &draft)
        })
        .await
    }

    async fn create_test_case(
        &self,
        requirement_id: &str,
        draft: &TestCaseDraft,
    ) -> PipelineResult<StoredTestCase> {
        let requirement_id = requirement_id.to_string();
        let draft = draft.clone();
        self.run_blocking(move |conn| insert_test_case(conn, &requirement_id, &draft))
            .await
    }

    async fn list_requirements(&self, project_id: &str) -> PipelineResult<Vec<StoredRequirement>> {
        let project_id = project_id.to_string();
        self.run_blocking(move |conn| select_requirements(conn, &project_id))
            .await
    }

    async fn list_test_cases(&self, requirement_id: &str) -> PipelineResult<Vec<StoredTestCase>> {
        let requirement_id = requirement_id.to_string();
        self.run_blocking(move |conn| select_test_cases(conn, &requirement_id))
            .await
    }
}
