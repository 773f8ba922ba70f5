use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::{ListQuery, RecordStore};
use crate::error::StoreError;
use crate::models::{Submission, SubmissionStatus};

const COLUMNS: &str = "id, name, url, description, tags, disciplines, contact, page, ip, \
                       user_agent, ts, status, admin_note, admin_at";

/// Submissions in a Postgres `submissions` table.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct SubmissionRow {
    id: String,
    name: String,
    url: String,
    description: Option<String>,
    tags: Option<Json<Vec<String>>>,
    disciplines: Option<Json<Vec<String>>>,
    contact: Option<String>,
    page: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    ts: DateTime<Utc>,
    status: String,
    admin_note: Option<String>,
    admin_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubmissionRow> for Submission {
    type Error = StoreError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<SubmissionStatus>()
            .map_err(|_| StoreError::Corrupt(row.id.clone()))?;
        Ok(Submission {
            id: row.id,
            name: row.name,
            url: row.url,
            description: row.description.unwrap_or_default(),
            tags: row.tags.map(|j| j.0).unwrap_or_default(),
            disciplines: row.disciplines.map(|j| j.0).unwrap_or_default(),
            contact: row.contact.unwrap_or_default(),
            page: row.page.unwrap_or_default(),
            ip: row.ip.unwrap_or_default(),
            user_agent: row.user_agent.unwrap_or_default(),
            ts: row.ts,
            status,
            admin_note: row.admin_note.unwrap_or_default(),
            admin_at: row.admin_at,
        })
    }
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Postgres store ready");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn insert(&self, record: &Submission) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO submissions
                (id, name, url, description, tags, disciplines, contact, page, ip, user_agent, ts, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.url)
        .bind(&record.description)
        .bind(Json(&record.tags))
        .bind(Json(&record.disciplines))
        .bind(&record.contact)
        .bind(&record.page)
        .bind(&record.ip)
        .bind(&record.user_agent)
        .bind(record.ts)
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM submissions WHERE id = $1");
        sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn update(
        &self,
        id: &str,
        status: SubmissionStatus,
        note: &str,
    ) -> Result<Submission, StoreError> {
        let sql = format!(
            "UPDATE submissions SET status = $2, admin_note = $3, admin_at = $4 \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, SubmissionRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(note)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Submission>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM submissions WHERE TRUE"));

        if let Some(search) = &query.search {
            push_search(&mut qb, search);
        }

        if let Some(cursor) = &query.cursor {
            qb.push(" AND (ts, id) < (")
                .push_bind(cursor.ts)
                .push(", ")
                .push_bind(cursor.id.clone())
                .push(")");
        }

        qb.push(" ORDER BY ts DESC, id DESC LIMIT ")
            .push_bind(query.limit as i64);

        let rows = qb
            .build_query_as::<SubmissionRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Submission::try_from).collect()
    }

    async fn count_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE ip = $1 AND ts > $2")
                .bind(ip)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}

/// Case-insensitive substring filter; list columns are matched per element.
fn push_search(qb: &mut QueryBuilder<'_, Postgres>, search: &str) {
    let like = format!("%{}%", escape_like(search));
    qb.push(" AND (");
    let mut terms = qb.separated(" OR ");
    for col in ["name", "url", "description", "contact"] {
        terms.push(format!("{col} ILIKE "));
        terms.push_bind_unseparated(like.clone());
    }
    for col in ["tags", "disciplines"] {
        terms.push(format!(
            "EXISTS (SELECT 1 FROM jsonb_array_elements_text(\
             CASE WHEN jsonb_typeof({col}) = 'array' THEN {col} ELSE '[]'::jsonb END\
             ) AS e(v) WHERE e.v ILIKE "
        ));
        terms.push_bind_unseparated(like.clone());
        terms.push_unseparated(")");
    }
    qb.push(")");
}

/// Make `%`, `_` and `\` match literally inside an ILIKE pattern.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
