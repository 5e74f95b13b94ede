//! Write-through persistence port.
//!
//! The store is an optional collaborator: every state-changing
//! operation writes through after the in-memory update. Idempotency is
//! the contract: inserts do nothing on conflict, updates overwrite the
//! canonical row, so a failed write is reconciled by the next one.
//! Snapshot queries read directly from the store when enabled.
//!
//! The default backend is `SQLite` in WAL mode behind a shared
//! connection. Schema creation is idempotent and runs on open.

// SQLite stores integers as i64; the domain uses u64 counters that stay
// far below the sign boundary.
#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use synapse_core::{
    AgentId, Bid, BidId, EvidenceItem, Job, JobId, JobPayload, JobStatus, LedgerAccount,
    Reputation, Terms, EVIDENCE_RING_CAP,
};

use crate::state::AgentRecord;

/// Errors from the persistence port.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A document column failed to encode or decode.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row carried a value outside the domain model.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// The table holding the row.
        table: &'static str,
        /// What failed to decode.
        reason: String,
    },
}

/// One agent row in an observer snapshot, ledger and reputation merged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotAgent {
    /// Stable identity.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Credits owned.
    pub credits: u64,
    /// Credits reserved.
    pub locked: u64,
    /// Completed settlements.
    pub completed: u64,
    /// Failed settlements.
    pub failed: u64,
    /// Smoothed reputation score.
    pub score: f64,
}

/// The observer snapshot served on subscribe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// All known agents with balances and reputation.
    pub agents: Vec<SnapshotAgent>,
    /// Jobs, newest first.
    pub jobs: Vec<Job>,
    /// Bids, newest first.
    pub bids: Vec<Bid>,
    /// Evidence, newest first, bounded to the ring capacity.
    pub evidence: Vec<EvidenceItem>,
}

/// The write-through contract. Any ordered durable store satisfies it.
pub trait Store: Send + Sync {
    /// Records an agent identity. Identities never mutate: conflicting
    /// inserts are no-ops.
    fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError>;

    /// Overwrites the canonical ledger row for an agent.
    fn upsert_ledger(&self, agent_id: &AgentId, account: &LedgerAccount) -> Result<(), StoreError>;

    /// Overwrites the canonical reputation row for an agent.
    fn upsert_reputation(&self, agent_id: &AgentId, rep: &Reputation) -> Result<(), StoreError>;

    /// Overwrites the canonical job row.
    fn upsert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Records a bid. Bids never mutate: conflicting inserts are no-ops.
    fn insert_bid(&self, bid: &Bid) -> Result<(), StoreError>;

    /// Appends an evidence item (unbounded, unlike the in-memory ring).
    fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError>;

    /// Appends one tape event to the durable log.
    fn append_event(&self, kind: &str, payload: &Value) -> Result<(), StoreError>;

    /// Maps a GitHub issue to a job (idempotent).
    fn link_issue(&self, owner: &str, repo: &str, number: u64, job_id: &JobId)
        -> Result<(), StoreError>;

    /// Maps a GitHub PR to a job (idempotent).
    fn link_pr(&self, owner: &str, repo: &str, number: u64, job_id: &JobId)
        -> Result<(), StoreError>;

    /// Resolves a GitHub issue mapping.
    fn job_by_issue(&self, owner: &str, repo: &str, number: u64)
        -> Result<Option<JobId>, StoreError>;

    /// Resolves a GitHub PR mapping.
    fn job_by_pr(&self, owner: &str, repo: &str, number: u64) -> Result<Option<JobId>, StoreError>;

    /// Reads a full observer snapshot.
    fn snapshot(&self) -> Result<Snapshot, StoreError>;
}

/// `SQLite`-backed store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the file cannot be opened
    /// or the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (tests and ephemeral runs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when schema creation fails.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates all tables and indexes. Safe to call repeatedly.
    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                public_key TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS ledger (
                agent_id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL,
                locked INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reputation (
                agent_id TEXT PRIMARY KEY,
                completed INTEGER NOT NULL,
                failed INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                budget INTEGER NOT NULL,
                requester_id TEXT NOT NULL,
                status TEXT NOT NULL,
                worker_id TEXT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                locked_budget INTEGER NOT NULL,
                locked_stake INTEGER NOT NULL,
                paid_upfront INTEGER NOT NULL,
                awarded_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE TABLE IF NOT EXISTS bids (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                bidder_id TEXT NOT NULL,
                price INTEGER NOT NULL,
                eta_seconds INTEGER NOT NULL,
                pitch TEXT,
                terms TEXT,
                rep TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bids_job_id ON bids(job_id);
            CREATE INDEX IF NOT EXISTS idx_bids_created_at ON bids(created_at DESC);
            CREATE TABLE IF NOT EXISTS job_evidence (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                detail TEXT NOT NULL,
                payload TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_job_evidence_job_id ON job_evidence(job_id);
            CREATE INDEX IF NOT EXISTS idx_job_evidence_created_at
                ON job_evidence(created_at DESC);
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS github_issue_jobs (
                owner TEXT NOT NULL,
                repo TEXT NOT NULL,
                issue_number INTEGER NOT NULL,
                job_id TEXT NOT NULL,
                PRIMARY KEY (owner, repo, issue_number)
            );
            CREATE TABLE IF NOT EXISTS github_pr_jobs (
                owner TEXT NOT NULL,
                repo TEXT NOT NULL,
                pr_number INTEGER NOT NULL,
                job_id TEXT NOT NULL,
                PRIMARY KEY (owner, repo, pr_number)
            );",
        )?;
        Ok(())
    }

    // A poisoned connection lock means another thread panicked mid-write;
    // SQLite transactions keep the file consistent, so recover the guard.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_sign_loss)]
    fn read_jobs(conn: &Connection) -> Result<Vec<Job>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, title, description, budget, requester_id, status, worker_id, kind,
                    payload, locked_budget, locked_stake, paid_upfront, awarded_at, created_at
             FROM jobs ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                (
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, i64>(11)?,
                    row.get::<_, Option<i64>>(12)?,
                    row.get::<_, i64>(13)?,
                ),
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (
                id,
                title,
                description,
                budget,
                requester_id,
                status,
                worker_id,
                kind,
                payload,
                (locked_budget, locked_stake, paid_upfront, awarded_at, created_at),
            ) = row?;
            let status: JobStatus = serde_json::from_value(Value::String(status.clone()))
                .map_err(|_| StoreError::CorruptRow {
                    table: "jobs",
                    reason: format!("unknown status {status:?}"),
                })?;
            let payload: JobPayload = serde_json::from_str(&payload)?;
            jobs.push(Job {
                id: JobId::from(id),
                title,
                description,
                budget: budget as u64,
                requester_id: AgentId::from(requester_id),
                created_at_ms: created_at as u64,
                status,
                worker_id: worker_id.map(AgentId::from),
                kind,
                payload,
                locked_budget: locked_budget as u64,
                locked_stake: locked_stake as u64,
                paid_upfront: paid_upfront as u64,
                awarded_at_ms: awarded_at.map(|ms| ms as u64),
            });
        }
        Ok(jobs)
    }

    #[allow(clippy::cast_sign_loss)]
    fn read_bids(conn: &Connection) -> Result<Vec<Bid>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, job_id, bidder_id, price, eta_seconds, pitch, terms, rep, created_at
             FROM bids ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;

        let mut bids = Vec::new();
        for row in rows {
            let (id, job_id, bidder_id, price, eta_seconds, pitch, terms, rep, created_at) = row?;
            let terms: Option<Terms> = match terms {
                Some(doc) => Some(serde_json::from_str(&doc)?),
                None => None,
            };
            bids.push(Bid {
                id: BidId::from(id),
                job_id: JobId::from(job_id),
                bidder_id: AgentId::from(bidder_id),
                price: price as u64,
                eta_seconds: eta_seconds as u64,
                created_at_ms: created_at as u64,
                pitch,
                terms,
                rep: serde_json::from_str(&rep)?,
            });
        }
        Ok(bids)
    }

    #[allow(clippy::cast_sign_loss)]
    fn read_agents(conn: &Connection) -> Result<Vec<SnapshotAgent>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.name,
                    COALESCE(l.credits, 0), COALESCE(l.locked, 0),
                    COALESCE(r.completed, 0), COALESCE(r.failed, 0)
             FROM agents a
             LEFT JOIN ledger l ON l.agent_id = a.id
             LEFT JOIN reputation r ON r.agent_id = a.id
             ORDER BY a.created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut agents = Vec::new();
        for row in rows {
            let (id, name, credits, locked, completed, failed) = row?;
            let rep = Reputation {
                completed: completed as u64,
                failed: failed as u64,
            };
            agents.push(SnapshotAgent {
                id: AgentId::from(id),
                name,
                credits: credits as u64,
                locked: locked as u64,
                completed: rep.completed,
                failed: rep.failed,
                score: rep.score(),
            });
        }
        Ok(agents)
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn read_evidence(conn: &Connection) -> Result<Vec<EvidenceItem>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, job_id, kind, detail, payload, created_at
             FROM job_evidence ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![EVIDENCE_RING_CAP as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (id, job_id, kind, detail, payload, created_at) = row?;
            let payload = match payload {
                Some(doc) => serde_json::from_str(&doc)?,
                None => Value::Null,
            };
            items.push(EvidenceItem {
                id,
                at_ms: created_at as u64,
                job_id: JobId::from(job_id),
                kind,
                detail,
                payload,
            });
        }
        Ok(items)
    }
}

impl Store for SqliteStore {
    fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO agents (id, name, public_key, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO NOTHING",
            params![
                agent.id.as_str(),
                agent.name,
                agent.public_key,
                agent.created_at_ms as i64
            ],
        )?;
        Ok(())
    }

    fn upsert_ledger(&self, agent_id: &AgentId, account: &LedgerAccount) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO ledger (agent_id, credits, locked) VALUES (?1, ?2, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET credits = ?2, locked = ?3",
            params![agent_id.as_str(), account.credits as i64, account.locked as i64],
        )?;
        Ok(())
    }

    fn upsert_reputation(&self, agent_id: &AgentId, rep: &Reputation) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO reputation (agent_id, completed, failed) VALUES (?1, ?2, ?3)
             ON CONFLICT(agent_id) DO UPDATE SET completed = ?2, failed = ?3",
            params![agent_id.as_str(), rep.completed as i64, rep.failed as i64],
        )?;
        Ok(())
    }

    fn upsert_job(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&job.payload)?;
        self.conn().execute(
            "INSERT INTO jobs (id, title, description, budget, requester_id, status, worker_id,
                               kind, payload, locked_budget, locked_stake, paid_upfront,
                               awarded_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                 title = ?2, description = ?3, budget = ?4, requester_id = ?5, status = ?6,
                 worker_id = ?7, kind = ?8, payload = ?9, locked_budget = ?10,
                 locked_stake = ?11, paid_upfront = ?12, awarded_at = ?13",
            params![
                job.id.as_str(),
                job.title,
                job.description,
                job.budget as i64,
                job.requester_id.as_str(),
                job.status.as_str(),
                job.worker_id.as_ref().map(AgentId::as_str),
                job.kind,
                payload,
                job.locked_budget as i64,
                job.locked_stake as i64,
                job.paid_upfront as i64,
                job.awarded_at_ms.map(|ms| ms as i64),
                job.created_at_ms as i64
            ],
        )?;
        Ok(())
    }

    fn insert_bid(&self, bid: &Bid) -> Result<(), StoreError> {
        let terms = bid.terms.map(|t| serde_json::to_string(&t)).transpose()?;
        let rep = serde_json::to_string(&bid.rep)?;
        self.conn().execute(
            "INSERT INTO bids (id, job_id, bidder_id, price, eta_seconds, pitch, terms, rep,
                               created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO NOTHING",
            params![
                bid.id.as_str(),
                bid.job_id.as_str(),
                bid.bidder_id.as_str(),
                bid.price as i64,
                bid.eta_seconds as i64,
                bid.pitch,
                terms,
                rep,
                bid.created_at_ms as i64
            ],
        )?;
        Ok(())
    }

    fn insert_evidence(&self, item: &EvidenceItem) -> Result<(), StoreError> {
        let payload = if item.payload.is_null() {
            None
        } else {
            Some(serde_json::to_string(&item.payload)?)
        };
        self.conn().execute(
            "INSERT INTO job_evidence (id, job_id, kind, detail, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                item.id,
                item.job_id.as_str(),
                item.kind,
                item.detail,
                payload,
                item.at_ms as i64
            ],
        )?;
        Ok(())
    }

    fn append_event(&self, kind: &str, payload: &Value) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO events (kind, payload, created_at) VALUES (?1, ?2, ?3)",
            params![kind, payload.to_string(), synapse_core::now_ms() as i64],
        )?;
        Ok(())
    }

    fn link_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO github_issue_jobs (owner, repo, issue_number, job_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner, repo, issue_number) DO UPDATE SET job_id = ?4",
            params![owner, repo, number as i64, job_id.as_str()],
        )?;
        Ok(())
    }

    fn link_pr(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        job_id: &JobId,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT INTO github_pr_jobs (owner, repo, pr_number, job_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(owner, repo, pr_number) DO UPDATE SET job_id = ?4",
            params![owner, repo, number as i64, job_id.as_str()],
        )?;
        Ok(())
    }

    fn job_by_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Option<JobId>, StoreError> {
        let job_id: Option<String> = self
            .conn()
            .query_row(
                "SELECT job_id FROM github_issue_jobs
                 WHERE owner = ?1 AND repo = ?2 AND issue_number = ?3",
                params![owner, repo, number as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(job_id.map(JobId::from))
    }

    fn job_by_pr(&self, owner: &str, repo: &str, number: u64) -> Result<Option<JobId>, StoreError> {
        let job_id: Option<String> = self
            .conn()
            .query_row(
                "SELECT job_id FROM github_pr_jobs
                 WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3",
                params![owner, repo, number as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(job_id.map(JobId::from))
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let conn = self.conn();
        Ok(Snapshot {
            agents: Self::read_agents(&conn)?,
            jobs: Self::read_jobs(&conn)?,
            bids: Self::read_bids(&conn)?,
            evidence: Self::read_evidence(&conn)?,
        })
    }
}
