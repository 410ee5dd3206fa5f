//! Store health checks for monitoring.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{migrations, Database, LATEST_SCHEMA_VERSION};
use crate::error::Result;

/// Overall health of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// One structural check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
    /// Status this check forces when it fails
    pub severity: HealthStatus,
}

/// Result of [`Database::health_check`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub schema_version: Option<u32>,
    pub expected_version: u32,
    pub pattern_count: Option<i64>,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Checks that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

struct Checks {
    checks: Vec<HealthCheck>,
}

impl Checks {
    fn record(&mut self, name: &str, severity: HealthStatus, outcome: Result<(bool, String)>) {
        let (passed, detail) = match outcome {
            Ok(result) => result,
            Err(e) => (false, e.to_string()),
        };
        self.checks.push(HealthCheck {
            name: name.to_string(),
            passed,
            detail,
            severity,
        });
    }

    fn status(&self) -> HealthStatus {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.severity)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

pub(super) fn run(db: &Database) -> HealthReport {
    let mut checks = Checks { checks: Vec::new() };
    let mut schema_version = None;
    let mut pattern_count = None;

    let outcome = db.with_conn(|conn| {
        checks.record("connection", HealthStatus::Critical, ping(conn));
        checks.record("integrity", HealthStatus::Critical, quick_check(conn));
        checks.record("search_index", HealthStatus::Degraded, search_index_present(conn));

        let version = migrations::current_version(conn);
        if let Ok(v) = &version {
            schema_version = Some(*v);
        }
        checks.record(
            "schema_version",
            HealthStatus::Degraded,
            version.map(|v| {
                (
                    v >= LATEST_SCHEMA_VERSION,
                    format!("version {v}, expected {LATEST_SCHEMA_VERSION}"),
                )
            }),
        );

        checks.record("confidence_range", HealthStatus::Degraded, confidence_in_range(conn));

        pattern_count = conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))
            .ok();
        Ok(())
    });

    if let Err(e) = outcome {
        checks.record("connection", HealthStatus::Critical, Err(e));
    }

    let status = checks.status();
    if status != HealthStatus::Healthy {
        warn!(%status, "Pattern store health check reported problems");
    }

    HealthReport {
        status,
        schema_version,
        expected_version: LATEST_SCHEMA_VERSION,
        pattern_count,
        checks: checks.checks,
    }
}

fn ping(conn: &Connection) -> Result<(bool, String)> {
    conn.execute_batch("SELECT 1")?;
    Ok((true, "ok".to_string()))
}

fn quick_check(conn: &Connection) -> Result<(bool, String)> {
    let result: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    Ok((result == "ok", result))
}

fn search_index_present(conn: &Connection) -> Result<(bool, String)> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'patterns_fts'",
        [],
        |row| row.get(0),
    )?;
    if count == 0 {
        return Ok((false, "patterns_fts missing".to_string()));
    }
    Ok((true, "patterns_fts present".to_string()))
}

fn confidence_in_range(conn: &Connection) -> Result<(bool, String)> {
    let bad: i64 = conn.query_row(
        "SELECT COUNT(*) FROM patterns WHERE confidence < 0.0 OR confidence > 1.0",
        [],
        |row| row.get(0),
    )?;
    Ok((bad == 0, format!("{bad} pattern(s) out of range")))
}
