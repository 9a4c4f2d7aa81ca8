//! SQLite persistence for scenario runs and calibration reports.
//!
//! RULE: Only store.rs (and its submodules) talks to the database.
//! The engine and calibration never touch SQL; callers hand finished
//! results to the store.

use crate::{
    engine::ScenarioResult,
    error::SimResult,
    policy::PolicyLevers,
    types::RunId,
};
mod calibration;
mod year_state;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub struct ResultStore {
    conn: Connection,
}

/// One row of the `run` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id:              RunId,
    pub seed:                u64,
    pub mode:                String,
    pub methodology_version: String,
    pub horizon_years:       u32,
    pub city_count:          usize,
    pub created_at:          String,
}

impl ResultStore {
    /// Open (or create) the results database at `path`.
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_runs.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    /// Persist a whole scenario (run row, every year state, warnings)
    /// in one transaction. Returns the new run id.
    pub fn save_scenario(&self, result: &ScenarioResult, seed: u64, levers: &PolicyLevers) -> SimResult<RunId> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let mode = serde_json::to_value(result.mode)?;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO run (run_id, seed, mode, methodology_version, horizon_years,
                              city_count, levers_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                seed as i64,
                mode.as_str().unwrap_or("aggregate"),
                result.methodology_version,
                result.horizon_years as i64,
                result.cities.len() as i64,
                serde_json::to_string(levers)?,
                created_at,
            ],
        )?;
        for states in result.cities.values() {
            for state in states {
                Self::insert_year_state(&tx, &run_id, state)?;
            }
        }
        for warning in &result.warnings {
            tx.execute(
                "INSERT INTO run_warning (run_id, source, city_id, message) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, warning.source.name(), warning.city, warning.message],
            )?;
        }
        tx.commit()?;

        log::info!("saved run {run_id} ({} cities)", result.cities.len());
        Ok(run_id)
    }

    pub fn run(&self, run_id: &str) -> SimResult<Option<RunRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT run_id, seed, mode, methodology_version, horizon_years, city_count, created_at
                 FROM run WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(RunRecord {
                        run_id:              row.get(0)?,
                        seed:                row.get::<_, i64>(1)? as u64,
                        mode:                row.get(2)?,
                        methodology_version: row.get(3)?,
                        horizon_years:       row.get::<_, i64>(4)? as u32,
                        city_count:          row.get::<_, i64>(5)? as usize,
                        created_at:          row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Warning messages recorded for a run, in insertion order.
    pub fn run_warnings(&self, run_id: &str) -> SimResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT source, city_id, message FROM run_warning WHERE run_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let source: String = row.get(0)?;
                let city: Option<String> = row.get(1)?;
                let message: String = row.get(2)?;
                Ok(match city {
                    Some(c) => format!("[{source}] {c}: {message}"),
                    None => format!("[{source}] {message}"),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
