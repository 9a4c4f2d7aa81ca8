use super::ResultStore;
use crate::{engine::YearState, error::SimResult, types::Year};
use rusqlite::{params, Connection};

impl ResultStore {
    // ── Year states ────────────────────────────────────────────

    pub(super) fn insert_year_state(conn: &Connection, run_id: &str, state: &YearState) -> SimResult<()> {
        conn.execute(
            "INSERT INTO year_state (
                run_id, city_id, year, median_price, median_rent,
                supply_gap, price_to_income, state_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                state.city_id,
                state.year,
                state.median_price,
                state.median_rent,
                state.supply_gap,
                state.price_to_income,
                serde_json::to_string(state)?,
            ],
        )?;
        Ok(())
    }

    /// A city's stored path, oldest year first.
    pub fn year_states(&self, run_id: &str, city_id: &str) -> SimResult<Vec<YearState>> {
        let mut stmt = self.conn.prepare(
            "SELECT state_json FROM year_state
             WHERE run_id = ?1 AND city_id = ?2
             ORDER BY year ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id, city_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut states = Vec::with_capacity(rows.len());
        for json in rows {
            states.push(serde_json::from_str(&json)?);
        }
        Ok(states)
    }

    /// Median price by city for one year of a run.
    pub fn prices_in_year(&self, run_id: &str, year: Year) -> SimResult<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT city_id, median_price FROM year_state
             WHERE run_id = ?1 AND year = ?2
             ORDER BY city_id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id, year], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
