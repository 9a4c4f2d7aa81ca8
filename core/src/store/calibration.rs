use super::ResultStore;
use crate::{calibration::CalibrationReport, error::SimResult};
use rusqlite::{params, OptionalExtension};

impl ResultStore {
    // ── Calibration reports ────────────────────────────────────

    /// Store a report, optionally linked to the run it was used for.
    pub fn save_calibration(&self, report: &CalibrationReport, run_id: Option<&str>) -> SimResult<String> {
        let report_id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO calibration_report (
                report_id, run_id, param_name, fitted_value, default_value,
                grid_rmse, eligible_cities, requested_cities, report_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                report_id,
                run_id,
                report.param_name,
                report.fitted_value,
                report.default_value,
                report.grid_rmse,
                report.eligible_cities as i64,
                report.requested_cities as i64,
                serde_json::to_string(report)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(report_id)
    }

    /// Most recently stored report for a parameter.
    pub fn latest_calibration(&self, param_name: &str) -> SimResult<Option<CalibrationReport>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT report_json FROM calibration_report
                 WHERE param_name = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![param_name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}
