use log::info;

use crate::chain::Submission;
use crate::db::open::Ledger;

/// One stored submission
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRow {
    pub chain: String,
    pub name: String,
    pub slurm_id: i64,
    pub script: Option<String>,
    pub state: String,
    pub inserted: String,
}

impl Ledger {
    pub fn record(&self, submission: &Submission) -> rusqlite::Result<()> {
        let script = submission.script.as_ref().map(|path| path.display().to_string());
        info!("Adding {} ({}) to job ledger", submission.name, submission.id);

        self.conn.execute(
            "INSERT INTO job (chain, name, slurm_id, script, state) VALUES (?1, ?2, ?3, ?4, ?5)",
            (&submission.chain, &submission.name, submission.id.0, script, submission.state.as_str()),
        )?;

        Ok(())
    }

    /// Every row in insertion order, optionally for one chain only
    pub fn list(&self, chain: Option<&str>) -> rusqlite::Result<Vec<LedgerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT chain, name, slurm_id, script, state, inserted FROM job \
             WHERE (?1 IS NULL OR chain = ?1) ORDER BY id",
        )?;
        let rows = stmt.query_map([chain], |row| {
            Ok(LedgerRow {
                chain: row.get(0)?,
                name: row.get(1)?,
                slurm_id: row.get(2)?,
                script: row.get(3)?,
                state: row.get(4)?,
                inserted: row.get(5)?,
            })
        })?;

        rows.collect()
    }
}
