//! Prospect Ledger: one row per company, keyed by `id`
//!
//! Writers replace the whole file atomically. Read-modify-write cycles from
//! the sender and the bounce ingestor are serialized through an advisory lock
//! on a sibling `<file>.lock`, so neither process rewrites the table from a
//! stale snapshot of the other's columns.

use super::{opt_cell, read_table, render_rows, write_atomic, Row};
use crate::models::{
    BounceClass, Company, ResolutionMethod, SendResult, UnsubscribeState,
};
use crate::time::{format_timestamp, parse_timestamp};
use crate::{Error, Result};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Current schema of the Prospect Ledger
pub const COLUMNS: &[&str] = &[
    "id",
    "name",
    "website",
    "roster_email",
    "job_position",
    "resolved_email",
    "resolution_method",
    "last_send_time",
    "last_send_result",
    "bounce_class",
    "bounce_first_seen",
    "bounce_reason",
    "unsubscribe_state",
    "unsubscribe_time",
    "unsubscribe_reason",
];

#[derive(Debug, Clone)]
pub struct ProspectLedger {
    path: PathBuf,
}

impl ProspectLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every company in file order.
    ///
    /// Fails on a missing/invalid `id` or a duplicate `id`: the next atomic
    /// rewrite would otherwise drop or merge rows silently.
    pub fn load(&self) -> Result<Vec<Company>> {
        let table = read_table(&self.path)?;
        let mut seen = HashSet::new();
        let mut companies = Vec::with_capacity(table.len());
        for row in table.rows() {
            let company = company_from_row(&row)?;
            if !seen.insert(company.id) {
                return Err(Error::InvalidInput(format!(
                    "{}: duplicate company id {} on line {}",
                    self.path.display(),
                    company.id,
                    row.line
                )));
            }
            companies.push(company);
        }
        Ok(companies)
    }

    /// Companies with `start_id <= id <= end_id`, ascending by id
    pub fn load_range(&self, start_id: u64, end_id: u64) -> Result<Vec<Company>> {
        if start_id > end_id {
            return Ok(Vec::new());
        }
        let mut companies: Vec<Company> = self
            .load()?
            .into_iter()
            .filter(|c| c.id >= start_id && c.id <= end_id)
            .collect();
        companies.sort_by_key(|c| c.id);
        Ok(companies)
    }

    pub fn get(&self, id: u64) -> Result<Option<Company>> {
        Ok(self.load()?.into_iter().find(|c| c.id == id))
    }

    /// Atomically replace the ledger with `companies`
    pub fn save(&self, companies: &[Company]) -> Result<()> {
        let contents = render_rows(Some(COLUMNS), companies.iter().map(company_cells))?;
        write_atomic(&self.path, &contents)
    }

    /// Read-modify-write the whole table under the ledger's RMW lock.
    /// The table is rewritten only when `apply` reports a change.
    pub fn update<T>(&self, apply: impl FnOnce(&mut Vec<Company>) -> (T, bool)) -> Result<T> {
        let _guard = RmwGuard::acquire(&self.path)?;
        let mut companies = self.load()?;
        let (value, changed) = apply(&mut companies);
        if changed {
            self.save(&companies)?;
        }
        Ok(value)
    }

    /// Update one company in place; returns `false` when the id is unknown
    pub fn update_company(&self, id: u64, apply: impl FnOnce(&mut Company)) -> Result<bool> {
        self.update(|companies| match companies.iter_mut().find(|c| c.id == id) {
            Some(company) => {
                apply(company);
                (true, true)
            }
            None => (false, false),
        })
    }
}

/// Advisory lock on `<ledger>.lock`, held for one read-modify-write cycle
struct RmwGuard {
    file: fs::File,
}

impl RmwGuard {
    fn acquire(ledger: &Path) -> Result<Self> {
        let mut name = ledger
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        let lock_path = ledger.with_file_name(name);
        if let Some(parent) = lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::ledger_write(&lock_path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::ledger_write(&lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| Error::ledger_write(&lock_path, e))?;
        Ok(Self { file })
    }
}

impl Drop for RmwGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn company_from_row(row: &Row<'_>) -> Result<Company> {
    let raw_id = row.non_empty(&["id", "company_id"]).ok_or_else(|| {
        Error::InvalidInput(format!("prospect row on line {} has no id", row.line))
    })?;
    let id: u64 = raw_id
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "prospect row on line {} has invalid id '{}'",
                row.line, raw_id
            ))
        })?;

    let name = row.get_any(&["name", "company_name"]).unwrap_or_default();
    if name.is_empty() {
        tracing::warn!(company_id = id, line = row.line, "Prospect row has an empty name");
    }
    let text = |names: &[&str]| row.non_empty(names).map(String::from);

    Ok(Company {
        id,
        name: name.to_string(),
        website: text(&["website", "homepage", "url"]),
        roster_email: text(&["roster_email", "email", "email_address"]),
        job_position: row
            .get_any(&["job_position", "job"])
            .unwrap_or_default()
            .to_string(),
        resolved_email: text(&["resolved_email"]),
        resolution_method: ResolutionMethod::parse_or_default(
            row.get("resolution_method").unwrap_or_default(),
        ),
        last_send_time: row.get("last_send_time").and_then(parse_timestamp),
        last_send_result: row.get("last_send_result").and_then(SendResult::parse),
        bounce_class: BounceClass::parse_or_default(row.get("bounce_class").unwrap_or_default()),
        bounce_first_seen: row.get("bounce_first_seen").and_then(parse_timestamp),
        bounce_reason: text(&["bounce_reason"]),
        unsubscribe_state: UnsubscribeState::parse_or_default(
            row.get("unsubscribe_state").unwrap_or_default(),
        ),
        unsubscribe_time: row.get("unsubscribe_time").and_then(parse_timestamp),
        unsubscribe_reason: text(&["unsubscribe_reason"]),
    })
}

fn company_cells(c: &Company) -> Vec<String> {
    vec![
        c.id.to_string(),
        c.name.clone(),
        opt_cell(&c.website),
        opt_cell(&c.roster_email),
        c.job_position.clone(),
        opt_cell(&c.resolved_email),
        c.resolution_method.as_str().to_string(),
        c.last_send_time.as_ref().map(format_timestamp).unwrap_or_default(),
        c.last_send_result.map(|r| r.as_str().to_string()).unwrap_or_default(),
        c.bounce_class.as_str().to_string(),
        c.bounce_first_seen.as_ref().map(format_timestamp).unwrap_or_default(),
        opt_cell(&c.bounce_reason),
        c.unsubscribe_state.as_str().to_string(),
        c.unsubscribe_time.as_ref().map(format_timestamp).unwrap_or_default(),
        opt_cell(&c.unsubscribe_reason),
    ]
}
