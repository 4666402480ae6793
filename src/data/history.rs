//! Historical Ledger
//!
//! Season-spanning, chronologically sorted race records with per-entity
//! indexes for "everything before date D" queries and rolling form.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

use crate::data::archive::{ArchiveSpec, HistoricalArchive};
use crate::error::PipelineError;
use crate::models::RaceRecord;

/// Number of most recent races averaged into a form value
pub const FORM_WINDOW: usize = 3;
/// Form assumed when an entity has fewer than `FORM_WINDOW` prior races (mid-pack)
pub const DEFAULT_FORM: f64 = 10.0;

/// Which kind of entity a history query is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Driver,
    Constructor,
}

/// Date and circuit of a race known to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceMeta {
    pub date: NaiveDate,
    pub circuit: String,
}

/// Rolling form over an ascending-by-date slice of past records
///
/// Fewer than `FORM_WINDOW` records yields `DEFAULT_FORM`; otherwise the plain
/// mean finishing position of the last `FORM_WINDOW` records.
pub fn compute_form(past: &[&RaceRecord]) -> f64 {
    if past.len() < FORM_WINDOW {
        return DEFAULT_FORM;
    }

    let recent = &past[past.len() - FORM_WINDOW..];
    recent.iter().map(|r| r.position as f64).sum::<f64>() / FORM_WINDOW as f64
}

/// Historical records indexed by driver and constructor
#[derive(Debug, Clone, Default)]
pub struct HistoricalLedger {
    /// All records sorted by date ascending (ties keep ingestion order)
    records: Vec<RaceRecord>,
    /// driver -> indices into `records`, ascending by date
    by_driver: HashMap<String, Vec<usize>>,
    /// constructor -> indices into `records`, ascending by date
    by_constructor: HashMap<String, Vec<usize>>,
}

impl HistoricalLedger {
    /// Build a ledger from records in any order
    ///
    /// Duplicate (season, round, driver) rows keep the first occurrence.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = RaceRecord>,
    {
        let mut seen: HashSet<(i32, u32, String)> = HashSet::new();
        let mut duplicates = 0usize;

        let mut records: Vec<RaceRecord> = records
            .into_iter()
            .filter(|r| {
                let fresh = seen.insert((r.season, r.round, r.driver.clone()));
                if !fresh {
                    duplicates += 1;
                }
                fresh
            })
            .collect();

        if duplicates > 0 {
            debug!("Dropped {} duplicate race records", duplicates);
        }

        // Stable: same-date records stay in ingestion order
        records.sort_by_key(|r| r.date);

        let mut by_driver: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_constructor: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, record) in records.iter().enumerate() {
            by_driver.entry(record.driver.clone()).or_default().push(idx);
            by_constructor
                .entry(record.constructor.clone())
                .or_default()
                .push(idx);
        }

        Self {
            records,
            by_driver,
            by_constructor,
        }
    }

    /// Ingest every archive and merge into one ledger
    pub fn load(specs: &[ArchiveSpec]) -> Result<Self, PipelineError> {
        let mut records = Vec::new();

        for spec in specs {
            let archive = HistoricalArchive::load(spec)?;
            info!(
                "Loaded {} records from {}",
                archive.len(),
                archive.source()
            );
            records.extend(archive.into_rows().into_iter().map(|row| row.record));
        }

        let ledger = Self::from_records(records);
        info!(
            "Historical ledger: {} records, {} drivers, {} constructors",
            ledger.len(),
            ledger.by_driver.len(),
            ledger.by_constructor.len()
        );
        Ok(ledger)
    }

    /// A new ledger containing only one season's records
    pub fn for_season(&self, season: i32) -> Self {
        Self::from_records(
            self.records
                .iter()
                .filter(|r| r.season == season)
                .cloned(),
        )
    }

    fn index(&self, kind: EntityKind) -> &HashMap<String, Vec<usize>> {
        match kind {
            EntityKind::Driver => &self.by_driver,
            EntityKind::Constructor => &self.by_constructor,
        }
    }

    /// All records for an entity strictly before `cutoff`, date ascending
    ///
    /// Unknown entities yield an empty sequence.
    pub fn records_before(
        &self,
        kind: EntityKind,
        id: &str,
        cutoff: NaiveDate,
    ) -> Vec<&RaceRecord> {
        self.index(kind)
            .get(id)
            .map(|indices| {
                let end = indices.partition_point(|&i| self.records[i].date < cutoff);
                indices[..end].iter().map(|&i| &self.records[i]).collect()
            })
            .unwrap_or_default()
    }

    /// Rolling form for an entity as of `cutoff`
    pub fn form(&self, kind: EntityKind, id: &str, cutoff: NaiveDate) -> f64 {
        compute_form(&self.records_before(kind, id, cutoff))
    }

    /// Driver's most recent constructor before `cutoff`
    pub fn constructor_of(&self, driver: &str, cutoff: NaiveDate) -> Option<&str> {
        self.records_before(EntityKind::Driver, driver, cutoff)
            .last()
            .map(|r| r.constructor.as_str())
    }

    /// Date and circuit of a race, if the ledger holds it
    pub fn race(&self, season: i32, round: u32) -> Option<RaceMeta> {
        self.records
            .iter()
            .find(|r| r.season == season && r.round == round)
            .map(|r| RaceMeta {
                date: r.date,
                circuit: r.circuit.clone(),
            })
    }

    /// Sorted, de-duplicated circuit names
    pub fn circuits(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.circuit.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorted, de-duplicated seasons
    pub fn seasons(&self) -> Vec<i32> {
        self.records
            .iter()
            .map(|r| r.season)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn records(&self) -> &[RaceRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
