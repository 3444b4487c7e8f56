//! Per-entity outcomes and the run summary

use std::fmt;
use std::time::Duration;

/// How processing of one entity type ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityStatus {
    Completed,
    Skipped(String),
    Failed(String),
    Cancelled,
}

impl EntityStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EntityStatus::Completed => "completed",
            EntityStatus::Skipped(_) => "skipped",
            EntityStatus::Failed(_) => "failed",
            EntityStatus::Cancelled => "cancelled",
        }
    }
}

/// Counters and status for one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReport {
    pub entity_type: String,
    pub status: EntityStatus,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rejected field values on extraction, bad payloads on import
    pub errors: u64,
    /// Batches committed on extraction, pages inserted on import
    pub batches: u64,
    pub elapsed: Duration,
}

impl EntityReport {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            status: EntityStatus::Completed,
            rows_read: 0,
            rows_written: 0,
            errors: 0,
            batches: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn skipped(entity_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: EntityStatus::Skipped(reason.into()),
            ..Self::new(entity_type)
        }
    }

    pub fn cancelled(entity_type: impl Into<String>) -> Self {
        Self {
            status: EntityStatus::Cancelled,
            ..Self::new(entity_type)
        }
    }
}

/// Outcome of a whole extraction or import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub entities: Vec<EntityReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn push(&mut self, report: EntityReport) {
        self.entities.push(report);
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|r| r.entity_type == entity_type)
    }

    pub fn has_failures(&self) -> bool {
        self.entities
            .iter()
            .any(|r| matches!(r.status, EntityStatus::Failed(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntityReport> {
        self.entities
            .iter()
            .filter(|r| matches!(r.status, EntityStatus::Failed(_)))
    }

    pub fn total_rows_written(&self) -> u64 {
        self.entities.iter().map(|r| r.rows_written).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.entities.iter().map(|r| r.errors).sum()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:<10} {:>10} {:>10} {:>8} {:>8} {:>9}",
            "ENTITY", "STATUS", "READ", "WRITTEN", "ERRORS", "BATCHES", "ELAPSED"
        )?;
        for r in &self.entities {
            writeln!(
                f,
                "{:<32} {:<10} {:>10} {:>10} {:>8} {:>8} {:>8.1}s",
                r.entity_type,
                r.status.label(),
                r.rows_read,
                r.rows_written,
                r.errors,
                r.batches,
                r.elapsed.as_secs_f64()
            )?;
            match &r.status {
                EntityStatus::Skipped(reason) => writeln!(f, "    reason: {}", reason)?,
                EntityStatus::Failed(error) => writeln!(f, "    error: {}", error)?,
                _ => {}
            }
        }
        write!(
            f,
            "{} entity types, {} rows written, {} errors in {:.1}s",
            self.entities.len(),
            self.total_rows_written(),
            self.total_errors(),
            self.elapsed.as_secs_f64()
        )
    }
}
