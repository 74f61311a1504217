//! Normative data sources
//!
//! A source hands out connections through the resource pool. The bundled
//! `TableSource` serves in-memory `NormativeTables`; its availability switch
//! lets callers simulate an outage of the backing store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::data::NormativeTables;
use crate::error::{QcError, Result};
use crate::metrics::Metric;
use crate::pool::{PoolError, ResourceManager};
use crate::types::{AgeGroup, NormativeStatistic, QualityThreshold};

/// One open session against a normative data source
pub trait NormativeConnection: Send {
    fn age_groups(&mut self) -> Result<Vec<AgeGroup>>;

    fn statistic(&mut self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>>;

    fn threshold(&mut self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>>;

    /// Cheap liveness probe used when a connection returns to the pool
    fn ping(&mut self) -> bool;
}

/// Pool manager over shared in-memory tables
#[derive(Clone)]
pub struct TableSource {
    tables: Arc<NormativeTables>,
    available: Arc<AtomicBool>,
    queries: Arc<AtomicU64>,
}

impl TableSource {
    pub fn new(tables: Arc<NormativeTables>) -> Self {
        Self {
            tables,
            available: Arc::new(AtomicBool::new(true)),
            queries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tables(&self) -> &Arc<NormativeTables> {
        &self.tables
    }

    /// Take the source offline or bring it back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queries served across all connections
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

pub struct TableConnection {
    tables: Arc<NormativeTables>,
    available: Arc<AtomicBool>,
    queries: Arc<AtomicU64>,
}

impl TableConnection {
    fn check(&self) -> Result<&NormativeTables> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(QcError::Source("normative data source unavailable".to_string()));
        }
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(&self.tables)
    }
}

impl NormativeConnection for TableConnection {
    fn age_groups(&mut self) -> Result<Vec<AgeGroup>> {
        Ok(self.check()?.age_groups().to_vec())
    }

    fn statistic(&mut self, metric: Metric, age_group: &str) -> Result<Option<NormativeStatistic>> {
        Ok(self.check()?.statistic(metric, age_group).cloned())
    }

    fn threshold(&mut self, metric: Metric, age_group: &str) -> Result<Option<QualityThreshold>> {
        Ok(self.check()?.threshold(metric, age_group).cloned())
    }

    fn ping(&mut self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

impl ResourceManager for TableSource {
    type Resource = TableConnection;

    fn create(&self) -> std::result::Result<TableConnection, PoolError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(PoolError::Create("normative data source unavailable".to_string()));
        }
        Ok(TableConnection {
            tables: Arc::clone(&self.tables),
            available: Arc::clone(&self.available),
            queries: Arc::clone(&self.queries),
        })
    }

    fn is_valid(&self, connection: &mut TableConnection) -> bool {
        connection.ping()
    }

    fn close(&self, _connection: TableConnection) {}
}
