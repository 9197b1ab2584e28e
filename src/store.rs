// 6.0: persistence seam. the relational layer lives outside the core; this trait
// is everything the engine needs from it. calls are synchronous and may fail
// with a transient signal (retry later) or not-found.

use crate::position::Position;
use crate::types::{PositionId, Timestamp};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("position {0} not found in store")]
    NotFound(PositionId),
}

pub trait PositionStore: Send + Sync {
    // open positions only; used to rebuild the working set at startup
    fn load_open_positions(&self) -> Result<Vec<Position>, StoreError>;

    // full snapshot write on every mutation
    fn upsert_position(&self, position: &Position) -> Result<(), StoreError>;

    // ids whose latest settlement record has settled == false
    fn load_unsettled_records(&self) -> Result<Vec<PositionId>, StoreError>;

    fn mark_settled(&self, id: PositionId, reference: &str, now: Timestamp) -> Result<(), StoreError>;
}

// in-memory store for tests and the simulation binary. would be the ORM-backed
// repository in the host application.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<PositionId, Position>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: PositionId) -> Option<Position> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PositionStore for InMemoryStore {
    fn load_open_positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect())
    }

    fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        self.rows.lock().unwrap().insert(position.id, position.clone());
        Ok(())
    }

    fn load_unsettled_records(&self) -> Result<Vec<PositionId>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|p| !p.settlement.settled)
            .map(|p| p.id)
            .collect())
    }

    fn mark_settled(&self, id: PositionId, reference: &str, now: Timestamp) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        row.settlement.mark_settled(reference.to_string(), now);
        Ok(())
    }
}
