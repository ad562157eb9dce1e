use std::collections::BTreeMap;
use crate::error::{check_dimension, Result, SpaceError};
use super::RowStore;

/// In-memory table.
pub struct MemoryRowStore {
    name: String,
    dimensions: usize,
    rows: BTreeMap<u64, Vec<f32>>,
}

impl MemoryRowStore {
    pub fn new(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            rows: BTreeMap::new(),
        }
    }
}

impl RowStore for MemoryRowStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn create(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimensions, vector)?;
        if self.rows.contains_key(&key) {
            return Err(SpaceError::DuplicateKey(key));
        }
        self.rows.insert(key, vector.to_vec());
        Ok(())
    }

    fn update(&mut self, key: u64, vector: &[f32]) -> Result<()> {
        check_dimension(self.dimensions, vector)?;
        let row = self.rows.get_mut(&key).ok_or(SpaceError::NotFound(key))?;
        row.copy_from_slice(vector);
        Ok(())
    }

    fn delete(&mut self, key: u64) -> Result<bool> {
        Ok(self.rows.remove(&key).is_some())
    }

    fn get(&self, key: u64) -> Result<Vec<f32>> {
        self.rows.get(&key).cloned().ok_or(SpaceError::NotFound(key))
    }

    fn contains(&self, key: u64) -> bool {
        self.rows.contains_key(&key)
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn dump(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        Ok(self.rows.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn drop_table(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}
