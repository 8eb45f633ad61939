use std::collections::HashMap;

use serde_json::{json, Value};

use crate::content::{EntityId, INVALID_ENTITY_ID};
use crate::helpers::{TileError, TileResult};

/// Dense indices for the entity ids seen in one tile. Index 0 is the invalid id.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchIdMap {
    ids: Vec<EntityId>,
    index: HashMap<EntityId, u32>,
}

impl Default for BatchIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchIdMap {
    pub fn new() -> Self {
        let mut index = HashMap::new();
        index.insert(INVALID_ENTITY_ID, 0);
        BatchIdMap {
            ids: vec![INVALID_ENTITY_ID],
            index,
        }
    }

    pub fn get_batch_id(&mut self, id: EntityId) -> u32 {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.ids.len() as u32;
        self.ids.push(id);
        self.index.insert(id, i);
        i
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Only the reserved invalid entry is present.
    pub fn is_empty(&self) -> bool {
        self.ids.len() <= 1
    }

    /// Entity ids ordered by batch id.
    pub fn entity_ids(&self) -> &[EntityId] {
        &self.ids
    }
}

/// Turns the ordered entity id list into the batch table JSON payload.
pub trait BatchTableResolver: Send + Sync {
    fn batch_table(&self, ids: &[EntityId]) -> TileResult<Value>;
}

pub fn format_entity_id(id: EntityId) -> String {
    format!("0x{:x}", id)
}

/// Emits `{"element": ["0x..", ...]}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElementIdResolver;

impl BatchTableResolver for ElementIdResolver {
    fn batch_table(&self, ids: &[EntityId]) -> TileResult<Value> {
        let elements: Vec<String> = ids.iter().map(|&id| format_entity_id(id)).collect();
        Ok(json!({ "element": elements }))
    }
}

/// Batch table JSON bytes, or empty when the tile carries no ids.
pub fn batch_table_bytes(
    map: &BatchIdMap,
    resolver: &dyn BatchTableResolver,
) -> TileResult<Vec<u8>> {
    if map.is_empty() {
        return Ok(Vec::new());
    }
    let table = resolver.batch_table(map.entity_ids())?;
    if !table.is_object() {
        return Err(TileError::BatchTableParseError(
            "batch table must be a JSON object".into(),
        ));
    }
    serde_json::to_vec(&table).map_err(|e| TileError::BatchTableParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_is_index_zero() {
        let mut map = BatchIdMap::new();
        assert_eq!(map.len(), 1);
        assert!(map.is_empty());
        assert_eq!(map.get_batch_id(INVALID_ENTITY_ID), 0);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn lookups_are_idempotent() {
        let mut map = BatchIdMap::new();
        let a = map.get_batch_id(0x20000000001);
        let b = map.get_batch_id(0x42);
        assert_eq!((a, b), (1, 2));
        assert_eq!(map.get_batch_id(0x20000000001), 1);
        assert_eq!(map.get_batch_id(0x42), 2);
        assert_eq!(map.entity_ids(), &[0, 0x20000000001, 0x42]);
    }

    #[test]
    fn element_resolver_uses_hex() {
        let mut map = BatchIdMap::new();
        map.get_batch_id(0x1a);
        let bytes = batch_table_bytes(&map, &ElementIdResolver).unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v, json!({"element": ["0x0", "0x1a"]}));

        assert!(batch_table_bytes(&BatchIdMap::new(), &ElementIdResolver)
            .unwrap()
            .is_empty());
    }
}
