//! Table alias bookkeeping for a single generated statement.

use std::collections::HashMap;

use relmap_core::{Entity, Field};

/// Assigns each distinct entity a stable alias (`Name_N`) in first-seen order.
///
/// One context lives exactly as long as one statement is being rendered, so
/// every fragment of that statement agrees on the aliases.
#[derive(Debug, Clone, Default)]
pub struct SqlGenerationContext {
    aliases: HashMap<String, String>,
}

impl SqlGenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The alias of `entity`, allocating the next one on first sight.
    pub fn alias_for(&mut self, entity: &Entity) -> String {
        if let Some(alias) = self.aliases.get(&entity.name) {
            return alias.clone();
        }
        let alias = format!("{}_{}", entity.name, self.aliases.len());
        self.aliases.insert(entity.name.clone(), alias.clone());
        alias
    }

    /// `alias.column` for every field of the entity, in field order.
    pub fn columns_for_entity(&mut self, entity: &Entity) -> Vec<String> {
        let alias = self.alias_for(entity);
        entity
            .fields()
            .iter()
            .map(|field| format!("{}.{}", alias, field.column))
            .collect()
    }

    pub fn column_for_field(&mut self, entity: &Entity, field: &Field) -> String {
        format!("{}.{}", self.alias_for(entity), field.column)
    }

    /// Number of aliases handed out so far.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
