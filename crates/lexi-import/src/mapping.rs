use std::collections::HashMap;

use lexi_core::{EntryId, FieldAssociation, FieldMapping, MappingId};
use lexi_feeds::split_pipe;

use crate::error::ImportError;

/// Category label applied to every sign; carries no information so it never maps.
pub const ALL_SIGNS: &str = "all signs";

#[derive(Debug, Clone)]
pub struct FieldMappingResolver {
    domain: String,
    fallback_name: String,
    by_name: HashMap<String, MappingId>,
}

impl FieldMappingResolver {
    pub fn new(domain: &str, fallback_name: &str, mappings: Vec<FieldMapping>) -> Self {
        let by_name = mappings
            .into_iter()
            .filter(|m| m.domain == domain)
            .map(|m| (m.name, m.id))
            .collect();
        Self {
            domain: domain.to_string(),
            fallback_name: fallback_name.to_string(),
            by_name,
        }
    }

    pub fn fallback_id(&self) -> Option<MappingId> {
        self.by_name.get(&self.fallback_name).copied()
    }

    /// Associations for one entry. Unmapped labels collapse into a single fallback association.
    pub fn resolve(
        &self,
        entry_id: EntryId,
        categories: &str,
    ) -> Result<Vec<FieldAssociation>, ImportError> {
        let mut ids: Vec<MappingId> = Vec::new();
        let mut unmapped = false;
        for label in split_pipe(categories) {
            if label.eq_ignore_ascii_case(ALL_SIGNS) {
                continue;
            }
            match self.by_name.get(label) {
                Some(id) if !ids.contains(id) => ids.push(*id),
                Some(_) => {}
                None => unmapped = true,
            }
        }

        if unmapped {
            let fallback = self.fallback_id().ok_or_else(|| ImportError::MissingFallback {
                domain: self.domain.clone(),
                name: self.fallback_name.clone(),
            })?;
            if !ids.contains(&fallback) {
                ids.push(fallback);
            }
        }

        Ok(ids
            .into_iter()
            .map(|mapping_id| FieldAssociation {
                entry_id,
                mapping_id,
            })
            .collect())
    }
}
