//! Contributor identities with random, collision-free numeric codes.

use std::collections::{BTreeSet, HashMap, HashSet};

use lexi_core::{ContributorIdentity, NewContributor};
use lexi_storage::CatalogTransaction;
use rand::Rng;
use tracing::debug;

use crate::error::ImportError;

pub const MAX_CODE: i32 = 99_999_999;
pub const MAX_CODE_ATTEMPTS: usize = 1_000;

#[derive(Debug, Clone, Copy)]
pub struct CodeAllocator {
    pub max_code: i32,
    pub max_attempts: usize,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self {
            max_code: MAX_CODE,
            max_attempts: MAX_CODE_ATTEMPTS,
        }
    }
}

impl CodeAllocator {
    /// Draws one code per name, re-rolling against `taken`, which grows as codes are handed out.
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        names: &[String],
        taken: &mut HashSet<i32>,
        rng: &mut R,
    ) -> Result<Vec<NewContributor>, ImportError> {
        let mut allocated = Vec::with_capacity(names.len());
        for name in names {
            let mut code = None;
            for _ in 0..self.max_attempts {
                let candidate = rng.gen_range(0..=self.max_code);
                if taken.insert(candidate) {
                    code = Some(candidate);
                    break;
                }
            }
            let code = code.ok_or_else(|| ImportError::CodeSpaceExhausted(name.clone()))?;
            allocated.push(NewContributor {
                name: name.clone(),
                code,
            });
        }
        Ok(allocated)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContributorRegistry {
    by_name: HashMap<String, ContributorIdentity>,
}

impl ContributorRegistry {
    pub fn new(existing: Vec<ContributorIdentity>) -> Self {
        let mut registry = Self::default();
        registry.merge(existing);
        registry
    }

    pub fn get(&self, name: &str) -> Option<&ContributorIdentity> {
        self.by_name.get(name)
    }

    pub fn codes(&self) -> HashSet<i32> {
        self.by_name.values().map(|c| c.code).collect()
    }

    pub fn merge(&mut self, identities: Vec<ContributorIdentity>) {
        for identity in identities {
            self.by_name.insert(identity.name.clone(), identity);
        }
    }

    /// Names not yet registered, sorted.
    pub fn unknown<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| !name.is_empty() && !self.by_name.contains_key(*name))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Loads existing identities, creates the missing ones in bulk and returns the merged lookup.
pub async fn register_contributors(
    tx: &mut dyn CatalogTransaction,
    names: &BTreeSet<String>,
    allocator: CodeAllocator,
) -> Result<(ContributorRegistry, usize), ImportError> {
    let mut registry = ContributorRegistry::new(tx.contributors().await?);
    let unknown = registry.unknown(names.iter().map(String::as_str));
    if unknown.is_empty() {
        return Ok((registry, 0));
    }

    let mut taken = registry.codes();
    let planned = allocator.allocate(&unknown, &mut taken, &mut rand::thread_rng())?;
    let created = tx.insert_contributors(planned).await?;
    let count = created.len();
    debug!(count, "registered new contributors");
    registry.merge(created);
    Ok((registry, count))
}
