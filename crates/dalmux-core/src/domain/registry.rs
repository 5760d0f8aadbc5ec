//! Process-wide domain registry
//!
//! Domains are registered once at start-up; transports resolve entity types
//! by name through this registry when rebuilding value trees.

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::RwLock;
use tracing::info;

use super::{Domain, EntityDefinition, EntityType};
use crate::error::{Error, Result};

lazy_static! {
    static ref DOMAINS: RwLock<HashMap<String, Arc<Domain>>> = RwLock::new(HashMap::new());
}

/// Publish a fully defined domain, failing if the name is already taken
pub fn register(domain: Domain) -> Result<Arc<Domain>> {
    let mut domains = DOMAINS.write();
    if domains.contains_key(domain.name()) {
        return Err(Error::Configuration(format!(
            "domain {} is already registered",
            domain.name()
        )));
    }

    let domain = Arc::new(domain);
    info!(
        "[Domain] Registered domain {} ({} entity types)",
        domain.name(),
        domain.definitions().count()
    );
    domains.insert(domain.name().to_string(), Arc::clone(&domain));

    Ok(domain)
}

/// Look up a registered domain by name
pub fn domain(name: &str) -> Option<Arc<Domain>> {
    DOMAINS.read().get(name).cloned()
}

/// Look up a definition in whichever registered domain owns the entity type
pub fn definition(entity_type: &EntityType) -> Option<Arc<EntityDefinition>> {
    DOMAINS
        .read()
        .get(entity_type.domain())
        .and_then(|d| d.definition_local(entity_type))
}

/// Names of all registered domains
pub fn domain_names() -> Vec<String> {
    let mut names: Vec<String> = DOMAINS.read().keys().cloned().collect();
    names.sort();
    names
}
