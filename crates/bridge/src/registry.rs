//! Site catalog registry.
//!
//! The authoritative, eventually-consistent view of which operations exist,
//! for which site, and how many live pages currently back them. Pure data
//! and mutation rules; the transport and bridge feed it from peer messages.
//!
//! A site catalog with zero backing pages never exists: when the last page
//! serving a site goes away the whole catalog is deleted and a change signal
//! fires for that site. Re-announcing a structurally identical operation
//! list only records the extra page and stays silent, so many tabs on the
//! same site do not spam catalog-changed notifications.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use webmcp_protocol::OperationDescriptor;

use crate::error::{Error, Result};

/// One `(site, operation)` pair from the flattened catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub site_id: String,
    pub operation: OperationDescriptor,
}

struct SiteCatalog {
    site_id: String,
    operations: Vec<OperationDescriptor>,
    page_refs: HashSet<String>,
}

#[derive(Default)]
struct RegistryState {
    /// Site catalogs in insertion order.
    sites: Vec<SiteCatalog>,
    /// page_ref -> owning site_id, for withdrawal lookup.
    pages: HashMap<String, String>,
}

impl RegistryState {
    /// Drops `page_ref` from `site_id`; returns true when the site's last
    /// page went away and the catalog was deleted.
    fn detach_page(&mut self, site_id: &str, page_ref: &str) -> bool {
        let Some(index) = self.sites.iter().position(|s| s.site_id == site_id) else {
            return false;
        };
        let site = &mut self.sites[index];
        site.page_refs.remove(page_ref);
        if site.page_refs.is_empty() {
            self.sites.remove(index);
            true
        } else {
            false
        }
    }
}

/// In-memory catalog of operations per site.
pub struct Registry {
    state: Mutex<RegistryState>,
    changes: broadcast::Sender<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(RegistryState::default()),
            changes,
        }
    }

    /// Subscribe to catalog change signals. Each received value is the site
    /// id whose externally visible catalog changed (including deletion).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }

    /// Record that `page_ref` serves `site_id` with the given operations.
    ///
    /// An empty operation list is a withdrawal for `page_ref`. A page that
    /// previously backed a different site is withdrawn from it first (the
    /// page navigated).
    pub fn announce(
        &self,
        site_id: String,
        operations: Vec<OperationDescriptor>,
        page_ref: String,
    ) {
        if operations.is_empty() {
            self.withdraw(&page_ref);
            return;
        }
        let operations = dedupe_by_name(operations);

        let mut changed_sites: Vec<String> = Vec::new();
        {
            let mut state = self.state.lock();

            if let Some(previous) = state.pages.get(&page_ref).cloned() {
                if previous != site_id && state.detach_page(&previous, &page_ref) {
                    changed_sites.push(previous);
                }
            }
            state.pages.insert(page_ref.clone(), site_id.clone());

            match state.sites.iter_mut().find(|s| s.site_id == site_id) {
                Some(site) => {
                    site.page_refs.insert(page_ref);
                    if !same_operations(&site.operations, &operations) {
                        site.operations = operations;
                        changed_sites.push(site_id);
                    }
                }
                None => {
                    state.sites.push(SiteCatalog {
                        site_id: site_id.clone(),
                        operations,
                        page_refs: HashSet::from([page_ref]),
                    });
                    changed_sites.push(site_id);
                }
            }
        }

        for site in changed_sites {
            self.emit(site);
        }
    }

    /// A page is gone. Idempotent: unknown `page_ref`s are a no-op.
    pub fn withdraw(&self, page_ref: &str) {
        let deleted_site = {
            let mut state = self.state.lock();
            match state.pages.remove(page_ref) {
                Some(site_id) => state
                    .detach_page(&site_id, page_ref)
                    .then_some(site_id),
                None => None,
            }
        };

        if let Some(site) = deleted_site {
            self.emit(site);
        }
    }

    /// Snapshot of all `(site, operation)` pairs, flattened, in site
    /// insertion order.
    pub fn list(&self) -> Vec<CatalogEntry> {
        let state = self.state.lock();
        state
            .sites
            .iter()
            .flat_map(|site| {
                site.operations.iter().map(|operation| CatalogEntry {
                    site_id: site.site_id.clone(),
                    operation: operation.clone(),
                })
            })
            .collect()
    }

    /// The owning site id when exactly one site publishes `operation`.
    ///
    /// Operation names are not globally unique; ambiguity is surfaced to the
    /// caller rather than resolved here.
    pub fn resolve_site(&self, operation: &str) -> Result<String> {
        let state = self.state.lock();
        let mut owner: Option<String> = None;
        for site in &state.sites {
            if site.operations.iter().any(|op| op.name == operation) {
                if owner.is_some() {
                    return Err(Error::AmbiguousOperation(operation.to_string()));
                }
                owner = Some(site.site_id.clone());
            }
        }
        owner.ok_or_else(|| Error::UnknownOperation(operation.to_string()))
    }

    /// Number of sites with a live catalog.
    pub fn site_count(&self) -> usize {
        self.state.lock().sites.len()
    }

    fn emit(&self, site_id: String) {
        debug!(target: "webmcp.registry", site = %site_id, "catalog changed");
        // No subscribers is fine; the signal is best-effort.
        let _ = self.changes.send(site_id);
    }
}

/// Keeps the announced order but makes names unique: a repeated name
/// replaces the earlier descriptor in place.
fn dedupe_by_name(operations: Vec<OperationDescriptor>) -> Vec<OperationDescriptor> {
    let mut out: Vec<OperationDescriptor> = Vec::with_capacity(operations.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for op in operations {
        match index.get(&op.name) {
            Some(&slot) => out[slot] = op,
            None => {
                index.insert(op.name.clone(), out.len());
                out.push(op);
            }
        }
    }
    out
}

/// Structural, order-independent comparison of two operation lists.
fn same_operations(a: &[OperationDescriptor], b: &[OperationDescriptor]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let by_name = |ops: &[OperationDescriptor]| {
        ops.iter()
            .map(|op| (op.name.clone(), op.clone()))
            .collect::<BTreeMap<_, _>>()
    };
    by_name(a) == by_name(b)
}
