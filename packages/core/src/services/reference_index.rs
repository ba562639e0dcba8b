//! Reference Index for impact analysis
//!
//! Answers "which items reference this one" without scanning the model. Deleting
//! an item, finding its usages and dependency-ordered processing all read it.
//!
//! # Architecture
//!
//! The index keeps two maps:
//!
//! - `target id → {ReferenceInfo}`: who references a target, compared by the
//!   referencing item's id
//! - `source id → {target id}`: what each item contributed, so an update can
//!   remove exactly those entries before re-adding the item
//!
//! An item references a target through three channels: its dependencies
//! (ancestors and kind-specific reference properties), GUIDs found in the text
//! payload of XSL and XPath items, and declared references such as the
//! confirmation rule of an entity UI action.
//!
//! # Lifecycle
//!
//! The index starts uninitialized. While the model is loading, updates are
//! queued in arrival order; [`ReferenceIndex::initialize`] drains the queue and
//! flips the index ready. [`ReferenceIndex::clear`] returns to the loading
//! state, e.g. when the application reloads the model.
//!
//! # Concurrency
//!
//! Both maps are `DashMap`s and every per-target set is mutated under its
//! shard lock, so items referencing the same target can be indexed from
//! several tasks at once.

use crate::models::kinds::{self, props};
use crate::models::{SchemaItem, SchemaItemRef};
use crate::services::error::ReferenceIndexError;
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use uuid::Uuid;

/// An item referencing some target
///
/// Equality and hashing use the id only, so one source appears at most once per
/// target regardless of how many channels reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceInfo {
    pub id: Uuid,
    pub item_type: String,
}

impl ReferenceInfo {
    pub fn new(id: Uuid, item_type: impl Into<String>) -> Self {
        Self {
            id,
            item_type: item_type.into(),
        }
    }

    pub fn of(item: &SchemaItem) -> Self {
        Self::new(item.id(), item.item_type())
    }

    fn key(id: Uuid) -> Self {
        Self::new(id, String::new())
    }
}

impl PartialEq for ReferenceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReferenceInfo {}

impl Hash for ReferenceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Statistics about the reference index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceIndexStats {
    /// Number of items referenced by at least one other item
    pub targets: usize,
    /// Total number of (target, source) pairs
    pub references: usize,
    /// Number of items that contributed references
    pub sources: usize,
    /// Updates queued until initialization
    pub pending_updates: usize,
    pub initialized: bool,
}

/// GUIDs embedded in XSL and XPath text
const GUID_PATTERN: &str =
    r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

static GUID_REGEX: OnceLock<Regex> = OnceLock::new();

fn guid_regex() -> &'static Regex {
    GUID_REGEX.get_or_init(|| Regex::new(GUID_PATTERN).unwrap())
}

/// Reverse reference map over the whole model
pub struct ReferenceIndex {
    references: DashMap<Uuid, HashSet<ReferenceInfo>>,
    contributions: DashMap<Uuid, HashSet<Uuid>>,
    pending: Mutex<VecDeque<SchemaItemRef>>,
    initialized: AtomicBool,
}

impl ReferenceIndex {
    /// Empty, uninitialized index
    pub fn new() -> Self {
        Self {
            references: DashMap::new(),
            contributions: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Empty index that is ready at once, for a model that starts empty
    pub fn ready() -> Self {
        let index = Self::new();
        index.initialized.store(true, Ordering::Release);
        index
    }

    /// Index every reference `item` makes
    ///
    /// Dependencies are computed strictly: a failure is returned, never
    /// skipped, since an under-indexed item would allow unsafe deletes.
    pub async fn add(&self, item: &SchemaItemRef) -> Result<(), ReferenceIndexError> {
        let targets = collect_targets(item).await?;
        let source = ReferenceInfo::of(item);

        for target in &targets {
            self.references
                .entry(*target)
                .or_default()
                .insert(source.clone());
        }
        if !targets.is_empty() {
            self.contributions
                .entry(source.id)
                .or_default()
                .extend(targets.iter().copied());
        }

        tracing::debug!(
            "Indexed {} references of {} {}",
            targets.len(),
            source.item_type,
            source.id
        );
        Ok(())
    }

    /// Apply an item change now, or queue it while the model is still loading
    pub async fn update_now_or_defer(&self, item: &SchemaItemRef) -> Result<(), ReferenceIndexError> {
        {
            let mut pending = self.pending.lock();
            if !self.initialized.load(Ordering::Acquire) {
                pending.push_back(item.clone());
                return Ok(());
            }
        }
        self.update_now(item).await
    }

    /// Remove everything `item` contributed, then re-add it unless deleted
    pub async fn update_now(&self, item: &SchemaItemRef) -> Result<(), ReferenceIndexError> {
        self.remove_source(item.id());
        if !item.is_deleted() {
            self.add(item).await?;
        }
        Ok(())
    }

    /// Drop every entry contributed by `source_id`
    pub fn remove_source(&self, source_id: Uuid) {
        let Some((_, targets)) = self.contributions.remove(&source_id) else {
            return;
        };
        let key = ReferenceInfo::key(source_id);
        for target in targets {
            if let Some(mut sources) = self.references.get_mut(&target) {
                sources.remove(&key);
            }
            self.references.remove_if(&target, |_, sources| sources.is_empty());
        }
    }

    /// Drain queued updates in arrival order, then mark the index ready
    ///
    /// Updates queued while draining are processed too; the index only flips
    /// once the queue is seen empty under its lock.
    pub async fn initialize(&self) -> Result<(), ReferenceIndexError> {
        let mut processed = 0;
        loop {
            let next = {
                let mut pending = self.pending.lock();
                match pending.pop_front() {
                    Some(item) => item,
                    None => {
                        self.initialized.store(true, Ordering::Release);
                        break;
                    }
                }
            };
            self.update_now(&next).await?;
            processed += 1;
        }

        let stats = self.stats();
        tracing::info!(
            "Reference index initialized ({} deferred updates applied, {} targets, {} references)",
            processed,
            stats.targets,
            stats.references
        );
        Ok(())
    }

    /// Items referencing `target_id`; empty when nothing does
    pub fn get_references(&self, target_id: Uuid) -> HashSet<ReferenceInfo> {
        self.references
            .get(&target_id)
            .map(|sources| sources.clone())
            .unwrap_or_default()
    }

    /// Forget all entries and return to the loading state
    ///
    /// With `full_clear` queued updates are dropped as well.
    pub fn clear(&self, full_clear: bool) {
        {
            let mut pending = self.pending.lock();
            self.initialized.store(false, Ordering::Release);
            if full_clear {
                pending.clear();
            }
        }
        self.references.clear();
        self.contributions.clear();
        tracing::info!("Reference index cleared (full: {})", full_clear);
    }

    /// Clear, add every non-deleted item, then initialize
    pub async fn rebuild(&self, items: &[SchemaItemRef]) -> Result<(), ReferenceIndexError> {
        self.clear(true);
        for item in items.iter().filter(|i| !i.is_deleted()) {
            self.add(item).await?;
        }
        self.initialize().await
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn pending_updates(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> ReferenceIndexStats {
        ReferenceIndexStats {
            targets: self.references.len(),
            references: self.references.iter().map(|e| e.value().len()).sum(),
            sources: self.contributions.len(),
            pending_updates: self.pending_updates(),
            initialized: self.is_initialized(),
        }
    }
}

impl Default for ReferenceIndex {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect_targets(item: &SchemaItemRef) -> Result<HashSet<Uuid>, ReferenceIndexError> {
    let mut targets = HashSet::new();

    let dependencies = item
        .get_dependencies(false)
        .await
        .map_err(|e| ReferenceIndexError::dependencies(item.id(), e))?;
    targets.extend(dependencies.iter().map(|d| d.id()));

    if let Some(text) = text_payload(item)? {
        targets.extend(
            guid_regex()
                .find_iter(&text)
                .filter_map(|m| Uuid::parse_str(m.as_str()).ok()),
        );
    }

    let declared = item
        .behavior()
        .declared_reference_ids(item)
        .map_err(|e| ReferenceIndexError::dependencies(item.id(), e))?;
    targets.extend(declared);

    // An item never guards its own delete, and the nil id names nothing
    targets.remove(&Uuid::nil());
    targets.remove(&item.id());
    Ok(targets)
}

/// Free text scanned for embedded GUIDs, for the kinds that carry one
fn text_payload(item: &SchemaItem) -> Result<Option<String>, ReferenceIndexError> {
    match item.item_type() {
        kinds::XSL_TRANSFORMATION => Ok(item.property_str(props::TEXT_STORE)),
        kinds::XSL_RULE => Ok(item.property_str(props::XSL)),
        kinds::XPATH_RULE => match item.property_str(props::XPATH) {
            Some(xpath) => Ok(Some(xpath)),
            None => Err(ReferenceIndexError::missing_text_payload(
                item.id(),
                item.item_type(),
                props::XPATH,
            )),
        },
        _ => Ok(None),
    }
}
