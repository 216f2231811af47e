// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The bounded asset store.
//!
//! Assets are structured documents outside the observation timeline, keyed
//! by id with secondary indices (e.g. a cutting tool's `Location`). The
//! store is an LRU bounded by `max_assets`: inserting past the bound evicts
//! the least recently used asset. Assets marked removed stay in the store
//! (and in their LRU position) until evicted; only eviction frees a slot.
//!
//! The store only mutates its own state; emitting the matching
//! ASSET_CHANGED / ASSET_REMOVED observations is the caller's job, after
//! this store's lock is released.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors from asset operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    /// The asset id, type, or body was empty.
    #[error("asset is missing its id, type, or body")]
    Incomplete,
    /// No asset with the given id exists.
    #[error("asset {0} not found")]
    NotFound(String),
    /// A removal arrived for an asset that was never stored.
    #[error("cannot remove nonexistent asset {0}")]
    RemoveNonexistent(String),
    /// Field updates only apply to cutting-tool assets.
    #[error("asset {0} does not support field updates")]
    NotUpdatable(String),
}

/// An immutable snapshot of one stored asset. Mutations replace the whole
/// snapshot in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    asset_id: String,
    asset_type: String,
    device_uuid: String,
    timestamp: String,
    removed: bool,
    body: String,
    keys: BTreeMap<String, String>,
}

impl Asset {
    /// The unique asset id.
    #[must_use]
    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// The asset type, e.g. `CuttingTool`.
    #[must_use]
    pub fn asset_type(&self) -> &str {
        &self.asset_type
    }

    /// Uuid of the owning device.
    #[must_use]
    pub fn device_uuid(&self) -> &str {
        &self.device_uuid
    }

    /// Timestamp of the last change.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// True once the asset was marked removed.
    #[must_use]
    pub fn removed(&self) -> bool {
        self.removed
    }

    /// The opaque serialized document.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Secondary-index keys extracted from the body.
    #[must_use]
    pub fn keys(&self) -> &BTreeMap<String, String> {
        &self.keys
    }
}

/// Scan an asset body for the removed flag and indexable keys.
///
/// The external parser owns full document semantics; the store only needs
/// the `removed="true"` attribute of the document element and the
/// `<Location>` element cutting tools are indexed by.
fn scan_body(body: &str) -> (bool, BTreeMap<String, String>) {
    let removed = body
        .find('>')
        .map(|end| &body[..end])
        .is_some_and(|tag| tag.contains("removed=\"true\"") || tag.contains("removed='true'"));

    let mut keys = BTreeMap::new();
    if let Some(value) = element_text(body, "Location") {
        keys.insert("Location".to_string(), value);
    }
    (removed, keys)
}

/// Text content of the first `<name ...>text</name>` element, if any.
fn element_text(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let start = body.find(&open)?;
    let content_start = start + body[start..].find('>')? + 1;
    let content_end = content_start + body[content_start..].find(&close)?;
    Some(body[content_start..content_end].trim().to_string())
}

/// Result of [`AssetStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddResult {
    /// The incoming document carried the removed flag; the caller emits
    /// ASSET_REMOVED instead of ASSET_CHANGED.
    pub removed: bool,
}

struct StoreInner {
    map: HashMap<String, Arc<Asset>>,
    /// Asset ids, least recently used first. Removed assets keep their slot.
    lru: VecDeque<String>,
    /// Secondary indices: key name -> key value -> asset id.
    indices: HashMap<String, HashMap<String, String>>,
    /// Live count per asset type.
    counts: BTreeMap<String, usize>,
}

/// Bounded LRU of assets with secondary-key indexing.
pub struct AssetStore {
    max_assets: usize,
    inner: Mutex<StoreInner>,
}

impl AssetStore {
    /// Create a store bounded to `max_assets` entries.
    #[must_use]
    pub fn new(max_assets: usize) -> Self {
        Self {
            max_assets,
            inner: Mutex::new(StoreInner {
                map: HashMap::new(),
                lru: VecDeque::new(),
                indices: HashMap::new(),
                counts: BTreeMap::new(),
            }),
        }
    }

    /// The configured bound.
    #[must_use]
    pub fn max_assets(&self) -> usize {
        self.max_assets
    }

    /// Number of stored assets, removed ones included.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().lru.len()
    }

    /// Live count per asset type.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn counts_by_type(&self) -> BTreeMap<String, usize> {
        self.inner.lock().unwrap().counts.clone()
    }

    /// Insert or replace an asset, moving it to most-recently-used and
    /// evicting the least recently used asset when the bound is exceeded.
    ///
    /// A body carrying the removed flag marks an *existing* asset removed
    /// without touching its LRU position.
    ///
    /// # Errors
    /// [`AssetError::Incomplete`] when id, type, or body is empty;
    /// [`AssetError::RemoveNonexistent`] when a removed body names an
    /// unknown id.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn add(
        &self,
        device_uuid: &str,
        asset_id: &str,
        asset_type: &str,
        body: &str,
        timestamp: &str,
    ) -> Result<AddResult, AssetError> {
        if asset_id.is_empty() || asset_type.is_empty() || body.is_empty() {
            return Err(AssetError::Incomplete);
        }
        let (removed, keys) = scan_body(body);

        let mut inner = self.inner.lock().unwrap();
        let existed = inner.map.contains_key(asset_id);

        if removed {
            if !existed {
                return Err(AssetError::RemoveNonexistent(asset_id.to_string()));
            }
        } else if existed {
            // Move to most-recently-used below.
            inner.lru.retain(|id| id != asset_id);
        } else {
            *inner.counts.entry(asset_type.to_string()).or_insert(0) += 1;
        }

        if !removed && inner.lru.len() >= self.max_assets {
            evict_lru(&mut inner);
        }

        let asset = Arc::new(Asset {
            asset_id: asset_id.to_string(),
            asset_type: asset_type.to_string(),
            device_uuid: device_uuid.to_string(),
            timestamp: timestamp.to_string(),
            removed,
            body: body.to_string(),
            keys: keys.clone(),
        });
        inner.map.insert(asset_id.to_string(), asset);
        if !removed {
            inner.lru.push_back(asset_id.to_string());
        }
        for (key, value) in keys {
            inner
                .indices
                .entry(key)
                .or_default()
                .insert(value, asset_id.to_string());
        }

        Ok(AddResult { removed })
    }

    /// Apply key/value patches to a cutting-tool asset and move it to
    /// most-recently-used. Patches with key `xml` carry an element fragment;
    /// its element name and text become the patch.
    ///
    /// # Errors
    /// [`AssetError::NotFound`] for an unknown id,
    /// [`AssetError::NotUpdatable`] for non-cutting-tool types.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn update(
        &self,
        device_uuid: &str,
        asset_id: &str,
        patches: &[(String, String)],
        timestamp: &str,
    ) -> Result<Arc<Asset>, AssetError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .map
            .get(asset_id)
            .ok_or_else(|| AssetError::NotFound(asset_id.to_string()))?;
        if current.asset_type != "CuttingTool" && current.asset_type != "CuttingToolArchetype" {
            return Err(AssetError::NotUpdatable(asset_id.to_string()));
        }

        let mut updated = (**current).clone();
        for (key, value) in patches {
            let (key, value) = if key == "xml" {
                match fragment_parts(value) {
                    Some(parts) => parts,
                    None => continue,
                }
            } else {
                (key.clone(), value.clone())
            };
            replace_element_text(&mut updated.body, &key, &value);
            if key == "Location" {
                updated.keys.insert(key, value);
            }
        }
        updated.timestamp = timestamp.to_string();
        updated.device_uuid = device_uuid.to_string();

        let updated = Arc::new(updated);
        for (key, value) in &updated.keys {
            inner
                .indices
                .entry(key.clone())
                .or_default()
                .insert(value.clone(), asset_id.to_string());
        }
        inner.map.insert(asset_id.to_string(), updated.clone());
        inner.lru.retain(|id| id != asset_id);
        inner.lru.push_back(asset_id.to_string());
        Ok(updated)
    }

    /// Mark an asset removed, keeping its LRU slot.
    ///
    /// # Errors
    /// [`AssetError::NotFound`] for an unknown id.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn remove(&self, asset_id: &str, timestamp: &str) -> Result<Arc<Asset>, AssetError> {
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .map
            .get(asset_id)
            .ok_or_else(|| AssetError::NotFound(asset_id.to_string()))?;
        let mut updated = (**current).clone();
        updated.removed = true;
        updated.timestamp = timestamp.to_string();
        let updated = Arc::new(updated);
        inner.map.insert(asset_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Mark every live asset of the given type removed, most recently used
    /// first, returning the marked assets in that order.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    pub fn remove_all(&self, asset_type: &str, timestamp: &str) -> Vec<Arc<Asset>> {
        let mut inner = self.inner.lock().unwrap();
        let ids: Vec<String> = inner.lru.iter().rev().cloned().collect();
        let mut marked = Vec::new();
        for id in ids {
            let Some(current) = inner.map.get(&id) else {
                continue;
            };
            if current.asset_type != asset_type || current.removed {
                continue;
            }
            let mut updated = (**current).clone();
            updated.removed = true;
            updated.timestamp = timestamp.to_string();
            let updated = Arc::new(updated);
            inner.map.insert(id, updated.clone());
            marked.push(updated);
        }
        marked
    }

    /// Fetch an asset by id, removed ones included.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn get(&self, asset_id: &str) -> Option<Arc<Asset>> {
        self.inner.lock().unwrap().map.get(asset_id).cloned()
    }

    /// Look up an asset through a secondary index.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn by_key(&self, key: &str, value: &str) -> Option<Arc<Asset>> {
        let inner = self.inner.lock().unwrap();
        let id = inner.indices.get(key)?.get(value)?;
        inner.map.get(id).cloned()
    }

    /// List assets, most recently used first, optionally filtered by type,
    /// skipping removed assets unless requested, bounded by `count`.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn list(
        &self,
        type_filter: Option<&str>,
        include_removed: bool,
        count: usize,
    ) -> Vec<Arc<Asset>> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for id in inner.lru.iter().rev() {
            if out.len() >= count {
                break;
            }
            let Some(asset) = inner.map.get(id) else {
                continue;
            };
            if type_filter.is_some_and(|t| t != asset.asset_type) {
                continue;
            }
            if asset.removed && !include_removed {
                continue;
            }
            out.push(asset.clone());
        }
        out
    }
}

fn evict_lru(inner: &mut StoreInner) {
    let Some(evicted_id) = inner.lru.pop_front() else {
        return;
    };
    if let Some(evicted) = inner.map.remove(&evicted_id) {
        if let Some(count) = inner.counts.get_mut(&evicted.asset_type) {
            *count = count.saturating_sub(1);
        }
        for (key, value) in &evicted.keys {
            if let Some(index) = inner.indices.get_mut(key) {
                index.remove(value);
            }
        }
        log::debug!("evicted asset {evicted_id} ({})", evicted.asset_type);
    }
}

/// Element name and text of an XML fragment like `<Overall>32.1</Overall>`.
fn fragment_parts(fragment: &str) -> Option<(String, String)> {
    let fragment = fragment.trim();
    let rest = fragment.strip_prefix('<')?;
    let name_end = rest.find(|c: char| c == '>' || c.is_ascii_whitespace())?;
    let name = &rest[..name_end];
    let text = element_text(fragment, name)?;
    Some((name.to_string(), text))
}

/// Replace the text of the first matching element in `body`, in place. A
/// body without the element is left untouched.
fn replace_element_text(body: &mut String, name: &str, value: &str) {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let Some(start) = body.find(&open) else {
        return;
    };
    let Some(content_offset) = body[start..].find('>') else {
        return;
    };
    let content_start = start + content_offset + 1;
    let Some(content_len) = body[content_start..].find(&close) else {
        return;
    };
    body.replace_range(content_start..content_start + content_len, value);
}

#[cfg(test)]
mod tests {
    use super::{AssetError, AssetStore};

    const TOOL: &str = "<CuttingTool serialNumber=\"1\"><Location type=\"POT\">5</Location></CuttingTool>";

    fn store() -> AssetStore {
        AssetStore::new(2)
    }

    #[test]
    fn add_and_fetch() {
        let store = store();
        store.add("u1", "T1", "CuttingTool", TOOL, "T").unwrap();
        let asset = store.get("T1").unwrap();
        assert_eq!(asset.asset_type(), "CuttingTool");
        assert!(!asset.removed());
        assert_eq!(asset.keys().get("Location").map(String::as_str), Some("5"));
        assert_eq!(store.by_key("Location", "5").unwrap().asset_id(), "T1");
    }

    #[test]
    fn lru_eviction_prunes_counts_and_indices() {
        let store = store();
        store
            .add("u1", "A1", "CuttingTool", "<CuttingTool><Location>1</Location></CuttingTool>", "T")
            .unwrap();
        store
            .add("u1", "A2", "CuttingTool", "<CuttingTool><Location>2</Location></CuttingTool>", "T")
            .unwrap();
        store
            .add("u1", "A3", "CuttingTool", "<CuttingTool><Location>3</Location></CuttingTool>", "T")
            .unwrap();

        assert_eq!(store.count(), 2);
        assert!(store.get("A1").is_none());
        assert!(store.by_key("Location", "1").is_none());
        assert_eq!(store.counts_by_type().get("CuttingTool"), Some(&2));

        let listed: Vec<String> = store
            .list(None, false, 10)
            .iter()
            .map(|a| a.asset_id().to_string())
            .collect();
        assert_eq!(listed, vec!["A3".to_string(), "A2".to_string()]);
    }

    #[test]
    fn replace_moves_to_mru_without_recount() {
        let store = store();
        store.add("u1", "A1", "CuttingTool", TOOL, "T1").unwrap();
        store.add("u1", "A2", "CuttingTool", TOOL, "T2").unwrap();
        store.add("u1", "A1", "CuttingTool", TOOL, "T3").unwrap();

        assert_eq!(store.counts_by_type().get("CuttingTool"), Some(&2));
        let listed: Vec<String> = store
            .list(None, false, 10)
            .iter()
            .map(|a| a.asset_id().to_string())
            .collect();
        assert_eq!(listed, vec!["A1".to_string(), "A2".to_string()]);
    }

    #[test]
    fn remove_marks_but_keeps_the_asset() {
        let store = store();
        store.add("u1", "A1", "CuttingTool", TOOL, "T").unwrap();
        let removed = store.remove("A1", "T2").unwrap();
        assert!(removed.removed());
        assert_eq!(removed.timestamp(), "T2");
        assert!(store.get("A1").unwrap().removed());
        // Still occupies a slot; not listed unless asked.
        assert_eq!(store.count(), 1);
        assert!(store.list(None, false, 10).is_empty());
        assert_eq!(store.list(None, true, 10).len(), 1);
    }

    #[test]
    fn removed_body_requires_an_existing_asset() {
        let store = store();
        let result = store.add(
            "u1",
            "A1",
            "CuttingTool",
            "<CuttingTool removed=\"true\"/>",
            "T",
        );
        assert_eq!(result, Err(AssetError::RemoveNonexistent("A1".to_string())));

        store.add("u1", "A1", "CuttingTool", TOOL, "T").unwrap();
        let result = store
            .add(
                "u1",
                "A1",
                "CuttingTool",
                "<CuttingTool removed=\"true\"><Location>5</Location></CuttingTool>",
                "T2",
            )
            .unwrap();
        assert!(result.removed);
        assert!(store.get("A1").unwrap().removed());
    }

    #[test]
    fn remove_all_marks_live_assets_of_type_mru_first() {
        let store = AssetStore::new(4);
        store.add("u1", "A1", "CuttingTool", TOOL, "T").unwrap();
        store.add("u1", "A2", "Fixture", "<Fixture/>", "T").unwrap();
        store.add("u1", "A3", "CuttingTool", TOOL, "T").unwrap();
        store.remove("A3", "T").unwrap();
        store.add("u1", "A4", "CuttingTool", TOOL, "T").unwrap();

        let marked: Vec<String> = store
            .remove_all("CuttingTool", "T2")
            .iter()
            .map(|a| a.asset_id().to_string())
            .collect();
        assert_eq!(marked, vec!["A4".to_string(), "A1".to_string()]);
        assert!(!store.get("A2").unwrap().removed());
    }

    #[test]
    fn update_patches_fields_and_reindexes() {
        let store = store();
        store.add("u1", "T1", "CuttingTool", TOOL, "T").unwrap();
        let updated = store
            .update(
                "u1",
                "T1",
                &[("Location".to_string(), "9".to_string())],
                "T2",
            )
            .unwrap();
        assert!(updated.body().contains("<Location type=\"POT\">9</Location>"));
        assert_eq!(store.by_key("Location", "9").unwrap().asset_id(), "T1");
        assert_eq!(updated.timestamp(), "T2");
    }

    #[test]
    fn update_accepts_xml_fragments() {
        let store = store();
        store
            .add(
                "u1",
                "T1",
                "CuttingTool",
                "<CuttingTool><Overall>10</Overall></CuttingTool>",
                "T",
            )
            .unwrap();
        let updated = store
            .update(
                "u1",
                "T1",
                &[("xml".to_string(), "<Overall>32.1</Overall>".to_string())],
                "T2",
            )
            .unwrap();
        assert!(updated.body().contains("<Overall>32.1</Overall>"));
    }

    #[test]
    fn update_rejects_other_types() {
        let store = store();
        store.add("u1", "F1", "Fixture", "<Fixture/>", "T").unwrap();
        let result = store.update("u1", "F1", &[], "T2");
        assert_eq!(result, Err(AssetError::NotUpdatable("F1".to_string())));
    }

    #[test]
    fn incomplete_assets_are_rejected() {
        let store = store();
        assert_eq!(
            store.add("u1", "", "CuttingTool", TOOL, "T"),
            Err(AssetError::Incomplete)
        );
        assert_eq!(
            store.add("u1", "A1", "", TOOL, "T"),
            Err(AssetError::Incomplete)
        );
        assert_eq!(
            store.add("u1", "A1", "CuttingTool", "", "T"),
            Err(AssetError::Incomplete)
        );
    }
}
