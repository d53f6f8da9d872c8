//! LayerIndex: named, typed layers persisted by UUID (spec.md §4.3).

use std::collections::HashMap;

use log::{debug, warn};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{LockedError, NotFoundError, Result, ValidationError};
use crate::kv::{Dataset, KvStore};
use crate::layer::{normalize_layer_name, Layer, LayerType};

pub struct LayerIndex {
    dataset: Box<dyn Dataset>,
    by_name: RwLock<HashMap<String, Uuid>>,
    root_id: Uuid,
}

impl LayerIndex {
    /// Opens the layer dataset, loading every persisted layer into the
    /// normalized-name map and creating the universe root on first use.
    pub fn open(store: &dyn KvStore) -> Result<LayerIndex> {
        let dataset = store.dataset("layers")?;
        let mut by_name = HashMap::new();

        for (key, value) in dataset.get_range("layer/".as_bytes().."layer0".as_bytes())? {
            let _key = String::from_utf8(key).map_err(|e| crate::error::Error::internal(e.to_string()))?;
            let layer: Layer = serde_json::from_slice(&value)?;
            by_name.insert(layer.normalized_name(), layer.id);
        }

        let root_id = match by_name.get(&normalize_layer_name("/")) {
            Some(id) => *id,
            None => {
                let root = Layer::root();
                let id = root.id;
                let bytes = serde_json::to_vec(&root)?;
                dataset.put(format!("layer/{id}").as_bytes(), &bytes)?;
                by_name.insert(root.normalized_name(), id);
                id
            }
        };

        Ok(LayerIndex { dataset, by_name: RwLock::new(by_name), root_id })
    }

    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    fn storage_key(id: Uuid) -> String {
        format!("layer/{id}")
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Layer> {
        let bytes = self
            .dataset
            .get(Self::storage_key(id).as_bytes())?
            .ok_or(NotFoundError::LayerById(id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Layer>> {
        let normalized = normalize_layer_name(name);
        let id = match self.by_name.read().get(&normalized).copied() {
            Some(id) => id,
            None => return Ok(None),
        };
        Ok(Some(self.get_by_id(id)?))
    }

    fn persist(&self, layer: &Layer) -> Result<()> {
        let bytes = serde_json::to_vec(layer)?;
        self.dataset.put(Self::storage_key(layer.id).as_bytes(), &bytes)?;
        Ok(())
    }

    /// Idempotent on normalized name: returns the existing layer if one
    /// already maps to `name`'s normalized form.
    pub fn create_layer(&self, kind: LayerType, name: &str) -> Result<Layer> {
        if let Some(existing) = self.get_by_name(name)? {
            debug!("create_layer(`{name}`) resolved to existing layer {}", existing.id);
            return Ok(existing);
        }

        let layer = Layer::new(kind, name);
        self.persist(&layer)?;
        self.by_name.write().insert(layer.normalized_name(), layer.id);
        Ok(layer)
    }

    /// Applies a partial patch to an existing layer. The `id` field cannot
    /// be changed through this path; renaming is a separate operation
    /// because it must also update the normalized-name map.
    pub fn update_layer(
        &self,
        id: Uuid,
        label: Option<String>,
        description: Option<String>,
        color: Option<Option<String>>,
        metadata: Option<std::collections::BTreeMap<String, serde_json::Value>>,
    ) -> Result<Layer> {
        let mut layer = self.get_by_id(id)?;
        if layer.locked {
            return Err(LockedError::Layer(layer.name.clone()).into());
        }
        if let Some(label) = label {
            layer.label = label;
        }
        if let Some(description) = description {
            layer.description = description;
        }
        if let Some(color) = color {
            layer.color = color;
        }
        if let Some(metadata) = metadata {
            layer.metadata = metadata;
        }
        self.persist(&layer)?;
        Ok(layer)
    }

    pub fn rename_layer(&self, id: Uuid, new_name: &str) -> Result<Layer> {
        let mut layer = self.get_by_id(id)?;
        if layer.is_root() {
            return Err(ValidationError::RootLayer.into());
        }
        if layer.locked {
            return Err(LockedError::Layer(layer.name.clone()).into());
        }

        let new_normalized = normalize_layer_name(new_name);
        let mut by_name = self.by_name.write();
        if let Some(&colliding_id) = by_name.get(&new_normalized) {
            if colliding_id != id {
                return Err(ValidationError::Other(format!(
                    "layer name `{new_name}` collides with an existing layer"
                ))
                .into());
            }
        }

        by_name.remove(&layer.normalized_name());
        layer.name = new_name.to_string();
        by_name.insert(new_normalized, id);
        drop(by_name);

        self.persist(&layer)?;
        Ok(layer)
    }

    pub fn lock_layer(&self, name: &str, by: &str) -> Result<Layer> {
        let mut layer = self.get_by_name(name)?.ok_or_else(|| NotFoundError::LayerByName(name.to_string()))?;
        layer.lock(by);
        self.persist(&layer)?;
        Ok(layer)
    }

    pub fn unlock_layer(&self, name: &str, by: &str) -> Result<Layer> {
        let mut layer = self.get_by_name(name)?.ok_or_else(|| NotFoundError::LayerByName(name.to_string()))?;
        layer.unlock(by);
        self.persist(&layer)?;
        Ok(layer)
    }

    /// Id-keyed counterpart of [`LayerIndex::lock_layer`], used by
    /// `ContextTree::lock_path` which already has the layer id on hand from
    /// path resolution and should not pay for a second name lookup.
    pub fn lock_by_id(&self, id: Uuid, by: &str) -> Result<Layer> {
        let mut layer = self.get_by_id(id)?;
        layer.lock(by);
        self.persist(&layer)?;
        Ok(layer)
    }

    pub fn unlock_by_id(&self, id: Uuid, by: &str) -> Result<Layer> {
        let mut layer = self.get_by_id(id)?;
        layer.unlock(by);
        self.persist(&layer)?;
        Ok(layer)
    }

    pub fn remove_layer(&self, name: &str) -> Result<()> {
        let layer = self.get_by_name(name)?.ok_or_else(|| NotFoundError::LayerByName(name.to_string()))?;
        if layer.is_root() {
            return Err(ValidationError::RootLayer.into());
        }
        if layer.locked {
            return Err(LockedError::Layer(layer.name.clone()).into());
        }

        self.dataset.remove(Self::storage_key(layer.id).as_bytes())?;
        self.by_name.write().remove(&layer.normalized_name());
        warn!("removed layer `{}` ({})", layer.name, layer.id);
        Ok(())
    }
}
