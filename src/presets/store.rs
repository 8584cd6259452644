use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::embedded::{embedded_preset, embedded_presets};
use super::model::Preset;
use crate::error::PresetError;

/// Preset used when a requested name or id is unknown.
pub const DEFAULT_PRESET: &str = "standard";

/// Built-in presets plus custom presets, optionally persisted as
/// `<id>.json` files in a directory. Reads return clones, so a running job
/// never sees later edits.
pub struct PresetStore {
    dir: Option<PathBuf>,
    custom: RwLock<HashMap<String, Preset>>,
}

impl PresetStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Load every `*.json` preset in `dir`, creating the directory if needed.
    /// Unparseable files are skipped with a warning.
    pub fn open(dir: &Path) -> Result<Self, PresetError> {
        fs::create_dir_all(dir)?;
        let mut custom = HashMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match fs::read_to_string(&path)
                .map_err(PresetError::from)
                .and_then(|json| Preset::from_json(&json).map_err(PresetError::from))
            {
                Ok(preset) => {
                    custom.insert(id, preset);
                }
                Err(err) => log::warn!("Skipping preset {}: {}", path.display(), err),
            }
        }
        log::info!("Loaded {} custom presets from {}", custom.len(), dir.display());
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            custom: RwLock::new(custom),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Preset>> {
        self.custom.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Preset>> {
        self.custom.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store a new custom preset; the id is derived from its name and made
    /// unique. Returns the id.
    pub fn create(&self, preset: Preset) -> Result<String, PresetError> {
        let base = slugify(&preset.name);
        if base.is_empty() {
            return Err(PresetError::InvalidName(preset.name));
        }
        let mut custom = self.write();
        let mut id = base.clone();
        let mut n = 2;
        while custom.contains_key(&id) || embedded_preset(&id).is_some() {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        self.persist(&id, &preset)?;
        custom.insert(id.clone(), preset);
        log::info!("Created preset {}", id);
        Ok(id)
    }

    /// Custom preset by id, or a built-in by name.
    pub fn get(&self, id: &str) -> Option<Preset> {
        if let Some(preset) = self.read().get(id) {
            return Some(preset.clone());
        }
        embedded_preset(id).and_then(|json| match Preset::from_json(json) {
            Ok(preset) => Some(preset),
            Err(err) => {
                log::warn!("Built-in preset {} is invalid: {}", id, err);
                None
            }
        })
    }

    pub fn update(&self, id: &str, preset: Preset) -> Result<(), PresetError> {
        let mut custom = self.write();
        if !custom.contains_key(id) {
            return Err(self.missing(id));
        }
        self.persist(id, &preset)?;
        custom.insert(id.to_string(), preset);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), PresetError> {
        let mut custom = self.write();
        if custom.remove(id).is_none() {
            return Err(self.missing(id));
        }
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{}.json", id));
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        log::info!("Deleted preset {}", id);
        Ok(())
    }

    /// Built-ins first, then custom presets, each sorted by id.
    pub fn list(&self) -> Vec<(String, Preset)> {
        let mut builtins: Vec<(String, Preset)> = embedded_presets()
            .iter()
            .filter_map(|(id, json)| Preset::from_json(json).ok().map(|p| (id.to_string(), p)))
            .collect();
        builtins.sort_by(|a, b| a.0.cmp(&b.0));
        let mut custom: Vec<(String, Preset)> = self
            .read()
            .iter()
            .map(|(id, p)| (id.clone(), p.clone()))
            .collect();
        custom.sort_by(|a, b| a.0.cmp(&b.0));
        builtins.extend(custom);
        builtins
    }

    /// Preset for a render job: the custom id if it exists, else the named
    /// built-in, else `standard`.
    pub fn resolve(&self, name: &str, custom_id: Option<&str>) -> Preset {
        if let Some(id) = custom_id {
            if let Some(preset) = self.read().get(id) {
                return preset.clone();
            }
            log::warn!("Custom preset '{}' not found, trying '{}'", id, name);
        }
        if let Some(preset) = self.get(name) {
            return preset;
        }
        log::warn!("Preset '{}' not found, using '{}'", name, DEFAULT_PRESET);
        self.get(DEFAULT_PRESET).unwrap_or_else(fallback_preset)
    }

    fn missing(&self, id: &str) -> PresetError {
        if embedded_preset(id).is_some() {
            PresetError::BuiltinReadOnly(id.to_string())
        } else {
            PresetError::NotFound(id.to_string())
        }
    }

    fn persist(&self, id: &str, preset: &Preset) -> Result<(), PresetError> {
        if let Some(dir) = &self.dir {
            fs::write(dir.join(format!("{}.json", id)), preset.to_json()?)?;
        }
        Ok(())
    }
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Last resort when even the embedded default fails to parse.
fn fallback_preset() -> Preset {
    Preset {
        name: "Standard".into(),
        description: String::new(),
        effect_intensity: 1.0,
        anticipation_time: 0.2,
        effects: Vec::new(),
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureKind;
    use crate::effects::{EffectSpec, EffectType};
    use std::sync::Arc;

    fn preset(name: &str) -> Preset {
        Preset {
            name: name.into(),
            description: "custom".into(),
            effect_intensity: 0.9,
            anticipation_time: 0.25,
            effects: vec![EffectSpec::new(EffectType::Shake, 0.8, FeatureKind::Onsets)],
        }
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("  My Cool Preset!! "), "my-cool-preset");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn crud_in_memory() {
        let store = PresetStore::in_memory();
        let id = store.create(preset("Night Drive")).unwrap();
        assert_eq!(id, "night-drive");
        assert_eq!(store.get(&id), Some(preset("Night Drive")));

        let mut changed = preset("Night Drive");
        changed.effect_intensity = 0.5;
        store.update(&id, changed.clone()).unwrap();
        assert_eq!(store.get(&id), Some(changed));

        store.delete(&id).unwrap();
        assert!(store.get(&id).is_none());
        assert!(matches!(store.delete(&id), Err(PresetError::NotFound(_))));
    }

    #[test]
    fn ids_never_collide() {
        let store = PresetStore::in_memory();
        assert_eq!(store.create(preset("Standard")).unwrap(), "standard-2");
        assert_eq!(store.create(preset("Standard")).unwrap(), "standard-3");
        assert!(matches!(store.create(preset("?!")), Err(PresetError::InvalidName(_))));
    }

    #[test]
    fn builtins_are_read_only() {
        let store = PresetStore::in_memory();
        assert!(matches!(
            store.update("standard", preset("x")),
            Err(PresetError::BuiltinReadOnly(_))
        ));
        assert!(matches!(store.delete("glitch"), Err(PresetError::BuiltinReadOnly(_))));
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = PresetStore::open(dir.path()).unwrap();
            store.create(preset("Saved One")).unwrap()
        };
        fs::write(dir.path().join("broken.json"), "{ nope").unwrap();

        let reopened = PresetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&id), Some(preset("Saved One")));
        assert!(reopened.get("broken").is_none());

        reopened.delete(&id).unwrap();
        assert!(!dir.path().join(format!("{}.json", id)).exists());
    }

    #[test]
    fn resolve_falls_back_to_standard() {
        let store = PresetStore::in_memory();
        let standard = store.get("standard").unwrap();
        assert_eq!(store.resolve("does-not-exist", None), standard);
        assert_eq!(store.resolve("Intense", None).name, "Intense");

        let id = store.create(preset("Mine")).unwrap();
        assert_eq!(store.resolve("standard", Some(&id)), preset("Mine"));
        assert_eq!(store.resolve("subtle", Some("gone")).name, "Subtle");
    }

    #[test]
    fn list_has_builtins_then_custom() {
        let store = PresetStore::in_memory();
        store.create(preset("Zed")).unwrap();
        let ids: Vec<String> = store.list().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["cinematic", "glitch", "intense", "standard", "subtle", "zed"]);
    }

    #[test]
    fn concurrent_readers_see_consistent_presets() {
        let store = Arc::new(PresetStore::in_memory());
        let id = store.create(preset("Shared")).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if i == 0 {
                            let mut p = preset("Shared");
                            p.effect_intensity = 0.3;
                            let _ = store.update(&id, p);
                        } else {
                            let p = store.resolve("standard", Some(&id));
                            assert_eq!(p.name, "Shared");
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
