use crate::model::{CompiledModel, DeviceModel};
use anyhow::Context;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    pub models: BTreeMap<String, CompiledModel>,
}

impl ModelRegistry {
    pub fn insert(&mut self, model: CompiledModel) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn get(&self, name: &str) -> Option<&CompiledModel> {
        self.models.get(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Read one model file without compiling it.
pub fn read_model_file(path: impl AsRef<Path>) -> anyhow::Result<DeviceModel> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading model: {}", path.display()))?;
    let val: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    let model: DeviceModel = serde_yaml::from_value(val)
        .with_context(|| format!("decoding model: {}", path.display()))?;
    Ok(model)
}

pub fn load_model_file(path: impl AsRef<Path>) -> anyhow::Result<CompiledModel> {
    let path = path.as_ref();
    let model = read_model_file(path)?;
    let compiled = model
        .compile()
        .with_context(|| format!("validating model: {}", path.display()))?;
    debug!(
        model = %compiled.name,
        keys = compiled.plan.len(),
        metrics = compiled.metrics.len(),
        "model loaded"
    );
    Ok(compiled)
}

/// `*.yml`/`*.yaml` files under `dir`, sorted.
pub fn model_files(dir: impl AsRef<Path>) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing models: {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    Ok(entries)
}

pub fn load_models_dir(dir: impl AsRef<Path>) -> anyhow::Result<ModelRegistry> {
    let mut reg = ModelRegistry::default();
    for p in model_files(dir)? {
        let model = load_model_file(&p)?;
        if reg.get(&model.name).is_some() {
            anyhow::bail!("duplicate model {} in {}", model.name, p.display());
        }
        reg.insert(model);
    }
    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/models")
    }

    #[test]
    fn loads_shipped_models() {
        let reg = load_models_dir(models_dir()).unwrap();
        assert_eq!(reg.len(), 2);
        let vp = reg.get("GA15VP13").unwrap();
        assert!(vp.consensus.is_some());
        assert!(vp.metrics.iter().any(|m| m.id == "running_hours"));
        assert!(reg.get("GA15VS23A").is_some());
    }

    #[test]
    fn shipped_metrics_reference_plan_keys() {
        let reg = load_models_dir(models_dir()).unwrap();
        for model in reg.models.values() {
            for def in &model.metrics {
                assert!(model.plan.contains(&def.key), "{} {}", model.name, def.id);
            }
        }
    }

    #[test]
    fn reports_the_failing_file() {
        let err = load_model_file(models_dir().join("missing.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.yaml"));
    }
}
