//! On-disk model storage.
//!
//! Layout: `<cache_dir>/<dataset_id>/categorizer/<mid>/` holding `model`
//! (bincode-encoded [`Estimator`]) and `pars` (JSON [`ModelParams`]).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::categorization::estimator::Estimator;
use crate::categorization::method::Method;
use crate::error::{DocCatError, Result};

const MODEL_FILE: &str = "model";
const PARS_FILE: &str = "pars";

/// Parameters stored next to a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub method: Method,
    /// Dataset rows the model was trained on.
    pub index: Vec<usize>,
    /// Training labels, parallel to `index`.
    pub y: Vec<u8>,
    /// Backend options.
    pub options: serde_json::Value,
    pub trained_at: DateTime<Utc>,
}

/// Directory of trained categorization models for one dataset.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

/// Ids become directory names, so only `[A-Za-z0-9_-]` is accepted.
fn check_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(DocCatError::invalid_parameter(format!("invalid {kind} '{id}'")));
    }
    Ok(())
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(cache_dir: P, dataset_id: &str) -> Result<Self> {
        check_id("dataset id", dataset_id)?;
        Ok(Self {
            root: cache_dir.as_ref().join(dataset_id).join("categorizer"),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh model id.
    pub fn generate_mid() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Directory of model `mid`.
    pub fn model_dir(&self, mid: &str) -> Result<PathBuf> {
        check_id("model id", mid)?;
        Ok(self.root.join(mid))
    }

    fn existing_model_dir(&self, mid: &str) -> Result<PathBuf> {
        let dir = self.model_dir(mid)?;
        if !dir.is_dir() {
            return Err(DocCatError::model_not_found(format!(
                "no model '{mid}' in {}",
                self.root.display()
            )));
        }
        Ok(dir)
    }

    pub fn contains(&self, mid: &str) -> bool {
        self.existing_model_dir(mid).is_ok()
    }

    /// Write both artifacts of model `mid`, replacing any previous ones.
    ///
    /// Nothing is left under the model directory if either write fails.
    pub fn save(&self, mid: &str, estimator: &Estimator, pars: &ModelParams) -> Result<()> {
        self.commit(mid, |dir| {
            let mut writer = BufWriter::new(File::create(dir.join(MODEL_FILE))?);
            bincode::serialize_into(&mut writer, estimator)?;
            writer.flush()?;

            let mut writer = BufWriter::new(File::create(dir.join(PARS_FILE))?);
            serde_json::to_writer_pretty(&mut writer, pars)?;
            writer.flush()?;
            Ok(())
        })?;
        info!("saved {} model {mid} to {}", pars.method, self.root.join(mid).display());
        Ok(())
    }

    /// Run `write` against a staging directory and move it into place as
    /// model `mid` once it succeeds.
    fn commit<W>(&self, mid: &str, write: W) -> Result<()>
    where
        W: FnOnce(&Path) -> Result<()>,
    {
        let dir = self.model_dir(mid)?;
        // The leading dot keeps staging directories out of `list`.
        let staging = self.root.join(format!(".{mid}.partial"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = write(&staging).and_then(|()| {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            fs::rename(&staging, &dir)?;
            Ok(())
        });
        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!("failed to clean up {}: {e}", staging.display());
            }
        }
        result
    }

    /// Read the model and its parameters.
    pub fn load(&self, mid: &str) -> Result<(Estimator, ModelParams)> {
        let dir = self.existing_model_dir(mid)?;
        let reader = BufReader::new(File::open(dir.join(MODEL_FILE))?);
        let estimator: Estimator = bincode::deserialize_from(reader)?;
        let pars = self.load_pars(mid)?;
        debug!("loaded {} model {mid}", estimator.method());
        Ok((estimator, pars))
    }

    /// Read the parameters only.
    pub fn load_pars(&self, mid: &str) -> Result<ModelParams> {
        let dir = self.existing_model_dir(mid)?;
        let reader = BufReader::new(File::open(dir.join(PARS_FILE))?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Ids of every stored model, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut mids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if check_id("model id", name).is_ok() {
                        mids.push(name.to_string());
                    }
                }
            }
        }
        mids.sort();
        Ok(mids)
    }

    /// Remove model `mid` from disk.
    pub fn delete(&self, mid: &str) -> Result<()> {
        let dir = self.existing_model_dir(mid)?;
        fs::remove_dir_all(&dir)?;
        info!("deleted model {mid}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LogisticRegression;
    use tempfile::TempDir;

    fn pars() -> ModelParams {
        ModelParams {
            method: Method::LogisticRegression,
            index: vec![0, 3],
            y: vec![1, 0],
            options: serde_json::json!({"C": 1.0}),
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_list_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path(), "dsid").unwrap();
        assert!(store.list().unwrap().is_empty());

        let mid = ModelStore::generate_mid();
        assert_eq!(mid.len(), 32);
        let estimator = Estimator::LogisticRegression(LogisticRegression::default());
        store.save(&mid, &estimator, &pars()).unwrap();
        assert!(store.root().join(&mid).join("model").is_file());
        assert!(store.root().join(&mid).join("pars").is_file());

        let (loaded, loaded_pars) = store.load(&mid).unwrap();
        assert_eq!(loaded.method(), Method::LogisticRegression);
        assert_eq!(loaded_pars.index, vec![0, 3]);
        assert_eq!(store.list().unwrap(), vec![mid.clone()]);

        store.delete(&mid).unwrap();
        assert!(!store.contains(&mid));
        assert!(matches!(store.load(&mid), Err(DocCatError::ModelNotFound(_))));
    }

    #[test]
    fn test_failed_save_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path(), "dsid").unwrap();
        let mid = ModelStore::generate_mid();

        let result = store.commit(&mid, |dir| {
            fs::write(dir.join(MODEL_FILE), b"model bytes")?;
            Err(DocCatError::other("disk full"))
        });
        assert!(result.is_err());
        assert!(!store.contains(&mid));
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.load(&mid), Err(DocCatError::ModelNotFound(_))));
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 0);

        // A failed overwrite keeps the previous artifacts.
        let estimator = Estimator::LogisticRegression(LogisticRegression::default());
        store.save(&mid, &estimator, &pars()).unwrap();
        let result = store.commit(&mid, |_| Err(DocCatError::other("disk full")));
        assert!(result.is_err());
        assert_eq!(store.load(&mid).unwrap().1.index, vec![0, 3]);
        assert_eq!(store.list().unwrap(), vec![mid]);
    }

    #[test]
    fn test_rejects_path_like_dataset_ids() {
        let temp_dir = TempDir::new().unwrap();
        for dataset_id in ["", "..", "../other", "a/b", "a\\b"] {
            assert!(matches!(
                ModelStore::new(temp_dir.path(), dataset_id),
                Err(DocCatError::InvalidParameter(_))
            ));
        }
        assert!(ModelStore::new(temp_dir.path(), "emails-2024_q1").is_ok());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path(), "dsid").unwrap();
        assert!(matches!(
            store.model_dir("../escape"),
            Err(DocCatError::InvalidParameter(_))
        ));
        assert!(store.model_dir("").is_err());
        assert!(matches!(
            store.delete("0123abcd"),
            Err(DocCatError::ModelNotFound(_))
        ));
    }
}
