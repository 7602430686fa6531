use crate::sheets::{DetectedSheets, SheetRole};
use anyhow::{anyhow, Context};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const STORE_DIR: &str = "workbooks";
const META_FILE: &str = "current.json";

/// Superseded versions kept around after a pointer swap. Old versions stay
/// readable while a rebuild is in flight; anything older is pruned.
const VERSION_TAIL: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetNames {
    pub div_a: String,
    pub div_b: String,
    pub schedule: String,
}

impl SheetNames {
    pub fn from_detected(detected: &DetectedSheets) -> anyhow::Result<SheetNames> {
        let get = |role: SheetRole| {
            detected
                .name_for(role)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("{role} sheet not detected"))
        };
        Ok(SheetNames {
            div_a: get(SheetRole::DivA)?,
            div_b: get(SheetRole::DivB)?,
            schedule: get(SheetRole::Schedule)?,
        })
    }

    pub fn for_role(&self, role: SheetRole) -> &str {
        match role {
            SheetRole::DivA => &self.div_a,
            SheetRole::DivB => &self.div_b,
            SheetRole::Schedule => &self.schedule,
        }
    }
}

/// Sidecar metadata for the single current workbook slot. `latest` is the
/// commit pointer: a version file is fully written before the pointer moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookMeta {
    pub latest: String,
    pub versions: Vec<String>,
    pub sheet_names: SheetNames,
    pub upload_date: String,
    pub original_filename: String,
    pub checksum_sha256: String,
}

pub struct WorkbookStore {
    root: PathBuf,
}

impl WorkbookStore {
    pub fn new(workspace: &Path) -> WorkbookStore {
        WorkbookStore {
            root: workspace.join(STORE_DIR),
        }
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join(META_FILE)
    }

    pub fn version_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.xlsx"))
    }

    pub fn load_meta(&self) -> anyhow::Result<Option<WorkbookMeta>> {
        let path = self.meta_path();
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        let meta: WorkbookMeta = serde_json::from_str(&text)
            .with_context(|| format!("malformed metadata in {}", path.to_string_lossy()))?;
        Ok(Some(meta))
    }

    /// Path of the current workbook version, if any upload has been stored.
    pub fn latest(&self) -> anyhow::Result<Option<(WorkbookMeta, PathBuf)>> {
        match self.load_meta()? {
            Some(meta) => {
                let path = self.version_path(&meta.latest);
                if !path.is_file() {
                    return Err(anyhow!(
                        "workbook version {} listed in metadata but missing on disk",
                        meta.latest
                    ));
                }
                Ok(Some((meta, path)))
            }
            None => Ok(None),
        }
    }

    /// Store a fresh upload as a new version and swap the pointer to it.
    pub fn store_upload(
        &self,
        bytes: &[u8],
        original_filename: &str,
        sheet_names: SheetNames,
    ) -> anyhow::Result<WorkbookMeta> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.to_string_lossy()))?;

        let id = Uuid::new_v4().to_string();
        let path = self.version_path(&id);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;

        let mut versions = match self.load_meta()? {
            Some(old) => old.versions,
            None => Vec::new(),
        };
        versions.push(id.clone());

        let meta = WorkbookMeta {
            latest: id,
            versions,
            sheet_names,
            upload_date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            original_filename: original_filename.to_string(),
            checksum_sha256: sha256_hex(bytes),
        };
        self.write_meta(&meta)?;
        Ok(meta)
    }

    /// Copy the latest version to a fresh version file for patching. The new
    /// version becomes visible only after `commit_version`.
    pub fn begin_edit(&self) -> anyhow::Result<(WorkbookMeta, String, PathBuf)> {
        let (meta, latest_path) = self
            .latest()?
            .ok_or_else(|| anyhow!("no stored workbook"))?;
        let id = Uuid::new_v4().to_string();
        let path = self.version_path(&id);
        std::fs::copy(&latest_path, &path).with_context(|| {
            format!("failed to copy workbook to {}", path.to_string_lossy())
        })?;
        Ok((meta, id, path))
    }

    /// Pointer swap: the edited version becomes the current workbook.
    pub fn commit_version(&self, mut meta: WorkbookMeta, id: String) -> anyhow::Result<WorkbookMeta> {
        meta.versions.push(id.clone());
        meta.latest = id;
        self.write_meta(&meta)?;
        Ok(meta)
    }

    /// Abandon an edit whose version file was already created.
    pub fn discard_version(&self, id: &str) {
        let path = self.version_path(id);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(
                "could not remove abandoned workbook version {}: {e}",
                path.to_string_lossy()
            );
        }
    }

    fn write_meta(&self, meta: &WorkbookMeta) -> anyhow::Result<()> {
        let mut meta = meta.clone();
        self.prune_versions(&mut meta);
        let path = self.meta_path();
        let text = serde_json::to_string_pretty(&meta)?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
        Ok(())
    }

    fn prune_versions(&self, meta: &mut WorkbookMeta) {
        while meta.versions.len() > VERSION_TAIL + 1 {
            let stale = meta.versions.remove(0);
            if stale == meta.latest {
                meta.versions.insert(0, stale);
                break;
            }
            let path = self.version_path(&stale);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(
                    "could not prune workbook version {}: {e}",
                    path.to_string_lossy()
                );
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl WorkbookMeta {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sheetNames": {
                "div_a": self.sheet_names.div_a,
                "div_b": self.sheet_names.div_b,
                "schedule": self.sheet_names.schedule,
            },
            "uploadDate": self.upload_date,
            "originalFilename": self.original_filename,
            "checksumSha256": self.checksum_sha256,
            "version": self.latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn names() -> SheetNames {
        SheetNames {
            div_a: "Final Div A".into(),
            div_b: "Final Div B".into(),
            schedule: "Schedule".into(),
        }
    }

    #[test]
    fn store_and_reload_roundtrip() {
        let ws = temp_workspace("reviewdesk-store");
        let store = WorkbookStore::new(&ws);
        assert!(store.latest().unwrap().is_none());

        let meta = store
            .store_upload(b"fake-xlsx-bytes", "roster.xlsx", names())
            .unwrap();
        assert_eq!(meta.original_filename, "roster.xlsx");
        assert_eq!(meta.versions.last(), Some(&meta.latest));

        let (loaded, path) = store.latest().unwrap().expect("latest");
        assert_eq!(loaded.latest, meta.latest);
        assert_eq!(std::fs::read(path).unwrap(), b"fake-xlsx-bytes");
    }

    #[test]
    fn edit_commit_swaps_pointer_and_keeps_old_version_readable() {
        let ws = temp_workspace("reviewdesk-edit");
        let store = WorkbookStore::new(&ws);
        let meta = store
            .store_upload(b"original", "roster.xlsx", names())
            .unwrap();
        let first = meta.latest.clone();

        let (meta, id, path) = store.begin_edit().unwrap();
        std::fs::write(&path, b"patched").unwrap();
        // Pointer has not moved yet.
        let (current, _) = store.latest().unwrap().unwrap();
        assert_eq!(current.latest, first);

        let meta = store.commit_version(meta, id).unwrap();
        assert_ne!(meta.latest, first);
        let (_, latest_path) = store.latest().unwrap().unwrap();
        assert_eq!(std::fs::read(latest_path).unwrap(), b"patched");
        // Previous version file is still there for in-flight readers.
        assert!(store.version_path(&first).is_file());
    }

    #[test]
    fn old_versions_are_pruned() {
        let ws = temp_workspace("reviewdesk-prune");
        let store = WorkbookStore::new(&ws);
        let mut first_id = None;
        for i in 0..8 {
            let meta = store
                .store_upload(format!("v{i}").as_bytes(), "roster.xlsx", names())
                .unwrap();
            first_id.get_or_insert(meta.latest.clone());
        }
        let meta = store.load_meta().unwrap().unwrap();
        assert!(meta.versions.len() <= VERSION_TAIL + 1);
        assert!(!store.version_path(first_id.as_deref().unwrap()).is_file());
    }
}
