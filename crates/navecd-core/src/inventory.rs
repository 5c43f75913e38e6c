//! Filesystem-backed inventory
//!
//! The inventory is the controller's durable memory of what it last
//! applied. Every successfully applied manifest and Helm release leaves a
//! record behind; the garbage collector removes records whose id is no
//! longer part of the current dependency graph.
//!
//! On-disk layout: `<root>/<bucket>/<id>` where the bucket is the object's
//! namespace, or its name when the namespace is empty. Directories are
//! created with mode 0700, files with 0600.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::component::TypeMeta;
use crate::error::{CoreError, Result};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// A small representation of a stored Helm release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelmReleaseItem {
    pub name: String,
    pub namespace: String,
    pub id: String,
}

/// A small representation of a stored Kubernetes object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub type_meta: TypeMeta,
    pub name: String,
    pub namespace: String,
    pub id: String,
}

/// An inventory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Manifest(ManifestItem),
    HelmRelease(HelmReleaseItem),
}

impl Item {
    pub fn id(&self) -> &str {
        match self {
            Item::Manifest(item) => &item.id,
            Item::HelmRelease(item) => &item.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Item::Manifest(item) => &item.name,
            Item::HelmRelease(item) => &item.name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Item::Manifest(item) => &item.namespace,
            Item::HelmRelease(item) => &item.namespace,
        }
    }

    /// The bucket directory the item lives in: its namespace, or its name
    /// for cluster-scoped objects.
    fn bucket(&self) -> &str {
        if self.namespace().is_empty() {
            self.name()
        } else {
            self.namespace()
        }
    }
}

/// The set of currently tracked items, as read by [`Instance::load`].
#[derive(Debug, Default)]
pub struct Storage {
    items: HashMap<String, Item>,
}

impl Storage {
    /// All stored items keyed by id. This is effectively the last applied
    /// cluster state.
    pub fn items(&self) -> &HashMap<String, Item> {
        &self.items
    }

    pub fn has_item(&self, item: &Item) -> bool {
        self.items.contains_key(item.id())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A handle to one project's inventory directory.
///
/// The instance only holds the path; all operations read or mutate the
/// filesystem directly. Writers for the same id must serialize, arbitrary
/// concurrent readers are fine.
#[derive(Debug, Clone)]
pub struct Instance {
    path: PathBuf,
}

impl Instance {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walks the inventory root and parses every file into an item.
    ///
    /// File basenames follow the inventory key grammar: three `_`-separated
    /// segments for a Helm release, four for a manifest. Manifest payloads
    /// are decoded to recover apiVersion and kind.
    pub fn load(&self) -> Result<Storage> {
        create_dir_all(&self.path)?;

        let mut items = HashMap::new();
        let mut pending = vec![self.path.clone()];

        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                    continue;
                }

                let key = entry.file_name().to_string_lossy().into_owned();
                let item = self.parse_item(&key, &path)?;
                items.insert(key, item);
            }
        }

        Ok(Storage { items })
    }

    fn parse_item(&self, key: &str, path: &Path) -> Result<Item> {
        let segments: Vec<&str> = key.split('_').collect();

        match segments.len() {
            3 => {
                if segments[2] != "HelmRelease" {
                    return Err(CoreError::WrongInventoryKey {
                        key: key.to_string(),
                        reason: "key with 3 identifiers is expected to be a HelmRelease"
                            .to_string(),
                    });
                }
                Ok(Item::HelmRelease(HelmReleaseItem {
                    name: segments[0].to_string(),
                    namespace: segments[1].to_string(),
                    id: key.to_string(),
                }))
            }
            4 => {
                let file = File::open(path)?;
                let object: Value = serde_json::from_reader(BufReader::new(file))?;

                let kind = object
                    .get("kind")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::ManifestFieldNotFound {
                        key: key.to_string(),
                        field: "kind".to_string(),
                    })?;
                let api_version = object
                    .get("apiVersion")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::ManifestFieldNotFound {
                        key: key.to_string(),
                        field: "apiVersion".to_string(),
                    })?;

                Ok(Item::Manifest(ManifestItem {
                    type_meta: TypeMeta {
                        api_version: api_version.to_string(),
                        kind: kind.to_string(),
                    },
                    name: segments[0].to_string(),
                    namespace: segments[1].to_string(),
                    id: key.to_string(),
                }))
            }
            arity => Err(CoreError::WrongInventoryKey {
                key: key.to_string(),
                reason: format!("key does not contain 3 or 4 identifiers, got {arity}"),
            }),
        }
    }

    /// Persists an item with optional content. Empty content is valid.
    pub fn store_item(&self, item: &Item, content: Option<&mut dyn Read>) -> Result<()> {
        let bucket = self.path.join(item.bucket());
        create_dir_all(&bucket)?;

        let file = open_for_write(&bucket.join(item.id()))?;
        if let Some(reader) = content {
            let mut writer = BufWriter::new(file);
            io::copy(reader, &mut writer)?;
        }
        Ok(())
    }

    /// Opens the item payload for reading.
    pub fn get_item(&self, item: &Item) -> Result<impl Read> {
        let file = File::open(self.path.join(item.bucket()).join(item.id()))?;
        Ok(BufReader::new(file))
    }

    /// Removes the item; an emptied bucket directory is removed with it.
    pub fn delete_item(&self, item: &Item) -> Result<()> {
        let bucket = self.path.join(item.bucket());
        fs::remove_file(bucket.join(item.id()))?;

        if fs::read_dir(&bucket)?.next().is_none() {
            fs::remove_dir(&bucket)?;
        }
        Ok(())
    }
}

fn create_dir_all(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        fs::DirBuilder::new().recursive(true).mode(DIR_MODE).create(path)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)
    }
}

fn open_for_write(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn manifest_item(name: &str, namespace: &str, group: &str, kind: &str) -> Item {
        let api_version = if group.is_empty() {
            "v1".to_string()
        } else {
            format!("{group}/v1")
        };
        Item::Manifest(ManifestItem {
            type_meta: TypeMeta {
                api_version,
                kind: kind.to_string(),
            },
            name: name.to_string(),
            namespace: namespace.to_string(),
            id: format!("{name}_{namespace}_{group}_{kind}"),
        })
    }

    fn release_item(name: &str, namespace: &str) -> Item {
        Item::HelmRelease(HelmReleaseItem {
            name: name.to_string(),
            namespace: namespace.to_string(),
            id: format!("{name}_{namespace}_HelmRelease"),
        })
    }

    fn store(instance: &Instance, item: &Item, payload: &str) {
        let mut reader = Cursor::new(payload.as_bytes().to_vec());
        instance
            .store_item(item, Some(&mut reader as &mut dyn Read))
            .unwrap();
    }

    #[test]
    fn test_store_and_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = manifest_item("app", "prod", "apps", "Deployment");
        let payload = r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#;
        store(&instance, &item, payload);

        let mut read_back = String::new();
        instance
            .get_item(&item)
            .unwrap()
            .read_to_string(&mut read_back)
            .unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn test_store_empty_content_is_valid() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = release_item("grafana", "monitoring");
        instance.store_item(&item, None).unwrap();

        let storage = instance.load().unwrap();
        assert!(storage.has_item(&item));
    }

    #[test]
    fn test_load_returns_stored_ids() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let deployment = manifest_item("app", "prod", "apps", "Deployment");
        store(
            &instance,
            &deployment,
            r#"{"apiVersion":"apps/v1","kind":"Deployment"}"#,
        );
        let release = release_item("grafana", "monitoring");
        instance.store_item(&release, None).unwrap();

        let storage = instance.load().unwrap();
        assert_eq!(storage.len(), 2);
        assert!(storage.items().contains_key("app_prod_apps_Deployment"));
        assert!(storage.items().contains_key("grafana_monitoring_HelmRelease"));
    }

    #[test]
    fn test_load_recovers_manifest_type_meta() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = manifest_item("app", "prod", "apps", "Deployment");
        store(
            &instance,
            &item,
            r#"{"apiVersion":"apps/v1","kind":"Deployment","metadata":{"name":"app"}}"#,
        );

        let storage = instance.load().unwrap();
        match &storage.items()["app_prod_apps_Deployment"] {
            Item::Manifest(manifest) => {
                assert_eq!(manifest.type_meta.api_version, "apps/v1");
                assert_eq!(manifest.type_meta.kind, "Deployment");
            }
            other => panic!("expected manifest item, got {other:?}"),
        }
    }

    #[test]
    fn test_load_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = release_item("grafana", "monitoring");
        instance.store_item(&item, None).unwrap();

        let first = instance.load().unwrap();
        let second = instance.load().unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn test_cluster_scoped_bucket_is_the_name() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = manifest_item("prod", "", "", "Namespace");
        store(
            &instance,
            &item,
            r#"{"apiVersion":"v1","kind":"Namespace"}"#,
        );

        assert!(temp.path().join("prod").join("prod___Namespace").exists());
    }

    #[test]
    fn test_delete_prunes_empty_bucket() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let item = release_item("grafana", "monitoring");
        instance.store_item(&item, None).unwrap();
        assert!(temp.path().join("monitoring").exists());

        instance.delete_item(&item).unwrap();
        assert!(!temp.path().join("monitoring").exists());
    }

    #[test]
    fn test_delete_keeps_populated_bucket() {
        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path());

        let first = release_item("grafana", "monitoring");
        let second = release_item("prometheus", "monitoring");
        instance.store_item(&first, None).unwrap();
        instance.store_item(&second, None).unwrap();

        instance.delete_item(&first).unwrap();
        assert!(temp.path().join("monitoring").exists());

        let storage = instance.load().unwrap();
        assert!(!storage.has_item(&first));
        assert!(storage.has_item(&second));
    }

    #[test]
    fn test_wrong_key_arity_fails_load() {
        let temp = TempDir::new().unwrap();
        let bucket = temp.path().join("default");
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join("only-one-segment"), b"").unwrap();

        let err = Instance::new(temp.path()).load().unwrap_err();
        assert!(matches!(err, CoreError::WrongInventoryKey { .. }));
    }

    #[test]
    fn test_three_segments_must_be_helm_release() {
        let temp = TempDir::new().unwrap();
        let bucket = temp.path().join("default");
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join("a_default_Deployment"), b"").unwrap();

        let err = Instance::new(temp.path()).load().unwrap_err();
        assert!(matches!(err, CoreError::WrongInventoryKey { .. }));
    }

    #[test]
    fn test_manifest_payload_missing_kind_fails_load() {
        let temp = TempDir::new().unwrap();
        let bucket = temp.path().join("prod");
        fs::create_dir_all(&bucket).unwrap();
        fs::write(
            bucket.join("app_prod_apps_Deployment"),
            br#"{"apiVersion":"apps/v1"}"#,
        )
        .unwrap();

        let err = Instance::new(temp.path()).load().unwrap_err();
        assert!(
            matches!(err, CoreError::ManifestFieldNotFound { field, .. } if field == "kind")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_and_dir_modes() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let instance = Instance::new(temp.path().join("inventory"));
        let item = release_item("grafana", "monitoring");
        instance.store_item(&item, None).unwrap();

        let bucket_mode = fs::metadata(instance.path().join("monitoring"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(bucket_mode & 0o777, 0o700);

        let file_mode = fs::metadata(
            instance
                .path()
                .join("monitoring")
                .join("grafana_monitoring_HelmRelease"),
        )
        .unwrap()
        .permissions()
        .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
