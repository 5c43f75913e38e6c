//! Project artifact push and load
//!
//! Projects are packaged as single-layer OCI images. The image digest is
//! the artifact's identity; a completion marker per digest makes unpacking
//! at-most-once, and a structural backup of the target directory is taken
//! before any download so a failed load can fall back to the previous
//! state.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use navecd_core::archive;

use crate::client::{RegistryAuth, RegistryClient, OCI_MANIFEST_MEDIA_TYPE};
use crate::error::{RegistryError, Result};

/// Media type of the artifact's config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.navecd.config.v1+json";

/// Media type of the artifact's single content layer.
pub const CONTENT_LAYER_MEDIA_TYPE: &str = "application/vnd.navecd.content.v1.tar+gzip";

const ARCHIVE_NAME: &str = "navecd.tgz";
const COMPLETION_DIR: &str = "completion";

/// Client for pushing and loading project artifacts.
pub struct ProjectClient<C> {
    client: C,
    repository: String,
    cache_dir: PathBuf,
    auth: RegistryAuth,
}

impl<C: RegistryClient> ProjectClient<C> {
    pub fn new(client: C, repository: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            repository: repository.into(),
            cache_dir: cache_dir.into(),
            auth: RegistryAuth::Anonymous,
        }
    }

    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Packs `path` into a tarball, builds a single-layer image with the
    /// navecd media types and publishes it as `<repository>:<reference>`.
    /// Returns the image digest.
    pub async fn push_image_from_path(&self, reference: &str, path: &Path) -> Result<String> {
        fs::create_dir_all(&self.cache_dir)?;
        let archive_path = self.cache_dir.join(ARCHIVE_NAME);
        archive::create(path, &archive_path)?;

        let layer = fs::read(&archive_path)?;
        let digest = self
            .client
            .push(
                &self.repository,
                reference,
                CONFIG_MEDIA_TYPE,
                CONTENT_LAYER_MEDIA_TYPE,
                layer,
                &self.auth,
            )
            .await?;

        info!(repository = %self.repository, reference, digest, "Pushed project artifact");
        Ok(digest)
    }

    /// Loads the artifact `<repository>:<reference>` into `target_dir` and
    /// returns its digest.
    ///
    /// Outcomes:
    /// - digest unchanged and already unpacked: returns without touching
    ///   `target_dir` (completion marker short circuit);
    /// - the layer download fails: [`RegistryError::Recoverable`] carrying
    ///   the backup path, the caller may continue with the previous state;
    /// - unpacking fails: [`RegistryError::Unrecoverable`].
    pub async fn load_image(&self, reference: &str, target_dir: &Path) -> Result<String> {
        let manifest = self
            .client
            .manifest(&self.repository, reference, &self.auth)
            .await?;

        if manifest.media_type != OCI_MANIFEST_MEDIA_TYPE {
            return Err(RegistryError::WrongMediaType {
                got: manifest.media_type,
                wanted: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            });
        }
        if manifest.config_media_type != CONFIG_MEDIA_TYPE {
            return Err(RegistryError::WrongMediaType {
                got: manifest.config_media_type,
                wanted: CONFIG_MEDIA_TYPE.to_string(),
            });
        }

        let digest = manifest.digest.clone();
        let completion_dir = self.cache_dir.join(COMPLETION_DIR);
        let marker = completion_dir.join(format!("{digest}.complete"));

        if marker.exists() {
            debug!(digest, "Artifact already unpacked, skipping");
            return Ok(digest);
        }

        prepare_dirs(&completion_dir, target_dir)?;

        let backup_dir = backup_path(target_dir);
        create_backup(target_dir, &backup_dir)?;

        let scratch_dir = self.cache_dir.join(&digest);
        let archive_path = match self.download_layer(&manifest, &scratch_dir).await {
            Ok(path) => path,
            Err(err) => return Err(err.recoverable(backup_dir)),
        };

        if let Err(err) = archive::extract(&archive_path, target_dir) {
            return Err(RegistryError::from(err).unrecoverable());
        }

        File::create(&marker)?;
        remove_scratch(&scratch_dir);

        info!(repository = %self.repository, reference, digest, "Loaded project artifact");
        Ok(digest)
    }

    async fn download_layer(
        &self,
        manifest: &crate::client::RemoteManifest,
        scratch_dir: &Path,
    ) -> Result<PathBuf> {
        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| RegistryError::Oci {
                message: "artifact manifest has no content layer".to_string(),
            })?;

        if layer.media_type != CONTENT_LAYER_MEDIA_TYPE {
            return Err(RegistryError::WrongMediaType {
                got: layer.media_type.clone(),
                wanted: CONTENT_LAYER_MEDIA_TYPE.to_string(),
            });
        }

        create_private_dir(scratch_dir)?;
        let data = self
            .client
            .pull_layer(&self.repository, layer, &self.auth)
            .await?;

        let archive_path = scratch_dir.join(ARCHIVE_NAME);
        let mut file = File::create(&archive_path)?;
        file.write_all(&data)?;
        Ok(archive_path)
    }
}

/// The backup directory derived from a target directory.
pub fn backup_path(target_dir: &Path) -> PathBuf {
    let mut os_string = target_dir.as_os_str().to_os_string();
    os_string.push("-bkp");
    PathBuf::from(os_string)
}

fn prepare_dirs(completion_dir: &Path, target_dir: &Path) -> Result<()> {
    // Markers of previous digests are dropped; only the artifact unpacked
    // last keeps its short circuit.
    if completion_dir.exists() {
        fs::remove_dir_all(completion_dir)?;
    }
    create_private_dir(completion_dir)?;
    create_private_dir(target_dir)?;
    Ok(())
}

/// Mirrors the tree shape of `target_dir` into `backup_dir`.
///
/// Files become zero-byte placeholders; this is a structure hint for
/// recovery, not a full copy.
fn create_backup(target_dir: &Path, backup_dir: &Path) -> Result<()> {
    if backup_dir.exists() {
        fs::remove_dir_all(backup_dir)?;
    }
    create_private_dir(backup_dir)?;

    let mut pending = vec![target_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let relative = path
                .strip_prefix(target_dir)
                .map_err(|_| RegistryError::Oci {
                    message: format!("backup entry {} escapes the target", path.display()),
                })?;
            let target = backup_dir.join(relative);

            if entry.file_type()?.is_dir() {
                create_private_dir(&target)?;
                pending.push(path);
            } else {
                File::create(&target)?;
            }
        }
    }
    Ok(())
}

fn create_private_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)
    }
}

fn remove_scratch(path: &Path) {
    if let Err(err) = fs::remove_dir_all(path) {
        tracing::warn!(path = %path.display(), error = %err, "Unable to remove scratch directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRegistryClient;
    use tempfile::TempDir;

    fn project_layer(temp: &TempDir) -> Vec<u8> {
        let project = temp.path().join("seed-project");
        fs::create_dir_all(project.join("infra")).unwrap();
        fs::write(project.join("project.cue"), "package project\n").unwrap();
        fs::write(project.join("infra").join("apps.cue"), "package infra\n").unwrap();

        let archive = temp.path().join("seed.tgz");
        archive::create(&project, &archive).unwrap();
        fs::read(&archive).unwrap()
    }

    fn client(temp: &TempDir, registry: MockRegistryClient) -> ProjectClient<MockRegistryClient> {
        ProjectClient::new(registry, "registry.example.com/org/project", temp.path().join("cache"))
    }

    #[tokio::test]
    async fn test_load_unpacks_artifact() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        let layer = project_layer(&temp);
        let digest = registry.put_image(
            "registry.example.com/org/project",
            "main",
            CONFIG_MEDIA_TYPE,
            CONTENT_LAYER_MEDIA_TYPE,
            layer,
        );

        let client = client(&temp, registry);
        let target = temp.path().join("work");
        let loaded = client.load_image("main", &target).await.unwrap();

        assert_eq!(loaded, digest);
        assert!(target.join("project.cue").exists());
        assert!(target.join("infra").join("apps.cue").exists());
    }

    #[tokio::test]
    async fn test_load_is_idempotent_per_digest() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        let layer = project_layer(&temp);
        registry.put_image(
            "registry.example.com/org/project",
            "main",
            CONFIG_MEDIA_TYPE,
            CONTENT_LAYER_MEDIA_TYPE,
            layer,
        );

        let client = client(&temp, registry);
        let target = temp.path().join("work");

        let first = client.load_image("main", &target).await.unwrap();

        // Remove the tree; a marker-satisfied load must not recreate it.
        fs::remove_dir_all(&target).unwrap();
        let second = client.load_image("main", &target).await.unwrap();

        assert_eq!(first, second);
        assert!(!target.exists(), "second load must not touch the target");
        assert_eq!(client.client.pulled_layers(), 1);
    }

    #[tokio::test]
    async fn test_load_wrong_config_media_type() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        let layer = project_layer(&temp);
        registry.put_image(
            "registry.example.com/org/project",
            "main",
            "application/vnd.unrelated.config.v1+json",
            CONTENT_LAYER_MEDIA_TYPE,
            layer,
        );

        let client = client(&temp, registry);
        let err = client
            .load_image("main", &temp.path().join("work"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::WrongMediaType { .. }));
    }

    #[tokio::test]
    async fn test_failed_layer_download_is_recoverable_with_backup() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        let layer = project_layer(&temp);
        registry.put_image(
            "registry.example.com/org/project",
            "main",
            CONFIG_MEDIA_TYPE,
            CONTENT_LAYER_MEDIA_TYPE,
            layer,
        );

        let target = temp.path().join("work");
        fs::create_dir_all(target.join("infra")).unwrap();
        fs::write(target.join("project.cue"), "previous state").unwrap();

        registry.fail_layer_pulls(true);
        let client = client(&temp, registry);
        let err = client.load_image("main", &target).await.unwrap_err();

        let backup = err.backup_path().expect("recoverable error carries a backup");
        assert!(backup.join("infra").is_dir());
        // Placeholder files mirror the structure, not the contents.
        assert!(backup.join("project.cue").exists());
        assert_eq!(fs::read(backup.join("project.cue")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_layer_is_unrecoverable() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        registry.put_image(
            "registry.example.com/org/project",
            "main",
            CONFIG_MEDIA_TYPE,
            CONTENT_LAYER_MEDIA_TYPE,
            b"this is not a tarball".to_vec(),
        );

        let client = client(&temp, registry);
        let err = client
            .load_image("main", &temp.path().join("work"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistryError::Unrecoverable { .. }));
    }

    #[tokio::test]
    async fn test_push_then_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let registry = MockRegistryClient::new();
        let client = client(&temp, registry);

        let project = temp.path().join("authored");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("project.cue"), "package project\n").unwrap();

        let pushed = client.push_image_from_path("main", &project).await.unwrap();

        let target = temp.path().join("work");
        let loaded = client.load_image("main", &target).await.unwrap();

        assert_eq!(pushed, loaded);
        assert!(target.join("project.cue").exists());
    }

    #[test]
    fn test_backup_path_suffix() {
        assert_eq!(
            backup_path(Path::new("/cache/navecd/uid")),
            PathBuf::from("/cache/navecd/uid-bkp")
        );
    }
}
