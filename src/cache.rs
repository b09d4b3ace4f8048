//! Package-cache mount planning.
//!
//! [`plan_cache_mounts`] is a pure function from cache mode, language
//! profile and host working directory to the set of bind mounts a sandbox
//! needs. Creating volumes or directories is left to the caller, which
//! walks [`CachePlan::volumes`] and [`CachePlan::host_dirs`] before start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::language::LanguageProfile;

/// Directory inside the task working tree holding `local` mode caches.
/// Excluded from `git clean` so caches survive between phases.
pub const LOCAL_CACHE_DIR: &str = ".swe-testbed-cache";

/// Prefix of every named volume the harness creates.
pub const VOLUME_PREFIX: &str = "swe-testbed-";

/// Where package caches live.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// No cache: dependencies are downloaded on every run.
    Download,
    /// The invoking user's own cache directories.
    Shared,
    /// A cache directory inside the task working tree.
    Local,
    /// Named volumes managed by the container runtime.
    #[default]
    Volume,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Shared => write!(f, "shared"),
            Self::Local => write!(f, "local"),
            Self::Volume => write!(f, "volume"),
        }
    }
}

impl std::str::FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "download" => Ok(Self::Download),
            "shared" => Ok(Self::Shared),
            "local" => Ok(Self::Local),
            "volume" => Ok(Self::Volume),
            other => Err(format!("Unknown cache mode: {}", other)),
        }
    }
}

/// Backing store of one mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "source", rename_all = "snake_case")]
pub enum MountSource {
    HostPath(PathBuf),
    Volume(String),
}

/// One mount of a cache into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindSpec {
    pub source: MountSource,
    pub read_only: bool,
}

impl BindSpec {
    /// Docker `binds` entry: `<source>:<target>:<mode>`.
    pub fn bind_string(&self, target: &str) -> String {
        let source = match &self.source {
            MountSource::HostPath(path) => path.display().to_string(),
            MountSource::Volume(name) => name.clone(),
        };
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{source}:{target}:{mode}")
    }
}

/// Mounts keyed by their path inside the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CachePlan {
    pub mode: CacheMode,
    pub mounts: BTreeMap<String, BindSpec>,
}

impl CachePlan {
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Named volumes that must exist before the sandbox starts.
    pub fn volumes(&self) -> Vec<&str> {
        self.mounts
            .values()
            .filter_map(|spec| match &spec.source {
                MountSource::Volume(name) => Some(name.as_str()),
                MountSource::HostPath(_) => None,
            })
            .collect()
    }

    /// Host directories that must exist before the sandbox starts.
    pub fn host_dirs(&self) -> Vec<&Path> {
        self.mounts
            .values()
            .filter_map(|spec| match &spec.source {
                MountSource::HostPath(path) => Some(path.as_path()),
                MountSource::Volume(_) => None,
            })
            .collect()
    }

    pub fn bind_strings(&self) -> Vec<String> {
        self.mounts
            .iter()
            .map(|(target, spec)| spec.bind_string(target))
            .collect()
    }
}

/// Name of the volume backing the cache `cache_name`.
pub fn volume_name(cache_name: &str) -> String {
    format!("{VOLUME_PREFIX}{cache_name}")
}

/// Computes the cache mounts for one sandbox.
///
/// `home` is the invoking user's home directory; `shared` mode plans no
/// mounts without one.
pub fn plan_cache_mounts(
    mode: CacheMode,
    profile: &LanguageProfile,
    host_workdir: &Path,
    home: Option<&Path>,
) -> CachePlan {
    let mut mounts = BTreeMap::new();
    for cache in profile.caches {
        let source = match mode {
            CacheMode::Download => continue,
            CacheMode::Shared => match home {
                Some(home) => MountSource::HostPath(home.join(cache.user_dir)),
                None => continue,
            },
            CacheMode::Local => {
                MountSource::HostPath(host_workdir.join(LOCAL_CACHE_DIR).join(cache.name))
            }
            CacheMode::Volume => MountSource::Volume(volume_name(cache.name)),
        };
        mounts.insert(
            cache.mount_point.to_string(),
            BindSpec {
                source,
                read_only: false,
            },
        );
    }
    CachePlan { mode, mounts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    const WORKDIR: &str = "/cache/repos/o/r/abc";

    #[test]
    fn test_download_mode_mounts_nothing() {
        for language in Language::ALL {
            let plan = plan_cache_mounts(
                CacheMode::Download,
                language.profile(),
                Path::new(WORKDIR),
                Some(Path::new("/home/u")),
            );
            assert!(plan.is_empty());
        }
    }

    #[test]
    fn test_volume_mode() {
        let plan = plan_cache_mounts(
            CacheMode::Volume,
            Language::Kotlin.profile(),
            Path::new(WORKDIR),
            None,
        );
        assert_eq!(plan.volumes(), vec!["swe-testbed-gradle", "swe-testbed-kotlin"]);
        assert!(plan.host_dirs().is_empty());
        assert_eq!(
            plan.bind_strings(),
            vec![
                "swe-testbed-gradle:/root/.gradle:rw".to_string(),
                "swe-testbed-kotlin:/root/.kotlin:rw".to_string(),
            ]
        );
    }

    #[test]
    fn test_local_mode_lives_in_workdir() {
        let plan = plan_cache_mounts(
            CacheMode::Local,
            Language::Go.profile(),
            Path::new(WORKDIR),
            None,
        );
        let dirs = plan.host_dirs();
        assert_eq!(dirs.len(), 2);
        for dir in dirs {
            assert!(dir.starts_with(Path::new(WORKDIR).join(LOCAL_CACHE_DIR)));
        }
        assert!(plan.volumes().is_empty());
    }

    #[test]
    fn test_shared_mode_uses_home() {
        let plan = plan_cache_mounts(
            CacheMode::Shared,
            Language::Rust.profile(),
            Path::new(WORKDIR),
            Some(Path::new("/home/dev")),
        );
        let spec = plan.mounts.get("/usr/local/cargo/registry").unwrap();
        assert_eq!(
            spec.source,
            MountSource::HostPath(PathBuf::from("/home/dev/.cargo/registry"))
        );

        let homeless = plan_cache_mounts(
            CacheMode::Shared,
            Language::Rust.profile(),
            Path::new(WORKDIR),
            None,
        );
        assert!(homeless.is_empty());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let a = plan_cache_mounts(CacheMode::Volume, Language::Cpp.profile(), Path::new(WORKDIR), None);
        let b = plan_cache_mounts(CacheMode::Volume, Language::Cpp.profile(), Path::new(WORKDIR), None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_mode_parsing() {
        assert_eq!("Volume".parse::<CacheMode>().unwrap(), CacheMode::Volume);
        assert!("tmpfs".parse::<CacheMode>().is_err());
        assert_eq!(CacheMode::default(), CacheMode::Volume);
        assert_eq!(CacheMode::Shared.to_string(), "shared");
    }
}
