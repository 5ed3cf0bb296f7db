//! Project detection service
//!
//! Decides whether a checked-out source tree is something the forge knows
//! how to build, and if so which toolchain it uses.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Node package manager, picked from the lockfile present in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Pnpm,
    Yarn,
    Npm,
}

impl PackageManager {
    pub fn lockfile(&self) -> &'static str {
        match self {
            PackageManager::Pnpm => "pnpm-lock.yaml",
            PackageManager::Yarn => "yarn.lock",
            PackageManager::Npm => "package-lock.json",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Npm => "npm",
        })
    }
}

/// Project kinds the build recipe supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    NextJs { package_manager: PackageManager },
}

impl fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectKind::NextJs { package_manager } => {
                write!(f, "Next.js ({})", package_manager)
            }
        }
    }
}

/// Result of inspecting a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Supported(ProjectKind),
    Unsupported(String),
}

/// Service trait for classifying source trees
#[async_trait]
pub trait ProjectDetector: Send + Sync {
    async fn detect(&self, source_dir: &Path) -> Detection;
}

/// Detects Next.js apps from `package.json` and the lockfile next to it
#[derive(Debug, Default, Clone)]
pub struct NodeProjectDetector;

impl NodeProjectDetector {
    pub fn new() -> Self {
        Self
    }

    async fn package_manager(source_dir: &Path) -> PackageManager {
        for manager in [PackageManager::Pnpm, PackageManager::Yarn] {
            if tokio::fs::try_exists(source_dir.join(manager.lockfile()))
                .await
                .unwrap_or(false)
            {
                return manager;
            }
        }
        PackageManager::Npm
    }
}

#[async_trait]
impl ProjectDetector for NodeProjectDetector {
    async fn detect(&self, source_dir: &Path) -> Detection {
        let manifest = match tokio::fs::read_to_string(source_dir.join("package.json")).await {
            Ok(content) => content,
            Err(_) => return Detection::Unsupported("No package.json found".to_string()),
        };

        let manifest: JsonValue = match serde_json::from_str(&manifest) {
            Ok(value) => value,
            Err(e) => return Detection::Unsupported(format!("Invalid package.json: {}", e)),
        };

        let has_next = ["dependencies", "devDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|deps| deps.get("next")).is_some());

        if !has_next {
            return Detection::Unsupported(
                "Not a Next.js project (no `next` dependency in package.json)".to_string(),
            );
        }

        let package_manager = Self::package_manager(source_dir).await;
        debug!("Detected Next.js project using {}", package_manager);

        Detection::Supported(ProjectKind::NextJs { package_manager })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEXT_MANIFEST: &str = r#"{"name":"site","dependencies":{"next":"14.2.0","react":"18"}}"#;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_detects_pnpm_next_project() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", NEXT_MANIFEST);
        write(dir.path(), "pnpm-lock.yaml", "lockfileVersion: '6.0'");

        let detection = NodeProjectDetector::new().detect(dir.path()).await;
        assert_eq!(
            detection,
            Detection::Supported(ProjectKind::NextJs {
                package_manager: PackageManager::Pnpm
            })
        );
    }

    #[tokio::test]
    async fn test_package_manager_from_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", NEXT_MANIFEST);
        write(dir.path(), "yarn.lock", "");
        assert_eq!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Supported(ProjectKind::NextJs {
                package_manager: PackageManager::Yarn
            })
        );

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", NEXT_MANIFEST);
        assert_eq!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Supported(ProjectKind::NextJs {
                package_manager: PackageManager::Npm
            })
        );
    }

    #[tokio::test]
    async fn test_next_as_dev_dependency_counts() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"devDependencies":{"next":"latest"}}"#,
        );
        assert!(matches!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Supported(_)
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_next_projects() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Unsupported(reason) if reason.contains("package.json")
        ));

        write(dir.path(), "package.json", r#"{"dependencies":{"express":"4"}}"#);
        assert!(matches!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Unsupported(reason) if reason.contains("Next.js")
        ));

        write(dir.path(), "package.json", "{ not json");
        assert!(matches!(
            NodeProjectDetector.detect(dir.path()).await,
            Detection::Unsupported(reason) if reason.starts_with("Invalid package.json")
        ));
    }
}
