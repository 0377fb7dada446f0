//! Docker-backed test launcher and sandbox image provisioning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{FileRun, SandboxConfig, TestLauncher};
use crate::corpus::Exercise;
use crate::error::SandboxError;

/// Mount point of the exercise directory inside the container.
const CONTAINER_WORKDIR: &str = "/app";

/// Runs each hidden test file in a fresh, disposable container.
///
/// The exercise directory is mounted read-write; the container has no
/// network and nothing survives between runs.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    config: SandboxConfig,
}

impl DockerLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Arguments for `docker run` executing one test file.
    pub fn docker_run_args(&self, container: &str, exercise_dir: &Path, test_file: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--interactive=false".to_string(),
            "--name".to_string(),
            container.to_string(),
            format!("--network={}", self.config.network_mode),
            format!("--memory={}m", self.config.memory_limit_mb),
        ];
        if self.config.cpu_limit > 0.0 {
            args.push(format!("--cpus={}", self.config.cpu_limit));
        }
        args.extend([
            "-v".to_string(),
            format!("{}:{}", exercise_dir.display(), CONTAINER_WORKDIR),
            "-w".to_string(),
            CONTAINER_WORKDIR.to_string(),
            self.config.image.clone(),
            "bash".to_string(),
            "-c".to_string(),
            format!("{} 2>&1", self.config.command_for(test_file)),
        ]);
        args
    }
}

#[async_trait]
impl TestLauncher for DockerLauncher {
    async fn launch(&self, exercise: &Exercise, test_file: &str, timeout: Duration) -> FileRun {
        let container = container_name(&exercise.name);
        let mount = std::fs::canonicalize(&exercise.dir).unwrap_or_else(|_| exercise.dir.clone());
        let args = self.docker_run_args(&container, &mount, test_file);
        debug!("Docker command: docker {}", args.join(" "));

        let output = tokio::time::timeout(
            timeout,
            Command::new("docker").args(&args).kill_on_drop(true).output(),
        )
        .await;

        match output {
            Ok(Ok(output)) => {
                // Test output is merged in the container; what remains on
                // stderr comes from the docker client itself.
                let mut text = String::from_utf8_lossy(&output.stderr).to_string();
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                if output.status.success() {
                    FileRun::Passed(text)
                } else {
                    FileRun::Failed(text)
                }
            }
            Ok(Err(e)) => FileRun::Failed(format!("Failed to launch docker: {e}")),
            Err(_) => {
                if let Err(e) = Command::new("docker").args(["kill", container.as_str()]).output().await {
                    warn!(container = %container, error = %e, "Failed to kill timed out container");
                }
                FileRun::TimedOut
            }
        }
    }
}

fn container_name(exercise: &str) -> String {
    let safe: String = exercise
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("bench-{}-{}", safe, Uuid::new_v4().simple())
}

/// State of the sandbox image after provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// The image already existed.
    Present,
    /// The image was built during this run.
    Built,
    /// The build failed; tests will be attempted anyway.
    BuildFailed(String),
}

/// The sandbox image, checked or built once per orchestrator run.
#[derive(Debug, Clone)]
pub struct SandboxImage {
    name: String,
    dockerfile: PathBuf,
    docker_bin: String,
}

impl SandboxImage {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            name: config.image.clone(),
            dockerfile: config.dockerfile.clone(),
            docker_bin: "docker".to_string(),
        }
    }

    /// Uses another docker-compatible client (e.g. `podman`).
    pub fn with_docker_bin(mut self, bin: impl Into<String>) -> Self {
        self.docker_bin = bin.into();
        self
    }

    /// Makes sure the image exists, building it from the recipe if needed.
    ///
    /// A failed build is reported, not raised.
    pub async fn ensure(&self) -> ImageStatus {
        match self.exists().await {
            Ok(true) => {
                info!("Docker image '{}' already exists, skipping build.", self.name);
                return ImageStatus::Present;
            }
            Ok(false) => {}
            Err(e) => warn!(image = %self.name, error = %e, "Could not query docker images"),
        }

        match self.build().await {
            Ok(()) => {
                info!("Built docker image '{}'", self.name);
                ImageStatus::Built
            }
            Err(e) => {
                warn!(image = %self.name, error = %e, "Sandbox image build failed, continuing");
                ImageStatus::BuildFailed(e.to_string())
            }
        }
    }

    async fn exists(&self) -> Result<bool, SandboxError> {
        let output = Command::new(&self.docker_bin)
            .args(["images", "-q", self.name.as_str()])
            .output()
            .await
            .map_err(|e| SandboxError::Launch(e.to_string()))?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    async fn build(&self) -> Result<(), SandboxError> {
        let context = self
            .dockerfile
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dockerfile = self.dockerfile.to_string_lossy().to_string();
        let context = context.to_string_lossy().to_string();
        let args = [
            "build",
            "--quiet",
            "-t",
            self.name.as_str(),
            "-f",
            dockerfile.as_str(),
            context.as_str(),
        ];
        info!("{} {}", self.docker_bin, args.join(" "));

        let output = Command::new(&self.docker_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| SandboxError::BuildFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(SandboxError::BuildFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_run_args() {
        let config = SandboxConfig::new("bench:latest")
            .with_memory_mb(1024)
            .with_cpu_limit(2.0);
        let launcher = DockerLauncher::new(config);
        let args = launcher.docker_run_args("c1", Path::new("/work/bob"), "bob_test.py");

        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--memory=1024m".to_string()));
        assert!(args.contains(&"--cpus=2".to_string()));
        assert!(args.contains(&"/work/bob:/app".to_string()));
        assert_eq!(args.last().unwrap(), "pytest /app/bob_test.py 2>&1");
    }

    #[test]
    fn test_docker_run_args_no_cpu_limit() {
        let config = SandboxConfig::new("bench").with_cpu_limit(0.0);
        let args = DockerLauncher::new(config).docker_run_args("c1", Path::new("/x"), "t_test.py");
        assert!(!args.iter().any(|a| a.starts_with("--cpus=")));
    }

    #[test]
    fn test_container_name_sanitized() {
        let name = container_name("word count/2");
        assert!(name.starts_with("bench-word_count_2-"));
        assert_ne!(container_name("bob"), container_name("bob"));
    }

    #[tokio::test]
    async fn test_ensure_missing_client_is_degraded() {
        let image = SandboxImage::new(&SandboxConfig::default())
            .with_docker_bin("definitely-not-a-docker-binary");
        assert!(matches!(image.ensure().await, ImageStatus::BuildFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ensure_failed_build_is_degraded() {
        // `false` lists no images and fails the build.
        let image = SandboxImage::new(&SandboxConfig::default()).with_docker_bin("false");
        assert!(matches!(image.ensure().await, ImageStatus::BuildFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ensure_existing_image() {
        // `echo` prints a non-empty image listing.
        let image = SandboxImage::new(&SandboxConfig::default()).with_docker_bin("echo");
        assert_eq!(image.ensure().await, ImageStatus::Present);
    }
}
