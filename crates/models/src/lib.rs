mod download;
mod registry;

use std::path::{Path, PathBuf};

pub use download::{download_artifact, huggingface_url, DownloadProgress};
pub use registry::{ArtifactRegistry, ConsentRecord, DECLINED_KEY, DOWNLOADED_KEY};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("download cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Files smaller than this are treated as truncated leftovers, not artifacts.
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

/// A downloadable chat model artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Identifier passed to the engine provider.
    pub id: String,
    /// Size shown to the user when asking for download consent.
    pub size_text: String,
    /// HuggingFace repository holding the weights.
    pub huggingface_repo: String,
    /// File inside the repository (single-file GGUF).
    pub filename: String,
    /// Approximate size in bytes, used when the server omits Content-Length.
    pub size_bytes: u64,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            id: "Llama-3.1-8B-Instruct-Q4_K_M".to_string(),
            size_text: "≈ 4.9 GB".to_string(),
            huggingface_repo: "bartowski/Meta-Llama-3.1-8B-Instruct-GGUF".to_string(),
            filename: "Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf".to_string(),
            size_bytes: 4_920_000_000,
        }
    }
}

impl ModelSpec {
    pub fn download_url(&self) -> String {
        huggingface_url(&self.huggingface_repo, &self.filename)
    }
}

pub fn models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("localchat")
        .join("models")
}

pub fn artifact_path(spec: &ModelSpec, dir: &Path) -> PathBuf {
    dir.join(&spec.id).join(&spec.filename)
}

pub fn is_downloaded(spec: &ModelSpec, dir: &Path) -> bool {
    std::fs::metadata(artifact_path(spec, dir))
        .map(|m| m.is_file() && m.len() > MIN_ARTIFACT_BYTES)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_url() {
        let spec = ModelSpec::default();
        assert_eq!(
            spec.download_url(),
            "https://huggingface.co/bartowski/Meta-Llama-3.1-8B-Instruct-GGUF/resolve/main/Meta-Llama-3.1-8B-Instruct-Q4_K_M.gguf"
        );
    }

    #[test]
    fn test_artifact_path_is_scoped_by_model_id() {
        let spec = ModelSpec::default();
        let path = artifact_path(&spec, Path::new("/models"));
        assert!(path.starts_with("/models/Llama-3.1-8B-Instruct-Q4_K_M"));
        assert!(path.ends_with(&spec.filename));
    }

    #[test]
    fn test_is_downloaded_rejects_tiny_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ModelSpec::default();
        assert!(!is_downloaded(&spec, dir.path()));

        let path = artifact_path(&spec, dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stub").unwrap();
        assert!(!is_downloaded(&spec, dir.path()));

        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(is_downloaded(&spec, dir.path()));
    }
}
