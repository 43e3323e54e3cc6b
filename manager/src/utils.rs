//! Utility functions

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::bots::SKIPPED_DIRS;
use crate::errors::ManagerError;
use crate::filesys::dir::Dir;
use crate::runner::{CommandLine, CommandRunner, ProcessRunner};
use crate::storage::settings::Settings;

/// Version information for the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Calculate SHA256 hash of data
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Short digest over the relative paths and contents of a bot's sources
pub async fn dir_digest(dir: &Path) -> Result<String, ManagerError> {
    let files = Dir::new(dir).list_files_recursive(SKIPPED_DIRS).await?;
    let mut hasher = Sha256::new();
    for rel in files {
        let contents = fs::read(dir.join(&rel)).await?;
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        hasher.update(sha256_hash(&contents).as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    Ok(digest[..12].to_string())
}

/// Hex encoding utilities
mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(data: impl AsRef<[u8]>) -> String {
        let data = data.as_ref();
        let mut result = String::with_capacity(data.len() * 2);
        for byte in data {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}

/// Print whether the platform CLI and the bots directory are usable
pub async fn run_diagnostic(settings: &Settings) {
    println!("Bot Manager Diagnostics");
    println!("=======================");

    let version = version_info();
    println!("Version:    {} ({})", version.version, version.git_hash);

    let runner = ProcessRunner::default();
    let cli = CommandLine::new(&settings.platform.cli).arg("--version");
    match runner.run(&cli, None).await {
        Ok(output) => {
            let first = output.stdout.lines().next().unwrap_or("").trim().to_string();
            println!("[OK]       {} found: {}", settings.platform.cli, first);
        }
        Err(e) => println!("[FAIL]     {} unavailable: {}", settings.platform.cli, e),
    }

    if settings.platform.project_id.is_empty() {
        println!("[FAIL]     platform.project_id is not set");
    } else {
        println!("[OK]       project: {}", settings.platform.project_id);
    }

    let probe = settings.bots_dir.join(".botmgr-probe");
    let writable = async {
        fs::create_dir_all(&settings.bots_dir).await?;
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await
    }
    .await;
    match writable {
        Ok(()) => println!("[OK]       bots dir writable: {}", settings.bots_dir.display()),
        Err(e) => println!("[FAIL]     bots dir {}: {}", settings.bots_dir.display(), e),
    }
}
