//! Working directory layout for stack runs
//!
//! Working copies live under `$TMPDIR/telophase/`, one directory per
//! (stack source, target, region), so concurrent account tasks never share
//! a directory even when they deploy the same stack.
//!
//! # Environment Variables
//!
//! - `TELOPHASE_WORK_DIR` - Override the working directory root

use orgtree::Stack;
use std::path::{Path, PathBuf};

/// Environment variable for the working directory root
pub const ENV_WORK_DIR: &str = "TELOPHASE_WORK_DIR";

/// Root of every working copy and synth output.
pub fn work_root() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_WORK_DIR) {
        let path = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        log::debug!("Using work dir from {ENV_WORK_DIR}: {}", path.display());
        return path;
    }
    std::env::temp_dir().join("telophase")
}

/// Stable key for a stack deployed to one target.
pub fn stack_key(stack: &Stack, target_id: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(stack.path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(target_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(stack.region.as_deref().unwrap_or_default().as_bytes());
    hasher.finalize().to_hex().as_str()[..16].to_string()
}

/// Materialized working copy of a generic IaC or policy stack.
pub fn stack_work_dir(root: &Path, stack: &Stack, target_id: &str) -> PathBuf {
    root.join("terraform").join(stack_key(stack, target_id))
}

/// Synth output directory of a programmatic IaC stack.
pub fn cdk_output_dir(root: &Path, stack: &Stack, target_id: &str) -> PathBuf {
    root.join("cdk").join(stack_key(stack, target_id))
}
