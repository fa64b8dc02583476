//! Whole-file atomic writes and path-component checks.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// File mode for persisted files.
pub const FILE_MODE: u32 = 0o644;
/// Directory mode for persisted directories.
pub const DIR_MODE: u32 = 0o755;

/// Write `bytes` to `path` via a sibling temp file and rename, so readers
/// never observe a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = parent.join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        set_mode(&temp_path, FILE_MODE)?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Serialize `value` as 2-space pretty JSON and write it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &content)
}

/// Create `path` and its parents with [`DIR_MODE`].
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Reject names that could escape their parent directory.
pub fn validate_component(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("must not contain path separators: {}", name));
    }
    if name == "." || name.contains("..") {
        return Err(format!("must not contain '..': {}", name));
    }
    if name.contains('\0') {
        return Err("must not contain NUL".to_string());
    }
    Ok(())
}
