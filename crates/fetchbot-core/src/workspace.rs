//! Per-job scratch directories and the free-space preflight.
//!
//! Every file a job writes lives under one temporary directory. Cleanup is
//! an explicit step of the job's exit sequence; dropping the workspace
//! removes the directory as a backstop.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::admission::JobId;

#[derive(Debug, thiserror::Error)]
#[error("not enough free space in {path}: {available} bytes available, {required} required")]
pub struct InsufficientSpace {
    pub path: PathBuf,
    pub available: u64,
    pub required: u64,
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
#[cfg(unix)]
pub fn available_space(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

/// Fail before any extraction if `path` has less than `required` bytes free.
/// An unreadable filesystem is logged and allowed through.
pub fn ensure_free_space(path: &Path, required: u64) -> Result<u64, InsufficientSpace> {
    match available_space(path) {
        Ok(available) if available < required => Err(InsufficientSpace {
            path: path.to_path_buf(),
            available,
            required,
        }),
        Ok(available) => Ok(available),
        Err(e) => {
            tracing::warn!(path = %path.display(), "free space check failed: {}", e);
            Ok(u64::MAX)
        }
    }
}

pub struct JobWorkspace {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl JobWorkspace {
    /// Create `<root>/job-<id>-XXXX`, creating `root` if needed.
    pub fn create(root: &Path, job_id: JobId) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{job_id}-"))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory for one item.
    pub async fn item_dir(&self, index: u32) -> io::Result<PathBuf> {
        let dir = self.path.join(format!("item-{index}"));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove one item's scratch directory. Missing directories are fine.
    pub async fn remove_item_dir(&self, index: u32) {
        let dir = self.path.join(format!("item-{index}"));
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %dir.display(), "could not remove item directory: {}", e),
        }
    }

    /// Remove the whole workspace. Safe to call more than once.
    pub fn cleanup(&mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }

    pub fn is_cleaned(&self) -> bool {
        self.dir.is_none()
    }
}
