//! Sandboxed working directories.
//!
//! Every build and run job executes in its own fresh temporary directory,
//! populated from the benchmark (or a persisted build tree). The directory
//! is removed when the [`Sandbox`] guard goes away, whether the job
//! finished or bailed out with an error, unless retention was requested.
//!
//! Jobs run concurrently in one process, so the sandbox never changes the
//! process-wide current directory. Its path is the working directory for
//! everything launched through [`Sandbox::command`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::AcceptResult;

/// How a sandbox is filled from its source directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Populate {
    /// Deep copy of every entry. Builds may modify files freely.
    Copy,
    /// One symlink per top-level entry. Cheap, but writes go to the source.
    Symlink,
}

/// Guard for one sandbox directory.
#[derive(Debug)]
pub struct Sandbox {
    dir: Option<TempDir>,
    path: PathBuf,
    retain: bool,
}

impl Sandbox {
    /// Creates an empty sandbox.
    pub fn enter(retain: bool) -> AcceptResult<Self> {
        let dir = tempfile::Builder::new().prefix("accept-").tempdir()?;
        let path = dir.path().to_path_buf();
        tracing::trace!(path = %path.display(), "sandbox entered");
        Ok(Self {
            dir: Some(dir),
            path,
            retain,
        })
    }

    /// Creates a sandbox filled with the contents of `source`.
    pub fn enter_from(source: &Path, populate: Populate, retain: bool) -> AcceptResult<Self> {
        let sandbox = Self::enter(retain)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            let target = sandbox.path.join(entry.file_name());
            match populate {
                Populate::Copy => copy_entry(&entry.path(), &target)?,
                Populate::Symlink => symlink(&fs::canonicalize(entry.path())?, &target)?,
            }
        }
        Ok(sandbox)
    }

    /// Working directory of this sandbox.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a path relative to the sandbox.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Command that runs with the sandbox as its working directory.
    pub fn command(&self, program: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.current_dir(&self.path).kill_on_drop(true);
        cmd
    }

    /// Copies the sandbox tree to `dest`, replacing whatever was there.
    ///
    /// The copy lands in a sibling directory first and is renamed into
    /// place, so readers of `dest` never see half a tree.
    pub fn persist_to(&self, dest: &Path) -> AcceptResult<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let staging = parent.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        copy_entry(&self.path, &staging)?;

        if dest.exists() {
            fs::remove_dir_all(dest)?;
        }
        if let Err(e) = fs::rename(&staging, dest) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        Ok(())
    }

    /// Leaves the sandbox. Returns the path if it was retained.
    pub fn exit(mut self) -> Option<PathBuf> {
        self.release()
    }

    fn release(&mut self) -> Option<PathBuf> {
        let dir = self.dir.take()?;
        if self.retain {
            let kept = dir.keep();
            tracing::info!(path = %kept.display(), "sandbox kept");
            Some(kept)
        } else {
            if let Err(e) = dir.close() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove sandbox");
            }
            None
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.release();
    }
}

/// Recursively copies a file, symlink or directory.
fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(src)?;
        symlink(&target, dst)
    } else if file_type.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, meta.permissions())
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Makefile"), "all:\n\ttrue\n").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("main.c"), "int main(){}").unwrap();
        dir
    }

    #[test]
    fn test_sandbox_removed_on_exit() {
        let sandbox = Sandbox::enter(false).unwrap();
        let path = sandbox.path().to_path_buf();
        assert!(path.is_dir());

        assert!(sandbox.exit().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_sandbox_retained() {
        let sandbox = Sandbox::enter(true).unwrap();
        let path = sandbox.path().to_path_buf();

        let kept = sandbox.exit().unwrap();
        assert_eq!(kept, path);
        assert!(kept.is_dir());
        fs::remove_dir_all(kept).unwrap();
    }

    #[test]
    fn test_sandbox_removed_when_work_fails() {
        let mut seen = None;
        let result: AcceptResult<()> = (|| {
            let sandbox = Sandbox::enter(false)?;
            seen = Some(sandbox.path().to_path_buf());
            fs::write(sandbox.join("partial.o"), b"junk")?;
            Err(crate::AcceptError::user("compiler exploded"))
        })();

        assert!(result.is_err());
        assert!(!seen.unwrap().exists());
    }

    #[test]
    fn test_copy_population_is_independent() {
        let source = fixture();
        let sandbox = Sandbox::enter_from(source.path(), Populate::Copy, false).unwrap();

        assert!(sandbox.join("src/main.c").is_file());
        fs::write(sandbox.join("Makefile"), "changed").unwrap();
        assert_eq!(
            fs::read_to_string(source.path().join("Makefile")).unwrap(),
            "all:\n\ttrue\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_population() {
        let source = fixture();
        let sandbox = Sandbox::enter_from(source.path(), Populate::Symlink, false).unwrap();

        let link = sandbox.join("src");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert!(link.join("main.c").is_file());
    }

    #[test]
    fn test_persist_to_replaces_destination() {
        let source = fixture();
        let sandbox = Sandbox::enter_from(source.path(), Populate::Copy, false).unwrap();
        let store = TempDir::new().unwrap();
        let dest = store.path().join("builds").join("abc");

        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale"), b"old").unwrap();

        sandbox.persist_to(&dest).unwrap();
        assert!(dest.join("src/main.c").is_file());
        assert!(!dest.join("stale").exists());
    }

    #[tokio::test]
    async fn test_command_runs_inside_sandbox() {
        let sandbox = Sandbox::enter(false).unwrap();
        let output = sandbox.command("pwd").output().await.unwrap();
        let pwd = String::from_utf8_lossy(&output.stdout).trim().to_string();

        assert_eq!(
            fs::canonicalize(pwd).unwrap(),
            fs::canonicalize(sandbox.path()).unwrap()
        );
    }
}
