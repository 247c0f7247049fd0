//! Symlink-safe recursive removal of scratch trees.
//!
//! Submitted programs run with the scratch directory as their working
//! directory, so anything inside it may be hostile (symlinks to `/etc`, bind
//! mounts, deep nesting). Removal walks the tree through directory file
//! descriptors and never follows a link.

use crate::config::types::{JudgeError, Result};
use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// What a removal actually deleted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReport {
    pub files: usize,
    pub dirs: usize,
}

fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn fs_error(what: &str, name: &CStr) -> JudgeError {
    JudgeError::Filesystem(format!(
        "{} failed for {:?}: {}",
        what,
        name,
        std::io::Error::last_os_error()
    ))
}

fn to_cstring(bytes: &[u8], path: &Path) -> Result<CString> {
    CString::new(bytes).map_err(|_| {
        JudgeError::Filesystem(format!("path contains NUL byte: {}", path.display()))
    })
}

const DIR_FLAGS: libc::c_int =
    libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;

/// Open `name` relative to `parent`. `Ok(None)` when it vanished meanwhile.
fn open_dir_at(parent: RawFd, name: &CStr) -> Result<Option<OwnedFd>> {
    let fd = unsafe { libc::openat(parent, name.as_ptr(), DIR_FLAGS) };
    if fd < 0 {
        if errno() == libc::ENOENT {
            return Ok(None);
        }
        return Err(fs_error("openat", name));
    }
    Ok(Some(unsafe { OwnedFd::from_raw_fd(fd) }))
}

fn lstat_at(parent: RawFd, name: &CStr) -> Result<Option<libc::stat>> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    let rc = unsafe {
        libc::fstatat(parent, name.as_ptr(), st.as_mut_ptr(), libc::AT_SYMLINK_NOFOLLOW)
    };
    if rc != 0 {
        if errno() == libc::ENOENT {
            return Ok(None);
        }
        return Err(fs_error("fstatat", name));
    }
    Ok(Some(unsafe { st.assume_init() }))
}

fn unlink_at(parent: RawFd, name: &CStr, flags: libc::c_int) -> Result<bool> {
    let rc = unsafe { libc::unlinkat(parent, name.as_ptr(), flags) };
    if rc != 0 {
        if errno() == libc::ENOENT {
            return Ok(false);
        }
        return Err(fs_error("unlinkat", name));
    }
    Ok(true)
}

/// Snapshot the entry names of an open directory.
fn list_entries(dir: &OwnedFd) -> Result<Vec<CString>> {
    // fdopendir takes ownership, so iterate over a duplicate.
    let iter_fd = unsafe { libc::dup(dir.as_raw_fd()) };
    if iter_fd < 0 {
        return Err(JudgeError::Filesystem(format!(
            "dup for directory listing failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    let stream = unsafe { libc::fdopendir(iter_fd) };
    if stream.is_null() {
        unsafe {
            libc::close(iter_fd);
        }
        return Err(JudgeError::Filesystem(format!(
            "fdopendir failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let mut names = Vec::new();
    let outcome = loop {
        unsafe {
            *libc::__errno_location() = 0;
        }
        let entry = unsafe { libc::readdir(stream) };
        if entry.is_null() {
            let err = unsafe { *libc::__errno_location() };
            break if err == 0 {
                Ok(())
            } else {
                Err(JudgeError::Filesystem(format!(
                    "readdir failed: {}",
                    std::io::Error::from_raw_os_error(err)
                )))
            };
        }
        let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
        if matches!(name.to_bytes(), b"." | b"..") {
            continue;
        }
        names.push(name.to_owned());
    };
    unsafe {
        libc::closedir(stream);
    }
    outcome.map(|_| names)
}

fn empty_dir(dir: &OwnedFd, root_dev: libc::dev_t, report: &mut RemovalReport) -> Result<()> {
    for name in list_entries(dir)? {
        let Some(st) = lstat_at(dir.as_raw_fd(), &name)? else {
            continue;
        };

        if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
            if st.st_dev != root_dev {
                return Err(JudgeError::Filesystem(format!(
                    "refusing to cross filesystem boundary at {:?}",
                    name
                )));
            }
            if let Some(child) = open_dir_at(dir.as_raw_fd(), &name)? {
                empty_dir(&child, root_dev, report)?;
            }
            if unlink_at(dir.as_raw_fd(), &name, libc::AT_REMOVEDIR)? {
                report.dirs += 1;
            }
        } else if unlink_at(dir.as_raw_fd(), &name, 0)? {
            report.files += 1;
        }
    }
    Ok(())
}

/// Remove `path` and everything below it without following symlinks.
///
/// A path that is already gone is not an error; the report is then empty.
pub fn remove_tree_secure(path: &Path) -> Result<RemovalReport> {
    let mut report = RemovalReport::default();

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => {
            return Err(JudgeError::Filesystem(format!(
                "refusing to remove path without parent: {}",
                path.display()
            )))
        }
    };
    let name = path.file_name().ok_or_else(|| {
        JudgeError::Filesystem(format!("path has no file name: {}", path.display()))
    })?;

    let parent_c = to_cstring(parent.as_os_str().as_bytes(), path)?;
    let name_c = to_cstring(name.as_bytes(), path)?;

    let parent_fd = unsafe { libc::open(parent_c.as_ptr(), DIR_FLAGS) };
    if parent_fd < 0 {
        if errno() == libc::ENOENT {
            return Ok(report);
        }
        return Err(fs_error("open", &parent_c));
    }
    let parent_fd = unsafe { OwnedFd::from_raw_fd(parent_fd) };

    let Some(st) = lstat_at(parent_fd.as_raw_fd(), &name_c)? else {
        return Ok(report);
    };

    if st.st_mode & libc::S_IFMT == libc::S_IFDIR {
        if let Some(dir) = open_dir_at(parent_fd.as_raw_fd(), &name_c)? {
            empty_dir(&dir, st.st_dev, &mut report)?;
        }
        if unlink_at(parent_fd.as_raw_fd(), &name_c, libc::AT_REMOVEDIR)? {
            report.dirs += 1;
        }
    } else if unlink_at(parent_fd.as_raw_fd(), &name_c, 0)? {
        report.files += 1;
    }

    Ok(report)
}
