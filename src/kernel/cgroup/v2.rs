/// Cgroup v2 memory enforcement
///
/// One child cgroup per supervised process under a delegated root. The child
/// attaches itself from `pre_exec`, so the limit is in force before user code
/// runs. `memory.events` provides definitive OOM-kill evidence.
use crate::config::types::{JudgeError, Result, ResourceLimits};
use std::ffi::{CStr, CString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const CGROUP_MOUNT: &str = "/sys/fs/cgroup";

fn cgroup_err(what: &str, path: &Path, err: impl std::fmt::Display) -> JudgeError {
    JudgeError::Cgroup(format!("{} {}: {}", what, path.display(), err))
}

/// Delegated root under which per-run cgroups are created.
#[derive(Debug, Clone)]
pub struct CgroupV2 {
    root: PathBuf,
}

impl CgroupV2 {
    /// Check that a v2 hierarchy with the memory controller is usable at
    /// `root`, creating the root and enabling `+memory` for its children.
    pub fn probe(root: &Path) -> Result<Self> {
        let unified = Path::new(CGROUP_MOUNT).join("cgroup.controllers");
        if !unified.exists() {
            return Err(JudgeError::Cgroup(format!(
                "cgroup v2 not mounted at {}",
                CGROUP_MOUNT
            )));
        }

        fs::create_dir_all(root).map_err(|e| cgroup_err("create", root, e))?;

        let controllers_path = root.join("cgroup.controllers");
        let controllers = fs::read_to_string(&controllers_path)
            .map_err(|e| cgroup_err("read", &controllers_path, e))?;
        if !controllers.split_whitespace().any(|c| c == "memory") {
            return Err(JudgeError::Cgroup(format!(
                "memory controller not delegated to {}",
                root.display()
            )));
        }

        let subtree = root.join("cgroup.subtree_control");
        let enabled = fs::read_to_string(&subtree).unwrap_or_default();
        if !enabled.split_whitespace().any(|c| c == "memory") {
            fs::write(&subtree, "+memory").map_err(|e| cgroup_err("enable memory in", &subtree, e))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a run cgroup with the memory ceiling from `limits`.
    pub fn create_run(&self, label: &str, limits: &ResourceLimits) -> Result<RunCgroup> {
        let path = self.root.join(format!("run-{}-{}", label, uuid::Uuid::new_v4().simple()));
        fs::create_dir(&path).map_err(|e| cgroup_err("create", &path, e))?;

        let procs = CString::new(path.join("cgroup.procs").as_os_str().as_bytes())
            .map_err(|_| JudgeError::Cgroup(format!("NUL byte in {}", path.display())))?;
        let run = RunCgroup {
            path,
            procs,
            removed: false,
        };

        if let Some(bytes) = limits.memory_ceiling() {
            run.write_control("memory.max", &bytes.to_string())?;
            // Swap would let a program exceed the ceiling silently.
            if let Err(e) = run.write_control("memory.swap.max", "0") {
                log::debug!("memory.swap.max unavailable: {}", e);
            }
        }
        Ok(run)
    }
}

/// Cgroup owning exactly one supervised process tree.
#[derive(Debug)]
pub struct RunCgroup {
    path: PathBuf,
    procs: CString,
    removed: bool,
}

impl RunCgroup {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `cgroup.procs` as a C string for the pre-exec self-attach.
    pub fn procs_path(&self) -> &CStr {
        &self.procs
    }

    fn write_control(&self, file: &str, value: &str) -> Result<()> {
        let path = self.path.join(file);
        fs::write(&path, value).map_err(|e| cgroup_err("write", &path, e))
    }

    fn read_control(&self, file: &str) -> Option<String> {
        fs::read_to_string(self.path.join(file)).ok()
    }

    /// Value of `oom_kill` in `memory.events`
    pub fn oom_kill_count(&self) -> u64 {
        self.read_control("memory.events")
            .and_then(|events| {
                events.lines().find_map(|line| {
                    let mut parts = line.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some("oom_kill"), Some(count)) => count.parse().ok(),
                        _ => None,
                    }
                })
            })
            .unwrap_or(0)
    }

    /// `memory.peak` (kernel 5.19+)
    pub fn peak_memory(&self) -> Option<u64> {
        self.read_control("memory.peak")
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Kill every process in the cgroup, including ones that left the
    /// process group. Needs `cgroup.kill` (kernel 5.14+).
    pub fn kill_all(&self) -> bool {
        self.write_control("cgroup.kill", "1").is_ok()
    }

    fn populated(&self) -> bool {
        self.read_control("cgroup.events")
            .map(|events| events.lines().any(|line| line.trim() == "populated 1"))
            .unwrap_or(false)
    }

    /// Remove the cgroup, waiting briefly for killed members to exit.
    pub fn remove(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        let deadline = Instant::now() + Duration::from_millis(500);
        while self.populated() && Instant::now() < deadline {
            self.kill_all();
            std::thread::sleep(Duration::from_millis(5));
        }

        match fs::remove_dir(&self.path) {
            Ok(()) => {
                self.removed = true;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.removed = true;
                Ok(())
            }
            Err(e) => Err(cgroup_err("remove", &self.path, e)),
        }
    }
}

impl Drop for RunCgroup {
    fn drop(&mut self) {
        if let Err(e) = self.remove() {
            log::warn!("{}", e);
        }
    }
}
