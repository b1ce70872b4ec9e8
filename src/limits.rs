//! Resource limit helpers: scoped open-file limits, descriptor counting and a
//! process-tree memory watchdog.

use std::io;
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};

/// Run `call` with the soft open-file limit lowered (or raised) to `limit`.
///
/// The hard limit is left as is. The previous soft limit is restored when
/// `call` returns or panics.
#[cfg(unix)]
pub fn with_open_file_limit<F, R>(limit: u64, call: F) -> Result<R>
where
    F: FnOnce(u64) -> R,
{
    let previous = get_nofile()?;
    let lowered = libc::rlimit {
        rlim_cur: limit as libc::rlim_t,
        rlim_max: previous.rlim_max,
    };
    set_nofile(&lowered)?;
    log::debug!(
        "open file limit set to {} (was {})",
        limit,
        previous.rlim_cur
    );

    let restore = RestoreLimit { previous };
    let value = call(limit);
    restore.finish()?;
    Ok(value)
}

#[cfg(not(unix))]
pub fn with_open_file_limit<F, R>(_limit: u64, _call: F) -> Result<R>
where
    F: FnOnce(u64) -> R,
{
    Err(Error::limit(
        "setrlimit(RLIMIT_NOFILE)",
        io::Error::new(io::ErrorKind::Unsupported, "resource limits need Unix"),
    ))
}

/// Current soft limit on open files.
#[cfg(unix)]
pub fn open_file_limit() -> Result<u64> {
    Ok(get_nofile()?.rlim_cur as u64)
}

#[cfg(unix)]
struct RestoreLimit {
    previous: libc::rlimit,
}

#[cfg(unix)]
impl RestoreLimit {
    fn finish(self) -> Result<()> {
        let result = set_nofile(&self.previous);
        std::mem::forget(self);
        result
    }
}

#[cfg(unix)]
impl Drop for RestoreLimit {
    fn drop(&mut self) {
        // Only reached while unwinding out of the scoped call.
        let _ = set_nofile(&self.previous);
    }
}

#[cfg(unix)]
fn get_nofile() -> Result<libc::rlimit> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } != 0 {
        return Err(Error::limit(
            "getrlimit(RLIMIT_NOFILE)",
            io::Error::last_os_error(),
        ));
    }
    Ok(rlim)
}

#[cfg(unix)]
fn set_nofile(rlim: &libc::rlimit) -> Result<()> {
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, rlim) } != 0 {
        return Err(Error::limit(
            "setrlimit(RLIMIT_NOFILE)",
            io::Error::last_os_error(),
        ));
    }
    Ok(())
}

/// Number of descriptors currently open in this process.
pub fn open_descriptor_count() -> io::Result<usize> {
    let dir = if cfg!(target_os = "linux") {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    // The directory handle used for listing shows up in the listing itself.
    let listed = std::fs::read_dir(dir)?.count();
    Ok(listed.saturating_sub(1))
}

const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// Memory limit for this process and all of its descendants.
#[derive(Debug, Clone, Default)]
pub struct ProcessTreeLimits {
    /// Limit in MiB. Zero disables enforcement.
    pub max_memory_mib: u64,
    /// Pause between checks. Zero means two seconds.
    pub watchdog_interval: Duration,
}

impl ProcessTreeLimits {
    /// Start a watchdog thread that calls `on_limit_reached(current_mib, max_mib)`
    /// every time the tree's resident memory is found above the limit.
    ///
    /// The callback decides what happens next; nothing is killed
    /// automatically. Returns `None` when no limit is set or the platform
    /// has no way to measure the tree.
    pub fn enforce<F>(&self, on_limit_reached: F) -> Option<thread::JoinHandle<()>>
    where
        F: Fn(u64, u64) + Send + 'static,
    {
        if self.max_memory_mib == 0 || !cfg!(target_os = "linux") {
            return None;
        }
        let max_mib = self.max_memory_mib;
        let interval = if self.watchdog_interval.is_zero() {
            DEFAULT_WATCHDOG_INTERVAL
        } else {
            self.watchdog_interval
        };

        let spawned = thread::Builder::new()
            .name("stdcap-memory-watchdog".into())
            .spawn(move || {
                loop {
                    match process_tree_memory_kib(std::process::id()) {
                        Ok(kib) => {
                            let current_mib = kib / 1024;
                            if current_mib > max_mib {
                                on_limit_reached(current_mib, max_mib);
                            }
                        }
                        Err(e) => {
                            log::error!("memory watchdog stopped: {}", e);
                            return;
                        }
                    }
                    thread::sleep(interval);
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("failed to start memory watchdog: {}", e);
                None
            }
        }
    }
}

/// Resident memory of `root` and every descendant, in KiB.
///
/// Memory shared between processes is counted once per process.
pub fn process_tree_memory_kib(root: u32) -> io::Result<u64> {
    let processes = list_processes()?;
    let mut total = 0;
    let mut pending = vec![root];
    while let Some(pid) = pending.pop() {
        if let Some(process) = processes.iter().find(|p| p.pid == pid) {
            total += process.rss_kib;
        }
        pending.extend(processes.iter().filter(|p| p.ppid == pid).map(|p| p.pid));
    }
    Ok(total)
}

#[derive(Debug, Clone, PartialEq)]
struct ProcessEntry {
    pid: u32,
    ppid: u32,
    rss_kib: u64,
}

fn list_processes() -> io::Result<Vec<ProcessEntry>> {
    let mut processes = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // Processes can exit between listing and reading.
        let Ok(status) = std::fs::read_to_string(entry.path().join("status")) else {
            continue;
        };
        if let Some(process) = parse_status(pid, &status) {
            processes.push(process);
        }
    }
    Ok(processes)
}

/// Pull the parent pid and resident set size out of `/proc/<pid>/status`.
fn parse_status(pid: u32, status: &str) -> Option<ProcessEntry> {
    let mut ppid = None;
    let mut rss_kib = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("PPid:") {
            ppid = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix("VmRSS:") {
            // Kernel threads have no VmRSS line at all.
            rss_kib = rest.trim().trim_end_matches("kB").trim().parse().unwrap_or(0);
        }
    }
    Some(ProcessEntry {
        pid,
        ppid: ppid?,
        rss_kib,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tcat\nState:\tR (running)\nPid:\t4242\nPPid:\t17\nVmPeak:\t    8000 kB\nVmRSS:\t    1024 kB\nThreads:\t1\n";

    #[test]
    fn parse_status_reads_ppid_and_rss() {
        let entry = parse_status(4242, STATUS).unwrap();
        assert_eq!(
            entry,
            ProcessEntry {
                pid: 4242,
                ppid: 17,
                rss_kib: 1024
            }
        );
    }

    #[test]
    fn parse_status_without_rss_counts_zero() {
        let entry = parse_status(2, "Name:\tkthreadd\nPPid:\t0\n").unwrap();
        assert_eq!(entry.rss_kib, 0);
    }

    #[test]
    fn parse_status_without_ppid_is_skipped() {
        assert!(parse_status(1, "Name:\tgarbage\n").is_none());
    }

    #[test]
    fn zero_limit_disables_watchdog() {
        let limits = ProcessTreeLimits::default();
        assert!(limits.enforce(|_, _| {}).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn watchdog_reports_tree_above_limit() {
        let (tx, rx) = std::sync::mpsc::channel();
        let limits = ProcessTreeLimits {
            max_memory_mib: 1,
            watchdog_interval: Duration::from_millis(10),
        };
        // The watchdog never exits; sends after the receiver is gone are ignored.
        let handle = limits.enforce(move |current, max| {
            let _ = tx.send((current, max));
        });
        assert!(handle.is_some());

        let (current, max) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(max, 1);
        assert!(current > max, "{} MiB reported", current);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_tree_uses_memory() {
        assert!(process_tree_memory_kib(std::process::id()).unwrap() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_count_sees_new_pipes() {
        // Other tests in this binary open files concurrently, so only a lower
        // bound holds.
        let (reader, writer) = std::io::pipe().unwrap();
        assert!(open_descriptor_count().unwrap() >= 5);
        drop((reader, writer));
    }
}
