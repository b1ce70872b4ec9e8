//! Fallback cleanup when the process is killed during a native capture.
//!
//! While descriptors 1 and 2 point at the capture pipe, a terminating signal
//! would end the process without the normal restore ever running. For each
//! terminating signal that still has its default action, the monitor installs
//! a one-shot handler that releases the saved descriptors and then re-raises
//! the signal, so the process dies exactly as it would have.
//!
//! Child-termination notifications (SIGCHLD) are not watched: a subprocess
//! spawned by the callback raises one on exit, which would end the capture
//! early. The signals a parent sends to tear down the process tree are
//! watched instead.

use std::os::raw::c_int;
use std::{mem, ptr};

use crate::descriptor;

const EXIT_SIGNALS: [c_int; 4] = [libc::SIGHUP, libc::SIGINT, libc::SIGQUIT, libc::SIGTERM];

/// Handlers installed for one native capture; the previous actions come back
/// on drop.
pub(crate) struct ExitSignalMonitor {
    installed: Vec<(c_int, libc::sigaction)>,
}

impl ExitSignalMonitor {
    /// Install the fallback handler for every exit signal nobody else handles.
    pub(crate) fn arm() -> Self {
        let mut installed = Vec::with_capacity(EXIT_SIGNALS.len());
        for &sig in &EXIT_SIGNALS {
            // Signals the application handles or ignores are left alone.
            match current_action(sig) {
                Some(action) if action.sa_sigaction == libc::SIG_DFL => {}
                _ => continue,
            }

            unsafe {
                let mut action: libc::sigaction = mem::zeroed();
                action.sa_sigaction = on_exit_signal as *const () as libc::sighandler_t;
                action.sa_flags = libc::SA_RESETHAND;
                libc::sigemptyset(&mut action.sa_mask);

                let mut previous: libc::sigaction = mem::zeroed();
                if libc::sigaction(sig, &action, &mut previous) == 0 {
                    installed.push((sig, previous));
                }
            }
        }
        Self { installed }
    }

    /// Signals currently covered by the fallback handler.
    pub(crate) fn signals(&self) -> impl Iterator<Item = c_int> + '_ {
        self.installed.iter().map(|(sig, _)| *sig)
    }
}

impl Drop for ExitSignalMonitor {
    fn drop(&mut self) {
        for (sig, previous) in &self.installed {
            unsafe {
                libc::sigaction(*sig, previous, ptr::null_mut());
            }
        }
    }
}

fn current_action(sig: c_int) -> Option<libc::sigaction> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        if libc::sigaction(sig, ptr::null(), &mut action) != 0 {
            return None;
        }
        Some(action)
    }
}

extern "C" fn on_exit_signal(sig: c_int) {
    let _ = descriptor::release_saved();
    // SA_RESETHAND already put the default action back. The signal stays
    // blocked until this handler returns, then terminates the process.
    unsafe {
        libc::raise(sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn installs_and_restores_default_actions() {
        let before = current_action(libc::SIGHUP).unwrap();
        if before.sa_sigaction != libc::SIG_DFL {
            // Inherited as ignored (e.g. under nohup); nothing to verify.
            return;
        }

        let monitor = ExitSignalMonitor::arm();
        assert!(monitor.signals().any(|sig| sig == libc::SIGHUP));
        let during = current_action(libc::SIGHUP).unwrap();
        assert_eq!(during.sa_sigaction, on_exit_signal as *const () as libc::sighandler_t);

        drop(monitor);
        assert_eq!(current_action(libc::SIGHUP).unwrap().sa_sigaction, libc::SIG_DFL);
    }

    fn identity(fd: c_int) -> Option<(libc::dev_t, libc::ino_t)> {
        unsafe {
            let mut st: libc::stat = mem::zeroed();
            if libc::fstat(fd, &mut st) != 0 {
                return None;
            }
            Some((st.st_dev, st.st_ino))
        }
    }

    // Runs in a forked child, so it only touches descriptors and atomics.
    // Returns the exit code: 0 on success, otherwise the failed check.
    fn swap_then_handle_signal() -> c_int {
        let stdout = identity(libc::STDOUT_FILENO);
        let stderr = identity(libc::STDERR_FILENO);
        let mut pipe = [0; 2];
        if unsafe { libc::pipe(pipe.as_mut_ptr()) } != 0 {
            return 10;
        }
        let Ok(saved) = descriptor::SavedStdio::save() else {
            return 11;
        };
        if saved.redirect_to(pipe[1]).is_err() {
            return 12;
        }
        if identity(libc::STDOUT_FILENO) != identity(pipe[1]) {
            return 13;
        }

        // Ignored, so the re-raise at the end of the handler is a no-op.
        unsafe { libc::signal(libc::SIGUSR1, libc::SIG_IGN) };
        on_exit_signal(libc::SIGUSR1);

        if identity(libc::STDOUT_FILENO) != stdout || identity(libc::STDERR_FILENO) != stderr {
            return 14;
        }
        if descriptor::release_saved().is_some() {
            return 15;
        }
        drop(saved);
        0
    }

    #[test]
    #[serial]
    fn handler_puts_original_descriptors_back() {
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed");
        if pid == 0 {
            let code = swap_then_handle_signal();
            unsafe { libc::_exit(code) };
        }

        let mut status = 0;
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status), "child status {}", status);
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }

    #[test]
    #[serial]
    fn leaves_application_handlers_alone() {
        let previous = unsafe { libc::signal(libc::SIGQUIT, libc::SIG_IGN) };

        let monitor = ExitSignalMonitor::arm();
        assert!(monitor.signals().all(|sig| sig != libc::SIGQUIT));
        drop(monitor);
        assert_eq!(current_action(libc::SIGQUIT).unwrap().sa_sigaction, libc::SIG_IGN);

        unsafe { libc::signal(libc::SIGQUIT, previous) };
    }
}
