//! Terminating child processes when a run is torn down.

use std::path::Path;
use sysinfo::{Pid, Signal, System};

/// Send SIGTERM to every descendant of this process
///
/// Children are signalled before their own children are looked up again, so
/// a process reparented during teardown may be missed. Returns how many
/// processes were signalled.
pub fn terminate_subprocesses() -> usize {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            tracing::warn!(error = %e, "cannot determine own pid, leaving subprocesses alone");
            return 0;
        }
    };
    let mut sys = System::new();
    sys.refresh_processes();

    let mut signalled = 0;
    for child in descendants(&sys, pid) {
        let Some(process) = sys.process(child) else {
            continue;
        };
        match process.kill_with(Signal::Term) {
            Some(true) => signalled += 1,
            Some(false) => tracing::warn!(pid = %child, "failed to terminate subprocess"),
            None => tracing::warn!(pid = %child, "SIGTERM unsupported on this platform"),
        }
    }
    if signalled > 0 {
        tracing::info!(count = signalled, "terminated subprocesses");
    }
    signalled
}

/// Every process below `root`, parents before children
fn descendants(sys: &System, root: Pid) -> Vec<Pid> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (pid, process) in sys.processes() {
            if process.parent() == Some(parent)
                && *pid != root
                && !is_own_thread(*pid)
                && !found.contains(pid)
            {
                found.push(*pid);
                frontier.push(*pid);
            }
        }
    }
    found
}

/// Linux lists threads as processes parented to their owner; signalling
/// one of ours would signal this process.
fn is_own_thread(pid: Pid) -> bool {
    cfg!(target_os = "linux") && Path::new("/proc/self/task").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_descendants_include_spawned_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let mut sys = System::new();
        sys.refresh_processes();

        let me = sysinfo::get_current_pid().unwrap();
        let found = descendants(&sys, me);
        assert!(found.contains(&Pid::from_u32(child.id())));
        assert!(!found.contains(&me));

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_own_threads_excluded() {
        let (tx, rx) = std::sync::mpsc::channel();
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let tid = std::fs::read_link("/proc/thread-self")
                .ok()
                .and_then(|p| p.file_name()?.to_str()?.parse::<u32>().ok());
            tx.send(tid).unwrap();
            wait.recv().ok();
        });
        if let Some(tid) = rx.recv().unwrap() {
            assert!(is_own_thread(Pid::from_u32(tid)));
            let mut sys = System::new();
            sys.refresh_processes();
            let found = descendants(&sys, sysinfo::get_current_pid().unwrap());
            assert!(!found.contains(&Pid::from_u32(tid)));
        }
        release.send(()).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_terminate_subprocesses() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        assert!(terminate_subprocesses() >= 1);
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
