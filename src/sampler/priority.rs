//! Scheduling-priority elevation for the sampling thread and process
//!
//! Elevation to the real-time class is deliberately fail-fast: silently
//! degrading to ordinary scheduling would produce jitter numbers that look
//! valid but measure the wrong thing. Process-wide priority is environment
//! mutation and is therefore scoped: captured on apply, restored on drop.

use std::io::{self, Error, ErrorKind};

use crate::sampler::config::{ProcessPriority, ThreadPriority};

/// Elevate the calling thread to the requested level.
///
/// `TimeCritical` requests the host's real-time scheduling class and fails
/// hard when it cannot be granted; every lower level is a best-effort hint.
pub fn elevate_current_thread(priority: ThreadPriority) -> io::Result<()> {
    #[cfg(unix)]
    {
        elevate_current_thread_unix(priority)
    }
    #[cfg(windows)]
    {
        elevate_current_thread_windows(priority)
    }
}

#[cfg(unix)]
fn elevate_current_thread_unix(priority: ThreadPriority) -> io::Result<()> {
    match priority {
        ThreadPriority::TimeCritical => {
            let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
            if max == -1 {
                return Err(Error::last_os_error());
            }
            let param = libc::sched_param {
                sched_priority: max,
            };
            let rc = unsafe {
                libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
            };
            if rc != 0 {
                let err = Error::from_raw_os_error(rc);
                return Err(Error::new(
                    ErrorKind::PermissionDenied,
                    format!("failed to enter SCHED_FIFO at priority {max}: {err}"),
                ));
            }
            Ok(())
        }
        other => {
            // Nice hints under the default policy, like QThread on Linux.
            // Raising priority without privilege fails with EPERM; that is
            // not a reason to refuse the run.
            let nice = match other {
                ThreadPriority::Idle => 19,
                ThreadPriority::Lowest => 10,
                ThreadPriority::Low => 5,
                ThreadPriority::Normal => 0,
                ThreadPriority::High => -5,
                ThreadPriority::Highest => -10,
                ThreadPriority::TimeCritical => unreachable!(),
            };
            if nice != 0 {
                unsafe {
                    libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                }
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
fn elevate_current_thread_windows(priority: ThreadPriority) -> io::Result<()> {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_ABOVE_NORMAL,
        THREAD_PRIORITY_BELOW_NORMAL, THREAD_PRIORITY_HIGHEST, THREAD_PRIORITY_IDLE,
        THREAD_PRIORITY_LOWEST, THREAD_PRIORITY_NORMAL, THREAD_PRIORITY_TIME_CRITICAL,
    };

    let level = match priority {
        ThreadPriority::Idle => THREAD_PRIORITY_IDLE,
        ThreadPriority::Lowest => THREAD_PRIORITY_LOWEST,
        ThreadPriority::Low => THREAD_PRIORITY_BELOW_NORMAL,
        ThreadPriority::Normal => THREAD_PRIORITY_NORMAL,
        ThreadPriority::High => THREAD_PRIORITY_ABOVE_NORMAL,
        ThreadPriority::Highest => THREAD_PRIORITY_HIGHEST,
        ThreadPriority::TimeCritical => THREAD_PRIORITY_TIME_CRITICAL,
    };
    let ok = unsafe { SetThreadPriority(GetCurrentThread(), level) };
    if ok == 0 && priority == ThreadPriority::TimeCritical {
        return Err(Error::new(
            ErrorKind::PermissionDenied,
            format!(
                "failed to set time-critical thread priority: {}",
                Error::last_os_error()
            ),
        ));
    }
    Ok(())
}

/// Process priority applied for the duration of a run and restored on drop.
pub struct ProcessPriorityGuard {
    #[cfg(unix)]
    previous_nice: libc::c_int,
    #[cfg(windows)]
    previous_class: u32,
}

impl ProcessPriorityGuard {
    /// Capture the current process priority and apply the requested class.
    /// Failure leaves the process untouched; callers treat it as a warning,
    /// not a fatal condition.
    pub fn apply(priority: ProcessPriority) -> io::Result<Self> {
        #[cfg(unix)]
        {
            // -1 is both a valid nice value and the error return; the
            // ambiguity is harmless here since restoring nice -1 is a no-op
            // for an unprivileged process.
            let previous_nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, 0) };
            let nice = match priority {
                ProcessPriority::Idle => 19,
                ProcessPriority::Normal => 0,
                ProcessPriority::High => -10,
                ProcessPriority::Realtime => -20,
            };
            let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
            if rc == -1 {
                return Err(Error::new(
                    ErrorKind::PermissionDenied,
                    format!(
                        "failed to set process nice {nice}: {}",
                        Error::last_os_error()
                    ),
                ));
            }
            Ok(Self { previous_nice })
        }
        #[cfg(windows)]
        {
            use windows_sys::Win32::System::Threading::{
                GetCurrentProcess, GetPriorityClass, SetPriorityClass, HIGH_PRIORITY_CLASS,
                IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, REALTIME_PRIORITY_CLASS,
            };

            let previous_class = unsafe { GetPriorityClass(GetCurrentProcess()) };
            let class = match priority {
                ProcessPriority::Idle => IDLE_PRIORITY_CLASS,
                ProcessPriority::Normal => NORMAL_PRIORITY_CLASS,
                ProcessPriority::High => HIGH_PRIORITY_CLASS,
                ProcessPriority::Realtime => REALTIME_PRIORITY_CLASS,
            };
            let ok = unsafe { SetPriorityClass(GetCurrentProcess(), class) };
            if ok == 0 {
                return Err(Error::new(
                    ErrorKind::PermissionDenied,
                    format!(
                        "failed to set process priority class: {}",
                        Error::last_os_error()
                    ),
                ));
            }
            Ok(Self { previous_class })
        }
    }
}

impl Drop for ProcessPriorityGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::setpriority(libc::PRIO_PROCESS, 0, self.previous_nice);
        }
        #[cfg(windows)]
        unsafe {
            use windows_sys::Win32::System::Threading::{GetCurrentProcess, SetPriorityClass};
            SetPriorityClass(GetCurrentProcess(), self.previous_class);
        }
    }
}

/// Lock current and future pages in RAM so paging cannot add latency.
/// Best effort: the caller reports a failure and carries on.
pub fn lock_memory() -> io::Result<()> {
    #[cfg(unix)]
    {
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if rc != 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
    #[cfg(windows)]
    {
        Ok(())
    }
}

/// Scoped Windows timer-resolution raise for short sleep periods. The
/// kernel's default timer granularity makes sub-10 ms sleeps unusable for
/// jitter measurement without this.
#[cfg(windows)]
pub struct TimerResolutionGuard {
    desired_100ns: u32,
}

#[cfg(windows)]
impl TimerResolutionGuard {
    pub fn raise(period_millis: u64) -> Option<Self> {
        use windows::Wdk::System::SystemInformation::NtSetTimerResolution;
        use windows::Win32::Foundation::BOOLEAN;

        if period_millis == 0 || period_millis >= 10 {
            return None;
        }
        let desired_100ns = (period_millis * 10_000) as u32;
        let mut actual = 0u32;
        let status = unsafe { NtSetTimerResolution(desired_100ns, BOOLEAN(1), &mut actual) };
        if status.is_ok() {
            Some(Self { desired_100ns })
        } else {
            None
        }
    }
}

#[cfg(windows)]
impl Drop for TimerResolutionGuard {
    fn drop(&mut self) {
        use windows::Wdk::System::SystemInformation::NtSetTimerResolution;
        use windows::Win32::Foundation::BOOLEAN;

        let mut actual = 0u32;
        unsafe {
            NtSetTimerResolution(self.desired_100ns, BOOLEAN(0), &mut actual);
        }
    }
}
