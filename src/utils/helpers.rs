//! Utility functions and helpers for the jitter benchmark
//!
//! Interactive console prompts and the privilege check used before a run.

use std::io;

#[cfg(windows)]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(windows)]
use std::sync::Once;

/// Interactive prompt for configuration values. Returns `None` when the
/// user keeps the current value.
pub fn prompt(description: &str, current: &str) -> io::Result<Option<String>> {
    let mut input = String::new();
    println!("▸ {}: {} (press Enter to keep)", description, current);
    io::stdin().read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Whether the process has the privilege needed for real-time scheduling:
/// an elevated token on Windows, effective uid 0 elsewhere.
#[cfg(unix)]
pub fn is_admin() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
static IS_ADMIN: AtomicBool = AtomicBool::new(false);
#[cfg(windows)]
static INIT: Once = Once::new();

#[cfg(windows)]
pub fn is_admin() -> bool {
    use std::mem::{self, size_of};
    use std::ptr;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    INIT.call_once(|| unsafe {
        let mut token: HANDLE = ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) != 0 {
            let mut elevation: TOKEN_ELEVATION = mem::zeroed();
            let mut size = size_of::<TOKEN_ELEVATION>() as u32;

            if GetTokenInformation(
                token,
                TokenElevation,
                &mut elevation as *mut _ as *mut std::ffi::c_void,
                size,
                &mut size,
            ) != 0
                && elevation.TokenIsElevated != 0
            {
                IS_ADMIN.store(true, Ordering::Relaxed);
            }
            windows_sys::Win32::Foundation::CloseHandle(token);
        }
    });

    IS_ADMIN.load(Ordering::Relaxed)
}
