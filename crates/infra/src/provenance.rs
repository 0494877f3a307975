//! Captures who is running the tool, once per run.

use std::env;

use ebssnap_core::Provenance;

/// Crate version stamped on every snapshot this build creates.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Provenance of the current process: version, host, login name and ids.
pub fn current() -> Provenance {
    Provenance {
        version: VERSION.to_string(),
        host: hostname().unwrap_or_else(|| "unknown".to_string()),
        user: login_name().unwrap_or_else(|| "unknown".to_string()),
        uid: uid(),
        euid: euid(),
    }
}

fn login_name() -> Option<String> {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .iter()
        .find_map(|key| env::var(key).ok().filter(|v| !v.is_empty()))
        .or_else(passwd_name)
}

#[cfg(unix)]
fn uid() -> u32 {
    // SAFETY: getuid never fails and has no preconditions.
    unsafe { libc::getuid() }
}

#[cfg(unix)]
fn euid() -> u32 {
    // SAFETY: geteuid never fails and has no preconditions.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn uid() -> u32 {
    0
}

#[cfg(not(unix))]
fn euid() -> u32 {
    0
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).into_owned();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    env::var("COMPUTERNAME").ok()
}

#[cfg(unix)]
fn passwd_name() -> Option<String> {
    use std::ffi::CStr;
    use std::mem::MaybeUninit;

    let mut pwd = MaybeUninit::<libc::passwd>::uninit();
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; 4096];

    // SAFETY: every pointer refers to storage that outlives the call; on
    // success `result` points at `pwd`, whose strings live in `buf`.
    let rc = unsafe {
        libc::getpwuid_r(uid(), pwd.as_mut_ptr(), buf.as_mut_ptr(), buf.len(), &mut result)
    };
    if rc != 0 || result.is_null() {
        return None;
    }
    // SAFETY: getpwuid_r succeeded, so pw_name is a valid C string in `buf`.
    let name = unsafe { CStr::from_ptr((*result).pw_name) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn passwd_name() -> Option<String> {
    None
}
