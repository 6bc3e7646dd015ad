//! Process-level runtime probes, sampled on the stats tick.
//!
//! Linux values come from procfs; other platforms report zero.

use anyhow::Result;

const BYTES_IN_MEGABYTE: i64 = 1_048_576;

/// Hostname used in the relay's own metric paths, resolved once at startup.
pub fn hostname() -> Result<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        anyhow::bail!("gethostname failed: {}", std::io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Resident set size in whole megabytes.
#[cfg(target_os = "linux")]
pub fn resident_memory_megabytes() -> i64 {
    let statm = match std::fs::read_to_string("/proc/self/statm") {
        Ok(text) => text,
        Err(_) => return 0,
    };
    let resident_pages: i64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse().ok())
        .unwrap_or(0);
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    resident_pages * page_size as i64 / BYTES_IN_MEGABYTE
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory_megabytes() -> i64 {
    0
}

/// Live OS threads in this process.
#[cfg(target_os = "linux")]
pub fn live_threads() -> i64 {
    match std::fs::read_dir("/proc/self/task") {
        Ok(entries) => entries.count() as i64,
        Err(_) => 0,
    }
}

#[cfg(not(target_os = "linux"))]
pub fn live_threads() -> i64 {
    0
}
