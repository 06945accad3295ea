//! Formats the server's "time" message. The wire scenario in the design
//! (S4) expects the classic 24-byte `ctime(3)` shape, so this reaches for
//! the real libc function on unix rather than reinventing a calendar.

#[cfg(unix)]
pub fn now_as_text() -> String {
    use std::ffi::CStr;

    // SAFETY: `time(NULL)` has no preconditions; `ctime` returns a pointer
    // to a statically-allocated buffer that's valid until the next call to
    // a member of the ctime/asctime/localtime family on this thread, which
    // we copy out of immediately.
    unsafe {
        let mut t: libc::time_t = 0;
        libc::time(&mut t);
        let ptr = libc::ctime(&t);
        if ptr.is_null() {
            return fallback();
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(not(unix))]
pub fn now_as_text() -> String {
    fallback()
}

fn fallback() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("unix-time {}\n", now.as_secs())
}
