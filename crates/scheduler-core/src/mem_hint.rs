//! Advisory OS-memory release hint.
//!
//! Purely advisory: a task or batch runner calls this once after it
//! deregisters its task(s), to ask the allocator to return freed pages to
//! the OS. Absence (or failure) of this call never affects correctness.

/// Best-effort hint to the allocator to release freed memory back to the OS.
///
/// On Linux, calls `malloc_trim(0)` via libc. On every other platform this
/// is a no-op: there is no portable equivalent, and the hint is advisory.
pub(crate) fn release_os_memory() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: `malloc_trim` with a pad of 0 is always safe to call; it
        // only ever frees memory the allocator considers unused.
        #[allow(unsafe_code)]
        unsafe {
            libc::malloc_trim(0);
        }
    }
}
