//! Linux ABI values that show up in kernel trace payloads.
//!
//! These describe the traced kernel, not the host running the analysis, so
//! they are spelled out here instead of taken from the host libc.

/// `O_CLOEXEC` open flag.
pub const O_CLOEXEC: i64 = 0o2000000;

pub const AF_UNIX: i64 = 1;
pub const AF_INET: i64 = 2;
pub const AF_INET6: i64 = 10;

/// Socket families whose FDs are network endpoints.
pub const INET_FAMILIES: [i64; 2] = [AF_INET, AF_INET6];

/// Socket families treated like files.
pub const DISK_FAMILIES: [i64; 1] = [AF_UNIX];

/// `fcntl` commands that duplicate a descriptor.
pub const F_DUPFD: i64 = 0;
pub const F_DUPFD_CLOEXEC: i64 = 1030;

/// Returned by a non-blocking `connect` that is still in progress.
pub const EINPROGRESS: i64 = 115;

/// Logical sector size in bytes, according to the kernel.
pub const SECTOR_SIZE: u64 = 512;

pub fn has_cloexec(flags: i64) -> bool {
    flags & O_CLOEXEC == O_CLOEXEC
}
