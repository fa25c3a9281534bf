use std::fs::{File, OpenOptions};

use crate::core::error::{Error, ErrorKind, Result};
use crate::kvs::layout::ShardLayout;

/// Single-writer guarantee over a shard directory: an advisory `flock` on
/// a sentinel `.lock` file, released on drop.
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn acquire(layout: &ShardLayout) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).open(layout.lock_path())?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                return Err(Error::new(ErrorKind::StorageIO, "shard directory is locked by another process"));
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
