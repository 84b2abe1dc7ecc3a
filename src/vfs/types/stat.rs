/*!
 * Stat Record
 * Handle-level `fstat` result
 */

use super::{FileType, Permissions};
use serde::{Deserialize, Serialize};

/// Subset of `struct stat` filled by handle-based filesystems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub st_dev: u64,
    pub st_ino: u64,
    pub st_mode: u32,
    pub st_nlink: u64,
    pub st_size: i64,
    pub st_blksize: u64,
}

impl Stat {
    #[inline]
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.st_mode)
    }

    #[inline]
    pub fn permissions(&self) -> Permissions {
        Permissions::from_mode(self.st_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::libc;

    #[test]
    fn test_mode_split() {
        let stat = Stat {
            st_mode: libc::S_IFSOCK | 0o755,
            ..Stat::default()
        };
        assert_eq!(stat.file_type(), FileType::Socket);
        assert_eq!(stat.permissions(), Permissions::new(0o755));
    }
}
