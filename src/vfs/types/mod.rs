/*!
 * VFS Types
 * Records shared by filesystem implementations
 */

mod file_type;
mod permissions;
mod stat;

pub use file_type::FileType;
pub use permissions::Permissions;
pub use stat::Stat;
