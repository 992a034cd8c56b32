mod perms;
mod runtime;
mod unzip;

pub use perms::{normalize_permissions, set_mode, PermissionReport};
pub use runtime::RuntimeInstaller;
pub use unzip::{extract_reader, normalize_entry_path, unzip_into, ExtractStats};
