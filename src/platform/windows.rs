use std::os::windows::process::CommandExt;
use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn restrict_dir_permissions(_path: &Path) {}

    fn restrict_file_permissions(_path: &Path) {}

    fn detach(cmd: &mut std::process::Command) {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    fn data_dir() -> PathBuf {
        resolve_data_dir(
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("newsrunner"),
        )
    }
}
