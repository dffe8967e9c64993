//! Filesystem helpers: directory sizing, free-space probing, backup copy.

use std::fs;
use std::path::Path;

use crate::Result;

/// Recursive size of a directory in bytes.
pub fn dir_size(path: &Path) -> u64 {
    fs_extra::dir::get_size(path).unwrap_or(0)
}

/// Free bytes on the filesystem holding `path`.
pub fn available_disk_space(path: &Path) -> u64 {
    fs2::available_space(path).unwrap_or(0)
}

/// Copies the contents of `src` into `dst`, skipping names in `exclude`.
///
/// `dst` is created if needed. Only one directory level below `src` is
/// name-filtered; nested directories are copied whole.
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    fs::create_dir_all(dst)?;

    let mut dir_options = fs_extra::dir::CopyOptions::new();
    dir_options.overwrite = true;
    dir_options.content_only = true;
    let mut file_options = fs_extra::file::CopyOptions::new();
    file_options.overwrite = true;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|ex| name.as_os_str() == *ex) {
            continue;
        }
        let target = dst.join(&name);
        let copied = if entry.file_type()?.is_dir() {
            fs::create_dir_all(&target)?;
            fs_extra::dir::copy(entry.path(), &target, &dir_options)
        } else {
            fs_extra::file::copy(entry.path(), &target, &file_options)
        };
        copied.map_err(std::io::Error::other)?;
    }
    Ok(())
}
