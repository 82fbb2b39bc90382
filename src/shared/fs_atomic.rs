use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes `content` to `path` by staging it in a sibling temp file and
/// renaming it into place. The rename is atomic on the same filesystem, so
/// readers always observe either the old file or the new one in full.
///
/// `mode` is applied to the temp file before the rename (and is a no-op on
/// non-unix targets).
pub fn atomic_write_file(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|v| v.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_name = format!(".{file_name}.tmp-{}-{}", std::process::id(), now_nanos());
    let tmp_path = parent.join(tmp_name);

    let write_result = (|| -> io::Result<()> {
        {
            let mut file = fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            io::Write::write_all(&mut file, content)?;
            file.sync_all()?;
        }
        set_mode(&tmp_path, mode)?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    // cover pre-existing targets: rename keeps the destination's prior mode bits
    // on some platforms, so re-assert the permission explicitly post-rename.
    set_mode(path, mode)?;
    sync_parent_dir(parent)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(parent: &Path) -> io::Result<()> {
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_parent: &Path) -> io::Result<()> {
    Ok(())
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_file_and_sets_mode() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("creds.json");
        atomic_write_file(&path, b"{\"a\":1}", 0o600).expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"{\"a\":1}");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn overwrite_reasserts_mode_on_preexisting_target() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("creds.json");
        fs::write(&path, b"old").expect("seed");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).expect("chmod");
        }
        atomic_write_file(&path, b"new", 0o600).expect("write");
        assert_eq!(fs::read(&path).expect("read"), b"new");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn no_temp_file_left_behind_on_success() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("creds.json");
        atomic_write_file(&path, b"data", 0o600).expect("write");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
