use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::error::{SnapshotError, SnapshotResult};
use super::participant::HookStatus;

/// File name holding the state of participant `name`.
pub fn file_name_for(name: &str) -> String {
    format!("snapshot_{}.bin", name)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".tmp");
    PathBuf::from(staged)
}

/// Check that `target` itself can be opened for writing, without truncating
/// it. Returns whether the file was created by this call.
fn open_target(target: &Path) -> SnapshotResult<bool> {
    let open_err = |source: io::Error| SnapshotError::ChannelOpen {
        path: target.to_path_buf(),
        source,
    };
    match OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => OpenOptions::new()
            .write(true)
            .open(target)
            .map(|_| false)
            .map_err(open_err),
        Err(e) => Err(open_err(e)),
    }
}

/// Open `target` for writing and hand the sink to `hook`.
///
/// Bytes go to a staging file that replaces `target` only when the hook
/// completes. If `target` or the staging file cannot be opened the hook is
/// not invoked. On hook failure, or when the hook is not customized, the
/// staging file is discarded and the previous snapshot on disk is left as it
/// was.
pub fn record<F>(target: &Path, hook: F) -> SnapshotResult<HookStatus>
where
    F: FnOnce(&mut dyn Write) -> SnapshotResult<HookStatus>,
{
    let created = open_target(target)?;
    let staging = staging_path(target);
    let file = match File::create(&staging) {
        Ok(file) => file,
        Err(source) => {
            if created {
                let _ = fs::remove_file(target);
            }
            return Err(SnapshotError::ChannelOpen {
                path: staging,
                source,
            });
        }
    };

    let mut writer = BufWriter::new(file);
    let result = hook(&mut writer).and_then(|status| {
        if status == HookStatus::Completed {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            fs::rename(&staging, target)?;
        }
        Ok(status)
    });

    if !matches!(result, Ok(HookStatus::Completed)) {
        let _ = fs::remove_file(&staging);
        if created {
            let _ = fs::remove_file(target);
        }
    }
    result
}

/// Open `source` for reading and hand it to `hook`.
///
/// A participant that never recorded anything has no file. In that case the
/// hook is offered an empty source: if it reports `NotCustomized` so does
/// this call, otherwise the missing file is a channel-open failure.
pub fn restore<F>(source: &Path, hook: F) -> SnapshotResult<HookStatus>
where
    F: FnOnce(&mut dyn Read) -> SnapshotResult<HookStatus>,
{
    let file = match File::open(source) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return match hook(&mut io::empty()) {
                Ok(HookStatus::NotCustomized) => Ok(HookStatus::NotCustomized),
                _ => Err(SnapshotError::ChannelOpen {
                    path: source.to_path_buf(),
                    source: err,
                }),
            };
        }
        Err(err) => {
            return Err(SnapshotError::ChannelOpen {
                path: source.to_path_buf(),
                source: err,
            })
        }
    };
    let mut reader = BufReader::new(file);
    hook(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name() {
        assert_eq!(file_name_for("uart0"), "snapshot_uart0.bin");
    }

    #[test]
    fn test_completed_record_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(file_name_for("a"));
        fs::write(&target, b"old").unwrap();

        let status = record(&target, |w| {
            w.write_all(b"new")?;
            Ok(HookStatus::Completed)
        })
        .unwrap();

        assert_eq!(status, HookStatus::Completed);
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_failed_record_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(file_name_for("a"));
        fs::write(&target, b"old").unwrap();

        let result = record(&target, |w| {
            w.write_all(b"partial")?;
            Err(SnapshotError::hook("a", "device busy"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_not_customized_record_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(file_name_for("a"));

        let status = record(&target, |_| Ok(HookStatus::NotCustomized)).unwrap();

        assert_eq!(status, HookStatus::NotCustomized);
        assert!(!target.exists());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_record_open_failure_skips_hook() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing-dir").join(file_name_for("a"));

        let mut called = false;
        let err = record(&target, |_| {
            called = true;
            Ok(HookStatus::Completed)
        })
        .unwrap_err();

        assert!(!called);
        assert!(matches!(err, SnapshotError::ChannelOpen { .. }));
    }

    #[test]
    fn test_unopenable_target_skips_hook() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(file_name_for("a"));
        fs::create_dir(&target).unwrap();

        let mut called = false;
        let err = record(&target, |_| {
            called = true;
            Ok(HookStatus::Completed)
        })
        .unwrap_err();

        assert!(!called);
        assert!(matches!(err, SnapshotError::ChannelOpen { ref path, .. } if path == &target));
        assert!(target.is_dir());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_failed_first_record_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join(file_name_for("a"));

        let result = record(&target, |_| Err(SnapshotError::hook("a", "device busy")));

        assert!(result.is_err());
        assert!(!target.exists());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn test_restore_missing_source_of_default_hook() {
        let dir = tempfile::tempdir().unwrap();
        let status = restore(&dir.path().join("missing.bin"), |source| {
            let mut buf = Vec::new();
            source.read_to_end(&mut buf)?;
            assert!(buf.is_empty());
            Ok(HookStatus::NotCustomized)
        })
        .unwrap();
        assert_eq!(status, HookStatus::NotCustomized);
    }

    #[test]
    fn test_restore_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = restore(&dir.path().join("missing.bin"), |_| Ok(HookStatus::Completed))
            .unwrap_err();
        assert!(matches!(err, SnapshotError::ChannelOpen { .. }));
    }
}
