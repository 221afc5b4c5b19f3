//! Shell scripts that replay the remote namespace's directories and permissions.
//!
//! Written as a side output of the backup walk: `hdfs-mkdirs.sh` recreates
//! every visited directory and `hdfs-chmods.sh` restores ownership and mode of
//! every visited directory and retained file. Nothing in the engine reads them.

use crate::error::{EngineError, Result};
use crate::model::{RemoteEntryStat, RemotePath};
use crate::walker::WalkVisitor;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const MKDIRS_SCRIPT: &str = "hdfs-mkdirs.sh";
pub const CHMODS_SCRIPT: &str = "hdfs-chmods.sh";

const MKDIRS_HEADER: &[&str] = &["hadoop fs -mkdir /mapred", "hadoop fs -mkdir /mapred/system"];

const CHMODS_HEADER: &[&str] = &[
    "hadoop fs -chmod 775 /",
    "hadoop fs -chown hdfs:hadoop /",
    "hadoop fs -chown mapred:hadoop /mapred/system",
    "hadoop fs -chmod 700 /mapred/system",
];

/// Quote a path for `sh` unless it is made of plainly safe characters.
fn shell_quote(s: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "/._-+=:@,%".contains(c);
    if !s.is_empty() && s.chars().all(safe) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

pub struct PermissionScripts<W: Write> {
    mkdirs: W,
    chmods: W,
    error: Option<io::Error>,
}

impl PermissionScripts<BufWriter<File>> {
    /// Create both scripts in `dir`, truncating earlier ones.
    pub fn create(dir: &Path) -> Result<Self> {
        let open = |name: &str| {
            let path = dir.join(name);
            File::create(&path)
                .map(BufWriter::new)
                .map_err(|source| EngineError::LocalIo { path, source })
        };
        let mkdirs = open(MKDIRS_SCRIPT)?;
        let chmods = open(CHMODS_SCRIPT)?;
        PermissionScripts::new(mkdirs, chmods).map_err(|source| EngineError::LocalIo {
            path: dir.to_path_buf(),
            source,
        })
    }
}

impl<W: Write> PermissionScripts<W> {
    pub fn new(mut mkdirs: W, mut chmods: W) -> io::Result<Self> {
        for line in MKDIRS_HEADER {
            writeln!(mkdirs, "{}", line)?;
        }
        for line in CHMODS_HEADER {
            writeln!(chmods, "{}", line)?;
        }
        Ok(PermissionScripts {
            mkdirs,
            chmods,
            error: None,
        })
    }

    fn record(&mut self, result: io::Result<()>) {
        if let Err(e) = result {
            if self.error.is_none() {
                tracing::error!("failed to write permission scripts: {}", e);
                self.error = Some(e);
            }
        }
    }

    fn write_ownership(&mut self, path: &RemotePath, stat: &RemoteEntryStat) -> io::Result<()> {
        let quoted = shell_quote(path.as_str());
        writeln!(
            self.chmods,
            "hadoop fs -chown {}:{} {}",
            stat.owner, stat.group, quoted
        )?;
        writeln!(self.chmods, "hadoop fs -chmod {} {}", stat.permission_octal(), quoted)
    }

    /// Flush both scripts, surfacing the first write error seen during the walk.
    pub fn finish(mut self) -> io::Result<(W, W)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.mkdirs.flush()?;
        self.chmods.flush()?;
        Ok((self.mkdirs, self.chmods))
    }
}

impl<W: Write> WalkVisitor for PermissionScripts<W> {
    fn on_directory(&mut self, path: &RemotePath, stat: &RemoteEntryStat) {
        if self.error.is_some() {
            return;
        }
        let result = if path.is_root() {
            Ok(())
        } else {
            writeln!(self.mkdirs, "hadoop fs -mkdir {}", shell_quote(path.as_str()))
        };
        let result = result.and_then(|_| self.write_ownership(path, stat));
        self.record(result);
    }

    fn on_file(&mut self, path: &RemotePath, stat: &RemoteEntryStat) {
        if self.error.is_some() {
            return;
        }
        let result = self.write_ownership(path, stat);
        self.record(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(owner: &str, permission: u16, is_dir: bool) -> RemoteEntryStat {
        RemoteEntryStat {
            size: 0,
            owner: owner.to_string(),
            group: "hadoop".to_string(),
            permission,
            modification_time_ms: 0,
            block_size: 0,
            is_dir,
        }
    }

    #[test]
    fn test_scripts_record_dirs_and_files() {
        let mut scripts = PermissionScripts::new(Vec::new(), Vec::new()).expect("headers");
        scripts.on_directory(&RemotePath::root(), &stat("hdfs", 0o755, true));
        scripts.on_directory(&RemotePath::new("/data"), &stat("etl", 0o750, true));
        scripts.on_file(&RemotePath::new("/data/a"), &stat("etl", 0o640, false));

        let (mkdirs, chmods) = scripts.finish().expect("finish");
        let mkdirs = String::from_utf8(mkdirs).expect("utf8");
        let chmods = String::from_utf8(chmods).expect("utf8");

        assert!(mkdirs.starts_with("hadoop fs -mkdir /mapred\n"));
        assert!(mkdirs.contains("hadoop fs -mkdir /data\n"));
        assert!(!mkdirs.contains("hadoop fs -mkdir /\n"));

        assert!(chmods.contains("hadoop fs -chown hdfs:hadoop /\n"));
        assert!(chmods.contains("hadoop fs -chmod 750 /data\n"));
        assert!(chmods.contains("hadoop fs -chown etl:hadoop /data/a\n"));
        assert!(chmods.contains("hadoop fs -chmod 640 /data/a\n"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/a_b-1.txt"), "/data/a_b-1.txt");
        assert_eq!(shell_quote("/data/a b"), "'/data/a b'");
        assert_eq!(shell_quote("/it's"), r"'/it'\''s'");
    }

    #[test]
    fn test_create_writes_both_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let scripts = PermissionScripts::create(temp_dir.path()).expect("create");
        scripts.finish().expect("finish");

        let chmods = std::fs::read_to_string(temp_dir.path().join(CHMODS_SCRIPT)).expect("read");
        assert!(chmods.starts_with("hadoop fs -chmod 775 /\n"));
        assert!(temp_dir.path().join(MKDIRS_SCRIPT).exists());
    }
}
