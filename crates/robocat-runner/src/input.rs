//! Writes files sent by the client into the flow's input directory.

use std::path::{Component, Path, PathBuf};

use robocat_core::FlowFile;

use crate::error::RunnerError;

/// Resolve `relative` inside `input_dir`.
///
/// # Errors
/// Returns error for empty, absolute or escaping paths.
pub fn input_path(input_dir: &Path, relative: &str) -> Result<PathBuf, RunnerError> {
    if relative.trim().is_empty() {
        return Err(RunnerError::EmptyInputPath);
    }

    let path = Path::new(relative);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(RunnerError::InvalidInputPath(relative.to_string()));
    }

    Ok(input_dir.join(path))
}

/// Write `file` under `input_dir`, creating parent directories.
///
/// # Errors
/// Returns error if the path is rejected or the write fails.
pub async fn write_input(input_dir: &Path, file: &FlowFile) -> Result<PathBuf, RunnerError> {
    let target = input_path(input_dir, &file.path)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, &file.payload).await?;

    tracing::debug!(path = %target.display(), bytes = file.payload.len(), "Wrote input file");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_paths() {
        let dir = Path::new("/flow/input");
        assert!(matches!(input_path(dir, ""), Err(RunnerError::EmptyInputPath)));
        assert!(matches!(input_path(dir, "  "), Err(RunnerError::EmptyInputPath)));
        for bad in ["/etc/passwd", "../secret", "a/../../b"] {
            assert!(
                matches!(input_path(dir, bad), Err(RunnerError::InvalidInputPath(_))),
                "{bad} accepted"
            );
        }
        assert_eq!(
            input_path(dir, "./a/b.txt").unwrap(),
            Path::new("/flow/input/a/b.txt")
        );
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let file = FlowFile::new("nested/data.csv", "text/csv", b"a,b\n".to_vec());

        let target = write_input(dir.path(), &file).await.unwrap();
        assert_eq!(target, dir.path().join("nested/data.csv"));
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"a,b\n");
    }
}
