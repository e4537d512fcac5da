//! Directory → tar stream.

use std::collections::BTreeSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use mbl_core::error::{MblError, Result};

use super::{path_error, ArchiveStream};
use crate::pipe::CHUNK_SIZE;

/// Entry names excluded from a build context.
///
/// A path is ignored when its final component, or the whole relative path,
/// equals one of the patterns. Ignored directories are not descended into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: BTreeSet<String>,
}

impl IgnoreList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .map(|p: String| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, relative: &Path) -> bool {
        let name_matches = relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.patterns.contains(n));
        name_matches
            || relative
                .to_str()
                .is_some_and(|p| self.patterns.contains(p))
    }

    /// Predicate form accepted by [`pack`].
    pub fn into_predicate(self) -> impl Fn(&Path) -> bool + Send + 'static {
        move |path: &Path| self.matches(path)
    }
}

/// Pack `root` into a tar stream.
///
/// Entries are emitted in sorted order, directories before their contents.
/// Symlinks are archived as links. Any read failure aborts the archive.
pub fn pack<P>(root: &Path, ignore: P) -> Result<ArchiveStream>
where
    P: Fn(&Path) -> bool + Send + 'static,
{
    if !root.exists() {
        return Err(MblError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(MblError::InvalidSource(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let root = root.to_path_buf();
    Ok(ArchiveStream::spawn_blocking(move |writer| {
        let mut builder = tar::Builder::new(BufWriter::with_capacity(CHUNK_SIZE, writer));
        builder.follow_symlinks(false);

        append_tree(&mut builder, &root, &root, &ignore)?;

        let mut out = builder
            .into_inner()
            .map_err(|e| path_error(&root, e))?;
        out.flush()?;
        tracing::debug!(root = %root.display(), "Build context packed");
        Ok(())
    }))
}

fn append_tree<W, P>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
    ignore: &P,
) -> Result<()>
where
    W: Write,
    P: Fn(&Path) -> bool,
{
    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| path_error(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<PathBuf>>>()
        .map_err(|e| path_error(dir, e))?;
    entries.sort();

    for path in entries {
        let relative = path
            .strip_prefix(root)
            .map_err(|e| MblError::Other(format!("{}: {}", path.display(), e)))?;

        if ignore(relative) {
            tracing::trace!(path = %relative.display(), "Ignoring entry");
            continue;
        }

        let file_type = std::fs::symlink_metadata(&path)
            .map_err(|e| path_error(&path, e))?
            .file_type();

        if file_type.is_dir() {
            builder
                .append_dir(relative, &path)
                .map_err(|e| path_error(&path, e))?;
            append_tree(builder, root, &path, ignore)?;
        } else {
            builder
                .append_path_with_name(&path, relative)
                .map_err(|e| path_error(&path, e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_ignore_list_matches_name_and_path() {
        let ignore = IgnoreList::new([".git", "build/out"]);
        assert!(ignore.matches(Path::new(".git")));
        assert!(ignore.matches(Path::new("vendor/lib/.git")));
        assert!(ignore.matches(Path::new("build/out")));
        assert!(!ignore.matches(Path::new("build")));
        assert!(!ignore.matches(Path::new(".gitignore")));
    }

    #[test]
    fn test_ignore_list_trims_slashes() {
        let ignore = IgnoreList::new(["node_modules/", ""]);
        assert!(ignore.matches(Path::new("node_modules")));
        assert!(!ignore.matches(Path::new("src")));
    }

    #[tokio::test]
    async fn test_pack_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.c"), "int main;").unwrap();
        fs::write(dir.path().join("app.js"), "//").unwrap();

        let ignore = IgnoreList::new([".git"]).into_predicate();
        let bytes = pack(dir.path(), ignore).unwrap().into_bytes().await.unwrap();

        assert_eq!(
            entry_names(&bytes),
            vec!["Dockerfile", "app.js", "src", "src/main.c"]
        );
    }

    #[tokio::test]
    async fn test_pack_preserves_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("data.bin"), [0u8, 1, 2, 255]).unwrap();

        let bytes = pack(dir.path(), |_: &Path| false)
            .unwrap()
            .into_bytes()
            .await
            .unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let mut entry = archive.entries().unwrap().next().unwrap().unwrap();
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut content).unwrap();
        assert_eq!(content, vec![0u8, 1, 2, 255]);
        assert_eq!(entry.header().size().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_pack_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = pack(&dir.path().join("absent"), |_: &Path| false);
        assert!(matches!(result, Err(MblError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pack_file_source() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("Dockerfile");
        fs::write(&file, "FROM alpine").unwrap();
        let result = pack(&file, |_: &Path| false);
        assert!(matches!(result, Err(MblError::InvalidSource(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pack_unarchivable_entry_aborts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.bin"), vec![1u8; 300 * 1024]).unwrap();
        let socket = dir.path().join("zz.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

        let result = pack(dir.path(), |_: &Path| false)
            .unwrap()
            .into_bytes()
            .await;
        let err = match result {
            Err(MblError::IoError(err)) => err,
            other => panic!("expected an I/O error, got {other:?}"),
        };
        let message = err.to_string();
        assert_eq!(message.matches(&socket.display().to_string()).count(), 1, "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pack_keeps_symlinks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real"), "x").unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("link")).unwrap();

        let bytes = pack(dir.path(), |_: &Path| false)
            .unwrap()
            .into_bytes()
            .await
            .unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let link = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap() == Path::new("link"))
            .unwrap();
        assert_eq!(link.header().entry_type(), tar::EntryType::Symlink);
    }
}
