//! Streaming single-entry rewrite of a tar archive.

use std::io::{BufWriter, Read, Write};
use std::path::Path;

use mbl_core::error::Result;

use super::ArchiveStream;
use crate::pipe::{self, CHUNK_SIZE};

/// Copy `input` to a new archive, replacing the content of the regular file
/// named exactly `match_name` with `rewrite(content)`.
///
/// Only the first matching entry is rewritten; every other entry keeps its
/// header and bytes. Entries are read and written one at a time, so memory
/// use is bounded by the rewritten entry, not the archive.
pub fn rewrite_entry<F>(input: ArchiveStream, match_name: &str, rewrite: F) -> ArchiveStream
where
    F: FnOnce(String) -> Result<String> + Send + 'static,
{
    let (body, upstream) = input.into_parts();
    let match_name = match_name.to_string();
    let reader = pipe::blocking_reader(body);

    ArchiveStream::spawn_blocking(move |writer| {
        let mut archive = tar::Archive::new(reader);
        let mut builder = tar::Builder::new(BufWriter::with_capacity(CHUNK_SIZE, writer));
        let mut rewrite = Some(rewrite);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let mut header = entry.header().clone();
            let path = entry.path()?.into_owned();
            let entry_type = header.entry_type();

            if entry_type.is_file() && path == Path::new(&match_name) {
                if let Some(rewrite) = rewrite.take() {
                    let mut content = String::new();
                    entry.read_to_string(&mut content)?;
                    let replaced = rewrite(content)?.into_bytes();

                    header.set_size(replaced.len() as u64);
                    builder.append_data(&mut header, &path, replaced.as_slice())?;
                    tracing::debug!(entry = %match_name, size = replaced.len(), "Rewrote archive entry");
                    continue;
                }
            }

            if entry_type.is_symlink() || entry_type.is_hard_link() {
                let target = entry.link_name()?.map(|t| t.into_owned()).unwrap_or_default();
                builder.append_link(&mut header, &path, &target)?;
            } else {
                builder.append_data(&mut header, &path, &mut entry)?;
            }
        }

        let mut out = builder.into_inner()?;
        out.flush()?;
        Ok(())
    })
    .chain(upstream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe;
    use mbl_core::error::MblError;

    fn archive_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(bytes);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().to_string();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    fn stream_of(bytes: Vec<u8>) -> ArchiveStream {
        ArchiveStream::from_stream(pipe::from_bytes(bytes))
    }

    #[tokio::test]
    async fn test_rewrites_matching_entry_only() {
        let input = archive_of(&[
            ("app.js", b"console.log(1)"),
            ("Dockerfile", b"FROM a\nRUN x\n"),
            ("sub/Dockerfile", b"untouched"),
        ]);

        let out = rewrite_entry(stream_of(input), "Dockerfile", |s| Ok(s.to_uppercase()))
            .into_bytes()
            .await
            .unwrap();

        let entries = read_entries(&out);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], ("app.js".to_string(), b"console.log(1)".to_vec()));
        assert_eq!(entries[1], ("Dockerfile".to_string(), b"FROM A\nRUN X\n".to_vec()));
        assert_eq!(entries[2], ("sub/Dockerfile".to_string(), b"untouched".to_vec()));
    }

    #[tokio::test]
    async fn test_rewrite_adjusts_size() {
        let input = archive_of(&[("Dockerfile", b"FROM a\n")]);
        let out = rewrite_entry(stream_of(input), "Dockerfile", |s| Ok(format!("{s}RUN more\n")))
            .into_bytes()
            .await
            .unwrap();

        let mut archive = tar::Archive::new(&out[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().size().unwrap(), "FROM a\nRUN more\n".len() as u64);
    }

    #[tokio::test]
    async fn test_no_match_copies_unchanged() {
        let input = archive_of(&[("a", b"1"), ("b", b"22")]);
        let out = rewrite_entry(stream_of(input.clone()), "Dockerfile", |_| {
            panic!("rewrite must not run")
        })
        .into_bytes()
        .await
        .unwrap();

        assert_eq!(read_entries(&out), read_entries(&input));
    }

    #[tokio::test]
    async fn test_rewrite_error_propagates() {
        let input = archive_of(&[("Dockerfile", b"FROM a\n")]);
        let err = rewrite_entry(stream_of(input), "Dockerfile", |_| {
            Err(MblError::ConfigError("no RUN".to_string()))
        })
        .into_bytes()
        .await
        .unwrap_err();

        assert!(matches!(err, MblError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_large_entry_streams_through() {
        let big = vec![42u8; 3 * CHUNK_SIZE + 17];
        let input = archive_of(&[("blob", &big), ("Dockerfile", b"FROM a\n")]);
        let out = rewrite_entry(stream_of(input), "Dockerfile", Ok)
            .into_bytes()
            .await
            .unwrap();

        let entries = read_entries(&out);
        assert_eq!(entries[0].1, big);
        assert_eq!(entries[1].1, b"FROM a\n");
    }
}
