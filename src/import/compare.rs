//! Content comparison between a source entry and its cached copy

use crate::error::{StrataError, StrataResult};
use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Returns `true` if the two entries differ.
///
/// Entries must share a base name. Symlinks are compared by target and
/// never followed. Regular files of different size differ without being
/// read; otherwise the content is compared chunk by chunk.
pub fn files_differ(
    path_a: &Path,
    meta_a: &Metadata,
    path_b: &Path,
    meta_b: &Metadata,
) -> StrataResult<bool> {
    if path_a.file_name() != path_b.file_name() {
        return Err(StrataError::NameMismatch {
            left: path_a.to_path_buf(),
            right: path_b.to_path_buf(),
        });
    }

    let a_is_link = meta_a.file_type().is_symlink();
    let b_is_link = meta_b.file_type().is_symlink();
    match (a_is_link, b_is_link) {
        (true, true) => {
            let target_a = read_link(path_a)?;
            let target_b = read_link(path_b)?;
            return Ok(target_a != target_b);
        }
        (true, false) | (false, true) => {
            return Err(StrataError::UnsupportedComparison {
                left: path_a.to_path_buf(),
                right: path_b.to_path_buf(),
            });
        }
        (false, false) => {}
    }

    if meta_a.len() != meta_b.len() {
        return Ok(true);
    }

    contents_differ(path_a, path_b)
}

fn read_link(path: &Path) -> StrataResult<std::path::PathBuf> {
    fs::read_link(path).map_err(|e| StrataError::io(format!("reading link {}", path.display()), e))
}

fn open(path: &Path) -> StrataResult<BufReader<File>> {
    File::open(path)
        .map(|f| BufReader::with_capacity(CHUNK_SIZE, f))
        .map_err(|e| StrataError::io(format!("opening {}", path.display()), e))
}

fn contents_differ(path_a: &Path, path_b: &Path) -> StrataResult<bool> {
    let mut a = open(path_a)?;
    let mut b = open(path_b)?;
    let mut buf_a = vec![0u8; CHUNK_SIZE];
    let mut buf_b = vec![0u8; CHUNK_SIZE];

    loop {
        let n = read_full(&mut a, &mut buf_a, path_a)?;
        let m = read_full(&mut b, &mut buf_b, path_b)?;
        if n != m || buf_a[..n] != buf_b[..m] {
            return Ok(true);
        }
        if n == 0 {
            return Ok(false);
        }
    }
}

/// Fill `buf` as far as the reader allows; short only at end of file
fn read_full(reader: &mut impl Read, buf: &mut [u8], path: &Path) -> StrataResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StrataError::io(format!("reading {}", path.display()), e)),
        }
    }
    Ok(filled)
}
