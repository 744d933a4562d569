//! Remote imports over HTTP(S)

use crate::error::{StrataError, StrataResult};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// File name a URL is stored under: its last non-empty path segment
pub fn url_file_name(url: &str) -> StrataResult<String> {
    let parsed = Url::parse(url).map_err(|e| StrataError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| StrataError::Download {
            url: url.to_string(),
            reason: "URL has no file name".to_string(),
        })
}

/// Download `url` into `dest_dir`, replacing any previous copy.
///
/// Blocking; the body is streamed to a temporary file which is renamed
/// over the destination only once complete.
pub fn download(url: &str, dest_dir: &Path) -> StrataResult<PathBuf> {
    let name = url_file_name(url)?;
    let dest = dest_dir.join(&name);
    let tmp = dest_dir.join(format!(".{}.{}.download", name, uuid::Uuid::new_v4()));

    info!("Downloading {}", url);
    let mut response = ureq::get(url).call().map_err(|e| StrataError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    let result = save_body(&mut response, url, &tmp, &dest);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map(|()| dest)
}

fn save_body(
    response: &mut ureq::http::Response<ureq::Body>,
    url: &str,
    tmp: &Path,
    dest: &Path,
) -> StrataResult<()> {
    let mut file =
        File::create(tmp).map_err(|e| StrataError::io(format!("creating {}", tmp.display()), e))?;
    let mut body = response.body_mut().as_reader();
    io::copy(&mut body, &mut file).map_err(|e| StrataError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    fs::rename(tmp, dest).map_err(|e| StrataError::io(format!("renaming into {}", dest.display()), e))
}
