//! Download of daily trip extracts.
//!
//! Extracts are published one gzip-compressed CSV per day under
//! `{base_url}/{YYYY-MM}/{YYYYMMDD}_Viajes_distritos.csv.gz`.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::types::compact_date;

/// URL of the published extract for `date`.
pub fn daily_extract_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/{}_Viajes_distritos.csv.gz",
        base_url.trim_end_matches('/'),
        date.format("%Y-%m"),
        date.format(compact_date::FORMAT)
    )
}

/// Local path the extract for `date` is stored under.
pub fn raw_extract_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!(
        "{}_Viajes_distritos.csv.gz",
        date.format(compact_date::FORMAT)
    ))
}

/// Streams `url` to `dest`. The body is written to a sibling `.part` file
/// and renamed on success, so `dest` only ever holds a complete download.
#[tracing::instrument(skip(client, dest), fields(dest = %dest.display()))]
pub async fn download_to_file<C: HttpClient>(client: &C, url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = dest.with_extension("part");

    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);
    let mut resp = client
        .execute(req)
        .await?
        .error_for_status()
        .with_context(|| format!("downloading {url}"))?;

    let mut file = tokio::fs::File::create(&partial).await?;
    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, dest).await?;
    debug!(bytes = written, "Download finished");
    Ok(written)
}

/// Downloads the extract for `date` into `dir` unless it is already there.
pub async fn ensure_extract<C: HttpClient>(
    client: &C,
    base_url: &str,
    dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf> {
    let path = raw_extract_path(dir, date);
    if tokio::fs::try_exists(&path).await? {
        debug!(date = %date, "Extract already on disk");
        return Ok(path);
    }

    let url = daily_extract_url(base_url, date);
    info!(date = %date, url = %url, "Downloading extract");
    download_to_file(client, &url, &path).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_extract_url() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(
            daily_extract_url("https://example.org/viajes/ficheros-diarios/", date),
            "https://example.org/viajes/ficheros-diarios/2025-03/20250305_Viajes_distritos.csv.gz"
        );
    }

    #[test]
    fn test_raw_extract_path() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        assert_eq!(
            raw_extract_path(Path::new("data"), date),
            Path::new("data").join("20250305_Viajes_distritos.csv.gz")
        );
    }

    #[tokio::test]
    async fn test_existing_extract_is_not_downloaded() {
        let dir = std::env::temp_dir().join("mobility_impact_test_fetch");
        let date = NaiveDate::from_ymd_opt(2025, 3, 5).unwrap();
        let path = raw_extract_path(&dir, date);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, b"cached").unwrap();

        // An unroutable base URL proves no request is made.
        let found = ensure_extract(&BasicClient::new(), "http://0.0.0.0:9", &dir, date)
            .await
            .unwrap();

        assert_eq!(found, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"cached");
        std::fs::remove_file(&path).unwrap();
    }
}
