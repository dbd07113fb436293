//! Per-year CSV download with skip-if-present semantics.
//!
//! A failed year is logged and skipped; the run continues with whatever
//! files already exist locally. A short pause between downloads keeps the
//! publisher happy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

const INTER_DOWNLOAD_PAUSE: Duration = Duration::from_secs(1);

/// Local file name for one published year.
pub fn yearly_file_name(year: i32) -> String {
    format!("transacoes_imobiliarias_{year}.csv")
}

/// Download every requested year into `dest_dir`, returning the paths of
/// the files present on disk afterwards (freshly downloaded or pre-existing).
pub async fn download_all(
    client: &reqwest::Client,
    urls: &BTreeMap<i32, String>,
    dest_dir: &Path,
    force: bool,
) -> Vec<PathBuf> {
    let mut present = Vec::new();
    let mut first = true;

    for (year, url) in urls {
        let dest = dest_dir.join(yearly_file_name(*year));

        if dest.exists() && !force {
            info!(year, path = %dest.display(), "already downloaded, skipping");
            present.push(dest);
            continue;
        }

        if !first {
            sleep(INTER_DOWNLOAD_PAUSE).await;
        }
        first = false;

        match download_one(client, url, &dest).await {
            Ok(bytes) => {
                info!(year, bytes, path = %dest.display(), "downloaded");
                present.push(dest);
            }
            Err(e) => {
                warn!(year, url = %url, error = %e, "download failed, skipping year");
            }
        }
    }

    present
}

async fn download_one(client: &reqwest::Client, url: &str, dest: &Path) -> anyhow::Result<u64> {
    let response = client.get(url).send().await?.error_for_status()?;
    let body = response.bytes().await?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, &body)?;
    Ok(body.len() as u64)
}
