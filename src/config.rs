//! Central configuration: URLs, identification headers, rate limits and
//! on-disk file names. Every stage imports from here — constants are never
//! redefined locally.

use std::path::PathBuf;

/// Publisher page listing the per-year CSV download links.
pub const BASE_URL: &str =
    "https://www.fazenda.niteroi.rj.gov.br/site/dados-das-transacoes-imobiliarias/";

/// Hardcoded per-year URLs used when dynamic discovery fails.
pub const CSV_URLS_FALLBACK: &[(i32, &str)] = &[
    (2020, "https://www.fazenda.niteroi.rj.gov.br/site/wp-content/uploads/2025/02/transacoes_imobiliarias_2020.csv"),
    (2021, "https://www.fazenda.niteroi.rj.gov.br/site/wp-content/uploads/2025/02/transacoes_imobiliarias_2021.csv"),
    (2022, "https://www.fazenda.niteroi.rj.gov.br/site/wp-content/uploads/2025/02/transacoes_imobiliarias_2022.csv"),
    (2023, "https://www.fazenda.niteroi.rj.gov.br/site/wp-content/uploads/2025/02/transacoes_imobiliarias_2023.csv"),
    (2024, "https://www.fazenda.niteroi.rj.gov.br/site/wp-content/uploads/2025/02/transacoes_imobiliarias_2024.csv"),
];

/// Identification for plain HTTP fetches (publisher page, CSV downloads).
pub const HTTP_USER_AGENT: &str =
    "itbi-insights/0.1 (pesquisa-propria; github.com/itbi-insights/itbi-insights)";

/// Nominatim endpoint. Its terms of service require a descriptive
/// User-Agent and at most one request per second.
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const NOMINATIM_USER_AGENT: &str =
    "itbi-insights/0.1 (github.com/itbi-insights/itbi-insights)";

/// Minimum interval between outbound geocoding calls. 1100 ms keeps the
/// effective rate safely under the 1 req/s ceiling.
pub const GEOCODE_MIN_INTERVAL_MS: u64 = 1100;

/// HTTP timeout for all outbound requests.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// File names under the data directory.
pub const CONSOLIDATED_FILE: &str = "consolidado.csv";
pub const GEOCODED_FILE: &str = "consolidado_geo.csv";
pub const GEOCACHE_FILE: &str = "geocache.csv";
pub const INSIGHTS_FILE: &str = "itbi_insights.json";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ITBI_DATA_DIR";

/// Resolve the data directory in priority order:
/// 1. command-line argument,
/// 2. `ITBI_DATA_DIR` environment variable,
/// 3. `data_dir` key in `~/.config/itbi-insights/config.toml`,
/// 4. compiled default `data/itbi_niteroi`.
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = data_dir_from_config_file() {
        return path;
    }

    PathBuf::from("data/itbi_niteroi")
}

fn data_dir_from_config_file() -> Option<PathBuf> {
    let config_path = dirs::config_dir()?.join("itbi-insights").join("config.toml");
    let content = std::fs::read_to_string(config_path).ok()?;
    let value: toml::Value = toml::from_str(&content).ok()?;
    value
        .get("data_dir")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}
