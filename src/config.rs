use crate::capture::CropSettings;
use failure::{Error, ResultExt};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

const DEFAULT_OCR_URL: &str = "https://api.ocr.space/parse/image";

/// Settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub ocr_api_key: String,
    pub ocr_url: Url,
    pub ocr_language: String,
    pub history_db: PathBuf,
    pub history_seed: Option<PathBuf>,
    /// Where cropped captures are kept; `None` discards them.
    pub capture_dir: Option<PathBuf>,
    pub port: u16,
    pub crop: CropSettings,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ocr_api_key = lookup("OCR_API_KEY")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| format_err!("OCR_API_KEY environment variable unset"))?;
        let ocr_url = Url::parse(
            &lookup("OCR_URL").unwrap_or_else(|| DEFAULT_OCR_URL.to_string()),
        )
        .context("OCR_URL is not a valid URL")?;

        let defaults = CropSettings::default();
        let crop = CropSettings {
            crop_fraction: parse_or(&lookup, "CROP_FRACTION", defaults.crop_fraction)?,
            offset_fraction: parse_or(&lookup, "CROP_OFFSET", defaults.offset_fraction)?,
            jpeg_quality: parse_or(&lookup, "JPEG_QUALITY", defaults.jpeg_quality)?,
        };
        crop.validate()?;

        Ok(Config {
            ocr_api_key,
            ocr_url,
            ocr_language: lookup("OCR_LANGUAGE").unwrap_or_else(|| "eng".to_string()),
            history_db: lookup("HISTORY_DB")
                .unwrap_or_else(|| "/data/history.db".to_string())
                .into(),
            history_seed: lookup("HISTORY_SEED").map(PathBuf::from),
            capture_dir: lookup("CAPTURE_DIR").map(PathBuf::from),
            port: parse_or(&lookup, "PORT", 8402)?,
            crop,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| format_err!("{} has invalid value {:?}", key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("OCR_API_KEY", "secret")]).unwrap();
        assert_eq!(config.ocr_api_key, "secret");
        assert_eq!(config.ocr_url.as_str(), DEFAULT_OCR_URL);
        assert_eq!(config.ocr_language, "eng");
        assert_eq!(config.history_db, PathBuf::from("/data/history.db"));
        assert_eq!(config.history_seed, None);
        assert_eq!(config.capture_dir, None);
        assert_eq!(config.port, 8402);
        assert_eq!(config.crop, CropSettings::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("OCR_API_KEY", "secret"),
            ("OCR_URL", "http://localhost:9000/parse"),
            ("PORT", "8080"),
            ("CROP_FRACTION", "0.5"),
            ("CROP_OFFSET", " 0.25 "),
            ("CAPTURE_DIR", "/plates"),
        ])
        .unwrap();
        assert_eq!(config.ocr_url.host_str(), Some("localhost"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.crop.crop_fraction, 0.5);
        assert_eq!(config.crop.offset_fraction, 0.25);
        assert_eq!(config.capture_dir, Some(PathBuf::from("/plates")));
    }

    #[test]
    fn test_missing_key() {
        assert!(config(&[]).is_err());
        assert!(config(&[("OCR_API_KEY", "")]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("OCR_API_KEY", "k"), ("PORT", "http")]).is_err());
        assert!(config(&[("OCR_API_KEY", "k"), ("OCR_URL", "not a url")]).is_err());
        assert!(config(&[("OCR_API_KEY", "k"), ("JPEG_QUALITY", "90")]).is_err());
        assert!(config(&[("OCR_API_KEY", "k"), ("CROP_OFFSET", "0.5")]).is_err());
    }
}
