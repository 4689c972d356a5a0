// 🌏 Region defaults - what a newly created school gets for country/region
//
// `--country <code>` picks one entry. Values are the display strings the
// admin dashboard filters on.

use crate::error::ImportError;
use crate::store::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// CLI code (uk, hongkong, ...)
    pub code: String,
    /// Country display name stored on schools.country
    pub country: String,
    /// Continent stored on schools.region
    pub region: String,
}

const REGIONS: &[(&str, &str, &str)] = &[
    ("uk", "英国", "欧洲"),
    ("hongkong", "香港", "亚洲"),
    ("australia", "澳大利亚", "大洋洲"),
    ("singapore", "新加坡", "亚洲"),
    ("macau", "澳门", "亚洲"),
    ("us", "美国", "北美洲"),
    ("canada", "加拿大", "北美洲"),
];

impl Region {
    /// Look up a region by CLI code (case-insensitive)
    pub fn from_code(code: &str) -> Result<Region, ImportError> {
        let wanted = code.trim().to_lowercase();
        REGIONS
            .iter()
            .find(|(c, _, _)| *c == wanted)
            .map(|(c, country, region)| Region {
                code: c.to_string(),
                country: country.to_string(),
                region: region.to_string(),
            })
            .ok_or_else(|| {
                ImportError::config(format!(
                    "unsupported country '{}'; supported: {}",
                    code,
                    supported_codes().join(", ")
                ))
            })
    }

    /// Columns merged into every reference row this run creates
    pub fn defaults(&self) -> Row {
        let mut row = Row::new();
        row.insert("country".to_string(), Value::String(self.country.clone()));
        row.insert("region".to_string(), Value::String(self.region.clone()));
        row
    }
}

pub fn supported_codes() -> Vec<&'static str> {
    REGIONS.iter().map(|(c, _, _)| *c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        let hk = Region::from_code("HongKong").unwrap();
        assert_eq!(hk.code, "hongkong");
        assert_eq!(hk.country, "香港");
        assert_eq!(hk.region, "亚洲");
    }

    #[test]
    fn test_unknown_code_lists_supported() {
        let err = Region::from_code("atlantis").unwrap_err().to_string();
        assert!(err.contains("atlantis"));
        assert!(err.contains("uk, hongkong"));
    }

    #[test]
    fn test_defaults_row() {
        let row = Region::from_code("uk").unwrap().defaults();
        assert_eq!(row["country"], "英国");
        assert_eq!(row["region"], "欧洲");
    }
}
