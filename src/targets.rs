//! Organizations whose timelines are harvested.

use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigError;

/// One organization account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Target {
    /// Display name used in summaries and merged output.
    pub name: String,
    /// Account handle without the leading `@`.
    pub handle: String,
}

impl Target {
    #[must_use]
    pub fn new(name: &str, handle: &str) -> Self {
        Self {
            name: name.to_string(),
            handle: handle.trim_start_matches('@').to_string(),
        }
    }

    /// Timeline URL for this account under the given base.
    #[must_use]
    pub fn timeline_url(&self, base_url: &str) -> String {
        format!("{}/{}/tweets", base_url.trim_end_matches('/'), self.handle)
    }
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(rename = "target", default)]
    targets: Vec<Target>,
}

const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("Reliance Industries Ltd", "RIL_Updates"),
    ("HDFC Bank Ltd", "HDFC_Bank"),
    ("Tata Consultancy Services Ltd", "TCS"),
    ("Bharti Airtel Ltd", "airtelnews"),
    ("ICICI Bank Ltd", "ICICIBank"),
    ("State Bank of India", "TheOfficialSBI"),
    ("Infosys Ltd", "Infosys"),
    ("Bajaj Finance Ltd", "Bajaj_Finance"),
    ("Hindustan Unilever Ltd", "HUL_News"),
    ("ITC Ltd", "ITCCorpCom"),
    ("Larsen & Toubro Ltd", "larsentoubro"),
    ("HCL Technologies Ltd", "hcltech"),
    ("Kotak Mahindra Bank Ltd", "KotakBankLtd"),
    ("Sun Pharmaceutical Industries Ltd", "SunPharma_Live"),
    ("Maruti Suzuki India Ltd", "Maruti_Corp"),
    ("Mahindra & Mahindra Ltd", "MahindraRise"),
    ("Axis Bank Ltd", "AxisBank"),
    ("UltraTech Cement Ltd", "UltraTechCement"),
    ("NTPC Ltd", "ntpclimited"),
    ("Bajaj Finserv Ltd", "Bajaj_Finserv"),
];

/// The built-in target list.
#[must_use]
pub fn default_targets() -> Vec<Target> {
    DEFAULT_TARGETS
        .iter()
        .map(|(name, handle)| Target::new(name, handle))
        .collect()
}

/// Parse a TOML document made of `[[target]]` tables.
///
/// # Errors
///
/// Returns an error if the document is not valid TOML or a table lacks
/// `name` or `handle`.
pub fn parse_targets(content: &str) -> Result<Vec<Target>, toml::de::Error> {
    let file: TargetsFile = toml::from_str(content)?;
    Ok(file
        .targets
        .into_iter()
        .map(|t| Target::new(&t.name, &t.handle))
        .collect())
}

/// Load targets from `path`, or the built-in list when no path is given.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or lists no targets.
pub fn load_targets(path: Option<&Path>) -> Result<Vec<Target>, ConfigError> {
    let Some(path) = path else {
        return Ok(default_targets());
    };

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::TargetsRead {
        path: path.to_path_buf(),
        source,
    })?;
    let targets = parse_targets(&content).map_err(|source| ConfigError::TargetsParse {
        path: path.to_path_buf(),
        source,
    })?;

    if targets.is_empty() {
        return Err(ConfigError::InvalidValue {
            name: "TARGETS_FILE".to_string(),
            message: format!("{} lists no [[target]] entries", path.display()),
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets() {
        let targets = default_targets();
        assert_eq!(targets.len(), 20);
        assert_eq!(targets[2], Target::new("Tata Consultancy Services Ltd", "TCS"));
    }

    #[test]
    fn test_parse_targets() {
        let toml = r#"
            [[target]]
            name = "Example Corp"
            handle = "@example"

            [[target]]
            name = "Other"
            handle = "other_co"
        "#;
        let targets = parse_targets(toml).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].handle, "example");
        assert_eq!(targets[1].name, "Other");
    }

    #[test]
    fn test_parse_targets_missing_handle() {
        assert!(parse_targets("[[target]]\nname = \"x\"\n").is_err());
    }

    #[test]
    fn test_timeline_url() {
        let target = Target::new("TCS", "TCS");
        assert_eq!(target.timeline_url("https://x.com/"), "https://x.com/TCS/tweets");
    }

    #[test]
    fn test_load_targets_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        std::fs::write(&path, "[[target]]\nname = \"A\"\nhandle = \"a\"\n").unwrap();
        let targets = load_targets(Some(&path)).unwrap();
        assert_eq!(targets, vec![Target::new("A", "a")]);
    }

    #[test]
    fn test_load_targets_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.toml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_targets(Some(&path)),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
