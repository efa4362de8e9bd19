use std::path::{Path, PathBuf};

use crate::error::{Result, SdstoreError};
use crate::filter::FilterKind;

/// Per-kind concurrency limits parsed from the budget file.
///
/// The file is line-oriented: `<filter-name> <positive-integer>` per line,
/// blank lines and `#` comments ignored. Every one of the seven kinds must
/// appear exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    limits: [u32; FilterKind::COUNT],
}

impl BudgetConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let mut limits: [Option<u32>; FilterKind::COUNT] = [None; FilterKind::COUNT];

        for (idx, raw_line) in text.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw_line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            let (name, value) = match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(value), None) => (name, value),
                _ => return Err(SdstoreError::BudgetLine { line }),
            };

            let kind: FilterKind = name.parse().map_err(|_| SdstoreError::BudgetUnknownFilter {
                line,
                name: name.to_string(),
            })?;
            let limit: u32 = value
                .parse()
                .map_err(|_| SdstoreError::BudgetLimit { line, kind })?;
            if limit == 0 {
                return Err(SdstoreError::BudgetLimit { line, kind });
            }
            if limits[kind.index()].replace(limit).is_some() {
                return Err(SdstoreError::BudgetDuplicate(kind));
            }
        }

        let mut resolved = [0u32; FilterKind::COUNT];
        for kind in FilterKind::ALL {
            resolved[kind.index()] =
                limits[kind.index()].ok_or(SdstoreError::BudgetMissing(kind))?;
        }

        Ok(Self { limits: resolved })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn limit(&self, kind: FilterKind) -> u32 {
        self.limits[kind.index()]
    }

    pub fn limits(&self) -> [u32; FilterKind::COUNT] {
        self.limits
    }
}

/// Everything `sdstored` needs to start: parsed budgets, the directory
/// holding the filter executables, and the socket to listen on.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub budgets: BudgetConfig,
    pub filter_dir: PathBuf,
    pub socket_path: PathBuf,
}

impl DaemonConfig {
    /// Read the budget file and resolve daemon settings. A malformed
    /// config fails here; the filter binaries themselves are checked when
    /// the catalogue is built.
    pub fn load(
        config_path: &Path,
        filter_dir: &Path,
        socket_path: Option<PathBuf>,
    ) -> Result<Self> {
        let budgets = BudgetConfig::load(config_path)?;
        Ok(Self {
            budgets,
            filter_dir: filter_dir.to_path_buf(),
            socket_path: socket_path.unwrap_or_else(default_socket_path),
        })
    }
}

/// Default rendezvous point, shared by daemon and client.
pub fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("sdstored.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "nop 3
bcompress 4
bdecompress 4
gcompress 2
gdecompress 2
encrypt 2
decrypt 2";

    #[test]
    fn full_config_parses() {
        let config = BudgetConfig::parse(FULL).expect("parsing should succeed");
        assert_eq!(config.limit(FilterKind::Nop), 3);
        assert_eq!(config.limit(FilterKind::Bcompress), 4);
        assert_eq!(config.limit(FilterKind::Decrypt), 2);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = format!("# filter budgets\n\n{FULL}\n");
        assert!(BudgetConfig::parse(&text).is_ok());
    }

    #[test]
    fn missing_limit_is_a_line_error() {
        let err = BudgetConfig::parse("nop7").unwrap_err();
        assert!(matches!(err, SdstoreError::BudgetLine { line: 1 }));
    }

    #[test]
    fn non_numeric_limit_is_rejected() {
        let err = BudgetConfig::parse("nop 3cccc").unwrap_err();
        assert!(matches!(
            err,
            SdstoreError::BudgetLimit { line: 1, kind: FilterKind::Nop }
        ));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let text = FULL.replace("encrypt 2", "encrypt 0");
        let err = BudgetConfig::parse(&text).unwrap_err();
        assert!(matches!(
            err,
            SdstoreError::BudgetLimit { kind: FilterKind::Encrypt, .. }
        ));
    }

    #[test]
    fn duplicate_kind_is_rejected() {
        let text = format!("{FULL}\nnop 1");
        let err = BudgetConfig::parse(&text).unwrap_err();
        assert!(matches!(err, SdstoreError::BudgetDuplicate(FilterKind::Nop)));
    }

    #[test]
    fn missing_kind_is_rejected() {
        let text = FULL.replace("decrypt 2", "");
        let err = BudgetConfig::parse(&text).unwrap_err();
        assert!(matches!(err, SdstoreError::BudgetMissing(FilterKind::Decrypt)));
    }

    #[test]
    fn unknown_filter_name_is_rejected() {
        let text = format!("{FULL}\nshred 1");
        let err = BudgetConfig::parse(&text).unwrap_err();
        assert!(matches!(err, SdstoreError::BudgetUnknownFilter { line: 8, .. }));
    }
}
