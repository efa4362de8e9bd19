use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::filter::FilterKind;

#[derive(Error, Debug)]
pub enum SdstoreError {
    #[error("budget config line {line}: expected `<filter-name> <positive-integer>`")]
    BudgetLine { line: usize },

    #[error("budget config line {line}: unknown filter `{name}`")]
    BudgetUnknownFilter { line: usize, name: String },

    #[error("budget config line {line}: `{kind}` needs a positive integer limit")]
    BudgetLimit { line: usize, kind: FilterKind },

    #[error("budget config: duplicate entry for `{0}`")]
    BudgetDuplicate(FilterKind),

    #[error("budget config: no entry for `{0}`")]
    BudgetMissing(FilterKind),

    #[error("filter binary for `{kind}` missing or not executable at {}", path.display())]
    FilterBinary { kind: FilterKind, path: PathBuf },

    #[error("failed to connect to daemon at {}: {source}", path.display())]
    Connect { path: PathBuf, source: io::Error },

    #[error("connection closed before a terminal reply")]
    ConnectionClosed,

    #[error("unexpected reply from daemon: {0}")]
    UnexpectedReply(String),

    #[error("frame encoding: {0}")]
    Frame(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SdstoreError>;
