use std::{io, result};

use thiserror::Error;

use crate::fs::fat::defect::{DefectError, ListError};
use crate::fs::fat::geometry::GeometryError;
use crate::fs::fat::label::ValidationError;
use crate::fs::fat::table::TableError;
use crate::fs::fat::writer::WriteError;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    IoError(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("geometry computation failed: {0}")]
    Geometry(#[from] GeometryError),
    #[error("FAT table construction failed: {0}")]
    Table(#[from] TableError),
    #[error("defect scan failed: {0}")]
    Defect(#[from] DefectError),
    #[error("bad block list rejected: {0}")]
    List(#[from] ListError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
    #[error("invalid boot sector")]
    InvalidBootSector,
    #[error("invalid FS information sector")]
    InvalidFsInfo,
}
