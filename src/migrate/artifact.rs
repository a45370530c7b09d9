use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::MigratorError;
use crate::migrate::run_options::ExecutionMode;
use crate::migrate::splitter::split_statements;

/// A SQL migration file loaded from disk.
#[derive(Debug, Clone)]
pub struct MigrationArtifact {
    /// File name; the identity recorded in the ledger.
    pub id: String,
    pub source_path: PathBuf,
    pub sql: String,
    /// Lowercase hex SHA-256 of `sql`.
    pub checksum: String,
}

impl MigrationArtifact {
    pub fn load(path: &Path) -> Result<Self, MigratorError> {
        let sql = fs::read_to_string(path).map_err(|source| MigratorError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::from_sql(path, sql))
    }

    pub fn from_sql(path: &Path, sql: String) -> Self {
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let checksum = sha256_hex(sql.as_bytes());

        MigrationArtifact {
            id,
            source_path: path.to_path_buf(),
            sql,
            checksum,
        }
    }

    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.sql)
    }

    /// The units submitted to the endpoint in the given mode.
    pub fn execution_units(&self, mode: ExecutionMode) -> Vec<String> {
        match mode {
            ExecutionMode::Whole if self.sql.trim().is_empty() => Vec::new(),
            ExecutionMode::Whole => vec![self.sql.clone()],
            ExecutionMode::Split => self.statements(),
        }
    }
}

/// Expand the given paths into SQL artifact files.
///
/// Directories contribute their `.sql` files (non-recursive) sorted by file
/// name; explicit files are kept in the order given.
pub fn collect_artifact_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, MigratorError> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            files.extend(collect_sql_files(path)?);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(MigratorError::FileRead {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Path does not exist: {}", path.display()),
                ),
            });
        }
    }

    Ok(files)
}

fn collect_sql_files(dir: &Path) -> Result<Vec<PathBuf>, MigratorError> {
    let read_error = |source| MigratorError::FileRead {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();
        if path.is_file() && is_sql_file(&path) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn is_sql_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("sql"))
        .unwrap_or(false)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
