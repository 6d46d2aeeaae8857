use super::parser::parse_sql;
use super::{Action, LoadError, MigrationSet, MigrationUnit, Origin, Registry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

static FILE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_(.*)\.sql$").unwrap());

/// Where file-backed migrations come from.
pub trait MigrationSource {
    /// Human readable location used in errors
    fn location(&self) -> String;

    /// Candidate files; anything that is not `*.sql` is skipped by the loader.
    fn list(&self) -> std::io::Result<Vec<PathBuf>>;

    fn read(&self, path: &Path) -> std::io::Result<String>;
}

/// Reads `*.sql` migrations from a single directory (no recursion).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MigrationSource for DirectorySource {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    fn list(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }

    fn read(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Split `00012_add_users.sql` into `(12, "add users")`. Returns `Ok(None)`
/// for files that are not SQL migrations.
pub(crate) fn parse_file_name(path: &Path) -> Result<Option<(i64, String)>, LoadError> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    if !file_name.ends_with(".sql") {
        return Ok(None);
    }

    let caps = FILE_NAME.captures(file_name).ok_or_else(|| LoadError::Malformed {
        source_name: file_name.to_string(),
        reason: "file name must look like <version>_<name>.sql".to_string(),
    })?;

    let version = caps[1].parse::<i64>().map_err(|e| LoadError::InvalidVersion {
        source_name: file_name.to_string(),
        reason: e.to_string(),
    })?;
    let description = caps[2].replace('_', " ");

    Ok(Some((version, description)))
}

/// Discover every migration from `source` plus the code units in `registry`
/// and return them as one version-ordered set.
pub fn load_from(source: &dyn MigrationSource, registry: &Registry) -> Result<MigrationSet, LoadError> {
    let paths = source.list().map_err(|e| LoadError::Unreadable {
        location: source.location(),
        source: e,
    })?;

    let mut units = Vec::with_capacity(paths.len() + registry.len());
    for path in paths {
        let Some((version, description)) = parse_file_name(&path)? else {
            continue;
        };

        let content = source.read(&path).map_err(|e| LoadError::Unreadable {
            location: path.display().to_string(),
            source: e,
        })?;
        let source_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = parse_sql(&source_name, &content)?;

        units.push(MigrationUnit {
            version,
            description,
            up: Action::sql(parsed.up, parsed.transactional),
            down: Action::sql(parsed.down, parsed.transactional),
            origin: Origin::File { path },
        });
    }

    let file_count = units.len();
    units.extend(registry.units());

    let set = MigrationSet::new(units)?;
    debug!(
        "Loaded {} migrations from {} ({} file, {} registered)",
        set.len(),
        source.location(),
        file_count,
        registry.len()
    );
    Ok(set)
}

/// Load migrations from the directory `dir`.
pub fn load_set(dir: impl AsRef<Path>, registry: &Registry) -> Result<MigrationSet, LoadError> {
    load_from(&DirectorySource::new(dir.as_ref()), registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name(Path::new("m/00012_add_users.sql")).unwrap(),
            Some((12, "add users".to_string()))
        );
        assert_eq!(
            parse_file_name(Path::new("20240102030405_init.sql")).unwrap(),
            Some((20240102030405, "init".to_string()))
        );
        assert_eq!(parse_file_name(Path::new("README.md")).unwrap(), None);
    }

    #[test]
    fn test_parse_file_name_errors() {
        assert!(matches!(
            parse_file_name(Path::new("init.sql")),
            Err(LoadError::Malformed { .. })
        ));
        assert!(matches!(
            parse_file_name(Path::new("99999999999999999999_huge.sql")),
            Err(LoadError::InvalidVersion { .. })
        ));
    }
}
