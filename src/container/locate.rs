//! Finding host-side input files for a rebuild.
//!
//! Names are tried relative to the current directory first, then under each
//! extra root. The default extra roots are this crate's directory and its
//! `patches/` subdirectory, so a rebuild works from any checkout location.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileLocator {
    roots: Vec<PathBuf>,
}

impl Default for FileLocator {
    fn default() -> Self {
        let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Self {
            roots: vec![
                PathBuf::from("."),
                manifest_dir.clone(),
                manifest_dir.join("patches"),
            ],
        }
    }
}

impl FileLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate `name`, or fail with every location that was tried.
    pub fn find(&self, name: &str) -> io::Result<PathBuf> {
        let name_path = Path::new(name);
        if name_path.is_absolute() {
            if name_path.is_file() {
                return Ok(name_path.to_path_buf());
            }
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not find file '{}'", name),
            ));
        }

        let candidates: Vec<PathBuf> = self.roots.iter().map(|root| root.join(name)).collect();
        if let Some(found) = candidates.iter().find(|path| path.is_file()) {
            return Ok(found.clone());
        }

        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("could not find file '{}' (looked in {})", name, tried),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_first_root_wins() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        fs::write(a.path().join("0001.patch"), "a").unwrap();
        fs::write(b.path().join("0001.patch"), "b").unwrap();
        fs::write(b.path().join("0002.patch"), "b").unwrap();

        let locator = FileLocator::new(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        assert_eq!(locator.find("0001.patch").unwrap(), a.path().join("0001.patch"));
        assert_eq!(locator.find("0002.patch").unwrap(), b.path().join("0002.patch"));
    }

    #[test]
    fn test_missing_file_lists_locations() {
        let a = TempDir::new().unwrap();
        let locator = FileLocator::new(vec![a.path().to_path_buf()]);
        let err = locator.find("vmlinuz").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains(&a.path().join("vmlinuz").display().to_string()));
    }

    #[test]
    fn test_directories_do_not_match() {
        let a = TempDir::new().unwrap();
        fs::create_dir(a.path().join("vmlinuz")).unwrap();
        let locator = FileLocator::new(vec![a.path().to_path_buf()]);
        assert!(locator.find("vmlinuz").is_err());
    }

    #[test]
    fn test_absolute_names_bypass_roots() {
        let a = TempDir::new().unwrap();
        let file = a.path().join("vmlinuz");
        fs::write(&file, "").unwrap();
        let locator = FileLocator::new(Vec::new());
        assert_eq!(locator.find(file.to_str().unwrap()).unwrap(), file);
    }

    #[test]
    fn test_default_roots_start_with_current_dir() {
        let locator = FileLocator::default();
        assert_eq!(locator.roots()[0], PathBuf::from("."));
        assert!(locator.roots().len() >= 2);
    }
}
