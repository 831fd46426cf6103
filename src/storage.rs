use std::path::{Path, PathBuf};

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
}

#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(storage_dir)?;
        Ok(BackendLocal {
            base_dir: storage_dir.to_path_buf(),
        })
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.base_dir.join(ident)).is_ok()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.base_dir.join(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.base_dir.join(ident);
        let temp_path = self
            .base_dir
            .join(format!("{}-{ident}", rusty_ulid::generate_ulid_string()));

        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(&dir.path().join("nested")).unwrap();

        assert!(!store.exists("config.yaml"));
        store.write("config.yaml", b"model: x\n").unwrap();
        assert!(store.exists("config.yaml"));
        assert_eq!(store.read("config.yaml").unwrap(), b"model: x\n");

        store.write("config.yaml", b"model: y\n").unwrap();
        assert_eq!(store.read("config.yaml").unwrap(), b"model: y\n");

        // temp files are renamed away
        let entries = std::fs::read_dir(&store.base_dir).unwrap().count();
        assert_eq!(entries, 1);
    }
}
