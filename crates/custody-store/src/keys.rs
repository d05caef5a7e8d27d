use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use custody_crypto::{generate_keypair, OperatorKeypair, OperatorPublicKey};
use tracing::info;

use crate::error::KeyStoreError;

pub const PRIVATE_KEY_FILE: &str = "operator_private.pem";
pub const PUBLIC_KEY_FILE: &str = "operator_public.pem";

/// Directory holding one operator's PEM key pair.
///
/// The private key is PKCS#8 and, on unix, readable by the owner only.
#[derive(Clone, Debug)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn has_keypair(&self) -> bool {
        self.private_key_path().exists()
    }

    /// Generate and store a new key pair. Refuses to replace an existing one
    /// unless `overwrite` is set.
    pub fn generate(
        &self,
        signer_id: &str,
        overwrite: bool,
    ) -> Result<OperatorKeypair, KeyStoreError> {
        if !overwrite && self.has_keypair() {
            return Err(KeyStoreError::AlreadyExists(self.private_key_path()));
        }
        let keypair = generate_keypair(signer_id);
        self.save(&keypair)?;
        Ok(keypair)
    }

    pub fn save(&self, keypair: &OperatorKeypair) -> Result<(), KeyStoreError> {
        fs::create_dir_all(&self.dir)?;

        let private_pem = keypair.to_pkcs8_pem()?;
        write_private(&self.private_key_path(), private_pem.as_bytes())?;
        let public_pem = keypair.public_key().to_public_key_pem()?;
        fs::write(self.public_key_path(), public_pem)?;

        info!(
            signer = keypair.signer_id(),
            public_key = %keypair.public_key_hex(),
            dir = %self.dir.display(),
            "operator key pair written"
        );
        Ok(())
    }

    /// Load the signing key. A missing file is a configuration error.
    pub fn load_keypair(&self, signer_id: &str) -> Result<OperatorKeypair, KeyStoreError> {
        let pem = read_key(&self.private_key_path())?;
        Ok(OperatorKeypair::from_pkcs8_pem(signer_id, &pem)?)
    }

    pub fn load_public_key(&self) -> Result<OperatorPublicKey, KeyStoreError> {
        let pem = read_key(&self.public_key_path())?;
        Ok(OperatorPublicKey::from_public_key_pem(&pem)?)
    }
}

fn read_key(path: &Path) -> Result<String, KeyStoreError> {
    match fs::read_to_string(path) {
        Ok(pem) => Ok(pem),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(KeyStoreError::NotFound(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_private(path: &Path, pem: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(pem)?;
    file.sync_all()?;

    // `mode` only applies on creation; tighten a pre-existing file too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys"));
        let generated = store.generate("operator-1", false).unwrap();

        let loaded = store.load_keypair("operator-1").unwrap();
        assert_eq!(loaded.public_key(), generated.public_key());
        assert_eq!(store.load_public_key().unwrap(), generated.public_key());
    }

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let err = store.load_keypair("operator-1").unwrap_err();
        assert!(matches!(err, KeyStoreError::NotFound(p) if p.ends_with(PRIVATE_KEY_FILE)));
    }

    #[test]
    fn existing_key_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let first = store.generate("operator-1", false).unwrap();
        assert!(matches!(
            store.generate("operator-1", false),
            Err(KeyStoreError::AlreadyExists(_))
        ));
        let second = store.generate("operator-1", true).unwrap();
        assert_ne!(first.public_key(), second.public_key());
    }

    #[test]
    fn corrupt_key_file_is_key_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        fs::write(store.private_key_path(), "garbage").unwrap();
        assert!(matches!(
            store.load_keypair("operator-1"),
            Err(KeyStoreError::Key(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        store.generate("operator-1", false).unwrap();
        let mode = fs::metadata(store.private_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
