use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{error, info};
use openssl::pkey::{PKey, Private};
use openssl::sha::sha256;

use crate::error::EtlError;

/// An RSA private key, re-encoded as unencrypted PKCS#8 DER.
pub struct PrivateKey {
    der: Vec<u8>,
    fingerprint: String,
}

impl PrivateKey {
    /// Read a PEM file without a passphrase.  Both `BEGIN PRIVATE KEY` and
    /// `BEGIN RSA PRIVATE KEY` are accepted.
    pub fn from_pem_file(path: &Path) -> Result<Self, EtlError> {
        let pem = fs::read(path).map_err(|e| {
            error!("Error loading private key from {}: {}", path.display(), e);
            EtlError::credential(path, e)
        })?;
        let key = PrivateKey::from_pem(&pem).map_err(|e| {
            error!("Error loading private key from {}: {}", path.display(), e);
            EtlError::credential(path, e)
        })?;
        info!("Loaded private key from {}", path.display());
        Ok(key)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self, openssl::error::ErrorStack> {
        // an empty passphrase makes encrypted keys fail instead of prompting
        let pkey = PKey::private_key_from_pem_passphrase(pem, b"")?;
        let der = pkey.private_key_to_pkcs8()?;
        let public_der = pkey.public_key_to_der()?;
        let fingerprint = format!("SHA256:{}", STANDARD.encode(sha256(&public_der)));
        Ok(PrivateKey { der, fingerprint })
    }

    /// PKCS#8 DER bytes, no encryption.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// `SHA256:<base64>` of the public key, as registered on the warehouse user.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn pkey(&self) -> Result<PKey<Private>, openssl::error::ErrorStack> {
        PKey::private_key_from_pkcs8(&self.der)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::error::Error;
    use std::path::PathBuf;

    use openssl::rsa::Rsa;
    use openssl::symm::Cipher;

    use super::*;

    /// Write a fresh 2048-bit key as PKCS#8 PEM into `dir/rsa_key.p8`.
    pub(crate) fn write_test_key(dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        let pkey = PKey::from_rsa(Rsa::generate(2048)?)?;
        let path = dir.join("rsa_key.p8");
        fs::write(&path, pkey.private_key_to_pem_pkcs8()?)?;
        Ok(path)
    }

    #[test]
    fn load_pkcs8_pem() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = write_test_key(dir.path())?;
        let key = PrivateKey::from_pem_file(&path)?;
        assert!(key.fingerprint().starts_with("SHA256:"));
        // the DER round trips back into a usable key
        let pkey = key.pkey()?;
        assert_eq!(pkey.bits(), 2048);
        Ok(())
    }

    #[test]
    fn load_traditional_rsa_pem() -> Result<(), Box<dyn Error>> {
        let rsa = Rsa::generate(2048)?;
        let key = PrivateKey::from_pem(&rsa.private_key_to_pem()?)?;
        assert!(!key.der().is_empty());
        Ok(())
    }

    #[test]
    fn garbage_pem_is_credential_error() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rsa_key.p8");
        fs::write(&path, "not a key")?;
        match PrivateKey::from_pem_file(&path) {
            Err(EtlError::Credential { path: p, .. }) => assert_eq!(p, path),
            Err(e) => panic!("wrong error {:?}", e),
            Ok(_) => panic!("expected an error"),
        }
        Ok(())
    }

    #[test]
    fn encrypted_pem_fails_without_prompting() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let pkey = PKey::from_rsa(Rsa::generate(2048)?)?;
        let pem = pkey.private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), b"secret")?;
        let path = dir.path().join("rsa_key.p8");
        fs::write(&path, pem)?;
        let err = PrivateKey::from_pem_file(&path).err();
        assert!(matches!(err, Some(EtlError::Credential { .. })));
        Ok(())
    }

    #[test]
    fn unreadable_file_is_credential_error() {
        let path = Path::new("/nonexistent/dir/rsa_key.p8");
        let err = PrivateKey::from_pem_file(path).err();
        assert!(matches!(err, Some(EtlError::Credential { .. })));
    }
}
