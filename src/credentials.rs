//! On-disk storage of the signed-in user, with the API token encrypted.

use std::path::{Path, PathBuf};

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::session::{SessionProvider, User};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES-128-CBC cipher keyed from machine identity.
///
/// Not a security boundary: it keeps the token from being readable by
/// casually opening the session file.
#[derive(Clone)]
pub struct TokenCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher(..)")
    }
}

impl TokenCipher {
    /// Derives key and IV from hostname and username.
    #[must_use]
    pub fn machine() -> Self {
        let hostname = hostname::get().map_or_else(
            |_| "unknown-host".to_string(),
            |h| h.to_string_lossy().into_owned(),
        );
        Self::from_seed(&format!("{hostname}:{}", whoami::username()))
    }

    /// Derives key and IV from arbitrary seed material.
    #[must_use]
    pub fn from_seed(seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(b":coursedeck-session-key");
        let hash = hasher.finalize();

        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&hash[..16]);
        iv.copy_from_slice(&hash[16..]);
        Self { key, iv }
    }

    /// Encrypts `plaintext` and returns it base64-encoded.
    #[must_use]
    pub fn encrypt(&self, plaintext: &str) -> String {
        let bytes = plaintext.as_bytes();
        let mut buf = vec![0u8; (bytes.len() / 16 + 1) * 16];
        buf[..bytes.len()].copy_from_slice(bytes);

        let cipher = Aes128CbcEnc::new(&self.key.into(), &self.iv.into());
        // The buffer always has room for a full padding block.
        cipher
            .encrypt_padded_mut::<Pkcs7>(&mut buf, bytes.len())
            .map_or_else(|_| String::new(), |sealed| BASE64.encode(sealed))
    }

    /// Decrypts a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Returns `None` on bad base64, wrong key, or corrupt padding.
    #[must_use]
    pub fn decrypt(&self, encoded: &str) -> Option<String> {
        let mut data = BASE64.decode(encoded).ok()?;
        if data.is_empty() || data.len() % 16 != 0 {
            return None;
        }
        let cipher = Aes128CbcDec::new(&self.key.into(), &self.iv.into());
        let plain = cipher.decrypt_padded_mut::<Pkcs7>(&mut data).ok()?;
        String::from_utf8(plain.to_vec()).ok()
    }
}

/// The persisted form of a signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub user_id: u64,
    pub username: String,
    /// Encrypted, base64-encoded API token.
    pub token: String,
    pub saved_at: DateTime<Utc>,
}

impl SavedSession {
    #[must_use]
    pub fn seal(user: &User, cipher: &TokenCipher) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            token: cipher.encrypt(&user.token),
            saved_at: Utc::now(),
        }
    }

    /// Recovers the user. `None` if the token was encrypted on another machine.
    #[must_use]
    pub fn open(&self, cipher: &TokenCipher) -> Option<User> {
        Some(User {
            id: self.user_id,
            username: self.username.clone(),
            token: cipher.decrypt(&self.token)?,
        })
    }

    /// Saves atomically (write tmp + rename) with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp_path = path.with_extension("toml.tmp");
        let toml_str = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, toml_str)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp_path, path)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Session provider backed by a [`SavedSession`] file.
#[derive(Debug, Clone)]
pub struct FileSessionProvider {
    path: PathBuf,
    cipher: TokenCipher,
}

impl FileSessionProvider {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `user` as the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns an error if the session file cannot be written.
    pub fn sign_in(&self, user: &User) -> Result<()> {
        SavedSession::seal(user, &self.cipher).save(&self.path)?;
        log::info!("Signed in as {}", user.username);
        Ok(())
    }
}

impl SessionProvider for FileSessionProvider {
    fn current_user(&self) -> Option<User> {
        let saved = match SavedSession::load(&self.path) {
            Ok(saved) => saved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Ignoring unreadable session file {}: {e}", self.path.display());
                return None;
            }
        };
        let user = saved.open(&self.cipher);
        if user.is_none() {
            log::warn!("Stored session token could not be decrypted; sign in again");
        }
        user
    }

    fn sign_out(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user() -> User {
        User {
            id: 7,
            username: "ray".into(),
            token: "tok-123".into(),
        }
    }

    #[test]
    fn cipher_round_trip() {
        let cipher = TokenCipher::from_seed("host:user");
        let sealed = cipher.encrypt("s3cret!");
        assert_ne!(sealed, "s3cret!");
        assert_eq!(cipher.decrypt(&sealed).as_deref(), Some("s3cret!"));
    }

    #[test]
    fn cipher_handles_empty_and_block_sized_input() {
        let cipher = TokenCipher::from_seed("seed");
        let long = "a".repeat(1000);
        for input in ["", "exactly16bytes!!", long.as_str()] {
            assert_eq!(cipher.decrypt(&cipher.encrypt(input)).as_deref(), Some(input));
        }
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let cipher = TokenCipher::from_seed("seed");
        assert!(cipher.decrypt("not-valid-base64!!!").is_none());
        assert!(cipher.decrypt("AAAAAAAAAAAAAAAAAAAAAA==").is_none());
    }

    #[test]
    fn other_machine_cannot_open() {
        let saved = SavedSession::seal(&user(), &TokenCipher::from_seed("a"));
        assert!(saved.open(&TokenCipher::from_seed("b")).is_none());
        assert_eq!(saved.open(&TokenCipher::from_seed("a")), Some(user()));
    }

    #[test]
    fn provider_sign_in_and_out() {
        let dir = TempDir::new().unwrap();
        let provider =
            FileSessionProvider::new(dir.path().join("session.toml"), TokenCipher::from_seed("t"));

        assert!(provider.current_user().is_none());
        provider.sign_in(&user()).unwrap();
        assert_eq!(provider.current_user(), Some(user()));

        let on_disk = std::fs::read_to_string(provider.path()).unwrap();
        assert!(!on_disk.contains("tok-123"));

        provider.sign_out().unwrap();
        assert!(provider.current_user().is_none());
        provider.sign_out().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/session.toml");
        SavedSession::seal(&user(), &TokenCipher::from_seed("t"))
            .save(&path)
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
