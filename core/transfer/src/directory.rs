//! User key directories.
//!
//! Each registered user owns one long-term keypair, issued at registration.
//! The orchestrator asks the directory for a recipient's public key on send
//! and for the requester's private key on receive, only after authorization.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use secureshare_common::{Error, Result, UserId};
use secureshare_crypto::{CryptoConfig, KdfParams, KeyPair, PrivateKey, PublicKey, SealedPrivateKey};

/// Source of users' keys.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Public key of `user`.
    ///
    /// # Errors
    /// - `NotFound` for unknown users
    async fn get_public_key(&self, user: &UserId) -> Result<PublicKey>;

    /// Private key of `user`.
    ///
    /// Callers must only ask for the key of a principal that has already
    /// been authenticated and authorized for the operation at hand.
    ///
    /// # Errors
    /// - `NotFound` for unknown users
    async fn get_private_key(&self, user: &UserId) -> Result<PrivateKey>;
}

/// Generate a keypair off the async runtime.
async fn generate_keypair(config: &CryptoConfig) -> Result<KeyPair> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || KeyPair::generate(&config))
        .await
        .map_err(|e| Error::Crypto(format!("Key generation task failed: {}", e)))?
}

/// In-memory directory for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryUserDirectory {
    config: CryptoConfig,
    keys: RwLock<HashMap<UserId, KeyPair>>,
}

impl MemoryUserDirectory {
    /// Create an empty directory issuing keys per `config`.
    pub fn new(config: CryptoConfig) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a fresh keypair for `user`.
    ///
    /// # Errors
    /// - `AlreadyExists` if the user is registered
    pub async fn register(&self, user: &UserId) -> Result<PublicKey> {
        if self.keys.read().await.contains_key(user) {
            return Err(Error::AlreadyExists(format!("User already registered: {}", user)));
        }

        let keypair = generate_keypair(&self.config).await?;
        let public = keypair.public_key().clone();
        self.insert(user.clone(), keypair).await?;
        Ok(public)
    }

    /// Add an existing keypair for `user`.
    pub async fn insert(&self, user: UserId, keypair: KeyPair) -> Result<()> {
        let mut keys = self.keys.write().await;
        if keys.contains_key(&user) {
            return Err(Error::AlreadyExists(format!("User already registered: {}", user)));
        }
        keys.insert(user, keypair);
        Ok(())
    }

    /// Replace `user`'s keypair unconditionally.
    pub async fn replace(&self, user: UserId, keypair: KeyPair) {
        self.keys.write().await.insert(user, keypair);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_public_key(&self, user: &UserId) -> Result<PublicKey> {
        self.keys
            .read()
            .await
            .get(user)
            .map(|kp| kp.public_key().clone())
            .ok_or_else(|| Error::NotFound(format!("Unknown user: {}", user)))
    }

    async fn get_private_key(&self, user: &UserId) -> Result<PrivateKey> {
        self.keys
            .read()
            .await
            .get(user)
            .map(|kp| kp.private_key().clone())
            .ok_or_else(|| Error::NotFound(format!("Unknown user: {}", user)))
    }
}

/// Directory storing `<user>.pub.pem` and `<user>.key` files.
///
/// The private key file is created with mode 0600. When a passphrase is set,
/// new private keys are sealed ([`SealedPrivateKey`] JSON) rather than written
/// as plain PEM, and sealed files can only be read with that passphrase.
pub struct LocalKeyDirectory {
    dir: PathBuf,
    config: CryptoConfig,
    passphrase: Option<Zeroizing<Vec<u8>>>,
    kdf_params: KdfParams,
}

impl LocalKeyDirectory {
    /// Open a directory rooted at `dir`, creating it if needed.
    pub fn new(dir: impl AsRef<Path>, config: CryptoConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            config,
            passphrase: None,
            kdf_params: KdfParams::default(),
        })
    }

    /// Seal newly issued private keys, and open sealed ones, with `passphrase`.
    pub fn with_passphrase(mut self, passphrase: impl Into<Vec<u8>>, kdf_params: KdfParams) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self.kdf_params = kdf_params;
        self
    }

    fn public_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.pub.pem", user.as_str()))
    }

    fn private_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.key", user.as_str()))
    }

    /// Issue and store a fresh keypair for `user`.
    ///
    /// # Errors
    /// - `Validation` if the user id is not usable as a file name
    /// - `AlreadyExists` if the user is registered
    pub async fn register(&self, user: &UserId) -> Result<PublicKey> {
        if !user.is_path_safe() {
            return Err(Error::Validation(format!("User id is not storable: {}", user)));
        }
        let public_path = self.public_path(user);
        if fs::try_exists(&public_path).await? {
            return Err(Error::AlreadyExists(format!("User already registered: {}", user)));
        }

        debug!(user = %user, bits = self.config.rsa_key_bits, "Generating keypair");
        let keypair = generate_keypair(&self.config).await?;

        let private_contents = match &self.passphrase {
            Some(passphrase) => {
                let key = keypair.private_key().clone();
                let owner = user.as_str().to_string();
                let passphrase = passphrase.clone();
                let params = self.kdf_params.clone();
                let sealed = tokio::task::spawn_blocking(move || {
                    SealedPrivateKey::seal(&key, &owner, &passphrase, params)
                })
                .await
                .map_err(|e| Error::Crypto(format!("Key sealing task failed: {}", e)))??;
                Zeroizing::new(sealed.to_json()?)
            }
            None => Zeroizing::new(keypair.private_key().as_pem().to_string()),
        };

        let private_path = self.private_path(user);
        write_private_file(&private_path, private_contents.as_bytes()).await?;
        if let Err(e) = fs::write(&public_path, keypair.public_key().as_pem()).await {
            // A lone private key would block every later registration.
            if let Err(cleanup) = fs::remove_file(&private_path).await {
                warn!(user = %user, error = %cleanup, "Failed to remove private key of failed registration");
            }
            return Err(e.into());
        }

        info!(user = %user, sealed = self.passphrase.is_some(), "User registered");
        Ok(keypair.public_key().clone())
    }
}

async fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            Error::AlreadyExists(format!("Key file already exists: {}", path.display()))
        } else {
            Error::Io(e)
        }
    })?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

async fn read_key_file(path: &Path, user: &UserId) -> Result<Zeroizing<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Zeroizing::new(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(format!("Unknown user: {}", user)))
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl UserDirectory for LocalKeyDirectory {
    async fn get_public_key(&self, user: &UserId) -> Result<PublicKey> {
        if !user.is_path_safe() {
            return Err(Error::NotFound(format!("Unknown user: {}", user)));
        }
        let pem = read_key_file(&self.public_path(user), user).await?;
        Ok(PublicKey::from_pem(pem.as_str()))
    }

    async fn get_private_key(&self, user: &UserId) -> Result<PrivateKey> {
        if !user.is_path_safe() {
            return Err(Error::NotFound(format!("Unknown user: {}", user)));
        }
        let content = read_key_file(&self.private_path(user), user).await?;

        if !content.trim_start().starts_with('{') {
            return Ok(PrivateKey::from_pem(content.as_str()));
        }

        let sealed = SealedPrivateKey::from_json(&content)?;
        let passphrase = self.passphrase.clone().ok_or_else(|| {
            Error::Config(format!("Private key of {} is sealed; a passphrase is required", user))
        })?;
        let owner = user.as_str().to_string();
        tokio::task::spawn_blocking(move || sealed.open(&owner, &passphrase))
            .await
            .map_err(|e| Error::Crypto(format!("Key unsealing task failed: {}", e)))?
    }
}
