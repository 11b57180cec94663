use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::state::{WalletMeta, WalletMode};
use super::ShelleyWallet;
use crate::backend::Backend;
use crate::config::WalletConfig;
use crate::crypto::{validate_password, AccountPublicKey, EncryptedRootKey, KeyManager};
use crate::error::{Result, WalletError};
use crate::storage::{read_json, write_json, KeyValueStore, ScopedStore};
use crate::tx::ledger::HwDeviceInfo;

const META_PREFIX: &str = "wallets/";
const WALLET_FOLDER: &str = "wallet";

/// Owns every open wallet; persisted wallets are listed from their metadata
pub struct WalletManager {
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn Backend>,
    config: WalletConfig,
    open: RwLock<HashMap<String, Arc<ShelleyWallet>>>,
}

impl WalletManager {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: Arc<dyn Backend>, config: WalletConfig) -> Self {
        Self {
            store,
            backend,
            config,
            open: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    fn wallet_store(&self, id: &str) -> Arc<dyn KeyValueStore> {
        Arc::new(ScopedStore::new(self.store.clone(), &format!("{}/{}", WALLET_FOLDER, id)))
    }

    fn meta_key(id: &str) -> String {
        format!("{}{}", META_PREFIX, id)
    }

    async fn ensure_name_free(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(WalletError::InvalidInput("Wallet name is empty".to_string()));
        }
        if self.list().await?.iter().any(|m| m.name == name) {
            return Err(WalletError::WalletExists(name.to_string()));
        }
        Ok(())
    }

    async fn register(
        &self,
        name: &str,
        mode: WalletMode,
        account: AccountPublicKey,
        root_key: Option<EncryptedRootKey>,
    ) -> Result<Arc<ShelleyWallet>> {
        let id = uuid::Uuid::new_v4().to_string();
        let meta = WalletMeta {
            id: id.clone(),
            name: name.to_string(),
            kind: mode.kind(),
            network: self.config.network,
            created_at: Utc::now(),
        };

        let wallet = ShelleyWallet::create(
            &id,
            self.wallet_store(&id),
            self.backend.clone(),
            self.config.clone(),
            mode,
            account,
            root_key,
        )
        .await?;
        write_json(self.store.as_ref(), &Self::meta_key(&id), &meta).await?;

        self.open.write().insert(id.clone(), wallet.clone());
        log::info!("Registered wallet '{}' ({})", name, id);
        Ok(wallet)
    }

    /// Software wallet from a mnemonic; the root key is stored encrypted
    pub async fn create_wallet(&self, name: &str, mnemonic: &str, password: &str) -> Result<Arc<ShelleyWallet>> {
        validate_password(password)?;
        self.ensure_name_free(name).await?;

        let root_key = KeyManager::root_key_from_mnemonic(mnemonic, self.config.network)?;
        let account = root_key.account_public_key()?;
        let encrypted = EncryptedRootKey::encrypt(&root_key, password, self.config.kdf)?;
        drop(root_key);

        self.register(name, WalletMode::Software, account, Some(encrypted))
            .await
    }

    pub async fn create_hw_wallet(
        &self,
        name: &str,
        account_pub_key_hex: &str,
        device_info: HwDeviceInfo,
    ) -> Result<Arc<ShelleyWallet>> {
        self.ensure_name_free(name).await?;
        let account = AccountPublicKey::from_hex(account_pub_key_hex)?;
        self.register(name, WalletMode::Hardware(device_info), account, None)
            .await
    }

    pub async fn create_read_only_wallet(&self, name: &str, account_pub_key_hex: &str) -> Result<Arc<ShelleyWallet>> {
        self.ensure_name_free(name).await?;
        let account = AccountPublicKey::from_hex(account_pub_key_hex)?;
        self.register(name, WalletMode::ReadOnly, account, None).await
    }

    /// Already-open wallets are returned as is
    pub async fn open(&self, id: &str) -> Result<Arc<ShelleyWallet>> {
        if let Some(wallet) = self.get(id) {
            return Ok(wallet);
        }

        let meta = self.meta(id).await?;
        let wallet = ShelleyWallet::restore(
            id,
            self.wallet_store(id),
            self.backend.clone(),
            self.config.clone(),
        )
        .await?;
        if wallet.mode().kind() != meta.kind {
            return Err(WalletError::InvalidState(format!(
                "Wallet {} metadata says {:?}, data says {:?}",
                id,
                meta.kind,
                wallet.mode().kind()
            )));
        }

        // A concurrent open may have won
        let wallet = self
            .open
            .write()
            .entry(id.to_string())
            .or_insert(wallet)
            .clone();
        log::info!("Opened wallet '{}' ({})", meta.name, id);
        Ok(wallet)
    }

    /// Stops background sync and forgets the instance; data stays on disk
    pub fn close(&self, id: &str) -> Result<()> {
        let wallet = self
            .open
            .write()
            .remove(id)
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))?;
        wallet.close();
        Ok(())
    }

    pub async fn meta(&self, id: &str) -> Result<WalletMeta> {
        read_json(self.store.as_ref(), &Self::meta_key(id))
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(id.to_string()))
    }

    /// Persisted wallets, oldest first
    pub async fn list(&self) -> Result<Vec<WalletMeta>> {
        let mut wallets = Vec::new();
        for key in self.store.keys(META_PREFIX).await? {
            match read_json::<WalletMeta>(self.store.as_ref(), &key).await {
                Ok(Some(meta)) => wallets.push(meta),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable wallet metadata {}: {}", key, e),
            }
        }
        wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(wallets)
    }

    pub fn open_wallets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.open.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<Arc<ShelleyWallet>> {
        self.open.read().get(id).cloned()
    }

    /// Closes the wallet and waits out its in-flight sync before wiping
    pub async fn remove_wallet(&self, id: &str) -> Result<()> {
        self.meta(id).await?;
        let open = self.open.write().remove(id);
        if let Some(wallet) = open {
            wallet.close();
            wallet.clear().await?;
        }
        ScopedStore::new(self.store.clone(), &format!("{}/{}", WALLET_FOLDER, id))
            .clear()
            .await?;
        self.store.remove(&Self::meta_key(id)).await?;
        log::info!("Removed wallet {}", id);
        Ok(())
    }

    /// Close every open wallet
    pub fn close_all(&self) {
        let wallets: Vec<Arc<ShelleyWallet>> = self.open.write().drain().map(|(_, w)| w).collect();
        for wallet in wallets {
            wallet.close();
        }
    }
}
