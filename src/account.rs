use crate::catalog::{Catalog, Store};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// One login: its settings and a handle for each store.
pub struct Account {
    pub name: String,
    pub config: Arc<AppConfig>,
    beatport: Arc<dyn Catalog>,
    beatsource: Arc<dyn Catalog>,
}

impl Account {
    pub fn new(
        name: impl Into<String>,
        config: AppConfig,
        beatport: Arc<dyn Catalog>,
        beatsource: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            beatport,
            beatsource,
        }
    }

    pub fn catalog(&self, store: Store) -> Arc<dyn Catalog> {
        match store {
            Store::Beatport => Arc::clone(&self.beatport),
            Store::Beatsource => Arc::clone(&self.beatsource),
        }
    }
}

/// The logged-in accounts plus which one is in use.
///
/// Every read of the active account goes through the same lock as rotation,
/// so a task never sees a half-finished switch.
pub struct AccountPool {
    accounts: Vec<Arc<Account>>,
    active: Mutex<usize>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>) -> Result<Self> {
        if accounts.is_empty() {
            return Err(Error::NoAccounts);
        }
        Ok(Self {
            accounts: accounts.into_iter().map(Arc::new).collect(),
            active: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn current(&self) -> Arc<Account> {
        self.snapshot().1
    }

    pub fn active_index(&self) -> usize {
        *self.lock()
    }

    /// The active account together with its position, read atomically.
    pub fn snapshot(&self) -> (usize, Arc<Account>) {
        let index = *self.lock();
        (index, Arc::clone(&self.accounts[index]))
    }

    /// Moves to the next account. `false` when there is nothing to move to.
    pub fn rotate(&self) -> bool {
        if self.accounts.len() < 2 {
            return false;
        }
        let next = {
            let mut active = self.lock();
            *active = (*active + 1) % self.accounts.len();
            *active
        };
        info!("🔁 Switched to account {}", self.accounts[next].name);
        true
    }

    /// Rotates only if `seen` is still the active account.
    ///
    /// Tasks that failed on the same account around the same time all call
    /// this with the index they used; the first one moves the cursor and the
    /// rest find it already moved. Returns whether a different account than
    /// `seen` is now active.
    pub fn rotate_from(&self, seen: usize) -> bool {
        if self.accounts.len() < 2 {
            return false;
        }
        let switched_to = {
            let mut active = self.lock();
            if *active == seen {
                *active = (*active + 1) % self.accounts.len();
                Some(*active)
            } else {
                None
            }
        };
        if let Some(next) = switched_to {
            info!("🔁 Switched to account {}", self.accounts[next].name);
        }
        true
    }

    /// Runs `op` against the active account's `store` handle.
    ///
    /// An auth or rate-limit failure switches accounts and retries exactly
    /// once on the new one. Whatever the retry returns is final.
    pub async fn with_failover<T, F, Fut>(&self, store: Store, what: &str, op: F) -> Result<T>
    where
        F: Fn(Arc<Account>, Arc<dyn Catalog>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (index, account) = self.snapshot();
        let catalog = account.catalog(store);
        let served_by = catalog.store();
        let err = match op(account, catalog).await {
            Err(e) if e.needs_failover() => e,
            other => return other,
        };

        warn!(
            "⚠️  {} on {} failed for {}: {}",
            what, served_by, self.accounts[index].name, err
        );
        if !self.rotate_from(index) {
            return Err(err);
        }

        let account = self.current();
        let catalog = account.catalog(store);
        op(account, catalog).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
