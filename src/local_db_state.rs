//! Durable local storage on LMDB.
//!
//! Plays the part browser local storage plays for a page: string values that survive
//! restarts, shared by everything in the process. The offline queue and the offline
//! response cache live here.

use std::path::{Path, PathBuf};

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{info, warn};
use serde_json::Value;

use crate::error::Result;
use crate::store::{stringify_value, KeyValueStore};

const DB_NAME: &str = "local_storage";
const MAP_SIZE: usize = 64 * 1024 * 1024;

pub struct LocalDbState {
    env: Environment,
    db: Database,
    path: PathBuf,
}

impl LocalDbState {
    /// Opens (or creates) the store in `<name>.lmdb`.
    pub fn init(name: impl AsRef<Path>) -> Result<Self> {
        let mut dir = name.as_ref().as_os_str().to_owned();
        dir.push(".lmdb");
        Self::open_dir(PathBuf::from(dir))
    }

    /// Opens (or creates) the store in exactly `dir`.
    pub fn open_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let path = dir.into();
        if !path.exists() {
            info!("Creating local storage at: {}", path.display());
            std::fs::create_dir_all(&path)?;
        }

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(MAP_SIZE)
            .open(&path)?;
        let db = env.create_db(Some(DB_NAME), DatabaseFlags::empty())?;

        info!("Local storage opened at: {}", path.display());
        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let txn = self.env.begin_ro_txn()?;
        let value = match txn.get(self.db, &key) {
            Ok(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        txn.abort();
        Ok(value)
    }

    pub fn put_string(&self, key: &str, value: &str) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    /// Returns `true` if the key existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut txn = self.env.begin_rw_txn()?;
        let existed = match txn.del(self.db, &key, None) {
            Ok(()) => true,
            Err(lmdb::Error::NotFound) => false,
            Err(e) => return Err(e.into()),
        };
        txn.commit()?;
        Ok(existed)
    }

    pub fn all_keys(&self) -> Result<Vec<String>> {
        let txn = self.env.begin_ro_txn()?;
        let keys = {
            let mut cursor = txn.open_ro_cursor(self.db)?;
            cursor
                .iter_start()
                .map(|(key, _)| String::from_utf8_lossy(key).into_owned())
                .collect::<Vec<_>>()
        };
        txn.abort();
        Ok(keys)
    }

    pub fn clear_all_records(&self) -> Result<()> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.db)?;
        txn.commit()?;
        warn!("Local storage at {} cleared", self.path.display());
        Ok(())
    }
}

impl KeyValueStore for LocalDbState {
    fn get_item(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_string(key)?.map(Value::String))
    }

    fn set_item(&mut self, key: &str, value: Value) -> Result<()> {
        self.put_string(key, &stringify_value(&value))
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.delete(key)?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.all_keys()
    }

    fn clear(&mut self) -> Result<()> {
        self.clear_all_records()
    }
}
