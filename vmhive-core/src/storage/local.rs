//! redb-backed local database
//!
//! Holds state that belongs to this node only: node configuration keys, the
//! consensus nodes this member knows about, and the locally trusted
//! certificate set. When running standalone, the cluster configuration table
//! stands in for the replicated database.

use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::{HiveError, HiveResult},
    types::{RaftNode, TrustedCertificate},
};

/// Node-local configuration keys (e.g. `core.https_address`)
pub const NODE_CONFIG_TABLE: TableDefinition<&str, &str> = TableDefinition::new("config");
/// Cluster configuration used by the standalone database
pub const CLUSTER_CONFIG_TABLE: TableDefinition<&str, &str> =
    TableDefinition::new("cluster_config");
/// Consensus nodes, non-empty once the member is clustered
pub const RAFT_NODES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_nodes");
/// Trusted certificates keyed by `<type>:<fingerprint>`
pub const CERTIFICATES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("certificates");

pub const KEY_HTTPS_ADDRESS: &str = "core.https_address";

pub struct LocalDatabase {
    database: RwLock<Option<Arc<Database>>>,
}

impl std::fmt::Debug for LocalDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDatabase")
            .field("open", &self.database.read().is_some())
            .finish()
    }
}

impl LocalDatabase {
    /// Open or create the database file and make sure all tables exist
    pub fn open(path: &Path) -> HiveResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database = Database::create(path).map_err(|e| HiveError::database("open local database", e))?;
        let database = Arc::new(database);
        init_database_tables(&database)?;

        info!(path = %path.display(), "Opened local database");
        Ok(Self {
            database: RwLock::new(Some(database)),
        })
    }

    fn handle(&self) -> HiveResult<Arc<Database>> {
        self.database
            .read()
            .clone()
            .ok_or_else(|| HiveError::not_initialized("local database"))
    }

    pub fn close(&self) -> HiveResult<()> {
        match self.database.write().take() {
            Some(_) => {
                debug!("Closed local database");
                Ok(())
            }
            None => Err(HiveError::not_initialized("local database")),
        }
    }

    pub fn config_get(&self, key: &str) -> HiveResult<Option<String>> {
        let database = self.handle()?;
        read_string(&database, NODE_CONFIG_TABLE, key)
    }

    pub fn config_set(&self, key: &str, value: &str) -> HiveResult<()> {
        let database = self.handle()?;
        write_string(&database, NODE_CONFIG_TABLE, key, value)
    }

    pub fn cluster_config(&self) -> HiveResult<HashMap<String, String>> {
        let database = self.handle()?;
        let read_txn = database.begin_read()?;
        let table = read_txn.open_table(CLUSTER_CONFIG_TABLE)?;

        let mut values = HashMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            values.insert(key.value().to_string(), value.value().to_string());
        }
        Ok(values)
    }

    pub fn cluster_config_set(&self, key: &str, value: &str) -> HiveResult<()> {
        let database = self.handle()?;
        write_string(&database, CLUSTER_CONFIG_TABLE, key, value)
    }

    pub fn raft_nodes(&self) -> HiveResult<Vec<RaftNode>> {
        let database = self.handle()?;
        let read_txn = database.begin_read()?;
        let table = read_txn.open_table(RAFT_NODES_TABLE)?;

        let mut nodes = Vec::new();
        for entry in table.iter()? {
            let (_, data) = entry?;
            nodes.push(bincode::deserialize(data.value())?);
        }
        Ok(nodes)
    }

    pub fn add_raft_node(&self, node: &RaftNode) -> HiveResult<()> {
        let database = self.handle()?;
        let data = bincode::serialize(node)?;
        let write_txn = database.begin_write()?;
        {
            let mut table = write_txn.open_table(RAFT_NODES_TABLE)?;
            table.insert(&node.id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// A member is clustered once it knows about at least one consensus node
    pub fn is_clustered(&self) -> HiveResult<bool> {
        Ok(!self.raft_nodes()?.is_empty())
    }

    pub fn certificates(&self) -> HiveResult<Vec<TrustedCertificate>> {
        let database = self.handle()?;
        let read_txn = database.begin_read()?;
        let table = read_txn.open_table(CERTIFICATES_TABLE)?;

        let mut certs = Vec::new();
        for entry in table.iter()? {
            let (_, data) = entry?;
            certs.push(bincode::deserialize(data.value())?);
        }
        Ok(certs)
    }

    /// Replace the whole certificate set in one transaction
    pub fn replace_certificates(&self, certs: &[TrustedCertificate]) -> HiveResult<()> {
        let database = self.handle()?;
        let write_txn = database.begin_write()?;
        {
            let mut table = write_txn.open_table(CERTIFICATES_TABLE)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|entry| entry.map(|(key, _)| key.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
            }

            for cert in certs {
                let key = certificate_key(cert);
                let data = bincode::serialize(cert)?;
                table.insert(key.as_str(), data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn certificate_key(cert: &TrustedCertificate) -> String {
    let cert_type = match cert.cert_type {
        crate::types::CertificateType::Server => "server",
        crate::types::CertificateType::Client => "client",
        crate::types::CertificateType::Metrics => "metrics",
    };
    format!("{}:{}", cert_type, cert.fingerprint)
}

fn read_string(
    database: &Database,
    table: TableDefinition<'static, &'static str, &'static str>,
    key: &str,
) -> HiveResult<Option<String>> {
    let read_txn = database.begin_read()?;
    let table = read_txn.open_table(table)?;
    let value = table.get(key)?.map(|v| v.value().to_string());
    Ok(value)
}

fn write_string(
    database: &Database,
    table: TableDefinition<'static, &'static str, &'static str>,
    key: &str,
    value: &str,
) -> HiveResult<()> {
    let write_txn = database.begin_write()?;
    {
        let mut table = write_txn.open_table(table)?;
        table.insert(key, value)?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Create all tables so later read transactions never see a missing table
pub fn init_database_tables(database: &Database) -> HiveResult<()> {
    let write_txn = database.begin_write()?;

    let _ = write_txn.open_table(NODE_CONFIG_TABLE)?;
    let _ = write_txn.open_table(CLUSTER_CONFIG_TABLE)?;
    let _ = write_txn.open_table(RAFT_NODES_TABLE)?;
    let _ = write_txn.open_table(CERTIFICATES_TABLE)?;

    write_txn.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CertificateType, RaftRole};
    use pretty_assertions::assert_eq;

    fn cert(cert_type: CertificateType, fingerprint: &str) -> TrustedCertificate {
        TrustedCertificate {
            cert_type,
            fingerprint: fingerprint.to_string(),
            name: format!("{}-name", fingerprint),
            certificate: vec![1, 2, 3],
            restricted: false,
            projects: vec![],
        }
    }

    #[test]
    fn test_config_round_trip_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocalDatabase::open(&dir.path().join("database/local.redb")).unwrap();

        assert_eq!(db.config_get(KEY_HTTPS_ADDRESS).unwrap(), None);
        db.config_set(KEY_HTTPS_ADDRESS, "127.0.0.1:8443").unwrap();
        assert_eq!(
            db.config_get(KEY_HTTPS_ADDRESS).unwrap().as_deref(),
            Some("127.0.0.1:8443")
        );

        db.close().unwrap();
        assert!(matches!(
            db.config_get(KEY_HTTPS_ADDRESS),
            Err(HiveError::NotInitialized { .. })
        ));
        assert!(db.close().is_err());
    }

    #[test]
    fn test_clustered_follows_raft_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocalDatabase::open(&dir.path().join("local.redb")).unwrap();
        assert!(!db.is_clustered().unwrap());

        db.add_raft_node(&RaftNode {
            id: 1,
            address: "10.0.0.1:8443".to_string(),
            role: RaftRole::Voter,
        })
        .unwrap();
        assert!(db.is_clustered().unwrap());
        assert_eq!(db.raft_nodes().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_certificates_drops_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let db = LocalDatabase::open(&dir.path().join("local.redb")).unwrap();

        db.replace_certificates(&[
            cert(CertificateType::Client, "aa"),
            cert(CertificateType::Server, "bb"),
        ])
        .unwrap();
        db.replace_certificates(&[cert(CertificateType::Metrics, "cc")])
            .unwrap();

        let certs = db.certificates().unwrap();
        assert_eq!(certs, vec![cert(CertificateType::Metrics, "cc")]);
    }
}
