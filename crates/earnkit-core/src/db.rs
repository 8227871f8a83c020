//! SQLite cache for pool info and positions.
//!
//! The stores flush here on their debounce timer; rows are the same JSON
//! documents held in memory, keyed exactly as the stores key them
//! (`slug`, `slug---address`). Old rows with missing fields keep loading
//! through the serde defaults on the domain types.

use std::path::Path;

use rusqlite::{Connection, params};
use thiserror::Error;

use crate::slug::position_key;
use crate::types::{YieldPoolInfo, YieldPositionInfo};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Earning cache database.
pub struct EarningDb {
    conn: Connection,
}

impl EarningDb {
    /// Open (and migrate) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn })
    }

    fn init(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS yield_pool_info (
                slug TEXT PRIMARY KEY,
                chain TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                data TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS yield_position (
                key TEXT PRIMARY KEY,
                chain TEXT NOT NULL,
                address TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_position_address
                ON yield_position(address);
            CREATE INDEX IF NOT EXISTS idx_position_chain
                ON yield_position(chain);",
        )?;
        Ok(())
    }

    /// Bulk-upsert pool info rows.
    pub fn upsert_pools(&mut self, pools: &[YieldPoolInfo]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO yield_pool_info (slug, chain, last_updated, data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slug) DO UPDATE SET
                     chain = excluded.chain,
                     last_updated = excluded.last_updated,
                     data = excluded.data",
            )?;
            for pool in pools {
                let data = serde_json::to_string(pool)?;
                stmt.execute(params![
                    pool.slug,
                    pool.chain,
                    pool.last_updated as i64,
                    data
                ])?;
            }
        }
        tx.commit()?;
        Ok(pools.len())
    }

    /// Bulk-upsert position rows.
    pub fn upsert_positions(&mut self, positions: &[YieldPositionInfo]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO yield_position (key, chain, address, data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     chain = excluded.chain,
                     address = excluded.address,
                     data = excluded.data",
            )?;
            for position in positions {
                let key = position_key(&position.slug, &position.address);
                let data = serde_json::to_string(position)?;
                stmt.execute(params![key, position.chain, position.address, data])?;
            }
        }
        tx.commit()?;
        Ok(positions.len())
    }

    /// Load every cached pool.
    pub fn all_pools(&self) -> Result<Vec<YieldPoolInfo>, DbError> {
        let mut stmt = self.conn.prepare("SELECT data FROM yield_pool_info")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut pools = Vec::new();
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(pool) => pools.push(pool),
                Err(e) => tracing::warn!("Skipping unreadable pool row: {e}"),
            }
        }
        Ok(pools)
    }

    /// Load every cached position.
    pub fn all_positions(&self) -> Result<Vec<YieldPositionInfo>, DbError> {
        let mut stmt = self.conn.prepare("SELECT data FROM yield_position")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut positions = Vec::new();
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(position) => positions.push(position),
                Err(e) => tracing::warn!("Skipping unreadable position row: {e}"),
            }
        }
        Ok(positions)
    }

    /// Drop all positions of an address removed from the wallet.
    pub fn remove_positions_by_address(&mut self, address: &str) -> Result<usize, DbError> {
        let count = self
            .conn
            .execute("DELETE FROM yield_position WHERE address = ?1", [address])?;
        Ok(count)
    }

    /// Drop all positions on a disabled chain.
    pub fn remove_positions_by_chain(&mut self, chain: &str) -> Result<usize, DbError> {
        let count = self
            .conn
            .execute("DELETE FROM yield_position WHERE chain = ?1", [chain])?;
        Ok(count)
    }

    /// Full reset: drop every cached row.
    pub fn reset(&mut self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "DELETE FROM yield_pool_info;
             DELETE FROM yield_position;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EarningStatus, YieldPoolMetadata, YieldPoolType};

    fn pool(slug: &str, chain: &str, last_updated: u64) -> YieldPoolInfo {
        YieldPoolInfo {
            slug: slug.to_string(),
            chain: chain.to_string(),
            pool_type: YieldPoolType::NativeStaking,
            metadata: YieldPoolMetadata {
                name: slug.to_string(),
                input_asset: format!("DOT___{chain}"),
                ..Default::default()
            },
            statistic: None,
            last_updated,
        }
    }

    fn position(slug: &str, chain: &str, address: &str) -> YieldPositionInfo {
        YieldPositionInfo::with_computed_total(
            slug,
            chain,
            address,
            YieldPoolType::NativeStaking,
            1_000,
            EarningStatus::EarningReward,
            vec![],
            vec![],
        )
    }

    #[test]
    fn upsert_overwrites_by_key() {
        let mut db = EarningDb::open_memory().unwrap();
        db.upsert_pools(&[pool("a", "polkadot", 1)]).unwrap();
        db.upsert_pools(&[pool("a", "polkadot", 2), pool("b", "kusama", 1)])
            .unwrap();

        let mut pools = db.all_pools().unwrap();
        pools.sort_by(|a, b| a.slug.cmp(&b.slug));
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].last_updated, 2);
    }

    #[test]
    fn positions_delete_by_address_and_chain() {
        let mut db = EarningDb::open_memory().unwrap();
        db.upsert_positions(&[
            position("a", "polkadot", "alice"),
            position("b", "kusama", "alice"),
            position("a", "polkadot", "bob"),
        ])
        .unwrap();

        assert_eq!(db.remove_positions_by_address("alice").unwrap(), 2);
        assert_eq!(db.all_positions().unwrap().len(), 1);

        assert_eq!(db.remove_positions_by_chain("polkadot").unwrap(), 1);
        assert!(db.all_positions().unwrap().is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let mut db = EarningDb::open_memory().unwrap();
        db.upsert_pools(&[pool("a", "polkadot", 1)]).unwrap();
        db.upsert_positions(&[position("a", "polkadot", "alice")])
            .unwrap();
        db.reset().unwrap();
        assert!(db.all_pools().unwrap().is_empty());
        assert!(db.all_positions().unwrap().is_empty());
    }

    #[test]
    fn round_trips_documents_intact() {
        let mut db = EarningDb::open_memory().unwrap();
        let original = position("a", "polkadot", "alice");
        db.upsert_positions(std::slice::from_ref(&original)).unwrap();
        assert_eq!(db.all_positions().unwrap(), vec![original]);
    }
}
