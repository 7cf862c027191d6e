use super::SettleStore;
use crate::{
    error::SettleResult,
    pool::{PoolMember, PoolMembers},
};
use rusqlite::params;

impl SettleStore {
    pub fn insert_collection_member(
        &self,
        collection_id: &str,
        business_id: &str,
        contribution_percent: f64,
    ) -> SettleResult<()> {
        self.conn.execute(
            "INSERT INTO collection_member (collection_id, business_id, contribution_percent)
             VALUES (?1, ?2, ?3)",
            params![collection_id, business_id, contribution_percent],
        )?;
        Ok(())
    }

    /// Load a collection's membership as a validated `PoolMembers` value.
    /// An unknown collection surfaces as the empty-membership error.
    pub fn get_pool_members(&self, collection_id: &str) -> SettleResult<PoolMembers> {
        let mut stmt = self.conn.prepare(
            "SELECT business_id, contribution_percent FROM collection_member
             WHERE collection_id = ?1 ORDER BY business_id ASC",
        )?;
        let members = stmt
            .query_map(params![collection_id], |row| {
                Ok(PoolMember {
                    business_id: row.get(0)?,
                    contribution_percent: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        PoolMembers::new(members)
    }
}
