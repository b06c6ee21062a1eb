use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use crate::models::{PropertyRow, UserRow};
use crate::{Database, Result};

impl Database {
    // -- Users --

    /// Returns the new user's id.
    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (email, password_hash, name, phone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![email, password_hash, name, phone, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Returns false if no such user exists.
    pub fn update_user_role(&self, id: i64, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                rusqlite::params![role, id],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Properties --

    /// Listing CRUD lives elsewhere; this is enough to anchor conversations
    /// and seed fixtures.
    pub fn create_property(&self, owner_id: i64, title: &str, price: f64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO properties (owner_id, title, price, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![owner_id, title, price, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_property(&self, id: i64) -> Result<Option<PropertyRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, title, price FROM properties WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(PropertyRow {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            title: row.get(2)?,
                            price: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_user(
    conn: &Connection,
    predicate: &str,
    value: impl rusqlite::ToSql,
) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, email, password_hash, name, role, phone FROM users WHERE {}",
        predicate
    );
    let row = conn.query_row(&sql, [value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        role: row.get(4)?,
        phone: row.get(5)?,
    })
}
