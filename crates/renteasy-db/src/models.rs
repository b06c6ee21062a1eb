//! Row types for the collaborator tables. Kept apart from renteasy-types so
//! the password hash never reaches a serializable model.

use renteasy_types::models::User;

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub phone: Option<String>,
}

impl UserRow {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            phone: self.phone.clone(),
        }
    }
}

pub struct PropertyRow {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub price: f64,
}
