//! UUID utilities

use uuid::Uuid;

/// Generate a new UUIDv4 (tracking ids)
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Random token for a Message-ID local part
pub fn message_token() -> String {
    Uuid::new_v4().simple().to_string()
}
