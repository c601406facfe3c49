//! Command permission levels

use crate::protocol::{jid, GroupMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Permission level of a message sender, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    User,
    Premium,
    Admin,
    Owner,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionLevel::User => "user",
            PermissionLevel::Premium => "premium",
            PermissionLevel::Admin => "admin",
            PermissionLevel::Owner => "owner",
        };
        f.write_str(name)
    }
}

/// Resolve the level of `sender`.
///
/// The bot account itself and the configured owner number are owners; group
/// admins are admins; premium users come next.
pub fn permission_level(
    sender: &str,
    from_me: bool,
    owner_number: Option<&str>,
    metadata: Option<&GroupMetadata>,
    premium: bool,
) -> PermissionLevel {
    let number = jid::user_part(sender);
    if from_me || owner_number.map(str::trim) == Some(number) {
        return PermissionLevel::Owner;
    }

    if metadata.map(|m| m.is_admin(sender)).unwrap_or(false) {
        return PermissionLevel::Admin;
    }

    if premium {
        PermissionLevel::Premium
    } else {
        PermissionLevel::User
    }
}
