//! LID to phone-number mapping

use crate::protocol::{jid, ContactLink};
use dashmap::DashMap;
use tracing::info;

/// Bidirectional map between linked identities (`@lid`) and phone JIDs
#[derive(Debug, Default)]
pub struct LidMap {
    links: DashMap<String, String>,
}

impl LidMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `lid` and `phone` are the same account
    pub fn store(&self, lid: &str, phone: &str) {
        if lid.is_empty() || phone.is_empty() {
            return;
        }
        self.links.insert(lid.to_string(), phone.to_string());
        self.links.insert(phone.to_string(), lid.to_string());
    }

    /// Feed contact links from a contacts event
    pub fn update(&self, contacts: &[ContactLink]) {
        let mut stored = 0;
        for contact in contacts {
            if let Some(lid) = &contact.lid {
                self.store(lid, &contact.id);
                stored += 1;
            }
        }
        if stored > 0 {
            info!("LID mappings updated: {} entries", self.links.len());
        }
    }

    /// Phone JID for a known LID; any other ID is returned unchanged
    pub fn resolve(&self, id: &str) -> String {
        if jid::is_lid(id) {
            if let Some(phone) = self.links.get(id) {
                return phone.clone();
            }
        }
        id.to_string()
    }

    /// Number of stored entries (each link counts twice)
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let map = LidMap::new();
        map.update(&[
            ContactLink { id: "51999@s.whatsapp.net".to_string(), lid: Some("777@lid".to_string()) },
            ContactLink { id: "51888@s.whatsapp.net".to_string(), lid: None },
        ]);

        assert_eq!(map.resolve("777@lid"), "51999@s.whatsapp.net");
        assert_eq!(map.resolve("888@lid"), "888@lid");
        assert_eq!(map.resolve("51999@s.whatsapp.net"), "51999@s.whatsapp.net");
        assert_eq!(map.len(), 2);
    }
}
