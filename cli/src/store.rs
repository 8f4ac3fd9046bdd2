// Contact and message history store for the Nexus CLI
//
// sled-backed, two trees: contacts keyed by peer name, messages keyed by
// "<contact>\0<sequence>" with a monotonic sequence, so a prefix scan over
// one contact returns messages in arrival order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Peer identity this contact is known by
    pub name: String,

    /// When the contact was first seen (unix millis)
    pub added_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,

    /// Contact the exchange was with
    pub contact: String,

    /// Message content
    pub text: String,

    /// Direction from our perspective
    pub direction: Direction,

    /// Timestamp (unix millis)
    pub timestamp: u64,
}

impl MessageRecord {
    pub fn timestamp_display(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

pub struct Store {
    db: Db,
    contacts: sled::Tree,
    messages: sled::Tree,
}

impl Store {
    /// Open or create the store at `path`
    pub fn open(path: PathBuf) -> Result<Self> {
        let db = sled::open(path).context("Failed to open store")?;
        let contacts = db
            .open_tree("contacts")
            .context("Failed to open contacts tree")?;
        let messages = db
            .open_tree("messages")
            .context("Failed to open messages tree")?;
        Ok(Self {
            db,
            contacts,
            messages,
        })
    }

    /// Record a contact. Adding a name that already exists changes nothing.
    pub fn add_contact(&self, name: &str) -> Result<()> {
        if self.contacts.contains_key(name.as_bytes())? {
            return Ok(());
        }
        let contact = Contact {
            name: name.to_string(),
            added_at: current_timestamp_millis(),
        };
        let value = serde_json::to_vec(&contact).context("Failed to serialize contact")?;
        self.contacts
            .insert(name.as_bytes(), value)
            .context("Failed to insert contact")?;
        Ok(())
    }

    /// All known contacts, by name
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut contacts = Vec::new();
        for entry in self.contacts.iter() {
            let (_, value) = entry.context("Failed to read contact")?;
            let contact: Contact =
                serde_json::from_slice(&value).context("Failed to parse contact")?;
            contacts.push(contact);
        }
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(contacts)
    }

    /// Record one exchanged message; the contact is created if unknown.
    pub fn add_message(
        &self,
        contact: &str,
        text: &str,
        direction: Direction,
    ) -> Result<MessageRecord> {
        self.add_contact(contact)?;

        let record = MessageRecord {
            id: uuid::Uuid::new_v4().to_string(),
            contact: contact.to_string(),
            text: text.to_string(),
            direction,
            timestamp: current_timestamp_millis(),
        };
        let sequence = self.db.generate_id().context("Failed to allocate id")?;
        let key = message_key(contact, sequence);
        let value = serde_json::to_vec(&record).context("Failed to serialize message")?;
        self.messages
            .insert(key, value)
            .context("Failed to insert message")?;
        Ok(record)
    }

    /// Messages exchanged with `contact`, oldest first
    pub fn list_messages(&self, contact: &str) -> Result<Vec<MessageRecord>> {
        let prefix = format!("{contact}\0");
        let mut records = Vec::new();
        for entry in self.messages.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry.context("Failed to read message")?;
            let record: MessageRecord =
                serde_json::from_slice(&value).context("Failed to parse message")?;
            records.push(record);
        }
        Ok(records)
    }
}

fn message_key(contact: &str, sequence: u64) -> Vec<u8> {
    format!("{contact}\0{sequence:020}").into_bytes()
}

fn current_timestamp_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
