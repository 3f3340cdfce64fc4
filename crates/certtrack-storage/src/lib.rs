use certtrack_core::keys::{
    self, EntityKind, IndexKey, ItemKey, UNSENT_REMINDERS_PARTITION,
};
use certtrack_core::{
    AnalyticsSummary, CertificationRecord, CertificationStatus, ReminderEvent, UserProfile,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

pub const STORE_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("item key mismatch: expected {expected}, found {found}")]
    KeyMismatch { expected: String, found: String },
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Persistence contract the lifecycle engine runs against. Every item is
/// addressed through `certtrack_core::keys`.
pub trait CertificationStore {
    fn certifications(&self, owner: &str) -> Result<Vec<CertificationRecord>, StorageError>;

    fn certification(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<Option<CertificationRecord>, StorageError>;

    fn put_certification(&self, record: &CertificationRecord) -> Result<(), StorageError>;

    /// Returns whether a record was removed.
    fn delete_certification(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<bool, StorageError>;

    /// Status-index range query; `expiring_before` is exclusive.
    fn certifications_by_status(
        &self,
        owner: &str,
        status: CertificationStatus,
        expiring_before: Option<NaiveDate>,
    ) -> Result<Vec<CertificationRecord>, StorageError>;

    /// Category-index range query; `expiring_before` is exclusive.
    fn certifications_by_category(
        &self,
        owner: &str,
        category: &str,
        expiring_before: Option<NaiveDate>,
    ) -> Result<Vec<CertificationRecord>, StorageError>;

    /// Owners holding at least one certification.
    fn owners(&self) -> Result<Vec<String>, StorageError>;

    fn put_reminders(&self, reminders: &[ReminderEvent]) -> Result<(), StorageError>;

    fn delete_reminders(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<usize, StorageError>;

    /// Drops every stored reminder of the certification, then writes the new
    /// set. Implementations that can should do both in one transaction.
    fn replace_reminders(
        &self,
        owner: &str,
        certification_id: &str,
        reminders: &[ReminderEvent],
    ) -> Result<(), StorageError> {
        ensure_reminders_belong(owner, certification_id, reminders)?;
        self.delete_reminders(owner, certification_id)?;
        self.put_reminders(reminders)
    }

    fn reminders(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<Vec<ReminderEvent>, StorageError>;

    /// Unsent reminders scheduled on or before the given date, across owners.
    fn due_reminders(&self, on_or_before: NaiveDate) -> Result<Vec<ReminderEvent>, StorageError>;

    /// Conditional on the stored reminder still matching `reminder`'s
    /// schedule; returns false when it was regenerated or removed meanwhile.
    fn mark_reminder_sent(
        &self,
        reminder: &ReminderEvent,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    fn put_analytics_summary(&self, summary: &AnalyticsSummary) -> Result<(), StorageError>;

    fn analytics_summary(
        &self,
        owner: &str,
        month: &str,
    ) -> Result<Option<AnalyticsSummary>, StorageError>;

    fn put_profile(&self, profile: &UserProfile) -> Result<(), StorageError>;

    fn profile(&self, owner: &str) -> Result<Option<UserProfile>, StorageError>;
}

#[derive(Debug, Clone, Copy)]
enum SecondaryIndex {
    /// Certifications by status; unsent reminders by due date.
    Gsi1,
    /// Certifications by category.
    Gsi2,
}

impl SecondaryIndex {
    fn columns(&self) -> (&'static str, &'static str) {
        match self {
            SecondaryIndex::Gsi1 => ("gsi1pk", "gsi1sk"),
            SecondaryIndex::Gsi2 => ("gsi2pk", "gsi2sk"),
        }
    }
}

struct ItemRow<'a> {
    key: &'a ItemKey,
    entity: EntityKind,
    gsi1: Option<&'a IndexKey>,
    gsi2: Option<&'a IndexKey>,
    payload_json: String,
}

/// Single-table SQLite store mirroring a partition/sort key layout with two
/// secondary indexes.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let mut current = self.schema_version()?;
        if current > STORE_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: STORE_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_single_table.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_entity_index.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn item_count(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?)
    }

    fn query_index<T: DeserializeOwned>(
        &self,
        index: SecondaryIndex,
        pk: &str,
        sk_before: Option<String>,
    ) -> Result<Vec<T>, StorageError> {
        let (pk_column, sk_column) = index.columns();
        let upper = sk_before.unwrap_or_else(|| char::MAX.to_string());
        let sql = format!(
            "
            SELECT payload_json
            FROM items
            WHERE {pk_column} = ?1 AND {sk_column} < ?2
            ORDER BY {sk_column} ASC
            "
        );
        let mut statement = self.conn.prepare(&sql)?;
        let rows = statement.query_map(params![pk, upper], |row| row.get::<_, String>(0))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(decode(&row?)?);
        }
        Ok(items)
    }
}

impl CertificationStore for SqliteStore {
    fn certifications(&self, owner: &str) -> Result<Vec<CertificationRecord>, StorageError> {
        query_partition_prefix(
            &self.conn,
            &keys::user_partition(owner),
            keys::CERTIFICATION_PREFIX,
        )
    }

    fn certification(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<Option<CertificationRecord>, StorageError> {
        get_item(&self.conn, &keys::certification_key(owner, certification_id))
    }

    fn put_certification(&self, record: &CertificationRecord) -> Result<(), StorageError> {
        let record_keys = keys::certification_keys(record);
        put_item(
            &self.conn,
            ItemRow {
                key: &record_keys.primary,
                entity: EntityKind::Certification,
                gsi1: Some(&record_keys.by_status),
                gsi2: Some(&record_keys.by_category),
                payload_json: encode(record)?,
            },
            record.updated_at,
        )
    }

    fn delete_certification(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<bool, StorageError> {
        delete_item(&self.conn, &keys::certification_key(owner, certification_id))
    }

    fn certifications_by_status(
        &self,
        owner: &str,
        status: CertificationStatus,
        expiring_before: Option<NaiveDate>,
    ) -> Result<Vec<CertificationRecord>, StorageError> {
        self.query_index(
            SecondaryIndex::Gsi1,
            &keys::status_index_partition(owner, status),
            expiring_before.map(keys::expiring_before_bound),
        )
    }

    fn certifications_by_category(
        &self,
        owner: &str,
        category: &str,
        expiring_before: Option<NaiveDate>,
    ) -> Result<Vec<CertificationRecord>, StorageError> {
        self.query_index(
            SecondaryIndex::Gsi2,
            &keys::category_index_partition(owner, category),
            expiring_before.map(keys::expiring_before_bound),
        )
    }

    fn owners(&self) -> Result<Vec<String>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT DISTINCT pk
            FROM items
            WHERE entity = ?1
            ORDER BY pk ASC
            ",
        )?;
        let rows = statement.query_map([EntityKind::Certification.as_str()], |row| {
            row.get::<_, String>(0)
        })?;

        let mut owners = BTreeSet::new();
        for row in rows {
            let pk = row?;
            if let Some(owner) = keys::owner_from_partition(&pk) {
                owners.insert(owner.to_string());
            }
        }
        Ok(owners.into_iter().collect())
    }

    fn put_reminders(&self, reminders: &[ReminderEvent]) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        for reminder in reminders {
            put_reminder(&tx, reminder)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_reminders(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<usize, StorageError> {
        delete_partition_prefix(
            &self.conn,
            &keys::user_partition(owner),
            &keys::reminder_prefix(certification_id),
        )
    }

    fn replace_reminders(
        &self,
        owner: &str,
        certification_id: &str,
        reminders: &[ReminderEvent],
    ) -> Result<(), StorageError> {
        ensure_reminders_belong(owner, certification_id, reminders)?;

        let tx = self.conn.unchecked_transaction()?;
        delete_partition_prefix(
            &tx,
            &keys::user_partition(owner),
            &keys::reminder_prefix(certification_id),
        )?;
        for reminder in reminders {
            put_reminder(&tx, reminder)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn reminders(
        &self,
        owner: &str,
        certification_id: &str,
    ) -> Result<Vec<ReminderEvent>, StorageError> {
        query_partition_prefix(
            &self.conn,
            &keys::user_partition(owner),
            &keys::reminder_prefix(certification_id),
        )
    }

    fn due_reminders(&self, on_or_before: NaiveDate) -> Result<Vec<ReminderEvent>, StorageError> {
        self.query_index(
            SecondaryIndex::Gsi1,
            UNSENT_REMINDERS_PARTITION,
            Some(keys::due_on_or_before_bound(on_or_before)),
        )
    }

    fn mark_reminder_sent(
        &self,
        reminder: &ReminderEvent,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let expected = keys::reminder_keys(reminder);
        let Some(due) = expected.due else {
            return Ok(false);
        };

        let mut sent = reminder.clone();
        sent.mark_sent(sent_at);
        let changes = self.conn.execute(
            "
            UPDATE items
            SET payload_json = ?1,
                gsi1pk = NULL,
                gsi1sk = NULL,
                updated_at = ?2
            WHERE pk = ?3 AND sk = ?4 AND gsi1pk = ?5 AND gsi1sk = ?6
            ",
            params![
                encode(&sent)?,
                sent_at.to_rfc3339(),
                expected.primary.pk,
                expected.primary.sk,
                due.pk,
                due.sk,
            ],
        )?;
        Ok(changes > 0)
    }

    fn put_analytics_summary(&self, summary: &AnalyticsSummary) -> Result<(), StorageError> {
        put_item(
            &self.conn,
            ItemRow {
                key: &keys::analytics_key(&summary.owner, &summary.month),
                entity: EntityKind::Analytics,
                gsi1: None,
                gsi2: None,
                payload_json: encode(summary)?,
            },
            Utc::now(),
        )
    }

    fn analytics_summary(
        &self,
        owner: &str,
        month: &str,
    ) -> Result<Option<AnalyticsSummary>, StorageError> {
        get_item(&self.conn, &keys::analytics_key(owner, month))
    }

    fn put_profile(&self, profile: &UserProfile) -> Result<(), StorageError> {
        put_item(
            &self.conn,
            ItemRow {
                key: &keys::profile_key(&profile.user_id),
                entity: EntityKind::Profile,
                gsi1: None,
                gsi2: None,
                payload_json: encode(profile)?,
            },
            Utc::now(),
        )
    }

    fn profile(&self, owner: &str) -> Result<Option<UserProfile>, StorageError> {
        get_item(&self.conn, &keys::profile_key(owner))
    }
}

fn ensure_reminders_belong(
    owner: &str,
    certification_id: &str,
    reminders: &[ReminderEvent],
) -> Result<(), StorageError> {
    for reminder in reminders {
        if reminder.owner != owner || reminder.certification_id != certification_id {
            return Err(StorageError::KeyMismatch {
                expected: format!("{owner}/{certification_id}"),
                found: format!("{}/{}", reminder.owner, reminder.certification_id),
            });
        }
    }
    Ok(())
}

fn put_reminder(conn: &Connection, reminder: &ReminderEvent) -> Result<(), StorageError> {
    let reminder_keys = keys::reminder_keys(reminder);
    put_item(
        conn,
        ItemRow {
            key: &reminder_keys.primary,
            entity: EntityKind::Reminder,
            gsi1: reminder_keys.due.as_ref(),
            gsi2: None,
            payload_json: encode(reminder)?,
        },
        reminder.sent_at.unwrap_or_else(Utc::now),
    )
}

fn put_item(
    conn: &Connection,
    row: ItemRow<'_>,
    updated_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    conn.execute(
        "
        INSERT INTO items (
            pk,
            sk,
            entity,
            gsi1pk,
            gsi1sk,
            gsi2pk,
            gsi2sk,
            payload_json,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(pk, sk) DO UPDATE SET
            entity=excluded.entity,
            gsi1pk=excluded.gsi1pk,
            gsi1sk=excluded.gsi1sk,
            gsi2pk=excluded.gsi2pk,
            gsi2sk=excluded.gsi2sk,
            payload_json=excluded.payload_json,
            updated_at=excluded.updated_at
        ",
        params![
            row.key.pk,
            row.key.sk,
            row.entity.as_str(),
            row.gsi1.map(|index| index.pk.as_str()),
            row.gsi1.map(|index| index.sk.as_str()),
            row.gsi2.map(|index| index.pk.as_str()),
            row.gsi2.map(|index| index.sk.as_str()),
            row.payload_json,
            updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_item<T: DeserializeOwned>(
    conn: &Connection,
    key: &ItemKey,
) -> Result<Option<T>, StorageError> {
    let payload = conn
        .query_row(
            "SELECT payload_json FROM items WHERE pk = ?1 AND sk = ?2",
            params![key.pk, key.sk],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    payload.as_deref().map(decode).transpose()
}

fn delete_item(conn: &Connection, key: &ItemKey) -> Result<bool, StorageError> {
    let changes = conn.execute(
        "DELETE FROM items WHERE pk = ?1 AND sk = ?2",
        params![key.pk, key.sk],
    )?;
    Ok(changes > 0)
}

fn query_partition_prefix<T: DeserializeOwned>(
    conn: &Connection,
    pk: &str,
    sk_prefix: &str,
) -> Result<Vec<T>, StorageError> {
    let mut statement = conn.prepare(
        "
        SELECT payload_json
        FROM items
        WHERE pk = ?1 AND sk >= ?2 AND sk < ?3
        ORDER BY sk ASC
        ",
    )?;
    let rows = statement.query_map(
        params![pk, sk_prefix, keys::prefix_upper_bound(sk_prefix)],
        |row| row.get::<_, String>(0),
    )?;

    let mut items = Vec::new();
    for row in rows {
        items.push(decode(&row?)?);
    }
    Ok(items)
}

fn delete_partition_prefix(
    conn: &Connection,
    pk: &str,
    sk_prefix: &str,
) -> Result<usize, StorageError> {
    Ok(conn.execute(
        "DELETE FROM items WHERE pk = ?1 AND sk >= ?2 AND sk < ?3",
        params![pk, sk_prefix, keys::prefix_upper_bound(sk_prefix)],
    )?)
}

fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|err| StorageError::Serialization(err.to_string()))
}

fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, StorageError> {
    serde_json::from_str(payload).map_err(|err| StorageError::Serialization(err.to_string()))
}
