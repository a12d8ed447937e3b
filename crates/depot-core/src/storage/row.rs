//! Record row type for database queries.

use uuid::Uuid;

use crate::error::{DepotError, Result};
use crate::model::Persisted;

/// Raw row data from the records table, before decoding into an entity.
#[derive(Debug)]
pub struct RecordRow {
    pub id: String,
    pub data_json: String,
}

impl RecordRow {
    pub fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data_json: row.get(1)?,
        })
    }

    /// Decode the stored document, checking it against the row key.
    pub fn decode<E: Persisted>(self) -> Result<E> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| DepotError::BackendRead(format!("Invalid record UUID: {}", e)))?;
        let entity: E = serde_json::from_str(&self.data_json)
            .map_err(|e| DepotError::BackendRead(format!("Invalid record JSON: {}", e)))?;
        if entity.id() != id {
            return Err(DepotError::BackendRead(format!(
                "Record {} holds a document for {}",
                id,
                entity.id()
            )));
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{Note, NoteConfig};

    #[test]
    fn test_decode_matching_row() {
        let note = Note::from_config(NoteConfig::named("A"));
        let row = RecordRow {
            id: note.id.to_string(),
            data_json: serde_json::to_string(&note).unwrap(),
        };
        let decoded: Note = row.decode().unwrap();
        assert_eq!(decoded, note);
    }

    #[test]
    fn test_decode_rejects_mismatched_key() {
        let note = Note::from_config(NoteConfig::named("A"));
        let row = RecordRow {
            id: Uuid::new_v4().to_string(),
            data_json: serde_json::to_string(&note).unwrap(),
        };
        assert!(matches!(row.decode::<Note>(), Err(DepotError::BackendRead(_))));
    }

    #[test]
    fn test_decode_rejects_bad_json() {
        let row = RecordRow {
            id: Uuid::new_v4().to_string(),
            data_json: "{not json".to_string(),
        };
        assert!(matches!(row.decode::<Note>(), Err(DepotError::BackendRead(_))));
    }
}
