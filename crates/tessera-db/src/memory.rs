//! In-memory repositories.
//!
//! One [`MemoryDatabase`] implements every repository trait with the same
//! conditional-update and uniqueness rules as the Postgres schema, so ingest
//! logic can be exercised without a database.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tessera_core::models::{
    Bulletin, ImportJournal, ImportStatus, Media, NewBulletin, NewImport, NewMedia, Source,
    SourceHints,
};
use tessera_core::AppError;
use uuid::Uuid;

use crate::repository::{BulletinRepository, ImportRepository, MediaRepository, SourceRepository};

#[derive(Default)]
struct State {
    bulletins: Vec<Bulletin>,
    bulletin_sources: Vec<(i64, i64)>,
    media: Vec<Media>,
    sources: Vec<Source>,
    imports: HashMap<Uuid, ImportJournal>,
    /// Journal ids in creation order
    import_order: Vec<Uuid>,
    next_bulletin_id: i64,
    next_media_id: i64,
    next_source_id: i64,
}

impl State {
    fn import_mut(&mut self, id: Uuid) -> Option<&mut ImportJournal> {
        self.imports.get_mut(&id)
    }

    /// Journal that may still be mutated.
    fn open_import(&mut self, id: Uuid) -> Option<&mut ImportJournal> {
        self.import_mut(id).filter(|j| !j.status.is_terminal())
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AppError> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory database lock poisoned".into()))
    }

    /// Every media row, for assertions.
    pub fn all_media(&self) -> Vec<Media> {
        self.lock().map(|s| s.media.clone()).unwrap_or_default()
    }

    pub fn all_bulletins(&self) -> Vec<Bulletin> {
        self.lock().map(|s| s.bulletins.clone()).unwrap_or_default()
    }

    /// Insert a media row directly, as if committed by an earlier import.
    pub fn seed_media(&self, media_file: &str, etag: &str) -> Result<Media, AppError> {
        let mut state = self.lock()?;
        if state.media.iter().any(|m| m.etag == etag) {
            return Err(AppError::Conflict("duplicate file".into()));
        }
        state.next_media_id += 1;
        let media = Media {
            id: state.next_media_id,
            bulletin_id: 0,
            title: media_file.to_string(),
            media_file: media_file.to_string(),
            media_file_type: "application/octet-stream".into(),
            etag: etag.to_string(),
            main: true,
            duration: None,
            created_at: Utc::now(),
        };
        state.media.push(media.clone());
        Ok(media)
    }
}

#[async_trait]
impl BulletinRepository for MemoryDatabase {
    async fn commit(
        &self,
        bulletin: NewBulletin,
        media: Vec<NewMedia>,
    ) -> Result<Bulletin, AppError> {
        let mut state = self.lock()?;

        for (i, item) in media.iter().enumerate() {
            let clash = state.media.iter().any(|m| m.etag == item.etag)
                || media[..i].iter().any(|m| m.etag == item.etag);
            if clash {
                return Err(AppError::Conflict(
                    "duplicate file: media hash already exists".into(),
                ));
            }
        }
        if media.iter().filter(|m| m.main).count() > 1 {
            return Err(AppError::InvalidRequest("more than one main media".into()));
        }
        for source_id in &bulletin.source_ids {
            if !state.sources.iter().any(|s| s.id == *source_id) {
                return Err(AppError::InvalidRequest(format!(
                    "referenced record does not exist: source {}",
                    source_id
                )));
            }
        }

        let now = Utc::now();
        state.next_bulletin_id += 1;
        let created = Bulletin {
            id: state.next_bulletin_id,
            title: bulletin.title,
            title_alt: bulletin.title_alt,
            description: bulletin.description,
            status: bulletin.status,
            origin_id: bulletin.origin_id,
            source_link: bulletin.source_link,
            comment: bulletin.comment,
            documentation_date: bulletin.documentation_date,
            publish_date: bulletin.publish_date,
            tags: bulletin.tags,
            meta: bulletin.meta,
            assigned_to: bulletin.assigned_to,
            created_at: now,
            updated_at: now,
        };
        state.bulletins.push(created.clone());

        for source_id in bulletin.source_ids {
            if !state.bulletin_sources.contains(&(created.id, source_id)) {
                state.bulletin_sources.push((created.id, source_id));
            }
        }
        for item in media {
            state.next_media_id += 1;
            let row = Media {
                id: state.next_media_id,
                bulletin_id: created.id,
                title: item.title,
                media_file: item.media_file,
                media_file_type: item.media_file_type,
                etag: item.etag,
                main: item.main,
                duration: item.duration,
                created_at: now,
            };
            state.media.push(row);
        }

        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Bulletin>, AppError> {
        Ok(self.lock()?.bulletins.iter().find(|b| b.id == id).cloned())
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.lock()?.bulletins.len() as i64)
    }

    async fn source_ids(&self, bulletin_id: i64) -> Result<Vec<i64>, AppError> {
        let mut ids: Vec<i64> = self
            .lock()?
            .bulletin_sources
            .iter()
            .filter(|(b, _)| *b == bulletin_id)
            .map(|(_, s)| *s)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl MediaRepository for MemoryDatabase {
    async fn hash_exists(&self, etag: &str) -> Result<bool, AppError> {
        Ok(self.lock()?.media.iter().any(|m| m.etag == etag))
    }

    async fn find_by_file(&self, media_file: &str) -> Result<Option<Media>, AppError> {
        Ok(self
            .lock()?
            .media
            .iter()
            .find(|m| m.media_file == media_file)
            .cloned())
    }

    async fn list_for_bulletin(&self, bulletin_id: i64) -> Result<Vec<Media>, AppError> {
        let mut media: Vec<Media> = self
            .lock()?
            .media
            .iter()
            .filter(|m| m.bulletin_id == bulletin_id)
            .cloned()
            .collect();
        media.sort_by_key(|m| (!m.main, m.id));
        Ok(media)
    }

    async fn count(&self) -> Result<i64, AppError> {
        Ok(self.lock()?.media.len() as i64)
    }
}

#[async_trait]
impl ImportRepository for MemoryDatabase {
    async fn create(&self, import: NewImport) -> Result<ImportJournal, AppError> {
        let now = Utc::now();
        let journal = ImportJournal {
            id: Uuid::new_v4(),
            user_id: import.user_id,
            batch_id: import.batch_id,
            mode: import.mode,
            file: import.file,
            file_hash: import.file_hash,
            file_format: import.file_format,
            data: serde_json::to_value(&import.data)?,
            log: String::new(),
            status: ImportStatus::Pending,
            items: Vec::new(),
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.lock()?;
        state.import_order.push(journal.id);
        state.imports.insert(journal.id, journal.clone());
        Ok(journal)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImportJournal>, AppError> {
        Ok(self.lock()?.imports.get(&id).cloned())
    }

    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<ImportJournal>, AppError> {
        let state = self.lock()?;
        Ok(state
            .import_order
            .iter()
            .filter_map(|id| state.imports.get(id))
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let state = self.lock()?;
        Ok(state
            .import_order
            .iter()
            .filter(|id| {
                state
                    .imports
                    .get(id)
                    .is_some_and(|j| j.status == ImportStatus::Pending)
            })
            .take(limit.max(0) as usize)
            .copied()
            .collect())
    }

    async fn mark_processing(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        match state.import_mut(id) {
            Some(j) if j.status == ImportStatus::Pending => {
                j.status = ImportStatus::Processing;
                j.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_log(&self, id: Uuid, line: &str) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(journal) = state.open_import(id) else {
            return Ok(false);
        };
        let now = Utc::now();
        journal
            .log
            .push_str(&ImportJournal::format_log_line(now, line));
        journal.updated_at = now;
        Ok(true)
    }

    async fn set_file_info(
        &self,
        id: Uuid,
        file_hash: Option<&str>,
        file_format: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(journal) = state.open_import(id) else {
            return Ok(false);
        };
        if let Some(hash) = file_hash {
            journal.file_hash = Some(hash.to_string());
        }
        if let Some(format) = file_format {
            journal.file_format = Some(format.to_string());
        }
        journal.updated_at = Utc::now();
        Ok(true)
    }

    async fn add_item(&self, id: Uuid, bulletin_id: i64) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(journal) = state.open_import(id) else {
            return Ok(false);
        };
        journal.items.push(bulletin_id);
        journal.updated_at = Utc::now();
        Ok(true)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: ImportStatus,
        final_line: Option<&str>,
    ) -> Result<bool, AppError> {
        if !status.is_terminal() {
            return Err(AppError::Internal(format!(
                "cannot finish import {} as {}",
                id, status
            )));
        }
        let mut state = self.lock()?;
        match state.import_mut(id) {
            Some(j) if j.status == ImportStatus::Processing => {
                let now = Utc::now();
                if let Some(line) = final_line {
                    j.log.push_str(&ImportJournal::format_log_line(now, line));
                }
                j.status = status;
                j.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.lock()?;
        let Some(journal) = state.open_import(id) else {
            return Ok(false);
        };
        journal.cancel_requested = true;
        journal.updated_at = Utc::now();
        Ok(true)
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .lock()?
            .imports
            .get(&id)
            .is_some_and(|j| j.cancel_requested))
    }

    async fn hash_in_flight(
        &self,
        file_hash: &str,
        before: Option<Uuid>,
    ) -> Result<bool, AppError> {
        let state = self.lock()?;
        let cutoff = match before {
            Some(id) => match state.import_order.iter().position(|j| *j == id) {
                Some(pos) => pos,
                None => return Ok(false),
            },
            None => state.import_order.len(),
        };
        Ok(state.import_order[..cutoff].iter().any(|id| {
            state.imports.get(id).is_some_and(|j| {
                !j.status.is_terminal() && j.file_hash.as_deref() == Some(file_hash)
            })
        }))
    }
}

#[async_trait]
impl SourceRepository for MemoryDatabase {
    async fn find_or_create_main(&self, title: &str) -> Result<i64, AppError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .sources
            .iter()
            .find(|s| s.parent_id.is_none() && s.title.eq_ignore_ascii_case(title))
        {
            return Ok(existing.id);
        }
        state.next_source_id += 1;
        let source = Source {
            id: state.next_source_id,
            title: title.to_string(),
            parent_id: None,
            etl_id: None,
            comment: None,
            created_at: Utc::now(),
        };
        state.sources.push(source);
        Ok(state.next_source_id)
    }

    async fn find_or_create_sub(
        &self,
        parent_id: i64,
        hints: &SourceHints,
    ) -> Result<i64, AppError> {
        let mut state = self.lock()?;
        if let Some(existing) = state
            .sources
            .iter()
            .find(|s| s.parent_id == Some(parent_id) && hints.matches(s))
        {
            return Ok(existing.id);
        }
        let title = hints
            .title()
            .ok_or_else(|| AppError::InvalidRequest("no uploader information".into()))?;
        state.next_source_id += 1;
        let source = Source {
            id: state.next_source_id,
            title,
            parent_id: Some(parent_id),
            etl_id: hints.uploader_id.clone(),
            comment: (!hints.urls.is_empty()).then(|| hints.urls.join("\n")),
            created_at: Utc::now(),
        };
        state.sources.push(source);
        Ok(state.next_source_id)
    }

    async fn get(&self, id: i64) -> Result<Option<Source>, AppError> {
        Ok(self.lock()?.sources.iter().find(|s| s.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::models::{ImportData, ImportMode};

    fn new_import(hash: &str) -> NewImport {
        NewImport {
            user_id: Some("u1".into()),
            batch_id: "batch-7".into(),
            mode: ImportMode::Upload,
            file: Some("abc_a.jpg".into()),
            file_hash: Some(hash.into()),
            file_format: Some("jpg".into()),
            data: ImportData::default(),
        }
    }

    fn media(etag: &str, main: bool) -> NewMedia {
        NewMedia {
            title: "a".into(),
            media_file: format!("{etag}.bin"),
            media_file_type: "image/jpeg".into(),
            etag: etag.into(),
            main,
            duration: None,
        }
    }

    #[tokio::test]
    async fn test_terminal_journal_is_frozen() {
        let db = MemoryDatabase::new();
        let journal = ImportRepository::create(&db, new_import("h1")).await.unwrap();
        let id = journal.id;

        assert!(!db.finish(id, ImportStatus::Success, None).await.unwrap());
        assert!(db.mark_processing(id).await.unwrap());
        assert!(!db.mark_processing(id).await.unwrap());
        assert!(db.append_log(id, "hashing").await.unwrap());
        assert!(db.finish(id, ImportStatus::Failed, Some("conflict: duplicate file")).await.unwrap());

        let frozen = ImportRepository::get(&db, id).await.unwrap().unwrap();
        assert!(!db.append_log(id, "late").await.unwrap());
        assert!(!db.add_item(id, 9).await.unwrap());
        assert!(!db.set_file_info(id, Some("h2"), None).await.unwrap());
        assert!(!db.request_cancel(id).await.unwrap());
        assert!(!db.finish(id, ImportStatus::Success, None).await.unwrap());

        let after = ImportRepository::get(&db, id).await.unwrap().unwrap();
        assert_eq!(after.status, ImportStatus::Failed);
        assert_eq!(after.log, frozen.log);
        assert_eq!(after.log_lines().len(), 2);
        assert!(after.items.is_empty());
        assert_eq!(after.file_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_hash_in_flight_prefers_oldest() {
        let db = MemoryDatabase::new();
        let first = ImportRepository::create(&db, new_import("same")).await.unwrap();
        let second = ImportRepository::create(&db, new_import("same")).await.unwrap();

        assert!(db.hash_in_flight("same", None).await.unwrap());
        assert!(!db.hash_in_flight("same", Some(first.id)).await.unwrap());
        assert!(db.hash_in_flight("same", Some(second.id)).await.unwrap());
        assert!(!db.hash_in_flight("other", None).await.unwrap());

        db.mark_processing(first.id).await.unwrap();
        db.finish(first.id, ImportStatus::Success, None).await.unwrap();
        assert!(!db.hash_in_flight("same", Some(second.id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_hash() {
        let db = MemoryDatabase::new();
        let bulletin = NewBulletin {
            title: "first".into(),
            ..Default::default()
        };
        db.commit(bulletin.clone(), vec![media("h1", true)]).await.unwrap();

        let err = db
            .commit(bulletin.clone(), vec![media("h2", true), media("h1", false)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(BulletinRepository::count(&db).await.unwrap(), 1);
        assert_eq!(MediaRepository::count(&db).await.unwrap(), 1);
        assert!(!db.hash_exists("h2").await.unwrap());
    }

    #[tokio::test]
    async fn test_sources_found_or_created() {
        let db = MemoryDatabase::new();
        let main = db.find_or_create_main("youtube").await.unwrap();
        assert_eq!(db.find_or_create_main("YouTube").await.unwrap(), main);

        let hints = SourceHints {
            uploader_id: Some("UC1".into()),
            uploader: Some("Desk".into()),
            urls: vec![],
        };
        let sub = db.find_or_create_sub(main, &hints).await.unwrap();
        assert_ne!(sub, main);
        let again = SourceHints {
            uploader_id: Some("UC1".into()),
            ..Default::default()
        };
        assert_eq!(db.find_or_create_sub(main, &again).await.unwrap(), sub);
        assert!(db
            .find_or_create_sub(main, &SourceHints::default())
            .await
            .is_err());

        let bulletin = NewBulletin {
            title: "t".into(),
            source_ids: vec![main, sub],
            ..Default::default()
        };
        let created = db.commit(bulletin, vec![]).await.unwrap();
        assert_eq!(db.source_ids(created.id).await.unwrap(), vec![main, sub]);
    }
}
