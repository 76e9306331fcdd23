use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::history::{self, HistoryEntry};
use crate::model::{EntityKind, MutationAction, NewNote, Note, NotePatch};
use crate::queue::{EntityRef, Mutation, NoteMutation, NoteUpdate};
use crate::remote::{Filter, Table, TypedTable};

use super::{validate_id, Backend, WriteOutcome};

#[derive(Clone)]
pub struct NoteWrites {
    notes: TypedTable<Note>,
}

impl NoteWrites {
    pub fn new(notes: TypedTable<Note>) -> Self {
        Self { notes }
    }

    pub async fn create(&self, new: NewNote) -> Result<Note> {
        self.notes.insert(&new).await
    }

    pub async fn update(&self, id: &str, patch: &NotePatch) -> Result<Option<Note>> {
        self.notes.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.notes.delete(id).await
    }
}

#[derive(Clone)]
pub struct NoteRepository {
    backend: Backend,
    notes: TypedTable<Note>,
    writes: NoteWrites,
}

impl NoteRepository {
    pub fn new(backend: Backend, writes: NoteWrites) -> Self {
        Self {
            notes: TypedTable::new(Arc::clone(&backend.remote), Table::Notes),
            backend,
            writes,
        }
    }

    pub async fn create(&self, new: NewNote) -> Result<WriteOutcome<Note>> {
        new.validate()?;

        let mutation = Mutation::Note(NoteMutation::Create(new.clone()));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || self.writes.create(new))
            .await?;

        if let Some(note) = outcome.applied() {
            self.record(note, MutationAction::Create, history::summarize_create(&note.title))
                .await;
            self.backend.events.notify(EventKind::NoteCreated, note);
        }
        self.backend.events.refetch(Table::Notes);
        Ok(outcome)
    }

    pub async fn update(&self, id: &str, patch: NotePatch) -> Result<WriteOutcome<Note>> {
        validate_id(id)?;
        patch.validate()?;

        let mutation = Mutation::Note(NoteMutation::Update(NoteUpdate {
            id: id.to_string(),
            patch: patch.clone(),
        }));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || async {
                self.writes
                    .update(id, &patch)
                    .await?
                    .ok_or_else(|| Error::not_found("note", id))
            })
            .await?;

        if let Some(note) = outcome.applied() {
            self.record(
                note,
                MutationAction::Update,
                history::summarize_update(&patch.changed_fields()),
            )
            .await;
            self.backend.events.notify(EventKind::NoteUpdated, note);
        }
        self.backend.events.refetch(Table::Notes);
        Ok(outcome)
    }

    pub async fn delete(&self, id: &str) -> Result<WriteOutcome<Note>> {
        validate_id(id)?;

        let mutation = Mutation::Note(NoteMutation::Delete(EntityRef { id: id.to_string() }));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || async {
                let note = self
                    .notes
                    .get(id)
                    .await?
                    .ok_or_else(|| Error::not_found("note", id))?;
                self.writes.delete(id).await?;
                Ok(note)
            })
            .await?;

        if let Some(note) = outcome.applied() {
            self.record(note, MutationAction::Delete, history::summarize_delete(&note.title))
                .await;
            self.backend
                .events
                .notify(EventKind::NoteDeleted, serde_json::json!({ "id": id }));
        }
        self.backend.events.refetch(Table::Notes);
        Ok(outcome)
    }

    /// Pinned notes first, then by title
    pub async fn list(&self) -> Result<Vec<Note>> {
        let mut notes = self.notes.select(&Filter::all()).await?;
        notes.sort_by(|a, b| b.is_pinned.cmp(&a.is_pinned).then_with(|| a.title.cmp(&b.title)));
        Ok(notes)
    }

    async fn record(&self, note: &Note, action: MutationAction, summary: String) {
        self.backend
            .history
            .record(HistoryEntry::new(EntityKind::Note, &note.id, action, summary))
            .await;
    }
}
