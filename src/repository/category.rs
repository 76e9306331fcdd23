use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::history::{self, HistoryEntry};
use crate::model::{Category, CategoryPatch, EntityKind, MutationAction, NewCategory};
use crate::queue::{CategoryMutation, CategoryUpdate, EntityRef, Mutation};
use crate::remote::{Filter, Table, TypedTable};

use super::{validate_id, Backend, WriteOutcome};

#[derive(Clone)]
pub struct CategoryWrites {
    categories: TypedTable<Category>,
}

impl CategoryWrites {
    pub fn new(categories: TypedTable<Category>) -> Self {
        Self { categories }
    }

    /// Insert, placing the category after the last one when no position
    /// was given
    pub async fn create(&self, mut new: NewCategory) -> Result<Category> {
        if new.position.is_none() {
            let existing = self.categories.select(&Filter::all()).await?;
            new.position = Some(
                existing
                    .iter()
                    .map(|category| category.position)
                    .max()
                    .map_or(0, |max| max + 1),
            );
        }
        self.categories.insert(&new).await
    }

    pub async fn update(&self, id: &str, patch: &CategoryPatch) -> Result<Option<Category>> {
        self.categories.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.categories.delete(id).await
    }
}

#[derive(Clone)]
pub struct CategoryRepository {
    backend: Backend,
    categories: TypedTable<Category>,
    writes: CategoryWrites,
}

impl CategoryRepository {
    pub fn new(backend: Backend, writes: CategoryWrites) -> Self {
        Self {
            categories: TypedTable::new(Arc::clone(&backend.remote), Table::Categories),
            backend,
            writes,
        }
    }

    pub async fn create(&self, new: NewCategory) -> Result<WriteOutcome<Category>> {
        new.validate()?;

        let mutation = Mutation::Category(CategoryMutation::Create(new.clone()));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || self.writes.create(new))
            .await?;

        if let Some(category) = outcome.applied() {
            self.record(
                category,
                MutationAction::Create,
                history::summarize_create(&category.name),
            )
            .await;
            self.backend.events.notify(EventKind::CategoryCreated, category);
        }
        self.backend.events.refetch(Table::Categories);
        Ok(outcome)
    }

    pub async fn update(&self, id: &str, patch: CategoryPatch) -> Result<WriteOutcome<Category>> {
        validate_id(id)?;
        patch.validate()?;

        let mutation = Mutation::Category(CategoryMutation::Update(CategoryUpdate {
            id: id.to_string(),
            patch: patch.clone(),
        }));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || async {
                self.writes
                    .update(id, &patch)
                    .await?
                    .ok_or_else(|| Error::not_found("category", id))
            })
            .await?;

        if let Some(category) = outcome.applied() {
            self.record(
                category,
                MutationAction::Update,
                history::summarize_update(&patch.changed_fields()),
            )
            .await;
            self.backend.events.notify(EventKind::CategoryUpdated, category);
        }
        self.backend.events.refetch(Table::Categories);
        Ok(outcome)
    }

    pub async fn delete(&self, id: &str) -> Result<WriteOutcome<Category>> {
        validate_id(id)?;

        let mutation = Mutation::Category(CategoryMutation::Delete(EntityRef { id: id.to_string() }));
        let outcome = self
            .backend
            .write_or_enqueue(mutation, || async {
                let category = self
                    .categories
                    .get(id)
                    .await?
                    .ok_or_else(|| Error::not_found("category", id))?;
                self.writes.delete(id).await?;
                Ok(category)
            })
            .await?;

        if let Some(category) = outcome.applied() {
            self.record(
                category,
                MutationAction::Delete,
                history::summarize_delete(&category.name),
            )
            .await;
            self.backend
                .events
                .notify(EventKind::CategoryDeleted, serde_json::json!({ "id": id }));
        }
        self.backend.events.refetch(Table::Categories);
        Ok(outcome)
    }

    /// Categories in board order
    pub async fn list(&self) -> Result<Vec<Category>> {
        let mut categories = self.categories.select(&Filter::all()).await?;
        categories.sort_by_key(|category| category.position);
        Ok(categories)
    }

    async fn record(&self, category: &Category, action: MutationAction, summary: String) {
        self.backend
            .history
            .record(HistoryEntry::new(EntityKind::Category, &category.id, action, summary))
            .await;
    }
}
