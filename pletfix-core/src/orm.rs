//! The application-facing handle: a database plus its registered classes.

use crate::database::Database;
use crate::dialect::Dialect;
use crate::error::{PletfixError, PletfixResult};
use crate::hooks;
use crate::model::{Entity, ModelClass, Registry};
use crate::query::QueryBuilder;
use crate::relation::{self, Constraints, Relation};
use crate::value::Row;
use std::sync::Arc;

/// A database handle bound to a class registry.
///
/// Cheap to clone; every builder carries one.
#[derive(Debug, Clone)]
pub struct Orm {
    db: Arc<dyn Database>,
    registry: Arc<Registry>,
}

impl Orm {
    pub fn new(db: Arc<dyn Database>, registry: Registry) -> Self {
        Self::with_registry(db, Arc::new(registry))
    }

    pub fn with_registry(db: Arc<dyn Database>, registry: Arc<Registry>) -> Self {
        Self { db, registry }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.db.dialect()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A fresh, empty builder.
    pub fn builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.clone())
    }

    /// A fresh builder targeting `name`.
    pub fn table(&self, name: &str) -> QueryBuilder {
        self.builder().table(name)
    }

    /// A builder scoped to the registered class `class`.
    pub fn query(&self, class: &str) -> PletfixResult<QueryBuilder> {
        Ok(self.query_class(self.registry.require(class)?))
    }

    pub fn query_class(&self, class: Arc<ModelClass>) -> QueryBuilder {
        QueryBuilder::for_class(self.clone(), class)
    }

    /// A new, unsaved entity filled through the mass-assignment guard.
    pub fn make(&self, class: &str, attributes: Row) -> PletfixResult<Entity> {
        let mut entity = Entity::new(Some(self.registry.require(class)?), Row::new());
        entity.fill(attributes);
        Ok(entity)
    }

    fn class_of(entity: &Entity) -> PletfixResult<Arc<ModelClass>> {
        entity
            .class()
            .cloned()
            .ok_or_else(|| PletfixError::logic("entity has no model class"))
    }

    /// Builder matching exactly `entity`'s row.
    fn entity_query(&self, entity: &Entity) -> PletfixResult<QueryBuilder> {
        let class = Self::class_of(entity)?;
        let id = entity.id().cloned().ok_or_else(|| {
            PletfixError::logic(format!("`{}` entity has no primary key value", class.name()))
        })?;
        let key = class.primary_key_name().to_owned();
        Ok(self.query_class(class).where_is(&key, id))
    }

    /// Inserts a new entity or updates the dirty attributes of an existing
    /// one. Returns `false` when a hook cancelled the write.
    #[tracing::instrument(skip(self, entity), fields(class = entity.class_name().unwrap_or("")))]
    pub async fn save(&self, entity: &mut Entity) -> PletfixResult<bool> {
        if entity.exists() {
            let builder = self.entity_query(entity)?;
            Ok(hooks::update_entity(&builder, entity).await?.is_some())
        } else {
            let builder = self.query_class(Self::class_of(entity)?);
            Ok(hooks::insert(&builder, std::slice::from_mut(entity))
                .await?
                .is_some())
        }
    }

    /// Deletes `entity` by primary key. Returns `false` when a hook cancelled.
    #[tracing::instrument(skip(self, entity), fields(class = entity.class_name().unwrap_or("")))]
    pub async fn delete(&self, entity: &mut Entity) -> PletfixResult<bool> {
        let builder = self.entity_query(entity)?;
        Ok(hooks::delete_entity(&builder, entity).await?.is_some())
    }

    /// Relation `name` of `entity`, filtered to it.
    pub fn relation(&self, entity: &Entity, name: &str) -> PletfixResult<Relation> {
        Relation::new(self.clone(), entity, name, Constraints::Enabled)
    }

    /// Runs relation `name` and caches the result on `entity`.
    pub async fn load(&self, entity: &mut Entity, name: &str) -> PletfixResult<()> {
        let related = self.relation(entity, name)?.get().await?;
        entity.set_relation(name, related);
        Ok(())
    }

    /// Eager loads comma separated `relations` onto already fetched entities
    /// of one class.
    pub async fn load_many(&self, entities: &mut [Entity], relations: &str) -> PletfixResult<()> {
        let Some(first) = entities.first() else {
            return Ok(());
        };
        let class = Self::class_of(first)?;
        let with: Vec<String> = relations
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned)
            .collect();
        relation::eager_load(self, &class, entities, &with).await
    }

    /// Links `related` to `owner` through relation `name`, writing any
    /// changed owner attributes back.
    pub async fn associate(
        &self,
        owner: &mut Entity,
        name: &str,
        related: &mut Entity,
    ) -> PletfixResult<bool> {
        let mut relation = self.relation(owner, name)?;
        let done = relation.associate(related).await?;
        Self::write_back(owner, relation);
        Ok(done)
    }

    /// Unlinks `related` (or everything, with `None`) from `owner`.
    pub async fn disassociate(
        &self,
        owner: &mut Entity,
        name: &str,
        related: Option<&mut Entity>,
    ) -> PletfixResult<bool> {
        let mut relation = self.relation(owner, name)?;
        let done = relation.disassociate(related).await?;
        Self::write_back(owner, relation);
        Ok(done)
    }

    fn write_back(owner: &mut Entity, relation: Relation) {
        let name = relation.name().to_owned();
        let mut updated = relation.into_owner();
        // The cached result of the changed relation is stale.
        updated.unset_relation(&name);
        *owner = updated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HookKind, Related};
    use crate::row;
    use crate::test_utils::MockDatabase;
    use crate::value::Value;

    fn registry() -> Registry {
        Registry::new()
            .register(
                ModelClass::new("Book")
                    .fillable(&["title", "author_id"])
                    .belongs_to("author", "Author"),
            )
            .register(ModelClass::new("Author").has_many("books", "Book"))
    }

    #[test]
    fn unknown_class_is_logic_error() {
        let orm = MockDatabase::new().into_orm();
        assert!(orm.query("Ghost").unwrap_err().is_logic());
    }

    #[test]
    fn make_guards_attributes() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let book = orm
            .make("Book", row! { "id" => 3, "title" => "Dune", "price" => 9 })
            .unwrap();
        assert_eq!(book.attributes(), &row! { "title" => "Dune" });
        assert!(!book.exists());
    }

    #[tokio::test]
    async fn save_inserts_then_updates_dirty_only() {
        let db = MockDatabase::new();
        db.set_last_insert_id(4);
        let orm = db.clone().into_orm_with(registry());
        let mut book = orm.make("Book", row! { "title" => "Dune" }).unwrap();
        assert!(orm.save(&mut book).await.unwrap());
        assert_eq!(book.id(), Some(&Value::Int(4)));
        assert!(book.exists());

        assert!(orm.save(&mut book).await.unwrap());
        assert_eq!(db.executed().len(), 1);

        book.set("title", "Dune Messiah");
        assert!(orm.save(&mut book).await.unwrap());
        let (sql, bindings) = db.executed()[1].clone();
        assert_eq!(sql, "UPDATE \"books\" SET \"title\" = ? WHERE \"id\" = ?");
        assert_eq!(bindings, vec![Value::from("Dune Messiah"), Value::Int(4)]);
    }

    #[tokio::test]
    async fn cancelled_delete_keeps_entity() {
        let db = MockDatabase::new();
        let orm = db.clone().into_orm_with(
            Registry::new().register(ModelClass::new("Book").hook(HookKind::BeforeDelete, |_| Ok(false))),
        );
        let mut book = Entity::from_row(orm.registry().get("Book").cloned(), row! { "id" => 1 });
        assert!(!orm.delete(&mut book).await.unwrap());
        assert!(book.exists());
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_primary_key() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let mut book = orm.make("Book", row! { "title" => "x" }).unwrap();
        assert!(orm.delete(&mut book).await.unwrap_err().is_logic());
    }

    #[tokio::test]
    async fn associate_writes_owner_back_and_keeps_other_relations() {
        let db = MockDatabase::new();
        let orm = db.clone().into_orm_with(registry());
        let mut book = Entity::from_row(orm.registry().get("Book").cloned(), row! { "id" => 1 });
        book.set_relation("reviews", Related::Many(Vec::new()));
        let mut author =
            Entity::from_row(orm.registry().get("Author").cloned(), row! { "id" => 9 });
        assert!(orm.associate(&mut book, "author", &mut author).await.unwrap());
        assert_eq!(book.value("author_id"), Value::Int(9));
        assert!(!book.is_dirty());
        assert!(book.relation_loaded("reviews"));
    }

    #[tokio::test]
    async fn load_caches_relation() {
        let db = MockDatabase::new();
        db.push_rows(vec![row! { "id" => 1, "author_id" => 9 }]);
        let orm = db.clone().into_orm_with(registry());
        let mut author =
            Entity::from_row(orm.registry().get("Author").cloned(), row! { "id" => 9 });
        orm.load(&mut author, "books").await.unwrap();
        assert_eq!(author.relation("books").map(Related::len), Some(1));
    }
}
