//! Relationships between model classes.
//!
//! A [`RelationDef`] is registered on a [`ModelClass`] under a method name.
//! Resolving it against an owner entity yields a [`Relation`]: a builder
//! pre-filtered to that owner plus the key mapping needed to create,
//! associate and eager load related entities.

mod eager;

pub(crate) use eager::eager_load;

use crate::error::{PletfixError, PletfixResult};
use crate::model::{Entity, ModelClass, Related};
use crate::orm::Orm;
use crate::query::QueryBuilder;
use crate::row;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Synthetic column carrying the owner key through a pivot join.
pub(crate) const PIVOT_KEY: &str = "_pivot_key";

/// How two classes relate. Key names are attribute names; `None` falls back
/// to the primary key of the class the key lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationDef {
    /// `related.foreign_key` references `owner.local_key`; at most one match.
    HasOne {
        related: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    HasMany {
        related: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    /// `owner.foreign_key` references `related.other_key`.
    BelongsTo {
        related: String,
        foreign_key: String,
        other_key: Option<String>,
    },
    /// Rows of `pivot_table` link `owner.local_key` (as `local_foreign_key`)
    /// to `related.other_key` (as `other_foreign_key`).
    BelongsToMany {
        related: String,
        pivot_table: String,
        local_foreign_key: String,
        other_foreign_key: String,
        local_key: Option<String>,
        other_key: Option<String>,
    },
    /// `related.type_attribute` holds the owner's class name.
    MorphOne {
        related: String,
        type_attribute: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    MorphMany {
        related: String,
        type_attribute: String,
        foreign_key: String,
        local_key: Option<String>,
    },
    /// The related class is named by `owner.type_attribute`.
    MorphTo {
        type_attribute: String,
        foreign_key: String,
        other_key: Option<String>,
    },
}

/// The relationship kind, without key metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    MorphOne,
    MorphMany,
    MorphTo,
}

impl RelationKind {
    /// Whether the relation resolves to at most one entity.
    pub fn is_singular(self) -> bool {
        matches!(
            self,
            RelationKind::HasOne
                | RelationKind::BelongsTo
                | RelationKind::MorphOne
                | RelationKind::MorphTo
        )
    }
}

impl RelationDef {
    pub fn kind(&self) -> RelationKind {
        match self {
            RelationDef::HasOne { .. } => RelationKind::HasOne,
            RelationDef::HasMany { .. } => RelationKind::HasMany,
            RelationDef::BelongsTo { .. } => RelationKind::BelongsTo,
            RelationDef::BelongsToMany { .. } => RelationKind::BelongsToMany,
            RelationDef::MorphOne { .. } => RelationKind::MorphOne,
            RelationDef::MorphMany { .. } => RelationKind::MorphMany,
            RelationDef::MorphTo { .. } => RelationKind::MorphTo,
        }
    }

    /// The fixed related class; `None` for `MorphTo`, which resolves it at runtime.
    pub fn related(&self) -> Option<&str> {
        match self {
            RelationDef::HasOne { related, .. }
            | RelationDef::HasMany { related, .. }
            | RelationDef::BelongsTo { related, .. }
            | RelationDef::BelongsToMany { related, .. }
            | RelationDef::MorphOne { related, .. }
            | RelationDef::MorphMany { related, .. } => Some(related),
            RelationDef::MorphTo { .. } => None,
        }
    }

    /// The discriminator column of a polymorphic relation.
    fn type_attribute(&self) -> Option<&str> {
        match self {
            RelationDef::MorphOne { type_attribute, .. }
            | RelationDef::MorphMany { type_attribute, .. }
            | RelationDef::MorphTo { type_attribute, .. } => Some(type_attribute),
            _ => None,
        }
    }
}

/// Whether a new [`Relation`] filters its query to the owner.
///
/// Eager loading builds relations with `Disabled` and adds one `IN (…)`
/// filter over all owners instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Constraints {
    #[default]
    Enabled,
    Disabled,
}

/// A relation resolved against one owner entity.
///
/// The relation keeps its own copy of the owner; mutations that write
/// owner attributes (`associate` on `BelongsTo`/`MorphTo`) update that copy,
/// available through [`Relation::owner`] and [`Relation::into_owner`].
#[derive(Debug, Clone)]
pub struct Relation {
    orm: Orm,
    name: String,
    def: RelationDef,
    owner: Entity,
    owner_class: Arc<ModelClass>,
    related: Arc<ModelClass>,
    /// Owner attribute whose value identifies the related rows.
    owner_key: String,
    /// Related-side column holding that value, qualified with its table.
    filter_column: String,
    /// Attribute of fetched entities carrying that value.
    correlation: String,
    query: QueryBuilder,
}

/// Resolves the class named by a polymorphic type column; an unset type
/// points back at the owner's own class.
fn morph_type<'a>(owner: &'a Entity, owner_class: &'a ModelClass, type_attribute: &str) -> &'a str {
    owner
        .get(type_attribute)
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(owner_class.name())
}

fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", table, column)
}

impl Relation {
    /// Resolves relation `name` of `owner`'s class.
    pub fn new(
        orm: Orm,
        owner: &Entity,
        name: &str,
        constraints: Constraints,
    ) -> PletfixResult<Self> {
        let owner_class = owner.class().cloned().ok_or_else(|| {
            PletfixError::logic(format!(
                "relation `{}` requested on an entity without a model class",
                name
            ))
        })?;
        let def = owner_class.relation_def(name).cloned().ok_or_else(|| {
            PletfixError::logic(format!(
                "`{}` has no relation named `{}`",
                owner_class.name(),
                name
            ))
        })?;
        let related = match &def {
            RelationDef::MorphTo { type_attribute, .. } => orm
                .registry()
                .require(morph_type(owner, &owner_class, type_attribute))?,
            other => orm.registry().require(other.related().unwrap_or_default())?,
        };

        let related_table = related.table_name().to_owned();
        let owner_pk = owner_class.primary_key_name();
        let related_pk = related.primary_key_name();
        let mut query = QueryBuilder::for_class(orm.clone(), Arc::clone(&related));
        let (owner_key, filter_column, correlation) = match &def {
            RelationDef::HasOne {
                foreign_key,
                local_key,
                ..
            }
            | RelationDef::HasMany {
                foreign_key,
                local_key,
                ..
            }
            | RelationDef::MorphOne {
                foreign_key,
                local_key,
                ..
            }
            | RelationDef::MorphMany {
                foreign_key,
                local_key,
                ..
            } => (
                local_key.as_deref().unwrap_or(owner_pk).to_owned(),
                qualified(&related_table, foreign_key),
                foreign_key.clone(),
            ),
            RelationDef::BelongsTo {
                foreign_key,
                other_key,
                ..
            }
            | RelationDef::MorphTo {
                foreign_key,
                other_key,
                ..
            } => {
                let other_key = other_key.as_deref().unwrap_or(related_pk);
                (
                    foreign_key.clone(),
                    qualified(&related_table, other_key),
                    other_key.to_owned(),
                )
            }
            RelationDef::BelongsToMany {
                pivot_table,
                local_foreign_key,
                other_foreign_key,
                local_key,
                other_key,
                ..
            } => {
                let other_key = other_key.as_deref().unwrap_or(related_pk);
                query = query.select(&format!("{}.*", related_table)).join(
                    pivot_table,
                    &format!(
                        "{} = {}",
                        qualified(pivot_table, other_foreign_key),
                        qualified(&related_table, other_key)
                    ),
                );
                (
                    local_key.as_deref().unwrap_or(owner_pk).to_owned(),
                    qualified(pivot_table, local_foreign_key),
                    PIVOT_KEY.to_owned(),
                )
            }
        };

        let mut relation = Self {
            orm,
            name: name.to_owned(),
            def,
            owner: owner.clone(),
            owner_class,
            related,
            owner_key,
            filter_column,
            correlation,
            query,
        };
        if constraints == Constraints::Enabled {
            let key = relation.owner.value(&relation.owner_key);
            relation.query = relation.constrained(relation.query.clone(), |query, column| {
                query.where_is(column, key)
            });
        }
        Ok(relation)
    }

    /// Adds the morph type filter, then the key filter built by `filter`.
    fn constrained<F>(&self, mut query: QueryBuilder, filter: F) -> QueryBuilder
    where
        F: FnOnce(QueryBuilder, &str) -> QueryBuilder,
    {
        if let RelationDef::MorphOne { type_attribute, .. }
        | RelationDef::MorphMany { type_attribute, .. } = &self.def
        {
            query = query.where_is(
                &qualified(self.related.table_name(), type_attribute),
                self.owner_class.name(),
            );
        }
        filter(query, &self.filter_column)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RelationKind {
        self.def.kind()
    }

    pub fn definition(&self) -> &RelationDef {
        &self.def
    }

    pub fn related_class(&self) -> &Arc<ModelClass> {
        &self.related
    }

    pub fn owner(&self) -> &Entity {
        &self.owner
    }

    pub fn into_owner(self) -> Entity {
        self.owner
    }

    pub fn query(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QueryBuilder {
        &mut self.query
    }

    pub fn into_query(self) -> QueryBuilder {
        self.query
    }

    /// Replaces the query with `f(query)`, e.g. to add an order.
    pub fn constrain<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.query = f(self.query);
        self
    }

    // ---- Eager loading ----

    /// Filters the query to every owner in `owners` with one `IN (…)`
    /// predicate over their distinct keys.
    pub fn add_eager_constraints(&mut self, owners: &[Entity]) -> PletfixResult<()> {
        if let RelationDef::MorphTo { type_attribute, .. } = &self.def {
            for owner in owners {
                let resolved = morph_type(owner, &self.owner_class, type_attribute);
                if resolved != self.related.name() {
                    return Err(PletfixError::logic(format!(
                        "cannot eager load `{}` across types `{}` and `{}`",
                        self.name,
                        self.related.name(),
                        resolved
                    )));
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        let keys: Vec<Value> = owners
            .iter()
            .map(|owner| owner.value(&self.owner_key))
            .filter(|value| value.key().is_some_and(|key| seen.insert(key)))
            .collect();

        let mut query = self.constrained(self.query.clone(), |query, column| {
            query.where_in(column, keys)
        });
        if self.kind() == RelationKind::BelongsToMany {
            query = query.select(&format!("{} AS {}", self.filter_column, PIVOT_KEY));
        }
        self.query = query;
        Ok(())
    }

    /// Runs the eager query once, grouping results by correlation key.
    pub async fn get_eager(&self) -> PletfixResult<HashMap<String, Vec<Entity>>> {
        let results = self.query.fetch_entities().await?;
        Ok(self.dictionary(results))
    }

    pub(crate) async fn fetch_eager(&self) -> PletfixResult<Vec<Entity>> {
        self.query.fetch_entities().await
    }

    pub(crate) fn dictionary(&self, results: Vec<Entity>) -> HashMap<String, Vec<Entity>> {
        let mut dictionary: HashMap<String, Vec<Entity>> = HashMap::new();
        for mut entity in results {
            let key = entity.value(&self.correlation).key();
            if self.correlation == PIVOT_KEY {
                entity.unset(PIVOT_KEY);
                entity.sync_original();
            }
            if let Some(key) = key {
                dictionary.entry(key).or_default().push(entity);
            }
        }
        dictionary
    }

    /// Caches the matching results on each owner; owners without a match
    /// get `None` or an empty list.
    pub fn match_eager(&self, owners: &mut [Entity], dictionary: &HashMap<String, Vec<Entity>>) {
        let singular = self.kind().is_singular();
        for owner in owners.iter_mut() {
            let matched = owner
                .value(&self.owner_key)
                .key()
                .and_then(|key| dictionary.get(&key));
            let related = match (singular, matched) {
                (true, matched) => Related::One(matched.and_then(|m| m.first()).cloned()),
                (false, matched) => Related::Many(matched.cloned().unwrap_or_default()),
            };
            owner.set_relation(self.name.clone(), related);
        }
    }

    // ---- Retrieval ----

    /// Runs the owner-filtered query.
    pub async fn get(&self) -> PletfixResult<Related> {
        if self.kind().is_singular() {
            Ok(Related::One(self.query.first().await?))
        } else {
            Ok(Related::Many(self.query.all().await?))
        }
    }

    // ---- Mutation ----

    fn owner_key_value(&self) -> Value {
        self.owner.value(&self.owner_key)
    }

    /// Points `child` at the owner (foreign key plus morph type).
    fn link_child(&self, child: &mut Entity) {
        child.set(self.correlation.clone(), self.owner_key_value());
        if let Some(type_attribute) = self.def.type_attribute() {
            child.set(type_attribute.to_owned(), self.owner_class.name());
        }
    }

    fn pivot(&self) -> Option<(&str, &str, &str)> {
        match &self.def {
            RelationDef::BelongsToMany {
                pivot_table,
                local_foreign_key,
                other_foreign_key,
                ..
            } => Some((pivot_table, local_foreign_key, other_foreign_key)),
            _ => None,
        }
    }

    /// Key of `related` referenced by the owner or the pivot row.
    fn related_key_value(&self, related: &Entity) -> Value {
        match &self.def {
            RelationDef::BelongsToMany { other_key, .. } => {
                related.value(other_key.as_deref().unwrap_or(self.related.primary_key_name()))
            }
            _ => related.value(&self.correlation),
        }
    }

    /// Creates a related entity from `attributes` and links it to the owner.
    ///
    /// Returns `None` when a hook cancelled the write.
    pub async fn create(&mut self, attributes: crate::value::Row) -> PletfixResult<Option<Entity>> {
        let mut entity = Entity::new(Some(Arc::clone(&self.related)), attributes);
        match self.kind() {
            RelationKind::HasOne
            | RelationKind::HasMany
            | RelationKind::MorphOne
            | RelationKind::MorphMany => {
                self.link_child(&mut entity);
                if !self.orm.save(&mut entity).await? {
                    return Ok(None);
                }
            }
            RelationKind::BelongsTo | RelationKind::MorphTo | RelationKind::BelongsToMany => {
                if !self.orm.save(&mut entity).await? || !self.associate(&mut entity).await? {
                    return Ok(None);
                }
            }
        }
        Ok(Some(entity))
    }

    /// Links an existing `related` entity to the owner and saves the side
    /// holding the key: the child, the owner, or a new pivot row.
    pub async fn associate(&mut self, related: &mut Entity) -> PletfixResult<bool> {
        match &self.def {
            RelationDef::HasOne { .. }
            | RelationDef::HasMany { .. }
            | RelationDef::MorphOne { .. }
            | RelationDef::MorphMany { .. } => {
                self.link_child(related);
                self.orm.save(related).await
            }
            RelationDef::BelongsTo { foreign_key, .. } => {
                let key = self.related_key_value(related);
                self.owner.set(foreign_key.clone(), key);
                self.orm.save(&mut self.owner).await
            }
            RelationDef::MorphTo {
                type_attribute,
                foreign_key,
                ..
            } => {
                let key = self.related_key_value(related);
                let class_name = related.class_name().unwrap_or(self.related.name()).to_owned();
                self.owner.set(foreign_key.clone(), key);
                self.owner.set(type_attribute.clone(), class_name);
                self.orm.save(&mut self.owner).await
            }
            RelationDef::BelongsToMany { .. } => {
                let Some((pivot, local_fk, other_fk)) = self.pivot() else {
                    return Ok(false);
                };
                let link = row! {
                    local_fk => self.owner_key_value(),
                    other_fk => self.related_key_value(related),
                };
                Ok(self.orm.table(pivot).insert(link).await?.is_some())
            }
        }
    }

    /// Unlinks `related` (or, with `None`, every related entity) from the owner.
    pub async fn disassociate(&mut self, related: Option<&mut Entity>) -> PletfixResult<bool> {
        match &self.def {
            RelationDef::BelongsTo { foreign_key, .. } => {
                self.owner.set(foreign_key.clone(), Value::Null);
                self.orm.save(&mut self.owner).await
            }
            RelationDef::MorphTo {
                type_attribute,
                foreign_key,
                ..
            } => {
                self.owner.set(foreign_key.clone(), Value::Null);
                self.owner.set(type_attribute.clone(), Value::Null);
                self.orm.save(&mut self.owner).await
            }
            RelationDef::BelongsToMany { .. } => {
                let Some((pivot, local_fk, other_fk)) = self.pivot() else {
                    return Ok(false);
                };
                let mut unlink = self.orm.table(pivot).where_is(local_fk, self.owner_key_value());
                if let Some(related) = related {
                    unlink = unlink.where_is(other_fk, self.related_key_value(related));
                }
                Ok(unlink.delete().await?.is_some())
            }
            _ => {
                let mut cleared = row! { self.correlation.clone() => Value::Null };
                if let Some(type_attribute) = self.def.type_attribute() {
                    cleared.insert(type_attribute.to_owned(), Value::Null);
                }
                match related {
                    Some(child) => {
                        for (column, value) in cleared {
                            child.set(column, value);
                        }
                        self.orm.save(child).await
                    }
                    None => Ok(self.query.update(cleared).await?.is_some()),
                }
            }
        }
    }

    /// Deletes the related entities. For many-to-many relations the linking
    /// pivot rows are removed as well.
    pub async fn delete(&self) -> PletfixResult<Option<u64>> {
        let Some((pivot, local_fk, other_fk)) = self.pivot() else {
            return self.query.delete().await;
        };
        let related_pk = self.related.primary_key_name();
        let ids: Vec<Value> = self
            .query
            .fetch_entities()
            .await?
            .iter()
            .map(|entity| entity.value(related_pk))
            .collect();
        if ids.is_empty() {
            return Ok(Some(0));
        }
        let deleted = self
            .orm
            .query_class(Arc::clone(&self.related))
            .where_in(related_pk, ids.clone())
            .delete()
            .await?;
        if deleted.is_some() {
            self.orm
                .table(pivot)
                .where_is(local_fk, self.owner_key_value())
                .where_in(other_fk, ids)
                .delete()
                .await?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Registry;
    use crate::test_utils::MockDatabase;

    fn registry() -> Registry {
        Registry::new()
            .register(
                ModelClass::new("Author")
                    .has_many("books", "Book")
                    .has_one("profile", "Profile")
                    .belongs_to_many("tags", "Tag")
                    .morph_many("comments", "Comment", "commentable"),
            )
            .register(ModelClass::new("Book").belongs_to("author", "Author"))
            .register(ModelClass::new("Profile"))
            .register(ModelClass::new("Tag"))
            .register(ModelClass::new("Comment").morph_to("commentable", "commentable"))
    }

    fn author(orm: &Orm, id: i64) -> Entity {
        Entity::from_row(orm.registry().get("Author").cloned(), row! { "id" => id })
    }

    #[test]
    fn owner_filters_per_kind() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let ann = author(&orm, 2);

        let books = orm.relation(&ann, "books").unwrap();
        assert_eq!(
            books.query().to_sql(),
            "SELECT * FROM \"books\" WHERE \"books\".\"author_id\" = ?"
        );
        assert_eq!(books.query().bindings(), vec![Value::Int(2)]);

        let tags = orm.relation(&ann, "tags").unwrap();
        assert_eq!(
            tags.query().to_sql(),
            "SELECT \"tags\".* FROM \"tags\" INNER JOIN \"author_tag\" ON \
             \"author_tag\".\"tag_id\" = \"tags\".\"id\" WHERE \"author_tag\".\"author_id\" = ?"
        );

        let comments = orm.relation(&ann, "comments").unwrap();
        assert_eq!(
            comments.query().to_sql(),
            "SELECT * FROM \"comments\" WHERE \"comments\".\"commentable_type\" = ? \
             AND \"comments\".\"commentable_id\" = ?"
        );
        assert_eq!(
            comments.query().bindings(),
            vec![Value::from("Author"), Value::Int(2)]
        );
    }

    #[test]
    fn belongs_to_filters_on_other_key() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let book = Entity::from_row(
            orm.registry().get("Book").cloned(),
            row! { "id" => 5, "author_id" => 2 },
        );
        let author = orm.relation(&book, "author").unwrap();
        assert_eq!(
            author.query().to_sql(),
            "SELECT * FROM \"authors\" WHERE \"authors\".\"id\" = ?"
        );
        assert!(author.kind().is_singular());
    }

    #[test]
    fn morph_to_resolves_type_at_runtime() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let comment = Entity::from_row(
            orm.registry().get("Comment").cloned(),
            row! { "id" => 1, "commentable_type" => "Author", "commentable_id" => 2 },
        );
        let target = orm.relation(&comment, "commentable").unwrap();
        assert_eq!(target.related_class().name(), "Author");

        let orphan = Entity::from_row(orm.registry().get("Comment").cloned(), row! { "id" => 1 });
        let target = orm.relation(&orphan, "commentable").unwrap();
        assert_eq!(target.related_class().name(), "Comment");
    }

    #[test]
    fn unknown_relation_is_logic_error() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let err = orm.relation(&author(&orm, 1), "publisher").unwrap_err();
        assert!(err.is_logic());
        let err = orm
            .relation(&Entity::from_row(None, row! { "id" => 1 }), "books")
            .unwrap_err();
        assert!(err.is_logic());
    }

    #[test]
    fn disabled_constraints_skip_owner_filter() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let owners = vec![author(&orm, 1), author(&orm, 2), author(&orm, 1)];
        let mut relation =
            Relation::new(orm.clone(), &owners[0], "books", Constraints::Disabled).unwrap();
        assert_eq!(relation.query().to_sql(), "SELECT * FROM \"books\"");
        relation.add_eager_constraints(&owners).unwrap();
        assert_eq!(
            relation.query().to_sql(),
            "SELECT * FROM \"books\" WHERE \"books\".\"author_id\" IN (?, ?)"
        );
    }

    #[test]
    fn pivot_eager_selects_correlation_column() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let owners = vec![author(&orm, 1), author(&orm, 2)];
        let mut relation =
            Relation::new(orm.clone(), &owners[0], "tags", Constraints::Disabled).unwrap();
        relation.add_eager_constraints(&owners).unwrap();
        assert_eq!(
            relation.query().to_sql(),
            "SELECT \"tags\".*, \"author_tag\".\"author_id\" AS \"_pivot_key\" FROM \"tags\" \
             INNER JOIN \"author_tag\" ON \"author_tag\".\"tag_id\" = \"tags\".\"id\" \
             WHERE \"author_tag\".\"author_id\" IN (?, ?)"
        );
    }

    #[test]
    fn mixed_morph_types_cannot_eager_load() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let class = orm.registry().get("Comment").cloned();
        let owners = vec![
            Entity::from_row(class.clone(), row! { "commentable_type" => "Author", "commentable_id" => 1 }),
            Entity::from_row(class, row! { "commentable_type" => "Book", "commentable_id" => 1 }),
        ];
        let mut relation =
            Relation::new(orm.clone(), &owners[0], "commentable", Constraints::Disabled).unwrap();
        assert!(relation.add_eager_constraints(&owners).unwrap_err().is_logic());
    }

    #[test]
    fn match_defaults_missing_owners() {
        let orm = MockDatabase::new().into_orm_with(registry());
        let mut owners = vec![author(&orm, 1), author(&orm, 2)];
        let relation =
            Relation::new(orm.clone(), &owners[0], "books", Constraints::Disabled).unwrap();
        let book_class = orm.registry().get("Book").cloned();
        let dictionary = relation.dictionary(vec![
            Entity::from_row(book_class.clone(), row! { "id" => 10, "author_id" => "2" }),
            Entity::from_row(book_class, row! { "id" => 11, "author_id" => 2 }),
        ]);
        relation.match_eager(&mut owners, &dictionary);
        assert_eq!(owners[0].relation("books"), Some(&Related::Many(Vec::new())));
        assert_eq!(owners[1].relation("books").map(Related::len), Some(2));
    }

    #[tokio::test]
    async fn create_sets_foreign_key_and_morph_type() {
        let db = MockDatabase::new();
        db.set_last_insert_id(30);
        let orm = db.clone().into_orm_with(registry());
        let mut comments = orm.relation(&author(&orm, 2), "comments").unwrap();
        let comment = comments
            .create(row! { "body" => "hi" })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(comment.id(), Some(&Value::Int(30)));
        let (sql, bindings) = db.executed()[0].clone();
        assert_eq!(
            sql,
            "INSERT INTO \"comments\" (\"body\", \"commentable_id\", \"commentable_type\") VALUES (?, ?, ?)"
        );
        assert_eq!(
            bindings,
            vec![Value::from("hi"), Value::Int(2), Value::from("Author")]
        );
    }

    #[tokio::test]
    async fn associate_belongs_to_updates_owner() {
        let db = MockDatabase::new();
        let orm = db.clone().into_orm_with(registry());
        let book = Entity::from_row(
            orm.registry().get("Book").cloned(),
            row! { "id" => 5, "author_id" => Value::Null },
        );
        let mut relation = orm.relation(&book, "author").unwrap();
        let mut ann = author(&orm, 2);
        assert!(relation.associate(&mut ann).await.unwrap());
        assert_eq!(relation.owner().value("author_id"), Value::Int(2));
        assert_eq!(
            db.executed()[0].0,
            "UPDATE \"books\" SET \"author_id\" = ? WHERE \"id\" = ?"
        );
    }

    #[tokio::test]
    async fn pivot_associate_and_disassociate() {
        let db = MockDatabase::new();
        let orm = db.clone().into_orm_with(registry());
        let mut tags = orm.relation(&author(&orm, 2), "tags").unwrap();
        let mut tag = Entity::from_row(orm.registry().get("Tag").cloned(), row! { "id" => 7 });
        assert!(tags.associate(&mut tag).await.unwrap());
        assert!(tags.disassociate(Some(&mut tag)).await.unwrap());
        let executed = db.executed();
        assert_eq!(
            executed[0].0,
            "INSERT INTO \"author_tag\" (\"author_id\", \"tag_id\") VALUES (?, ?)"
        );
        assert_eq!(
            executed[1].0,
            "DELETE FROM \"author_tag\" WHERE \"author_id\" = ? AND \"tag_id\" = ?"
        );
        assert_eq!(executed[1].1, vec![Value::Int(2), Value::Int(7)]);
    }
}
