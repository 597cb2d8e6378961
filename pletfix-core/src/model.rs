//! The model contract: registered classes, hydrated entities and hooks.

use crate::error::{PletfixError, PletfixResult};
use crate::relation::RelationDef;
use crate::value::{Row, Value};
use heck::ToSnakeCase;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle points a model class may hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

/// A lifecycle callback. Returning `Ok(false)` cancels the operation.
pub type Hook = Arc<dyn Fn(&mut Entity) -> PletfixResult<bool> + Send + Sync>;

/// The registered description of a mapped class.
#[derive(Clone)]
pub struct ModelClass {
    name: String,
    table: String,
    primary_key: String,
    fillable: Vec<String>,
    guarded: Option<Vec<String>>,
    hooks: HashMap<HookKind, Hook>,
    relations: IndexMap<String, RelationDef>,
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelClass {
    /// A class named `name` mapped to the snake-cased plural table
    /// (`BlogPost` → `blog_posts`).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table = format!("{}s", name.to_snake_case());
        Self {
            name,
            table,
            primary_key: "id".to_owned(),
            fillable: Vec::new(),
            guarded: None,
            hooks: HashMap::new(),
            relations: IndexMap::new(),
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    /// Only these attributes may be mass assigned.
    pub fn fillable(mut self, attributes: &[&str]) -> Self {
        self.fillable = attributes.iter().map(|a| (*a).to_owned()).collect();
        self
    }

    /// These attributes may not be mass assigned; `*` guards everything.
    pub fn guarded(mut self, attributes: &[&str]) -> Self {
        self.guarded = Some(attributes.iter().map(|a| (*a).to_owned()).collect());
        self
    }

    pub fn hook<F>(mut self, kind: HookKind, hook: F) -> Self
    where
        F: Fn(&mut Entity) -> PletfixResult<bool> + Send + Sync + 'static,
    {
        self.hooks.insert(kind, Arc::new(hook));
        self
    }

    /// Registers a relation accessor under `method`.
    pub fn relation(mut self, method: impl Into<String>, def: RelationDef) -> Self {
        self.relations.insert(method.into(), def);
        self
    }

    /// `related.{owner}_id` references this class's primary key.
    pub fn has_one(self, method: &str, related: &str) -> Self {
        let def = RelationDef::HasOne {
            related: related.to_owned(),
            foreign_key: self.foreign_key_name(),
            local_key: None,
        };
        self.relation(method, def)
    }

    pub fn has_many(self, method: &str, related: &str) -> Self {
        let def = RelationDef::HasMany {
            related: related.to_owned(),
            foreign_key: self.foreign_key_name(),
            local_key: None,
        };
        self.relation(method, def)
    }

    /// `self.{related}_id` references the related class's primary key.
    pub fn belongs_to(self, method: &str, related: &str) -> Self {
        let def = RelationDef::BelongsTo {
            related: related.to_owned(),
            foreign_key: format!("{}_id", related.to_snake_case()),
            other_key: None,
        };
        self.relation(method, def)
    }

    /// Pivot table named after both classes, sorted (`Author`, `Book` →
    /// `author_book`).
    pub fn belongs_to_many(self, method: &str, related: &str) -> Self {
        let mut names = [self.name.to_snake_case(), related.to_snake_case()];
        names.sort();
        let def = RelationDef::BelongsToMany {
            related: related.to_owned(),
            pivot_table: names.join("_"),
            local_foreign_key: self.foreign_key_name(),
            other_foreign_key: format!("{}_id", related.to_snake_case()),
            local_key: None,
            other_key: None,
        };
        self.relation(method, def)
    }

    /// `related.{prefix}_type` holds this class's name, `related.{prefix}_id` its key.
    pub fn morph_one(self, method: &str, related: &str, prefix: &str) -> Self {
        let def = RelationDef::MorphOne {
            related: related.to_owned(),
            type_attribute: format!("{}_type", prefix),
            foreign_key: format!("{}_id", prefix),
            local_key: None,
        };
        self.relation(method, def)
    }

    pub fn morph_many(self, method: &str, related: &str, prefix: &str) -> Self {
        let def = RelationDef::MorphMany {
            related: related.to_owned(),
            type_attribute: format!("{}_type", prefix),
            foreign_key: format!("{}_id", prefix),
            local_key: None,
        };
        self.relation(method, def)
    }

    /// The target class is read from `self.{prefix}_type` at runtime.
    pub fn morph_to(self, method: &str, prefix: &str) -> Self {
        let def = RelationDef::MorphTo {
            type_attribute: format!("{}_type", prefix),
            foreign_key: format!("{}_id", prefix),
            other_key: None,
        };
        self.relation(method, def)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn primary_key_name(&self) -> &str {
        &self.primary_key
    }

    /// `{snake name}_id`.
    pub fn foreign_key_name(&self) -> String {
        format!("{}_id", self.name.to_snake_case())
    }

    pub fn get_hook(&self, kind: HookKind) -> Option<&Hook> {
        self.hooks.get(&kind)
    }

    pub fn has_hook(&self, kind: HookKind) -> bool {
        self.hooks.contains_key(&kind)
    }

    pub fn relation_def(&self, method: &str) -> Option<&RelationDef> {
        self.relations.get(method)
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &RelationDef)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_fillable(&self, attribute: &str) -> bool {
        if !self.fillable.is_empty() {
            return self.fillable.iter().any(|a| a == attribute);
        }
        match &self.guarded {
            Some(guarded) => !guarded.iter().any(|a| a == "*" || a == attribute),
            None => attribute != self.primary_key,
        }
    }
}

/// A cached relation result.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Entity>),
    Many(Vec<Entity>),
}

impl Related {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Related::One(entity) => entity.as_ref(),
            Related::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            Related::Many(entities) => entities,
            Related::One(_) => &[],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Related::One(entity) => usize::from(entity.is_some()),
            Related::Many(entities) => entities.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Related::One(Some(entity)) => entity.to_json(),
            Related::One(None) => serde_json::Value::Null,
            Related::Many(entities) => entities.iter().map(Entity::to_json).collect(),
        }
    }
}

/// A hydrated row, optionally bound to its model class.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    class: Option<Arc<ModelClass>>,
    attributes: Row,
    original: Row,
    exists: bool,
    relations: IndexMap<String, Related>,
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.class_name() == other.class_name()
            && self.attributes == other.attributes
            && self.relations == other.relations
    }
}

impl Entity {
    /// A new, unsaved entity with raw attributes (no mass-assignment guard).
    pub fn new(class: Option<Arc<ModelClass>>, attributes: Row) -> Self {
        Self {
            class,
            attributes,
            ..Self::default()
        }
    }

    /// An entity read from the database.
    pub fn from_row(class: Option<Arc<ModelClass>>, row: Row) -> Self {
        Self {
            class,
            original: row.clone(),
            attributes: row,
            exists: true,
            relations: IndexMap::new(),
        }
    }

    pub fn class(&self) -> Option<&Arc<ModelClass>> {
        self.class.as_ref()
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class.as_deref().map(ModelClass::name)
    }

    pub fn primary_key(&self) -> &str {
        self.class
            .as_deref()
            .map(ModelClass::primary_key_name)
            .unwrap_or("id")
    }

    pub fn id(&self) -> Option<&Value> {
        self.attributes
            .get(self.primary_key())
            .filter(|v| !v.is_null())
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// The attribute value, `NULL` when unset.
    pub fn value(&self, attribute: &str) -> Value {
        self.attributes.get(attribute).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    pub fn unset(&mut self, attribute: &str) {
        self.attributes.shift_remove(attribute);
        self.original.shift_remove(attribute);
    }

    /// Mass assignment: attributes the class guards are skipped.
    pub fn fill(&mut self, attributes: Row) -> &mut Self {
        for (key, value) in attributes {
            let fillable = self
                .class
                .as_deref()
                .is_none_or(|class| class.is_fillable(&key));
            if fillable {
                self.attributes.insert(key, value);
            } else {
                tracing::debug!(attribute = %key, "pletfix mass assignment skipped guarded attribute");
            }
        }
        self
    }

    pub fn attributes(&self) -> &Row {
        &self.attributes
    }

    pub fn into_attributes(self) -> Row {
        self.attributes
    }

    /// Attributes changed since the entity was loaded or last saved.
    pub fn dirty(&self) -> Row {
        self.attributes
            .iter()
            .filter(|(key, value)| self.original.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty().is_empty()
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Marks the current attributes as persisted.
    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
        self.exists = true;
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.exists = false;
    }

    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn unset_relation(&mut self, name: &str) {
        self.relations.shift_remove(name);
    }

    pub fn clear_relations(&mut self) {
        self.relations.clear();
    }

    /// Attributes plus loaded relations as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::with_capacity(self.attributes.len() + self.relations.len());
        for (key, value) in &self.attributes {
            map.insert(key.clone(), value.to_json());
        }
        for (name, related) in &self.relations {
            map.insert(name.clone(), related.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Converts into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> PletfixResult<T> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

/// Class name → registered class.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    classes: HashMap<String, Arc<ModelClass>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, class: ModelClass) -> Self {
        self.insert(class);
        self
    }

    pub fn insert(&mut self, class: ModelClass) -> Arc<ModelClass> {
        let class = Arc::new(class);
        self.classes.insert(class.name().to_owned(), Arc::clone(&class));
        class
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelClass>> {
        self.classes.get(name)
    }

    pub fn require(&self, name: &str) -> PletfixResult<Arc<ModelClass>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| PletfixError::logic(format!("model class `{}` is not registered", name)))
    }

    /// Checks that every relation targets a registered class.
    pub fn validate(&self) -> PletfixResult<()> {
        for class in self.classes.values() {
            for (method, def) in class.relations() {
                if let Some(related) = def.related() {
                    if !self.classes.contains_key(related) {
                        return Err(PletfixError::logic(format!(
                            "relation `{}::{}` targets unregistered class `{}`",
                            class.name(),
                            method,
                            related
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
