//! Wraps writes with a model class's before/after hooks.
//!
//! A before-hook returning `false` cancels the write before anything reaches
//! the database. When an after-hook exists the write and the after-hooks
//! share a transaction, so an after-hook returning `false` (or failing)
//! rolls the write back.

use crate::database::Database;
use crate::error::PletfixResult;
use crate::model::{Entity, HookKind, ModelClass};
use crate::query::QueryBuilder;
use crate::value::{Row, Value};

/// Runs `kind` on each entity in order, stopping at the first `false`.
fn call(class: &ModelClass, kind: HookKind, entities: &mut [Entity]) -> PletfixResult<bool> {
    let Some(hook) = class.get_hook(kind) else {
        return Ok(true);
    };
    for entity in entities.iter_mut() {
        if !hook(entity)? {
            tracing::debug!(class = class.name(), hook = ?kind, "pletfix hook cancelled write");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Commits on `Ok`, rolls back on `Err`.
pub(crate) async fn finish_transaction<T>(
    db: &dyn Database,
    result: PletfixResult<T>,
) -> PletfixResult<T> {
    match result {
        Ok(value) => {
            db.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback().await {
                tracing::warn!(error = %rollback_err, "pletfix rollback failed");
            }
            Err(err)
        }
    }
}

/// Runs the after-hooks on a written result inside the open transaction,
/// then commits, or rolls back when a hook cancels.
async fn conclude<T>(
    db: &dyn Database,
    class: &ModelClass,
    kind: HookKind,
    entities: &mut [Entity],
    written: PletfixResult<T>,
) -> PletfixResult<Option<T>> {
    let outcome = written.and_then(|value| {
        call(class, kind, entities).map(|accepted| accepted.then_some(value))
    });
    match outcome {
        Ok(None) => {
            db.rollback().await?;
            Ok(None)
        }
        other => finish_transaction(db, other).await,
    }
}

/// Inserts `entities`, returning the last generated id.
pub(crate) async fn insert(
    builder: &QueryBuilder,
    entities: &mut [Entity],
) -> PletfixResult<Option<i64>> {
    let Some(class) = builder.hooked_class(HookKind::BeforeInsert, HookKind::AfterInsert) else {
        let rows: Vec<&Row> = entities.iter().map(Entity::attributes).collect();
        let id = builder.insert_rows_physical(&rows).await?;
        record_insert(entities, id);
        return Ok(Some(id));
    };

    if !call(&class, HookKind::BeforeInsert, entities)? {
        return Ok(None);
    }
    if !class.has_hook(HookKind::AfterInsert) {
        let rows: Vec<&Row> = entities.iter().map(Entity::attributes).collect();
        let id = builder.insert_rows_physical(&rows).await?;
        record_insert(entities, id);
        return Ok(Some(id));
    }

    // After-hooks need every generated id, so rows go in one by one.
    let db = builder.database();
    db.begin().await?;
    let written = async {
        let mut last = 0;
        for entity in entities.iter_mut() {
            last = builder.insert_physical(entity.attributes()).await?;
            record_insert(std::slice::from_mut(entity), last);
        }
        Ok(last)
    }
    .await;
    conclude(db, &class, HookKind::AfterInsert, entities, written).await
}

/// Marks freshly inserted entities as persisted. A single entity without a
/// key receives the generated id.
fn record_insert(entities: &mut [Entity], id: i64) {
    if let [entity] = entities {
        if entity.id().is_none_or(Value::is_null) {
            let key = entity.primary_key().to_owned();
            entity.set(key, id);
        }
    }
    for entity in entities.iter_mut() {
        entity.sync_original();
    }
}

/// Updates every row the builder matches with `data`.
///
/// With hooks the matching entities are loaded first so hooks can inspect
/// them with `data` already applied.
pub(crate) async fn update(builder: &QueryBuilder, data: Row) -> PletfixResult<Option<u64>> {
    let Some(class) = builder.hooked_class(HookKind::BeforeUpdate, HookKind::AfterUpdate) else {
        return builder.update_physical(&data).await.map(Some);
    };
    let mut entities = builder.entities_for_hooks().await?;
    for entity in entities.iter_mut() {
        for (column, value) in &data {
            entity.set(column.clone(), value.clone());
        }
    }
    if !call(&class, HookKind::BeforeUpdate, &mut entities)? {
        return Ok(None);
    }
    write_update(builder, &class, &mut entities, &data).await
}

/// Persists the dirty attributes of one existing entity.
pub(crate) async fn update_entity(
    builder: &QueryBuilder,
    entity: &mut Entity,
) -> PletfixResult<Option<u64>> {
    let entities = std::slice::from_mut(entity);
    let class = builder.hooked_class(HookKind::BeforeUpdate, HookKind::AfterUpdate);
    if let Some(class) = &class {
        if !call(class, HookKind::BeforeUpdate, entities)? {
            return Ok(None);
        }
    }
    let data = entities[0].dirty();
    if data.is_empty() {
        return Ok(Some(0));
    }
    match class {
        Some(class) => write_update(builder, &class, entities, &data).await,
        None => {
            let affected = builder.update_physical(&data).await?;
            entities[0].sync_original();
            Ok(Some(affected))
        }
    }
}

async fn write_update(
    builder: &QueryBuilder,
    class: &ModelClass,
    entities: &mut [Entity],
    data: &Row,
) -> PletfixResult<Option<u64>> {
    if !class.has_hook(HookKind::AfterUpdate) {
        let affected = builder.update_physical(data).await?;
        entities.iter_mut().for_each(Entity::sync_original);
        return Ok(Some(affected));
    }
    let db = builder.database();
    db.begin().await?;
    let written = builder.update_physical(data).await;
    if written.is_ok() {
        entities.iter_mut().for_each(Entity::sync_original);
    }
    conclude(db, class, HookKind::AfterUpdate, entities, written).await
}

/// Deletes every row the builder matches.
pub(crate) async fn delete(builder: &QueryBuilder) -> PletfixResult<Option<u64>> {
    let Some(class) = builder.hooked_class(HookKind::BeforeDelete, HookKind::AfterDelete) else {
        return builder.delete_physical().await.map(Some);
    };
    let mut entities = builder.entities_for_hooks().await?;
    write_delete(builder, &class, &mut entities).await
}

/// Deletes one existing entity.
pub(crate) async fn delete_entity(
    builder: &QueryBuilder,
    entity: &mut Entity,
) -> PletfixResult<Option<u64>> {
    let entities = std::slice::from_mut(entity);
    let affected = match builder.hooked_class(HookKind::BeforeDelete, HookKind::AfterDelete) {
        Some(class) => write_delete(builder, &class, entities).await?,
        None => Some(builder.delete_physical().await?),
    };
    if affected.is_some() {
        entities[0].mark_deleted();
    }
    Ok(affected)
}

async fn write_delete(
    builder: &QueryBuilder,
    class: &ModelClass,
    entities: &mut [Entity],
) -> PletfixResult<Option<u64>> {
    if !call(class, HookKind::BeforeDelete, entities)? {
        return Ok(None);
    }
    if !class.has_hook(HookKind::AfterDelete) {
        return builder.delete_physical().await.map(Some);
    }
    let db = builder.database();
    db.begin().await?;
    let written = builder.delete_physical().await;
    conclude(db, class, HookKind::AfterDelete, entities, written).await
}
