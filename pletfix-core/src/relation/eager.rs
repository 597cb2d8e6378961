use super::{Constraints, Relation};
use crate::error::PletfixResult;
use crate::model::{Entity, ModelClass};
use crate::orm::Orm;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use std::sync::Arc;

/// Splits `["books.reviews", "books", "tags"]` into
/// `{books: [reviews], tags: []}`, keeping first-seen order.
fn group_paths(paths: &[String]) -> IndexMap<String, Vec<String>> {
    let mut grouped: IndexMap<String, Vec<String>> = IndexMap::new();
    for path in paths {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest.trim())),
            None => (path.trim(), None),
        };
        let nested = grouped.entry(head.to_owned()).or_default();
        if let Some(rest) = rest.filter(|rest| !rest.is_empty()) {
            if !nested.iter().any(|n| n == rest) {
                nested.push(rest.to_owned());
            }
        }
    }
    grouped
}

/// Loads each relation in `with` onto `entities`, one query per relation
/// and nesting level regardless of how many entities there are.
pub(crate) fn eager_load<'a>(
    orm: &'a Orm,
    class: &'a Arc<ModelClass>,
    entities: &'a mut [Entity],
    with: &'a [String],
) -> BoxFuture<'a, PletfixResult<()>> {
    Box::pin(async move {
        if entities.is_empty() {
            return Ok(());
        }
        for (name, nested) in group_paths(with) {
            if class.relation_def(&name).is_none() {
                return Err(crate::error::PletfixError::logic(format!(
                    "`{}` has no relation named `{}`",
                    class.name(),
                    name
                )));
            }
            load_relation(orm, entities, &name, &nested).await?;
        }
        Ok(())
    })
}

async fn load_relation(
    orm: &Orm,
    entities: &mut [Entity],
    name: &str,
    nested: &[String],
) -> PletfixResult<()> {
    let mut relation = Relation::new(orm.clone(), &entities[0], name, Constraints::Disabled)?;
    relation.add_eager_constraints(entities)?;
    let mut results = relation.fetch_eager().await?;
    tracing::debug!(
        relation = name,
        owners = entities.len(),
        results = results.len(),
        "pletfix eager load"
    );
    if !nested.is_empty() && !results.is_empty() {
        let related = Arc::clone(relation.related_class());
        eager_load(orm, &related, &mut results, nested).await?;
    }
    let dictionary = relation.dictionary(results);
    relation.match_eager(entities, &dictionary);
    Ok(())
}
