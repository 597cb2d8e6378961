use futures_util::TryStreamExt;
use pletfix_orm::prelude::*;
use serde::Deserialize;

async fn seeded() -> Result<Orm, PletfixError> {
    let registry = Registry::new().register(ModelClass::new("User"));
    let orm = pletfix_orm::test_utils::memory_sqlite(registry).await?;
    orm.db()
        .exec(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, \
             team TEXT, score REAL)",
            &[],
        )
        .await?;
    orm.table("users")
        .insert_many(vec![
            row! { "name" => "Ann", "team" => "red", "score" => 3.5 },
            row! { "name" => "Bob", "team" => "red", "score" => 1.5 },
            row! { "name" => "Cid", "team" => "blue", "score" => 2.0 },
            row! { "name" => "Dee", "team" => "blue" },
        ])
        .await?;
    Ok(orm)
}

#[tokio::test]
async fn select_where_order_limit() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let names: Vec<Value> = orm
        .table("users")
        .select("name")
        .where_is("team", "red")
        .or_where_null("score")
        .order_by("name desc")
        .limit(2)
        .all()
        .await?
        .into_iter()
        .map(|user| user.value("name"))
        .collect();
    assert_eq!(names, vec![Value::from("Dee"), Value::from("Bob")]);
    Ok(())
}

#[tokio::test]
async fn offset_without_limit_reads_to_the_end() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let rest = orm.table("users").order_by("id").offset(2).all().await?;
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].value("name"), Value::from("Cid"));
    Ok(())
}

#[tokio::test]
async fn aggregates_summarize_the_filtered_set() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let users = orm.table("users");
    assert_eq!(users.count(None).await?, 4);
    assert_eq!(users.count(Some("score")).await?, 3);
    assert_eq!(users.clone().select("team").distinct().count(None).await?, 2);
    assert_eq!(
        users.clone().where_is("team", "red").sum(Some("score")).await?,
        Value::Float(5.0)
    );
    assert_eq!(users.max(Some("name")).await?, Value::from("Dee"));
    assert_eq!(
        users
            .clone()
            .where_in("name", ["Ann", "Cid"])
            .avg(Some("score"))
            .await?,
        Some(2.75)
    );
    // Grouping and paging do not leak into the aggregate.
    let grouped = users.clone().group_by("team").order_by("team").limit(1);
    assert_eq!(grouped.count(None).await?, 4);
    Ok(())
}

#[tokio::test]
async fn find_first_and_value() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let users = orm.query("User")?;
    let cid = users.find(3).await?.expect("user 3");
    assert_eq!(cid.value("name"), Value::from("Cid"));
    assert_eq!(cid.class_name(), Some("User"));
    assert!(users.find(99).await?.is_none());
    let bob = users.find_by("name", "Bob").await?.expect("bob");
    assert_eq!(bob.id(), Some(&Value::Int(2)));
    let top = users.clone().select("name").order_by("score desc").value().await?;
    assert_eq!(top, Value::from("Ann"));
    Ok(())
}

#[tokio::test]
async fn cursor_streams_rows_and_can_stop_early() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let users = orm.table("users").order_by("id");
    {
        let mut stream = users.cursor().await?;
        let first = stream.try_next().await?.expect("first row");
        assert_eq!(first.value("name"), Value::from("Ann"));
    }
    let all: Vec<Entity> = users.cursor().await?.try_collect().await?;
    assert_eq!(all.len(), 4);
    // The connection is free again after the streams are gone.
    assert_eq!(orm.table("users").count(None).await?, 4);
    Ok(())
}

#[tokio::test]
async fn writes_fail_fast_while_a_cursor_is_open() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let users = orm.table("users").order_by("id");
    {
        let mut stream = users.cursor().await?;
        assert!(stream.try_next().await?.is_some());
        let first = orm.table("users").where_is("id", 1);
        let write = first.update(row! { "score" => 9.0 });
        let result = tokio::time::timeout(std::time::Duration::from_secs(3), write)
            .await
            .expect("write must not wait on the cursor");
        assert!(result.unwrap_err().is_logic());
    }
    let updated = orm
        .table("users")
        .where_is("id", 1)
        .update(row! { "score" => 9.0 })
        .await?;
    assert_eq!(updated, Some(1));
    Ok(())
}

#[tokio::test]
async fn update_and_delete_report_affected_rows() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let updated = orm
        .table("users")
        .where_is("team", "blue")
        .update(row! { "score" => 9.0 })
        .await?;
    assert_eq!(updated, Some(2));
    let deleted = orm
        .table("users")
        .where_op("score", ">=", 9.0)
        .delete()
        .await?;
    assert_eq!(deleted, Some(2));
    assert_eq!(orm.table("users").count(None).await?, 2);
    Ok(())
}

#[tokio::test]
async fn subqueries_filter_and_join() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let best = orm.table("users").select("MAX(score)");
    let winner = orm
        .table("users")
        .where_sub_query("score", "=", best)
        .first()
        .await?
        .expect("winner");
    assert_eq!(winner.value("name"), Value::from("Ann"));

    let red = orm.table("users").select("id").where_is("team", "red");
    let joined = orm
        .builder()
        .select("u.name")
        .from_as("users", "u")
        .join_sub(JoinKind::Inner, red, "r", "r.id = u.id")
        .order_by("u.name")
        .all()
        .await?;
    assert_eq!(joined.len(), 2);
    Ok(())
}

#[tokio::test]
async fn empty_insert_and_truncate_reset_autoincrement() -> Result<(), Box<dyn std::error::Error>>
{
    let orm = seeded().await?;
    orm.db()
        .exec(
            "CREATE TABLE events (id INTEGER PRIMARY KEY AUTOINCREMENT, kind TEXT DEFAULT 'ping')",
            &[],
        )
        .await?;
    let events = orm.table("events");
    assert_eq!(events.insert(Row::new()).await?, Some(1));
    assert_eq!(events.insert(Row::new()).await?, Some(2));
    assert_eq!(events.clone().select("kind").value().await?, Value::from("ping"));

    assert_eq!(events.truncate().await?, 2);
    assert_eq!(events.count(None).await?, 0);
    assert_eq!(events.insert(Row::new()).await?, Some(1));
    Ok(())
}

#[tokio::test]
async fn typed_views_over_rows() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        name: String,
        score: Option<f64>,
    }

    let orm = seeded().await?;
    let scores: Vec<Score> = orm
        .table("users")
        .select("name, score")
        .where_is("team", "blue")
        .order_by("name")
        .get_as()
        .await?;
    assert_eq!(
        scores,
        vec![
            Score { name: "Cid".into(), score: Some(2.0) },
            Score { name: "Dee".into(), score: None },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn driver_errors_pass_through() -> Result<(), Box<dyn std::error::Error>> {
    let orm = seeded().await?;
    let err = orm.table("missing").all().await.unwrap_err();
    assert!(matches!(err, PletfixError::Sqlx(_)));
    Ok(())
}

#[tokio::test]
async fn statements_are_logged_with_bindings() -> Result<(), Box<dyn std::error::Error>> {
    use std::sync::{Arc, Mutex};

    struct TestWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let orm = seeded().await?;
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let make_writer = {
        let buffer = buffer.clone();
        move || TestWriter(buffer.clone())
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(make_writer)
        .without_time()
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    orm.table("users").where_is("name", "Bob").all().await?;

    let logs = String::from_utf8(buffer.lock().expect("lock").clone())?;
    assert!(logs.contains("pletfix query"), "{logs}");
    assert!(logs.contains("'Bob'"), "{logs}");
    assert!(logs.contains("operation=\"select\"") || logs.contains("operation=select"));
    Ok(())
}
