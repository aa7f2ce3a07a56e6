use bson::{Bson, Document, doc};
use crudlayer_core::{AdapterError, ErrorKind, FindResult, Output, Params, Service, StoreBackend};
use crudlayer_memory::{MemoryStore, MemoryTable};

type Memory = Service<MemoryStore>;

async fn seeded() -> Memory {
    let service = Service::new(MemoryStore::new());

    service
        .create_many(
            vec![
                doc! { "name": "Doug", "age": 32, "created": true },
                doc! { "name": "Bob", "age": 25, "created": true },
                doc! { "name": "Alice", "age": 19, "created": false },
                doc! { "name": "Eve", "age": 41 },
                doc! { "name": "Dave", "age": 17, "created": false },
            ],
            Params::new(),
        )
        .await
        .unwrap();

    service
}

fn query(query: Document) -> Params<MemoryStore> {
    Params::new().query(query)
}

fn names(records: &[Document]) -> Vec<&str> {
    records
        .iter()
        .map(|record| record.get_str("name").unwrap())
        .collect()
}

#[tokio::test]
async fn limit_returns_exact_count_and_total_ignores_window() {
    let service = seeded().await;

    for n in 0..=5u64 {
        let page = service
            .find_page(query(doc! { "$limit": n as i64 }))
            .await
            .unwrap();

        assert_eq!(page.data.len() as u64, n);
        assert_eq!(page.total, 5);
        assert_eq!(page.limit, Some(n));
    }
}

#[tokio::test]
async fn zero_limit_still_counts() {
    let service = seeded().await;

    let result = service
        .find(query(doc! { "$limit": 0 }).paginate(true))
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        serde_json::json!({ "total": 5, "limit": 0, "skip": 0, "data": [] })
    );
}

#[tokio::test]
async fn unpaginated_find_returns_bare_records() {
    let service = seeded().await;

    let result = service
        .find(query(doc! { "age": { "$gte": 25 }, "$sort": { "age": 1 } }))
        .await
        .unwrap();

    let FindResult::Records(records) = result else {
        panic!("expected bare records");
    };
    assert_eq!(names(&records), vec!["Bob", "Doug", "Eve"]);
}

#[tokio::test]
async fn page_reports_caller_window() {
    let service = seeded().await;

    let page = service
        .find_page(query(doc! { "$sort": { "name": 1 }, "$skip": 1, "$limit": 2 }))
        .await
        .unwrap();

    assert_eq!(page.total, 5);
    assert_eq!(page.skip, 1);
    assert_eq!(names(&page.data), vec!["Bob", "Dave"]);

    let unlimited = service.find_page(Params::new()).await.unwrap();
    assert_eq!(unlimited.limit, None);
}

#[tokio::test]
async fn get_conflicting_query_is_not_found() {
    let service = seeded().await;

    let error = service
        .get(0_i64, query(doc! { "name": "Wrong" }))
        .await
        .unwrap_err();
    assert!(matches!(error, AdapterError::NotFound(_)));

    let error = service.get(0_i64, query(doc! { "id": 1 })).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    let found = service.get(0_i64, query(doc! { "id": 0 })).await.unwrap();
    assert_eq!(found.get_str("name").unwrap(), "Doug");
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let service = seeded().await;

    assert!(service.get(99_i64, Params::new()).await.unwrap_err().is_not_found());
    assert!(service.get(Bson::Null, Params::new()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn create_many_keeps_order_and_assigns_ids() {
    let service = Service::new(MemoryStore::new());

    let created = service
        .create_many(vec![doc! { "name": "Gerald" }, doc! { "name": "Herald" }], Params::new())
        .await
        .unwrap();

    assert_eq!(names(&created), vec!["Gerald", "Herald"]);
    assert_ne!(created[0].get("id"), created[1].get("id"));
    assert!(created.iter().all(|record| record.contains_key("id")));
}

#[tokio::test]
async fn exhausted_id_sequence_is_an_error() {
    let service = Service::new(MemoryStore::new());

    let last = service.create_one(doc! { "id": i64::MAX }, Params::new()).await.unwrap();
    assert_eq!(last.get("id"), Some(&Bson::Int64(i64::MAX)));

    let error = service
        .create_one(doc! { "name": "next" }, Params::new())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::BadRequest);

    // Explicit identifiers are still accepted.
    service.create_one(doc! { "id": -1_i64, "name": "below" }, Params::new()).await.unwrap();
    assert_eq!(service.find_all(Params::new()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn generated_ids_never_repeat_explicit_ones() {
    let service = Service::new(MemoryStore::new());

    service.create_one(doc! { "id": 0.0, "name": "zero" }, Params::new()).await.unwrap();
    service.create_one(doc! { "id": 1.0, "name": "one" }, Params::new()).await.unwrap();

    let created = service.create_one(doc! { "name": "two" }, Params::new()).await.unwrap();
    assert_eq!(created.get("id"), Some(&Bson::Int64(2)));
}

#[tokio::test]
async fn create_honours_select_and_keeps_caller_id() {
    let service = Service::new(MemoryStore::new());

    let created = service
        .create(
            doc! { "id": "custom", "name": "Ann", "age": 3 },
            query(doc! { "$select": ["name"] }),
        )
        .await
        .unwrap();

    assert_eq!(created, Output::One(doc! { "id": "custom", "name": "Ann" }));
}

#[tokio::test]
async fn patch_many_touches_only_the_snapshot() {
    let service = seeded().await;

    let patched = service
        .patch_many(doc! { "age": 2 }, query(doc! { "created": true }))
        .await
        .unwrap();

    assert_eq!(patched.len(), 2);
    assert!(patched.iter().all(|record| record.get_i32("age").unwrap() == 2));

    let untouched = service
        .find_all(query(doc! { "created": { "$ne": true } }))
        .await
        .unwrap();
    assert_eq!(untouched.len(), 3);
    assert!(untouched.iter().all(|record| record.get_i32("age").unwrap() != 2));
}

#[tokio::test]
async fn patch_many_returns_records_that_no_longer_match() {
    let service = seeded().await;

    let patched = service
        .patch_many(
            doc! { "created": false },
            query(doc! { "created": true, "$sort": { "name": 1 }, "$select": ["created"] }),
        )
        .await
        .unwrap();

    assert_eq!(
        patched,
        vec![
            doc! { "id": 1_i64, "created": false },
            doc! { "id": 0_i64, "created": false },
        ]
    );
}

#[tokio::test]
async fn patch_one_merges_and_strips_identifier() {
    let service = seeded().await;

    let patched = service
        .patch_one(1_i64, doc! { "id": 500, "age": 26 }, Params::new())
        .await
        .unwrap();

    assert_eq!(
        patched,
        doc! { "id": 1_i64, "name": "Bob", "age": 26, "created": true }
    );
}

#[tokio::test]
async fn patch_one_with_conflicting_query_is_not_found() {
    let service = seeded().await;

    let error = service
        .patch_one(1_i64, doc! { "age": 1 }, query(doc! { "name": "Doug" }))
        .await
        .unwrap_err();

    assert!(error.is_not_found());
    assert_eq!(service.get(1_i64, Params::new()).await.unwrap().get_i32("age").unwrap(), 25);
}

#[tokio::test]
async fn remove_twice_is_not_found() {
    let service = seeded().await;

    let removed = service.remove_one(2_i64, Params::new()).await.unwrap();
    assert_eq!(removed.get_str("name").unwrap(), "Alice");

    let error = service.remove_one(2_i64, Params::new()).await.unwrap_err();
    assert!(error.is_not_found());
}

#[tokio::test]
async fn remove_many_returns_snapshot() {
    let service = seeded().await;

    let removed = service
        .remove_many(query(doc! { "age": { "$lt": 20 }, "$select": ["name"] }))
        .await
        .unwrap();

    assert_eq!(
        removed,
        vec![
            doc! { "id": 2_i64, "name": "Alice" },
            doc! { "id": 4_i64, "name": "Dave" },
        ]
    );
    assert_eq!(service.find_all(Params::new()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn select_keeps_only_requested_fields_and_id() {
    let service = seeded().await;

    let records = service
        .find_all(query(doc! { "$select": ["name"] }))
        .await
        .unwrap();

    assert!(records.iter().all(|record| {
        record.keys().all(|key| key == "id" || key == "name") && record.len() == 2
    }));

    let one = service
        .get(3_i64, query(doc! { "$select": ["name"] }))
        .await
        .unwrap();
    assert_eq!(one, doc! { "id": 3_i64, "name": "Eve" });
}

#[tokio::test]
async fn select_projects_nested_paths() {
    let service = Service::new(MemoryStore::new());
    service
        .create_one(
            doc! { "id": 1, "name": "Ann", "address": { "city": "Oslo", "zip": "0150" } },
            Params::new(),
        )
        .await
        .unwrap();

    let one = service
        .get(1, query(doc! { "$select": ["address.city"] }))
        .await
        .unwrap();

    assert_eq!(one, doc! { "id": 1, "address": { "city": "Oslo" } });
}

#[tokio::test]
async fn update_nulls_missing_fields_and_keeps_id() {
    let service = seeded().await;

    let updated = service
        .update(0_i64, doc! { "id": 77, "name": "Douglas", "nickname": "D" }, Params::new())
        .await
        .unwrap();

    assert_eq!(
        updated,
        doc! { "id": 0_i64, "name": "Douglas", "age": Bson::Null, "created": Bson::Null, "nickname": "D" }
    );
    assert_eq!(service.get(0_i64, Params::new()).await.unwrap(), updated);
}

#[tokio::test]
async fn update_usage_errors() {
    let service = seeded().await;

    let error = service
        .update(Bson::Null, doc! { "name": "x" }, Params::new())
        .await
        .unwrap_err();
    assert!(error.is_bad_request());

    let error = service
        .update(0_i64, vec![doc! { "name": "x" }], Params::new())
        .await
        .unwrap_err();
    assert!(error.is_bad_request());

    let error = service
        .update(0_i64, doc! { "name": "x" }, query(doc! { "name": "Bob" }))
        .await
        .unwrap_err();
    assert!(error.is_not_found());
}

#[tokio::test]
async fn unknown_operator_is_bad_request() {
    let service = seeded().await;

    let error = service
        .find_all(query(doc! { "age": { "$between": [1, 2] } }))
        .await
        .unwrap_err();

    assert!(error.is_bad_request());
}

#[tokio::test]
async fn nested_groups_keep_their_grouping() {
    let service = seeded().await;

    let records = service
        .find_all(query(doc! {
            "$or": [
                { "$and": [{ "age": { "$gt": 30 } }, { "created": true }] },
                { "name": { "$ilike": "a%" } },
            ],
            "$sort": { "name": 1 },
        }))
        .await
        .unwrap();

    assert_eq!(names(&records), vec!["Alice", "Doug"]);
}

#[tokio::test]
async fn null_checks_include_missing_fields() {
    let service = seeded().await;

    let missing = service
        .find_all(query(doc! { "created": Bson::Null }))
        .await
        .unwrap();
    assert_eq!(names(&missing), vec!["Eve"]);

    let present = service
        .find_all(query(doc! { "created": { "$isnot": Bson::Null } }))
        .await
        .unwrap();
    assert_eq!(present.len(), 4);
}

#[tokio::test]
async fn caller_handle_overrides_default_table() {
    let service = seeded().await;
    let other = MemoryStore::new();
    let table: MemoryTable = other.handle().clone();

    service
        .create_one(doc! { "name": "Isolated" }, Params::new().handle(table.clone()))
        .await
        .unwrap();

    assert_eq!(table.len().await, 1);
    assert_eq!(service.find_all(Params::new()).await.unwrap().len(), 5);
}

#[tokio::test]
async fn query_json_is_accepted() {
    let service = seeded().await;

    let params = Params::new()
        .query_json(serde_json::json!({ "name": { "$in": ["Bob", "Eve"] }, "$sort": { "name": -1 } }))
        .unwrap();
    let records = service.find_all(params).await.unwrap();

    assert_eq!(names(&records), vec!["Eve", "Bob"]);
}
