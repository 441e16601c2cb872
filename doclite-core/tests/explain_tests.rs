// Tests for explain() and index selection
use doclite_core::{CollectionCore, Database};
use serde_json::json;

fn books(db: &Database) -> CollectionCore {
    let books = db.create_collection("books").unwrap();
    let genres = ["Fiction", "Drama", "Poetry", "Fiction", "Drama", "Fiction", "History"];
    for (i, genre) in genres.iter().enumerate() {
        books
            .insert_one(json!({"title": format!("Book {}", i), "genre": genre, "price": 10 + i as i64}))
            .unwrap();
    }
    books.insert_one(json!({"title": "Untitled"})).unwrap();
    books
}

#[test]
fn test_explain_without_index() {
    let db = Database::new();
    let books = books(&db);

    let explain = books.explain(&json!({"genre": "Fiction"})).unwrap();
    assert_eq!(explain.stage(), "COLLSCAN");
    assert_eq!(explain.index_name(), None);
    assert_eq!(explain.docs_examined, 8);
    assert_eq!(explain.n_returned, 3);

    let json = explain.to_json();
    assert_eq!(json["queryPlanner"]["stage"], "COLLSCAN");
    assert_eq!(json["executionStats"]["totalDocsExamined"], 8);
}

#[test]
fn test_explain_equality_examines_only_genre() {
    let db = Database::new();
    let books = books(&db);
    books.create_index(&json!({"genre": 1})).unwrap();

    for (genre, count) in [("Fiction", 3), ("Drama", 2), ("Poetry", 1), ("Romance", 0)] {
        let explain = books.explain(&json!({"genre": genre})).unwrap();
        assert_eq!(explain.stage(), "IXSCAN");
        assert_eq!(explain.index_name(), Some("genre_1"));
        assert_eq!(explain.docs_examined, count, "{}", genre);
        assert_eq!(explain.n_returned, count, "{}", genre);
        assert_eq!(explain.estimated_cost, count, "{}", genre);
    }
}

#[test]
fn test_missing_field_is_indexed_as_null() {
    let db = Database::new();
    let books = books(&db);
    books.create_index(&json!({"genre": 1})).unwrap();

    let explain = books.explain(&json!({"genre": null})).unwrap();
    assert_eq!(explain.stage(), "IXSCAN");
    assert_eq!(explain.n_returned, 1);
    assert_eq!(books.find_one(&json!({"genre": null})).unwrap().unwrap()["title"], "Untitled");
}

#[test]
fn test_explain_range_query() {
    let db = Database::new();
    let books = books(&db);
    books.create_index(&json!({"price": 1})).unwrap();

    let explain = books.explain(&json!({"price": {"$gte": 12, "$lt": 15}})).unwrap();
    assert_eq!(explain.stage(), "IXSCAN");
    assert_eq!(explain.n_returned, 3);
    assert_eq!(explain.docs_examined, 3);
    assert_eq!(explain.to_json()["queryPlanner"]["indexBounds"]["price"], "[12, 15)");
}

#[test]
fn test_non_qualifying_filters_scan() {
    let db = Database::new();
    let books = books(&db);
    books.create_index(&json!({"genre": 1})).unwrap();

    let filters = vec![
        json!({}),
        json!({"genre": {"$in": ["Fiction", "Drama"]}}),
        json!({"genre": "Fiction", "price": 10}),
        json!({"$or": [{"genre": "Fiction"}, {"genre": "Drama"}]}),
        json!({"price": {"$gt": 12}}),
    ];
    for filter in filters {
        let explain = books.explain(&filter).unwrap();
        assert_eq!(explain.stage(), "COLLSCAN", "{}", filter);
        assert_eq!(explain.docs_examined, 8);
    }
}

#[test]
fn test_index_and_scan_return_same_results() {
    let db = Database::new();
    let books = books(&db);

    let filters = vec![
        json!({"genre": "Fiction"}),
        json!({"genre": "Fiction", "price": {"$gt": 10}}),
        json!({"price": {"$lte": 13}}),
    ];
    let before: Vec<_> = filters.iter().map(|f| books.find(f).unwrap().to_vec()).collect();

    books.create_index(&json!({"genre": 1, "price": 1})).unwrap();
    books.create_index(&json!({"price": -1})).unwrap();

    for (filter, expected) in filters.iter().zip(before) {
        assert_eq!(books.explain(filter).unwrap().stage(), "IXSCAN", "{}", filter);
        assert_eq!(books.find(filter).unwrap().to_vec(), expected, "{}", filter);
    }
}

#[test]
fn test_drop_index_falls_back_to_scan() {
    let db = Database::new();
    let books = books(&db);
    let name = books.create_index(&json!({"genre": 1})).unwrap();

    books.drop_index(&name).unwrap();
    assert_eq!(books.explain(&json!({"genre": "Drama"})).unwrap().stage(), "COLLSCAN");
    assert!(books.list_indexes().is_empty());
}
