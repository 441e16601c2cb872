// Integration tests for DocLite Core: a bookstore administration session
use doclite_core::{Database, DocLiteError, FindOptions};
use serde_json::{json, Value};

fn bookstore() -> Database {
    let db = Database::new();
    let books = db.create_collection("books").unwrap();
    books
        .insert_many(vec![
            json!({"title": "1984", "author": "George Orwell", "genre": "Fiction", "price": 10, "published_year": 1949, "in_stock": true}),
            json!({"title": "Animal Farm", "author": "George Orwell", "genre": "Fiction", "price": 20, "published_year": 1945, "in_stock": true}),
            json!({"title": "Brave New World", "author": "Aldous Huxley", "genre": "Fiction", "price": 15, "published_year": 1932, "in_stock": false}),
            json!({"title": "Death of a Salesman", "author": "Arthur Miller", "genre": "Drama", "price": 25, "published_year": 1949, "in_stock": true}),
            json!({"title": "The Crucible", "author": "Arthur Miller", "genre": "Drama", "price": 35, "published_year": 1953, "in_stock": false}),
            json!({"title": "Fahrenheit 451", "author": "Ray Bradbury", "genre": "Fiction", "price": 15, "published_year": 1953, "in_stock": true}),
            json!({"title": "Long Day's Journey into Night", "author": "Eugene O'Neill", "genre": "Drama", "price": 30, "published_year": 1956, "in_stock": true}),
            json!({"title": "The Road", "author": "Cormac McCarthy", "genre": "Fiction", "price": 15, "published_year": 2006, "in_stock": true}),
        ])
        .unwrap();
    db
}

fn titles(records: &[Value]) -> Vec<&str> {
    records.iter().map(|r| r["title"].as_str().unwrap()).collect()
}

#[test]
fn test_filtered_sorted_projection() {
    let db = bookstore();
    let options = FindOptions::new()
        .with_projection(json!({"title": 1, "price": 1, "_id": 0}))
        .with_sort(json!({"price": -1}));

    let results = db
        .find("books", &json!({"in_stock": true, "published_year": {"$gt": 1946}}), &options)
        .unwrap();

    assert_eq!(
        titles(&results),
        vec!["Long Day's Journey into Night", "Death of a Salesman", "Fahrenheit 451", "The Road", "1984"]
    );
    assert_eq!(results[0], json!({"title": "Long Day's Journey into Night", "price": 30}));
}

#[test]
fn test_pagination() {
    let db = bookstore();
    let books = db.collection("books").unwrap();

    let page = |n: usize| {
        books
            .find(&json!({}))
            .unwrap()
            .sort(&json!({"price": 1}))
            .unwrap()
            .skip(n * 3)
            .limit(3)
            .to_vec()
    };

    assert_eq!(titles(&page(0)), vec!["1984", "Brave New World", "Fahrenheit 451"]);
    assert_eq!(titles(&page(1)), vec!["The Road", "Animal Farm", "Death of a Salesman"]);
    assert_eq!(titles(&page(2)), vec!["Long Day's Journey into Night", "The Crucible"]);
    assert!(page(3).is_empty());
}

#[test]
fn test_update_and_delete() {
    let db = bookstore();

    assert_eq!(db.update_one("books", &json!({"title": "1984"}), &json!({"$set": {"price": 12}})).unwrap(), 1);
    assert_eq!(db.update_one("books", &json!({"title": "Ulysses"}), &json!({"$set": {"price": 1}})).unwrap(), 0);
    // already at that price: matched but not modified
    assert_eq!(db.update_one("books", &json!({"title": "1984"}), &json!({"$set": {"price": 12}})).unwrap(), 0);

    let books = db.collection("books").unwrap();
    let record = books.find_one(&json!({"title": "1984"})).unwrap().unwrap();
    assert_eq!(record["price"], 12);
    assert_eq!(record["author"], "George Orwell");

    assert_eq!(db.delete_one("books", &json!({"genre": "Drama"})).unwrap(), 1);
    assert_eq!(books.count_documents(&json!({"genre": "Drama"})).unwrap(), 2);
    // the first Drama by id is the one removed
    assert!(books.find_one(&json!({"title": "Death of a Salesman"})).unwrap().is_none());
}

#[test]
fn test_average_price_by_genre() {
    let db = bookstore();
    let results = db
        .aggregate(
            "books",
            &json!([
                {"$group": {"_id": "$genre", "avg_price": {"$avg": "$price"}, "count": {"$sum": 1}}},
                {"$sort": {"avg_price": -1}},
                {"$limit": 5},
                {"$project": {"_id": 0, "genre": "$_id", "avg_price": 1, "count": 1}}
            ]),
        )
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["genre"], "Drama");
    assert_eq!(results[0]["avg_price"].as_f64(), Some(30.0));
    assert_eq!(results[1]["genre"], "Fiction");
    assert_eq!(results[1]["avg_price"].as_f64(), Some(15.0));

    let total: i64 = results.iter().map(|r| r["count"].as_i64().unwrap()).sum();
    assert_eq!(total, 8);
}

#[test]
fn test_books_per_decade() {
    let db = bookstore();
    let results = db
        .aggregate(
            "books",
            &json!([
                {"$group": {
                    "_id": {"$subtract": ["$published_year", {"$mod": ["$published_year", 10]}]},
                    "books": {"$count": {}}
                }},
                {"$sort": {"_id": 1}},
                {"$project": {"_id": 0, "decade": "$_id", "books": 1}}
            ]),
        )
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"decade": 1930, "books": 1}),
            json!({"decade": 1940, "books": 3}),
            json!({"decade": 1950, "books": 3}),
            json!({"decade": 2000, "books": 1}),
        ]
    );
}

#[test]
fn test_grouping_on_projected_decade() {
    let db = Database::new();
    let releases = db.create_collection("releases").unwrap();
    for year in [1949, 1951, 1955, 1960] {
        releases.insert_one(json!({"published_year": year})).unwrap();
    }

    let results = db
        .aggregate(
            "releases",
            &json!([
                {"$project": {"decade": {"$subtract": ["$published_year", {"$mod": ["$published_year", 10]}]}}},
                {"$group": {"_id": "$decade", "totalBooks": {"$sum": 1}}},
                {"$sort": {"_id": 1}}
            ]),
        )
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"_id": 1940, "totalBooks": 1}),
            json!({"_id": 1950, "totalBooks": 2}),
            json!({"_id": 1960, "totalBooks": 1}),
        ]
    );
}

#[test]
fn test_id_only_projection() {
    let db = bookstore();
    let options = FindOptions::new().with_projection(json!({"_id": 1})).with_limit(2);

    let ids = db.find("books", &json!({}), &options).unwrap();
    assert_eq!(ids, vec![json!({"_id": 1}), json!({"_id": 2})]);

    let projected = db.aggregate("books", &json!([{"$project": {"_id": 1}}, {"$limit": 2}])).unwrap();
    assert_eq!(projected, ids);
}

#[test]
fn test_author_summary_with_strings() {
    let db = bookstore();
    let results = db
        .aggregate(
            "books",
            &json!([
                {"$match": {"author": "Arthur Miller"}},
                {"$project": {
                    "_id": 0,
                    "label": {"$concat": ["$title", " (", {"$substr": ["$published_year", 0, 4]}, ")"]}
                }}
            ]),
        )
        .unwrap();

    assert_eq!(
        results,
        vec![
            json!({"label": "Death of a Salesman (1949)"}),
            json!({"label": "The Crucible (1953)"}),
        ]
    );
}

#[test]
fn test_index_creation_and_explain() {
    let db = bookstore();

    let name = db.create_index("books", &json!({"author": 1, "published_year": -1})).unwrap();
    assert_eq!(name, "author_1_published_year_-1");
    assert_eq!(db.create_index("books", &json!({"author": 1, "published_year": -1})).unwrap(), name);

    let explain = db
        .explain("books", &json!({"author": "George Orwell", "published_year": {"$gte": 1946}}))
        .unwrap();
    assert_eq!(explain.stage(), "IXSCAN");
    assert_eq!(explain.index_name(), Some("author_1_published_year_-1"));
    assert_eq!(explain.n_returned, 1);

    let json = explain.to_json();
    assert_eq!(json["queryPlanner"]["indexBounds"]["author"], "[\"George Orwell\", \"George Orwell\"]");
    assert_eq!(json["queryPlanner"]["indexBounds"]["published_year"], "[1946, MaxKey]");
}

#[test]
fn test_error_paths_leave_store_unchanged() {
    let db = bookstore();
    let books = db.collection("books").unwrap();

    assert!(matches!(
        books.find(&json!({"price": {"$near": 5}})),
        Err(DocLiteError::InvalidFilter(_))
    ));
    assert!(matches!(
        db.update_one("books", &json!({}), &json!({"$set": {"_id": 99}})),
        Err(DocLiteError::InvalidUpdate(_))
    ));
    assert!(matches!(
        db.aggregate("books", &json!([{"$project": {"r": {"$divide": ["$price", 0]}}}])),
        Err(DocLiteError::ArithmeticError(_))
    ));
    assert!(matches!(
        db.aggregate("books", &json!([{"$bucket": {}}])),
        Err(DocLiteError::InvalidPipelineStage(_))
    ));

    assert_eq!(books.len(), 8);
    assert_eq!(books.find_one(&json!({})).unwrap().unwrap()["_id"], 1);
}
