//! Document fixtures for copy tests.

#![allow(dead_code)]

use mongodb::bson::{Document, doc};

/// `count` documents with integer ids `0..count`.
pub fn numbered_documents(count: usize) -> Vec<Document> {
    (0..count).map(|i| numbered_document(i as i32, "source")).collect()
}

pub fn numbered_document(id: i32, origin: &str) -> Document {
    doc! {
        "_id": id,
        "name": format!("Document {id}"),
        "origin": origin,
        "category": if id % 2 == 0 { "even" } else { "odd" },
        "nested": { "number": id, "tags": ["a", "b"] },
    }
}

pub fn ids(documents: &[Document]) -> Vec<i32> {
    let mut ids: Vec<i32> = documents.iter().filter_map(|doc| doc.get_i32("_id").ok()).collect();
    ids.sort_unstable();
    ids
}
