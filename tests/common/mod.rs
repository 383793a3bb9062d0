//! Shared blockchain-like fixture for integration tests
//!
//! Three collections joined the way a chain index joins them:
//! transactions reference their inbound message, messages reference the
//! transaction that produced them.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use qindex::collection::Collection;
use qindex::config::QueryConfig;
use qindex::schema::{biguint, FieldDef, SchemaBuilder, SchemaTable};
use qindex::store::{IndexInfo, MemoryStore};
use serde_json::{json, Value};

pub fn blockchain_schema() -> SchemaTable {
    let mut b = SchemaBuilder::new();
    let account = b.declare("Account").unwrap();
    let message = b.declare("Message").unwrap();
    let transaction = b.declare("Transaction").unwrap();

    let scalar = b.scalar();
    let grams = b.big_uint(2);
    let tags = b.array(scalar);
    let acc_type_name = b.enum_name("acc_type", [("Uninit", 0), ("Active", 1), ("Frozen", 2)]);
    b.collection(
        "accounts",
        account,
        vec![
            FieldDef::new("acc_type", scalar),
            FieldDef::new("acc_type_name", acc_type_name),
            FieldDef::new("balance", grams),
            FieldDef::new("code_hash", scalar),
            FieldDef::new("tags", tags),
        ],
    )
    .unwrap();

    let src_transaction = b.join("src_transaction_id", "_key", transaction);
    b.collection(
        "messages",
        message,
        vec![
            FieldDef::new("msg_type", scalar),
            FieldDef::new("src", scalar),
            FieldDef::new("dst", scalar),
            FieldDef::new("src_transaction_id", scalar),
            FieldDef::new("src_transaction", src_transaction),
        ],
    )
    .unwrap();

    let out_ids = b.array(scalar);
    let in_message = b.join("in_msg", "_key", message);
    let out_messages = b.join_array("out_msgs", "_key", message);
    b.collection(
        "transactions",
        transaction,
        vec![
            FieldDef::new("status", scalar),
            FieldDef::new("account_addr", scalar),
            FieldDef::new("in_msg", scalar),
            FieldDef::new("in_message", in_message),
            FieldDef::new("out_msgs", out_ids),
            FieldDef::new("out_messages", out_messages),
        ],
    )
    .unwrap();

    b.build().unwrap()
}

/// Persisted form of a `balance` value.
pub fn grams(value: Value) -> Value {
    Value::String(biguint::encode_value(2, &value).unwrap())
}

pub fn accounts() -> Vec<Value> {
    vec![
        json!({ "_key": "a1", "acc_type": 0, "balance": grams(json!(0)), "code_hash": "h0", "tags": [] }),
        json!({ "_key": "a2", "acc_type": 1, "balance": grams(json!("0xff")), "code_hash": "h1", "tags": ["X"] }),
        json!({ "_key": "a3", "acc_type": 2, "balance": grams(json!(4096)), "code_hash": "h2", "tags": ["X", "Y", "X"] }),
    ]
}

pub fn messages() -> Vec<Value> {
    vec![
        json!({ "_key": "m1", "msg_type": 0, "src": "a1", "dst": "a2", "src_transaction_id": "t0" }),
        json!({ "_key": "m2", "msg_type": 1, "src": "a2", "dst": "a3", "src_transaction_id": "t1" }),
        json!({ "_key": "m3", "msg_type": 2, "src": "a3", "dst": "a1", "src_transaction_id": "t1" }),
    ]
}

pub fn transactions() -> Vec<Value> {
    vec![
        json!({ "_key": "t1", "status": 3, "account_addr": "a2", "in_msg": "m1", "out_msgs": ["m2", "m3"] }),
        json!({ "_key": "t2", "status": 1, "account_addr": "a3", "in_msg": "m2", "out_msgs": [] }),
    ]
}

/// Store holding every fixture document, with `acc_type` indexed.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = empty_store();
    for doc in accounts() {
        store.insert("accounts", doc);
    }
    for doc in messages() {
        store.insert("messages", doc);
    }
    for doc in transactions() {
        store.insert("transactions", doc);
    }
    store.set_indexes("accounts", vec![IndexInfo::new(["acc_type"])]);
    store
}

pub fn empty_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for name in ["accounts", "messages", "transactions"] {
        store.create_collection(name);
    }
    Arc::new(store)
}

/// Short poll delay so live-query tests finish quickly.
pub fn test_config() -> QueryConfig {
    QueryConfig::default().with_poll_retry_delay(Duration::from_millis(20))
}

pub fn collection(name: &str, store: &Arc<MemoryStore>) -> Collection {
    Collection::builder(Arc::new(blockchain_schema()), name, store.clone())
        .with_config(test_config())
        .with_join_source(store.clone())
        .build()
        .unwrap()
}

pub fn ids(rows: &[Value]) -> Vec<&str> {
    rows.iter().filter_map(|r| r["id"].as_str()).collect()
}
