//! CLI command implementations
//!
//! Both commands run against an in-memory store: `explain` against an empty
//! one, `query` against one seeded from a fixture file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::collection::Collection;
use crate::config::QueryConfig;
use crate::observability::Event;
use crate::query::QueryRequest;
use crate::schema::{SchemaLoader, SchemaTable};
use crate::store::{IndexInfo, MemoryStore};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_response};

/// Documents and index definitions per collection
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub collections: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<Vec<String>>>,
}

impl Fixture {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Seeds a store with every schema collection and the fixture contents.
    pub fn into_store(self, schema: &SchemaTable) -> CliResult<MemoryStore> {
        let store = empty_store(schema);
        for (name, docs) in self.collections {
            if schema.collection_root(&name).is_err() {
                return Err(CliError::InvalidFixture(format!(
                    "collection '{}' is not declared in the schema",
                    name
                )));
            }
            for doc in docs {
                if !doc.is_object() {
                    return Err(CliError::InvalidFixture(format!(
                        "documents of '{}' must be objects",
                        name
                    )));
                }
                store.insert(&name, doc);
            }
        }
        for (name, indexes) in self.indexes {
            store.set_indexes(&name, indexes.into_iter().map(IndexInfo::new).collect());
        }
        Ok(store)
    }
}

fn empty_store(schema: &SchemaTable) -> MemoryStore {
    let store = MemoryStore::new();
    for name in schema.collections() {
        store.create_collection(name);
    }
    store
}

fn load_config(path: Option<&Path>) -> CliResult<QueryConfig> {
    let config = match path {
        Some(path) => QueryConfig::load(path)?,
        None => QueryConfig::default(),
    };
    info!(event = %Event::ConfigLoaded, max_limit = config.max_limit);
    Ok(config)
}

fn load_schema(path: &Path) -> CliResult<Arc<SchemaTable>> {
    let schema = SchemaLoader::load(path)?;
    info!(event = %Event::SchemaLoaded, collections = schema.collections().count());
    Ok(Arc::new(schema))
}

/// Compiles a request and returns the explain document.
pub async fn explain(
    config: QueryConfig,
    schema: &Path,
    collection: &str,
    request: &QueryRequest,
) -> CliResult<Value> {
    let schema = load_schema(schema)?;
    let store = Arc::new(empty_store(&schema));
    let collection = Collection::new(schema, collection, config, store)?;
    let explain = collection.explain(request).await?;
    Ok(serde_json::to_value(explain)?)
}

/// Runs a request against a fixture and returns the rows.
pub async fn query(
    config: QueryConfig,
    schema: &Path,
    collection: &str,
    fixture: &Path,
    request: &QueryRequest,
) -> CliResult<Value> {
    let schema = load_schema(schema)?;
    let store = Arc::new(Fixture::load(fixture)?.into_store(&schema)?);
    let collection = Collection::new(schema, collection, config, store)?;
    let rows = collection.query(request).await?;
    Ok(Value::Array(rows))
}

/// Dispatches a parsed command and writes its response to stdout.
pub async fn run_command(command: Command, config: Option<&Path>) -> CliResult<()> {
    let config = load_config(config)?;
    let data = match command {
        Command::Explain {
            schema,
            collection,
            request,
        } => {
            let request: QueryRequest = read_request(request.as_deref())?;
            explain(config, &schema, &collection, &request).await?
        }
        Command::Query {
            schema,
            collection,
            fixture,
            request,
        } => {
            let request: QueryRequest = read_request(request.as_deref())?;
            query(config, &schema, &collection, &fixture, &request).await?
        }
    };
    write_response(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Selection;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCHEMA: &str = r#"{
        "types": [
            { "name": "Account", "collection": "accounts", "fields": [
                { "name": "acc_type", "kind": "scalar" },
                { "name": "code_hash", "kind": "scalar" }
            ]}
        ]
    }"#;

    fn temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_query_against_fixture() {
        let schema = temp_json(SCHEMA);
        let fixture = temp_json(
            &json!({
                "collections": { "accounts": [
                    { "_key": "a", "acc_type": 0 },
                    { "_key": "b", "acc_type": 1 },
                    { "_key": "c", "acc_type": 2 }
                ]},
                "indexes": { "accounts": [["acc_type"]] }
            })
            .to_string(),
        );
        let request = QueryRequest::new(json!({ "acc_type": { "eq": 1 } }))
            .with_selection(Selection::from_paths(["id"]));
        let rows = query(
            QueryConfig::default(),
            schema.path(),
            "accounts",
            fixture.path(),
            &request,
        )
        .await
        .unwrap();
        assert_eq!(rows, json!([{ "id": "b" }]));
    }

    #[tokio::test]
    async fn test_fixture_with_undeclared_collection() {
        let schema = temp_json(SCHEMA);
        let fixture = temp_json(r#"{ "collections": { "blocks": [] } }"#);
        let err = query(
            QueryConfig::default(),
            schema.path(),
            "accounts",
            fixture.path(),
            &QueryRequest::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidFixture(_)));
    }

    #[tokio::test]
    async fn test_explain_binds_values() {
        let schema = temp_json(SCHEMA);
        let request = QueryRequest::new(json!({ "acc_type": { "in": [1, 2] } }));
        let explain = explain(QueryConfig::default(), schema.path(), "accounts", &request)
            .await
            .unwrap();
        assert!(explain["text"].as_str().unwrap().contains("@v1"));
        assert_eq!(explain["params"], json!({ "v1": 1, "v2": 2 }));
        assert!(explain["operators"]["acc_type"]
            .as_array()
            .unwrap()
            .contains(&json!("in")));
    }
}
