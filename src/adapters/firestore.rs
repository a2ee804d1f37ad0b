use crate::domain::model::{AddResult, DocumentRef, Entry, QueryOperator, QueryValue};
use crate::domain::ports::EntryStore;
use crate::utils::error::{MettaError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: u32 = 300;

/// Connection details for one Firestore collection.
#[derive(Debug, Clone)]
pub struct FirestoreTarget {
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    pub collection: String,
    /// Opaque bearer credential; `None` for the local emulator.
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    document: Option<Document>,
}

/// Entry store backed by the Firestore REST API.
///
/// The HTTP client is handed in by the caller, so tests and the CLI decide
/// how it is built and how long it lives.
pub struct FirestoreStore {
    client: Client,
    target: FirestoreTarget,
}

impl FirestoreStore {
    pub fn new(client: Client, target: FirestoreTarget) -> Self {
        Self { client, target }
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.target.base_url.trim_end_matches('/'),
            self.target.project_id,
            self.target.database
        )
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.documents_url(), self.target.collection)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.target.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// URL of one document; the id is percent-encoded as a single path segment.
    fn document_url(&self, id: &str) -> Result<Url> {
        let collection = self.collection_url();
        let mut url = Url::parse(&collection).map_err(|e| MettaError::StoreError {
            message: format!("invalid collection URL '{}': {}", collection, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| MettaError::StoreError {
                message: format!("collection URL '{}' cannot take a document id", collection),
            })?
            .push(id);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        check_status(self.authorize(request).send().await?).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    tracing::debug!("Firestore response status: {}", status);
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MettaError::StoreError {
        message: format!("HTTP {}: {}", status, body),
    })
}

#[async_trait]
impl EntryStore for FirestoreStore {
    async fn get(&self, id: &str) -> Result<Entry> {
        // an empty id would address the collection itself
        if id.trim().is_empty() {
            return Err(MettaError::NotFound { id: id.to_string() });
        }
        let url = self.document_url(id)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MettaError::NotFound { id: id.to_string() });
        }
        let document: Document = check_status(response).await?.json().await?;
        Ok(document_to_entry(&document))
    }

    async fn list(&self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(self.collection_url())
                .query(&[("pageSize", PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let page: ListResponse = self.send(request).await?.json().await?;
            entries.extend(page.documents.iter().map(document_to_entry));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Listed {} entries", entries.len());
        Ok(entries)
    }

    async fn query(&self, field: &str, op: QueryOperator, value: &QueryValue) -> Result<Vec<Entry>> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.target.collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": operator_name(op),
                        "value": encode_value(value),
                    }
                }
            }
        });

        let url = format!("{}:runQuery", self.documents_url());
        let rows: Vec<QueryRow> = self
            .send(self.client.post(&url).json(&body))
            .await?
            .json()
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.document.as_ref())
            .map(document_to_entry)
            .collect())
    }

    async fn add(&self, entry: &Entry) -> Result<AddResult> {
        let fields = entry_to_fields(entry)?;
        let body = json!({ "fields": fields });
        let document: Document = self
            .send(self.client.post(self.collection_url()).json(&body))
            .await?
            .json()
            .await?;

        let created = match document.create_time.as_deref() {
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| MettaError::StoreError {
                    message: format!("invalid createTime '{}': {}", ts, e),
                })?,
            None => Utc::now(),
        };

        Ok((
            created,
            DocumentRef {
                id: document_id(&document.name).to_string(),
                path: document.name,
            },
        ))
    }
}

fn operator_name(op: QueryOperator) -> &'static str {
    match op {
        QueryOperator::LessThan => "LESS_THAN",
        QueryOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        QueryOperator::Equal => "EQUAL",
        QueryOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
        QueryOperator::GreaterThan => "GREATER_THAN",
        QueryOperator::In => "IN",
    }
}

fn encode_value(value: &QueryValue) -> Value {
    match value {
        QueryValue::Null => json!({ "nullValue": null }),
        QueryValue::Bool(b) => json!({ "booleanValue": b }),
        // integers travel as strings in the REST encoding
        QueryValue::Integer(i) => json!({ "integerValue": i.to_string() }),
        QueryValue::Double(d) => json!({ "doubleValue": encode_double(*d) }),
        QueryValue::String(s) => json!({ "stringValue": s }),
        QueryValue::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
    }
}

/// JSON has no NaN or infinities; the REST encoding spells them as strings.
fn encode_double(d: f64) -> Value {
    if d.is_nan() {
        json!("NaN")
    } else if d == f64::INFINITY {
        json!("Infinity")
    } else if d == f64::NEG_INFINITY {
        json!("-Infinity")
    } else {
        json!(d)
    }
}

fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn string_value(s: &str) -> Value {
    json!({ "stringValue": s })
}

fn entry_to_fields(entry: &Entry) -> Result<Value> {
    let generated_by = match &entry.generated_by {
        Some(id) => string_value(id),
        None => json!({ "nullValue": null }),
    };
    Ok(json!({
        "question": string_value(&entry.question),
        "answer": string_value(&entry.answer),
        "context": string_value(&entry.context),
        "generated_by": generated_by,
        // users are stored as a JSON string
        "users": string_value(&serde_json::to_string(entry.users())?),
        "created_by": string_value(&entry.created_by),
        "created_by_uid": string_value(&entry.created_by_uid),
    }))
}

fn read_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn read_number(value: &Value) -> Option<i64> {
    if let Some(s) = value.get("integerValue").and_then(Value::as_str) {
        return s.parse().ok();
    }
    value
        .get("integerValue")
        .and_then(Value::as_i64)
        .or_else(|| value.get("doubleValue").and_then(Value::as_f64).map(|f| f as i64))
}

/// Ratings may be a JSON string or a native map; anything else counts as no
/// ratings at all.
fn read_users(fields: &Map<String, Value>) -> BTreeMap<String, i64> {
    let Some(raw) = fields.get("users") else {
        return BTreeMap::new();
    };

    if let Some(text) = raw.get("stringValue").and_then(Value::as_str) {
        return serde_json::from_str(text).unwrap_or_else(|e| {
            tracing::debug!("Ignoring malformed users value {:?}: {}", text, e);
            BTreeMap::new()
        });
    }

    raw.get("mapValue")
        .and_then(|m| m.get("fields"))
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(user, v)| read_number(v).map(|n| (user.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

fn document_to_entry(document: &Document) -> Entry {
    tracing::debug!("Decoding {}", document.name);
    let fields = &document.fields;
    let mut entry = Entry::new(
        read_string(fields, "question").unwrap_or_default(),
        read_string(fields, "answer").unwrap_or_default(),
    )
    .with_users(read_users(fields));

    entry.id = document_id(&document.name).to_string();
    entry.context = read_string(fields, "context").unwrap_or_default();
    entry.generated_by = read_string(fields, "generated_by");
    entry.created_by = read_string(fields, "created_by").unwrap_or_default();
    entry.created_by_uid = read_string(fields, "created_by_uid").unwrap_or_default();
    entry
}
