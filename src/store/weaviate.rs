use std::collections::HashSet;
use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::*;

const BACKEND: &str = "weaviate";

/// Weaviate 适配器，使用 v1 REST 与 GraphQL 接口
///
/// 插入时把批次再拆成小批量请求，失败的对象会单独重发，重试耗尽后丢弃并计数。
pub struct WeaviateStore {
    client: Client,
    base: String,
    /// 每次请求发送的对象数量
    request_batch: usize,
    /// 失败对象的最大重发次数
    retries: usize,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct Object<'a> {
    class: &'a str,
    id: Uuid,
    properties: Properties,
    vector: Cow<'a, [f32]>,
}

#[derive(Serialize)]
struct Properties {
    city_id: i32,
    quality_score: f32,
}

#[derive(Deserialize)]
struct ObjectResult {
    id: Uuid,
    #[serde(default)]
    result: Option<ResultErrors>,
}

#[derive(Deserialize)]
struct ResultErrors {
    #[serde(default)]
    errors: Option<ErrorList>,
}

#[derive(Deserialize)]
struct ErrorList {
    #[serde(default)]
    error: Vec<ErrorMessage>,
}

#[derive(Deserialize)]
struct ErrorMessage {
    message: String,
}

impl ObjectResult {
    fn error(&self) -> Option<&str> {
        let errors = self.result.as_ref()?.errors.as_ref()?;
        errors.error.first().map(|e| e.message.as_str())
    }
}

impl WeaviateStore {
    pub fn new(opts: &BackendOptions) -> Result<Self> {
        let client = build_client(BACKEND, opts)?;
        Ok(Self {
            client,
            base: opts.weaviate_url.trim_end_matches('/').to_string(),
            request_batch: opts.weaviate_batch_size.max(1),
            retries: opts.weaviate_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base, path)
    }

    async fn graphql(&self, query: String) -> Result<Value> {
        let url = self.url("graphql");
        debug!("POST {}", url);
        let mut response: Value = self
            .client
            .post(&url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?
            .json()
            .await
            .map_err(|e| BenchError::from_http(BACKEND, e))?;

        if let Some(errors) = response.get("errors").filter(|e| !e.is_null()) {
            return Err(BenchError::Backend { backend: BACKEND, message: errors.to_string() });
        }
        Ok(response["data"].take())
    }

    /// 发送一次批量请求，返回写入失败的对象及第一条错误信息
    async fn send_objects(&self, objects: &[Object<'_>]) -> Result<(HashSet<Uuid>, Option<String>)> {
        let results: Vec<ObjectResult> = self
            .client
            .post(self.url("batch/objects"))
            .json(&json!({ "objects": objects }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?
            .json()
            .await
            .map_err(|e| BenchError::from_http(BACKEND, e))?;

        let mut first_error = None;
        let mut failed = HashSet::new();
        for result in &results {
            if let Some(message) = result.error() {
                first_error.get_or_insert_with(|| message.to_string());
                failed.insert(result.id);
            }
        }
        Ok((failed, first_error))
    }

    /// 写入一组对象，失败的对象最多重发 `retries` 次，返回最终丢弃的数量
    ///
    /// 后端不可达时立即返回错误；整个请求在重试耗尽后仍然失败时，剩下的对象作为插入失败返回。
    async fn insert_chunk(&self, mut pending: Vec<Object<'_>>) -> Result<usize> {
        let mut last_error = String::new();
        let mut request_failed = false;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.send_objects(&pending).await {
                Ok((failed, error)) => {
                    request_failed = false;
                    pending.retain(|o| failed.contains(&o.id));
                    if let Some(error) = error {
                        last_error = error;
                    }
                }
                Err(e @ BenchError::BackendUnreachable { .. }) => return Err(e),
                Err(e) => {
                    request_failed = true;
                    last_error = e.to_string();
                }
            }
            if pending.is_empty() {
                return Ok(0);
            }
            debug!("{} 个对象写入失败，第 {} 次尝试: {}", pending.len(), attempt + 1, last_error);
        }

        if request_failed {
            return Err(BenchError::TransientInsertFailure {
                backend: BACKEND,
                first_id: row_id(pending[0].id),
                rows: pending.len(),
                message: last_error,
            });
        }
        warn!("重试耗尽，丢弃 {} 个对象: {}", pending.len(), last_error);
        Ok(pending.len())
    }
}

/// 行号与 Weaviate 对象 UUID 一一对应
pub fn object_id(id: i64) -> Uuid {
    Uuid::from_u128(id as u64 as u128)
}

fn row_id(uuid: Uuid) -> i64 {
    uuid.as_u128() as u64 as i64
}

/// 将过滤条件转换为 GraphQL where 参数
pub fn where_filter(filter: &Filter) -> String {
    match filter {
        Filter::CityEq(city) => {
            format!("{{path: [\"{}\"], operator: Equal, valueInt: {}}}", CITY_FIELD, city)
        }
        Filter::QualityAbove(score) => {
            format!("{{path: [\"{}\"], operator: GreaterThan, valueNumber: {}}}", QUALITY_FIELD, score)
        }
        Filter::And(a, b) => {
            format!("{{operator: And, operands: [{}, {}]}}", where_filter(a), where_filter(b))
        }
    }
}

fn data_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int32 => "int",
        ScalarKind::Float => "number",
    }
}

fn distance(metric: Metric) -> &'static str {
    match metric {
        Metric::L2 => "l2-squared",
    }
}

fn class_body(class: &str, schema: &CollectionSchema) -> Value {
    let properties = schema
        .fields
        .iter()
        .map(|f| json!({ "name": f.name, "dataType": [data_type(f.kind)] }))
        .collect::<Vec<_>>();
    json!({
        "class": class,
        "vectorizer": "none",
        "vectorIndexType": "hnsw",
        "vectorIndexConfig": {
            "distance": distance(schema.index.metric),
            "maxConnections": schema.index.m,
            "efConstruction": schema.index.ef_construction,
        },
        "properties": properties,
    })
}

fn search_query(class: &str, request: &SearchRequest<'_>) -> Result<String> {
    let vector = serde_json::to_string(request.vector)?;
    let filter = match &request.filter {
        Some(filter) => format!(", where: {}", where_filter(filter)),
        None => String::new(),
    };
    Ok(format!(
        "{{ Get {{ {}(nearVector: {{vector: {}}}{}, limit: {}) {{ _additional {{ id }} }} }} }}",
        class, vector, filter, request.top_k
    ))
}

impl VectorStore for WeaviateStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Weaviate
    }

    fn collection_name(&self, dimension: Dimension) -> String {
        format!("Benchmark_{}d", dimension)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .get(self.url(".well-known/ready"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?;
        Ok(())
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.url(&format!("schema/{}", collection)))
            .send()
            .await
            .map_err(|e| BenchError::from_http(BACKEND, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(BenchError::Backend {
                backend: BACKEND,
                message: format!("查询 {} 失败: {}", collection, status),
            }),
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("schema/{}", collection)))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?;
        Ok(())
    }

    async fn create_schema(&self, collection: &str, schema: &CollectionSchema) -> Result<()> {
        self.client
            .post(self.url("schema"))
            .json(&class_body(collection, schema))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?;
        Ok(())
    }

    async fn create_index(&self, collection: &str, _params: &IndexParams) -> Result<()> {
        debug!("{} 的索引已在建表时声明", collection);
        Ok(())
    }

    async fn insert(&self, collection: &str, batch: &Batch) -> Result<InsertOutcome> {
        let mut objects = batch_rows(batch)
            .enumerate()
            .map(|(k, vector)| Object {
                class: collection,
                id: object_id(batch.ids[k]),
                properties: Properties {
                    city_id: batch.city_ids[k],
                    quality_score: batch.quality_scores[k],
                },
                vector,
            })
            .collect::<Vec<_>>();

        let mut dropped = 0;
        while !objects.is_empty() {
            let rest = objects.split_off(self.request_batch.min(objects.len()));
            dropped += self.insert_chunk(objects).await?;
            objects = rest;
        }
        Ok(InsertOutcome { inserted: batch.len() - dropped, dropped })
    }

    async fn flush(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _collection: &str) -> Result<()> {
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest<'_>) -> Result<Vec<i64>> {
        let mut data = self.graphql(search_query(collection, request)?).await?;
        let hits = match data["Get"][collection].take() {
            Value::Array(hits) => hits,
            _ => vec![],
        };
        hits.iter()
            .map(|hit| {
                let id = hit["_additional"]["id"].as_str().unwrap_or_default();
                Uuid::parse_str(id).map(row_id).map_err(|e| BenchError::Backend {
                    backend: BACKEND,
                    message: format!("无效的对象 ID {}: {}", id, e),
                })
            })
            .collect()
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let schema: Value = self
            .client
            .get(self.url("schema"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?
            .json()
            .await
            .map_err(|e| BenchError::from_http(BACKEND, e))?;
        let classes = schema["classes"].as_array().map(Vec::as_slice).unwrap_or_default();
        Ok(classes.iter().filter_map(|c| c["class"].as_str()).map(str::to_string).collect())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let query = format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", collection);
        let data = self.graphql(query).await?;
        Ok(data["Aggregate"][collection][0]["meta"]["count"].as_u64().unwrap_or(0))
    }
}
