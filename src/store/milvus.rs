use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::*;

const BACKEND: &str = "milvus";

/// HNSW 查询时候选列表大小的下限，实际取值不小于 top_k
const MIN_SEARCH_EF: usize = 64;

/// Milvus 适配器，使用 v2 RESTful API
///
/// 插入失败时不会在适配器内部重试，整个导入随之失败。
pub struct MilvusStore {
    client: Client,
    base: String,
}

#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

#[derive(Serialize)]
struct Row<'a> {
    id: i64,
    vector: Cow<'a, [f32]>,
    city_id: i32,
    quality_score: f32,
}

#[derive(Deserialize)]
struct Hit {
    id: i64,
}

#[derive(Deserialize)]
struct Has {
    has: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    row_count: u64,
}

impl MilvusStore {
    pub fn new(opts: &BackendOptions) -> Result<Self> {
        let client = build_client(BACKEND, opts)?;
        Ok(Self { client, base: opts.milvus_url.trim_end_matches('/').to_string() })
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/v2/vectordb/{}", self.base, path);
        debug!("POST {}", url);
        let envelope: Envelope = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| BenchError::from_http(BACKEND, e))?
            .json()
            .await
            .map_err(|e| BenchError::from_http(BACKEND, e))?;

        // 不同版本成功时返回 0 或 200
        if envelope.code != 0 && envelope.code != 200 {
            return Err(BenchError::Backend {
                backend: BACKEND,
                message: format!("{} ({}): {}", path, envelope.code, envelope.message),
            });
        }
        Ok(envelope.data)
    }

    async fn call_as<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let data = self.call(path, body).await?;
        Ok(serde_json::from_value(data)?)
    }
}

/// 将过滤条件转换为 Milvus 布尔表达式
pub fn filter_expr(filter: &Filter) -> String {
    match filter {
        Filter::CityEq(city) => format!("{} == {}", CITY_FIELD, city),
        Filter::QualityAbove(score) => format!("{} > {}", QUALITY_FIELD, score),
        Filter::And(a, b) => format!("({}) and ({})", filter_expr(a), filter_expr(b)),
    }
}

fn data_type(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Int32 => "Int32",
        ScalarKind::Float => "Float",
    }
}

fn metric_type(metric: Metric) -> &'static str {
    match metric {
        Metric::L2 => "L2",
    }
}

/// 建表请求的 schema 部分
fn schema_body(schema: &CollectionSchema) -> Value {
    let mut fields = vec![
        json!({ "fieldName": ID_FIELD, "dataType": "Int64", "isPrimary": true }),
        json!({
            "fieldName": VECTOR_FIELD,
            "dataType": "FloatVector",
            "elementTypeParams": { "dim": schema.dimension.to_string() },
        }),
    ];
    fields.extend(
        schema
            .fields
            .iter()
            .map(|f| json!({ "fieldName": f.name, "dataType": data_type(f.kind) })),
    );
    json!({ "autoId": false, "enableDynamicField": false, "fields": fields })
}

fn search_body(collection: &str, request: &SearchRequest<'_>) -> Value {
    let mut body = json!({
        "collectionName": collection,
        "data": [request.vector],
        "annsField": VECTOR_FIELD,
        "limit": request.top_k,
        "outputFields": [ID_FIELD],
        "searchParams": {
            "metricType": metric_type(request.metric),
            "params": { "ef": request.top_k.max(MIN_SEARCH_EF) },
        },
    });
    if let Some(filter) = &request.filter {
        body["filter"] = Value::String(filter_expr(filter));
    }
    body
}

impl VectorStore for MilvusStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Milvus
    }

    fn collection_name(&self, dimension: Dimension) -> String {
        format!("benchmark_{}d", dimension)
    }

    async fn ping(&self) -> Result<()> {
        self.call("collections/list", json!({})).await.map(|_| ())
    }

    async fn exists(&self, collection: &str) -> Result<bool> {
        let has: Has = self.call_as("collections/has", json!({ "collectionName": collection })).await?;
        Ok(has.has)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.call("collections/drop", json!({ "collectionName": collection })).await?;
        Ok(())
    }

    async fn create_schema(&self, collection: &str, schema: &CollectionSchema) -> Result<()> {
        let body = json!({ "collectionName": collection, "schema": schema_body(schema) });
        self.call("collections/create", body).await?;
        Ok(())
    }

    async fn create_index(&self, collection: &str, params: &IndexParams) -> Result<()> {
        let body = json!({
            "collectionName": collection,
            "indexParams": [{
                "fieldName": params.field,
                "indexName": params.field,
                "metricType": metric_type(params.metric),
                "params": {
                    "index_type": "HNSW",
                    "M": params.m,
                    "efConstruction": params.ef_construction,
                },
            }],
        });
        self.call("indexes/create", body).await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, batch: &Batch) -> Result<InsertOutcome> {
        let rows = batch_rows(batch)
            .enumerate()
            .map(|(k, vector)| Row {
                id: batch.ids[k],
                vector,
                city_id: batch.city_ids[k],
                quality_score: batch.quality_scores[k],
            })
            .collect::<Vec<_>>();
        let body = json!({ "collectionName": collection, "data": rows });

        self.call("entities/insert", body).await.map_err(|e| BenchError::TransientInsertFailure {
            backend: BACKEND,
            first_id: batch.first_id(),
            rows: batch.len(),
            message: e.to_string(),
        })?;
        Ok(InsertOutcome { inserted: batch.len(), dropped: 0 })
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        self.call("collections/flush", json!({ "collectionName": collection })).await?;
        Ok(())
    }

    async fn load(&self, collection: &str) -> Result<()> {
        self.call("collections/load", json!({ "collectionName": collection })).await?;
        Ok(())
    }

    async fn release(&self, collection: &str) -> Result<()> {
        self.call("collections/release", json!({ "collectionName": collection })).await?;
        Ok(())
    }

    async fn search(&self, collection: &str, request: &SearchRequest<'_>) -> Result<Vec<i64>> {
        let hits: Vec<Hit> = self.call_as("entities/search", search_body(collection, request)).await?;
        Ok(hits.into_iter().map(|h| h.id).collect())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.call_as("collections/list", json!({})).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let stats: Stats =
            self.call_as("collections/get_stats", json!({ "collectionName": collection })).await?;
        Ok(stats.row_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_expr() {
        assert_eq!(filter_expr(&Filter::CityEq(42)), "city_id == 42");
        assert_eq!(filter_expr(&Filter::QualityAbove(0.55)), "quality_score > 0.55");
        let both = Filter::And(Box::new(Filter::CityEq(7)), Box::new(Filter::QualityAbove(0.4)));
        assert_eq!(filter_expr(&both), "(city_id == 7) and (quality_score > 0.4)");
    }

    #[test]
    fn test_schema_body() {
        let body = schema_body(&CollectionSchema::benchmark(Dimension::D512));
        let fields = body["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0]["isPrimary"], true);
        assert_eq!(fields[1]["elementTypeParams"]["dim"], "512");
        assert_eq!(fields[2]["fieldName"], "city_id");
        assert_eq!(fields[2]["dataType"], "Int32");
        assert_eq!(fields[3]["dataType"], "Float");
        assert_eq!(body["autoId"], false);
    }

    #[test]
    fn test_search_body() {
        let vector = [0.25f32, 0.5];
        let filter = Some(Filter::CityEq(9));
        let request = SearchRequest { vector: &vector, filter, top_k: 10, metric: Metric::L2 };
        let body = search_body("benchmark_128d", &request);
        assert_eq!(body["searchParams"]["metricType"], metric_type(IndexParams::default().metric));
        assert_eq!(body["searchParams"]["params"]["ef"], MIN_SEARCH_EF);
        assert_eq!(body["filter"], "city_id == 9");
        assert_eq!(body["limit"], 10);

        let wide = SearchRequest { vector: &vector, filter: None, top_k: 100, metric: Metric::L2 };
        let body = search_body("benchmark_128d", &wide);
        assert_eq!(body["searchParams"]["params"]["ef"], 100);
        assert!(body.get("filter").is_none());
    }
}
