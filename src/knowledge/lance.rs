//! LanceDB Vector Store - 디스크 기반 벡터 저장소
//!
//! 컬렉션 하나가 LanceDB 테이블 하나입니다.
//! `id` 기준 merge insert로 upsert하고, 검색은 코사인 거리를 씁니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::table::Table;
use lancedb::DistanceType;

use crate::error::{RagError, Result};

use super::vector::{check_dimension, dedupe_by_id, Chunk, HitMeta, Neighbor, VectorStore};

/// 기본 컬렉션 이름
pub const DEFAULT_COLLECTION: &str = "course_docs";

/// 데이터 디렉토리 경로 반환
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".course-rag")
}

// ============================================================================
// Configuration
// ============================================================================

/// 저장소 위치 설정
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// 데이터 디렉토리 (LanceDB는 그 아래 `lance/`)
    pub data_dir: PathBuf,
    /// 컬렉션(테이블) 이름
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        let valid = !self.collection.is_empty()
            && self
                .collection
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RagError::InvalidConfig(format!(
                "collection name must be non-empty [A-Za-z0-9_-], got {:?}",
                self.collection
            )));
        }
        Ok(())
    }

    /// LanceDB 디렉토리
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("lance")
    }
}

fn store_error(context: &str) -> impl Fn(lancedb::Error) -> RagError + '_ {
    move |e| RagError::StoreUnavailable(format!("{}: {}", context, e))
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 테이블은 첫 `add_chunks` 때 만들어집니다.
pub struct LanceVectorStore {
    db: Connection,
    table_name: String,
    dimension: usize,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// 기존 테이블의 임베딩 차원이 `dimension`과 다르면 `StoreUnavailable`.
    pub async fn open(path: &Path, collection: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }

        tokio::fs::create_dir_all(path).await.map_err(|e| {
            RagError::StoreUnavailable(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let path_str = path.to_str().ok_or_else(|| {
            RagError::StoreUnavailable(format!("Invalid path encoding: {}", path.display()))
        })?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .map_err(store_error("Failed to connect to LanceDB"))?;

        let store = Self {
            db,
            table_name: collection.to_string(),
            dimension,
        };
        store.check_existing_dimension().await?;

        tracing::debug!(
            "Opened LanceDB at {} (collection {}, {} dims)",
            path.display(),
            collection,
            dimension
        );

        Ok(store)
    }

    /// 설정으로 열기
    pub async fn from_config(config: &StoreConfig, dimension: usize) -> Result<Self> {
        config.validate()?;
        Self::open(&config.lance_path(), &config.collection, dimension).await
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 청크 테이블 스키마
    fn create_schema(dimension: usize) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("course", DataType::Utf8, false),
            Field::new("page_start", DataType::Int32, false),
            Field::new("page_end", DataType::Int32, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension as i32,
                ),
                false,
            ),
        ])
    }

    /// 청크들을 Arrow RecordBatch로 변환
    fn chunks_to_batch(&self, chunks: &[&Chunk]) -> Result<RecordBatch> {
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let documents: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let sources: Vec<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        let courses: Vec<&str> = chunks.iter().map(|c| c.course.as_str()).collect();
        let page_starts: Vec<i32> = chunks.iter().map(|c| c.page_start as i32).collect();
        let page_ends: Vec<i32> = chunks.iter().map(|c| c.page_end as i32).collect();

        let embeddings_flat: Vec<f32> = chunks
            .iter()
            .flat_map(|c| c.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .map_err(|e| RagError::StoreUnavailable(format!("Failed to build embeddings: {}", e)))?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(self.dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(documents)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(courses)),
                Arc::new(Int32Array::from(page_starts)),
                Arc::new(Int32Array::from(page_ends)),
                Arc::new(embeddings_list),
            ],
        )
        .map_err(|e| RagError::StoreUnavailable(format!("Failed to create RecordBatch: {}", e)))
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(store_error("Failed to list tables"))?;
        Ok(names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Option<Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        self.db
            .open_table(&self.table_name)
            .execute()
            .await
            .map(Some)
            .map_err(store_error("Failed to open table"))
    }

    async fn check_existing_dimension(&self) -> Result<()> {
        let Some(table) = self.open_table().await? else {
            return Ok(());
        };

        let schema = table
            .schema()
            .await
            .map_err(store_error("Failed to read table schema"))?;

        let stored = schema
            .field_with_name("embedding")
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => Some(*size as usize),
                _ => None,
            });

        match stored {
            Some(size) if size == self.dimension => Ok(()),
            Some(size) => Err(RagError::StoreUnavailable(format!(
                "collection {} stores {} dimensions, embedder produces {}",
                self.table_name, size, self.dimension
            ))),
            None => Err(RagError::StoreUnavailable(format!(
                "collection {} has no embedding column",
                self.table_name
            ))),
        }
    }
}

/// `course = '...'` 필터 (작은따옴표 이스케이프)
fn course_filter(course: &str) -> String {
    format!("course = '{}'", course.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| RagError::StoreUnavailable(format!("Missing {} column", name)))
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| RagError::StoreUnavailable(format!("Missing {} column", name)))
}

/// 검색 결과 배치를 이웃 목록으로 변환
fn batch_to_neighbors(batch: &RecordBatch) -> Result<Vec<Neighbor>> {
    let ids = string_column(batch, "id")?;
    let documents = string_column(batch, "document")?;
    let sources = string_column(batch, "source")?;
    let courses = string_column(batch, "course")?;
    let page_starts = int_column(batch, "page_start")?;
    let page_ends = int_column(batch, "page_end")?;

    // _distance 컬럼 (LanceDB가 자동 추가)
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let page = |column: &Int32Array, i: usize| {
        (!column.is_null(i))
            .then(|| column.value(i))
            .and_then(|p| u32::try_from(p).ok())
    };

    Ok((0..batch.num_rows())
        .map(|i| Neighbor {
            id: ids.value(i).to_string(),
            document: documents.value(i).to_string(),
            meta: HitMeta {
                source: sources.value(i).to_string(),
                course: courses.value(i).to_string(),
                page_start: page(page_starts, i),
                page_end: page(page_ends, i),
            },
            distance: distances.filter(|d| !d.is_null(i)).map(|d| d.value(i)),
        })
        .collect())
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        check_dimension(chunks, self.dimension)?;

        let unique = dedupe_by_id(chunks);
        let batch = self.chunks_to_batch(&unique)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                // id 기준 upsert
                let mut merge = table.merge_insert(&["id"]);
                merge
                    .when_matched_update_all(None)
                    .when_not_matched_insert_all();
                merge
                    .execute(Box::new(batches))
                    .await
                    .map_err(store_error("Failed to upsert chunks"))?;
            }
            None => {
                self.db
                    .create_table(&self.table_name, batches)
                    .execute()
                    .await
                    .map_err(store_error("Failed to create table"))?;
            }
        }

        tracing::debug!("Upserted {} chunks into {}", unique.len(), self.table_name);
        Ok(unique.len())
    }

    async fn query_nearest(
        &self,
        embedding: &[f32],
        limit: usize,
        course: Option<&str>,
    ) -> Result<Vec<Neighbor>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension {
            return Err(RagError::StoreUnavailable(format!(
                "query has {} dimensions, store expects {}",
                embedding.len(),
                self.dimension
            )));
        }

        let Some(table) = self.open_table().await? else {
            return Ok(Vec::new());
        };

        let mut query = table
            .vector_search(embedding.to_vec())
            .map_err(store_error("Failed to create vector search"))?
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(course) = course {
            query = query.only_if(course_filter(course));
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .map_err(store_error("Failed to execute vector search"))?
            .try_collect()
            .await
            .map_err(|e| {
                RagError::StoreUnavailable(format!("Failed to read search results: {}", e))
            })?;

        let mut neighbors = Vec::new();
        for batch in &batches {
            neighbors.extend(batch_to_neighbors(batch)?);
        }

        // 배치 경계와 무관하게 거리 오름차순 (안정 정렬)
        neighbors.sort_by(|a, b| {
            a.distance
                .unwrap_or(0.0)
                .total_cmp(&b.distance.unwrap_or(0.0))
        });
        neighbors.truncate(limit);

        Ok(neighbors)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(store_error("Failed to count rows"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::vector::tests::make_chunk;
    use tempfile::TempDir;

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_course_filter_escapes_quotes() {
        assert_eq!(course_filter("Info1"), "course = 'Info1'");
        assert_eq!(course_filter("O'Brien"), "course = 'O''Brien'");
    }

    #[test]
    fn test_store_config_validation() {
        let config = StoreConfig {
            data_dir: PathBuf::from("/tmp/x"),
            collection: "course_docs".to_string(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.lance_path(), PathBuf::from("/tmp/x/lance"));

        let bad = StoreConfig {
            collection: "drop table; --".to_string(),
            ..config
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();

        // 초기 상태
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store
            .query_nearest(&unit(4, 0), 3, None)
            .await
            .unwrap()
            .is_empty());

        let added = store
            .add_chunks(&[
                make_chunk("a-00000", "alpha", "Info1", unit(4, 0)),
                make_chunk("b-00000", "beta", "Info1", unit(4, 1)),
            ])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lance_search_order_and_meta() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();

        store
            .add_chunks(&[
                make_chunk("a-00000", "alpha", "Info1", unit(4, 0)),
                make_chunk("b-00000", "beta", "Info1", unit(4, 1)),
                make_chunk("c-00000", "gamma", "Info2", vec![1.0, 1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query_nearest(&[1.0, 0.1, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a-00000");
        assert_eq!(hits[1].id, "c-00000");
        assert!(hits[0].distance.unwrap() <= hits[1].distance.unwrap());
        assert_eq!(hits[0].meta.source, "a.pdf");
        assert_eq!(hits[0].meta.page_start, Some(1));
        assert_eq!(hits[0].meta.page_end, Some(1));
    }

    #[tokio::test]
    async fn test_lance_upsert_replaces_row() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();

        store
            .add_chunks(&[make_chunk("a-00000", "old text", "Info1", unit(4, 0))])
            .await
            .unwrap();
        store
            .add_chunks(&[
                make_chunk("a-00000", "new text", "Info1", unit(4, 0)),
                make_chunk("b-00000", "other", "Info1", unit(4, 1)),
            ])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        let hits = store.query_nearest(&unit(4, 0), 1, None).await.unwrap();
        assert_eq!(hits[0].document, "new text");
    }

    #[tokio::test]
    async fn test_lance_course_filter() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();

        store
            .add_chunks(&[
                make_chunk("a-00000", "alpha", "Info1", unit(4, 0)),
                make_chunk("b-00000", "beta", "Info2", unit(4, 0)),
            ])
            .await
            .unwrap();

        let hits = store
            .query_nearest(&unit(4, 0), 10, Some("Info2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].meta.course, "Info2");
    }

    #[tokio::test]
    async fn test_lance_persists_and_checks_dimension() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();
            store
                .add_chunks(&[make_chunk("a-00000", "alpha", "Info1", unit(4, 0))])
                .await
                .unwrap();
        }

        let reopened = LanceVectorStore::open(temp_dir.path(), "docs", 4).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);

        let mismatched = LanceVectorStore::open(temp_dir.path(), "docs", 8).await;
        assert!(matches!(mismatched, Err(RagError::StoreUnavailable(_))));
    }
}
