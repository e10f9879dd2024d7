//! Tantivy-based search index module.
//!
//! Full-text search over the machine and sensor catalog. Machine names and
//! sensor designations share the `name` field; poles and suppliers are
//! indexed separately with lower boosts.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{Machine, Sensor};

const BOOST_NAME: f32 = 10.0;
const BOOST_LOCATION: f32 = 6.0;
const BOOST_SUPPLIER: f32 = 4.0;

/// Deepest `offset + limit` a search may reach.
pub const MAX_RESULT_WINDOW: usize = 10_100;

/// Kind of catalog entry a hit refers to.
pub const KIND_MACHINE: &str = "machine";
pub const KIND_SENSOR: &str = "sensor";

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub kind: String,
    pub id: String,
    pub score: f32,
}

/// One page of hits and the number of documents matching overall.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total: usize,
}

struct SearchFields {
    id: Field,
    kind: Field,
    name: Field,
    location: Field,
    supplier: Field,
}

impl SearchFields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let fields = Self {
            id: builder.add_text_field("id", STRING | STORED),
            kind: builder.add_text_field("kind", STRING | STORED),
            name: builder.add_text_field("name", TEXT | STORED),
            location: builder.add_text_field("location", TEXT),
            supplier: builder.add_text_field("supplier", TEXT),
        };
        (builder.build(), fields)
    }

    fn boosted(&self) -> [(Field, f32); 3] {
        [
            (self.name, BOOST_NAME),
            (self.location, BOOST_LOCATION),
            (self.supplier, BOOST_SUPPLIER),
        ]
    }
}

fn search_error(context: &'static str) -> impl Fn(tantivy::TantivyError) -> AppError {
    move |e| AppError::Search(format!("{}: {}", context, e))
}

/// Tantivy search index for machines and sensors.
///
/// Writes go through a single writer behind an async lock and are visible
/// to searches once the call returns.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

/// Indexing memory budget for the writer.
const WRITER_HEAP_BYTES: usize = 50_000_000;

impl SearchIndex {
    /// Open the index at `index_path`, creating it when absent.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path).map_err(|e| {
            AppError::Search(format!("Cannot create index directory {:?}: {}", index_path, e))
        })?;

        let (schema, fields) = SearchFields::schema();
        let index = match Index::open_in_dir(index_path) {
            Ok(index) => index,
            Err(_) => Index::create_in_dir(index_path, schema)
                .map_err(search_error("Cannot create index"))?,
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(search_error("Cannot open index reader"))?;
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(search_error("Cannot open index writer"))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from the catalog.
    pub async fn rebuild(&self, machines: &[Machine], sensors: &[Sensor]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for machine in machines {
            writer.add_document(self.machine_document(machine))?;
        }
        for sensor in sensors {
            writer.add_document(self.sensor_document(sensor))?;
        }
        writer.commit()?;

        self.reader.reload()?;

        tracing::info!(
            machines = machines.len(),
            sensors = sensors.len(),
            "Search index rebuilt"
        );
        Ok(())
    }

    /// Index or re-index a machine.
    pub async fn index_machine(&self, machine: &Machine) -> Result<(), AppError> {
        let document = self.machine_document(machine);
        self.apply(&machine.id, Some(document)).await
    }

    /// Index or re-index a sensor.
    pub async fn index_sensor(&self, sensor: &Sensor) -> Result<(), AppError> {
        let document = self.sensor_document(sensor);
        self.apply(&sensor.id, Some(document)).await
    }

    /// Remove an entry from the index.
    pub async fn remove(&self, id: &str) -> Result<(), AppError> {
        self.apply(id, None).await
    }

    /// Drop the document stored under `id`, add `replacement` if any, commit.
    async fn apply(&self, id: &str, replacement: Option<TantivyDocument>) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        if let Some(document) = replacement {
            writer.add_document(document)?;
        }
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// Search the catalog, best matches first.
    ///
    /// Each searchable field is queried separately with its boost and the
    /// clauses are OR-ed together. A blank query matches nothing; a zero
    /// limit only counts. Pages past [`MAX_RESULT_WINDOW`] are refused.
    pub fn search(
        &self,
        text: &str,
        limit: usize,
        offset: usize,
    ) -> Result<SearchResults, AppError> {
        if text.trim().is_empty() {
            return Ok(SearchResults::default());
        }
        let window = limit.saturating_add(offset);
        if window > MAX_RESULT_WINDOW {
            return Err(AppError::Validation(format!(
                "offset + limit cannot exceed {}",
                MAX_RESULT_WINDOW
            )));
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for (field, boost) in self.fields.boosted() {
            let parsed = QueryParser::for_index(&self.index, vec![field])
                .parse_query(text)
                .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;
            clauses.push((Occur::Should, Box::new(BoostQuery::new(parsed, boost))));
        }
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        if limit == 0 {
            let total = searcher
                .search(&query, &Count)
                .map_err(search_error("Search failed"))?;
            return Ok(SearchResults {
                hits: Vec::new(),
                total,
            });
        }

        let (top, total) = searcher
            .search(
                &query,
                &(TopDocs::with_limit(window), Count),
            )
            .map_err(search_error("Search failed"))?;

        let stored = |field: Field, doc: &TantivyDocument| -> Option<String> {
            doc.get_first(field)?.as_str().map(str::to_string)
        };
        let hits = top
            .into_iter()
            .skip(offset)
            .filter_map(|(score, address)| {
                let doc: TantivyDocument = searcher.doc(address).ok()?;
                Some(SearchHit {
                    kind: stored(self.fields.kind, &doc)?,
                    id: stored(self.fields.id, &doc)?,
                    score,
                })
            })
            .collect();

        Ok(SearchResults { hits, total })
    }

    fn machine_document(&self, machine: &Machine) -> TantivyDocument {
        doc!(
            self.fields.id => machine.id.clone(),
            self.fields.kind => KIND_MACHINE.to_string(),
            self.fields.name => machine.name.clone(),
            self.fields.location => format!("{} {}", machine.main_pole, machine.sub_pole),
            self.fields.supplier => String::new()
        )
    }

    fn sensor_document(&self, sensor: &Sensor) -> TantivyDocument {
        doc!(
            self.fields.id => sensor.id.clone(),
            self.fields.kind => KIND_SENSOR.to_string(),
            self.fields.name => sensor.designation.clone(),
            self.fields.location => String::new(),
            self.fields.supplier => sensor.supplier.clone()
        )
    }
}
