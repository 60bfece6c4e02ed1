//! Sparse BM25 index over Tantivy
//!
//! Keyword half of the hybrid retrieval. In-RAM by default; a directory
//! path switches to an mmap index under the data dir. The COLD consumer
//! is the only writer.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use crate::record::MemoryRecord;
use crate::MemoryError;

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Index directory; RAM index when None
    pub index_path: Option<String>,
    /// Enable English stemming
    pub stemming: bool,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self { index_path: None, stemming: true }
    }
}

/// One scored candidate from the sparse search
#[derive(Debug, Clone)]
pub struct SparseResult {
    pub id: String,
    pub score: f32,
}

/// BM25 index over memory records
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    text_field: Field,
    owner_field: Field,
    tags_field: Field,
}

impl SparseIndex {
    pub fn new(config: SparseConfig) -> Result<Self, MemoryError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("memory_text")
                    .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", text_options.clone());
        let owner_field = schema_builder.add_text_field("owner", STRING | STORED);
        let tags_field = schema_builder.add_text_field("tags", text_options);

        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            std::fs::create_dir_all(path)
                .map_err(|e| MemoryError::Index(e.to_string()))?;
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| MemoryError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema.clone())
                .map_err(|e| MemoryError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema.clone())
        };

        index.tokenizers().register("memory_text", Self::build_tokenizer(&config));

        let reader = index.reader().map_err(|e| MemoryError::Index(e.to_string()))?;
        let writer = index
            .writer(50_000_000)
            .map_err(|e| MemoryError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            text_field,
            owner_field,
            tags_field,
        })
    }

    fn build_tokenizer(config: &SparseConfig) -> TextAnalyzer {
        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser);

        if config.stemming {
            base.filter(Stemmer::new(Language::English)).build()
        } else {
            base.build()
        }
    }

    /// Insert or replace records. Upsert = delete-by-id + add, committed as
    /// one batch so readers never see a half-written record.
    pub fn upsert(&self, records: &[MemoryRecord]) -> Result<(), MemoryError> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| MemoryError::Index("writer not available".to_string()))?;

        for record in records {
            let term = tantivy::Term::from_field_text(self.id_field, &record.id);
            writer.delete_term(term);

            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &record.id);
            doc.add_text(self.text_field, &record.text);
            doc.add_text(self.owner_field, &record.owner_id);
            if !record.tags.is_empty() {
                doc.add_text(self.tags_field, record.tags.join(" "));
            }
            writer
                .add_document(doc)
                .map_err(|e| MemoryError::Index(e.to_string()))?;
        }

        writer.commit().map_err(|e| MemoryError::Index(e.to_string()))?;
        self.reader.reload().map_err(|e| MemoryError::Index(e.to_string()))?;
        Ok(())
    }

    /// BM25 search, best first
    pub fn search(&self, query: &str, top_n: usize) -> Result<Vec<SparseResult>, MemoryError> {
        // Strip query-parser syntax so free text never fails to parse.
        let sanitized: String = query
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        if sanitized.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.tags_field]);
        let parsed = query_parser
            .parse_query(&sanitized)
            .map_err(|e| MemoryError::Search(e.to_string()))?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_n))
            .map_err(|e| MemoryError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| MemoryError::Search(e.to_string()))?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();
            results.push(SparseResult { id, score });
        }

        Ok(results)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemorySource, MemoryType};

    fn record(id_hint: &str, text: &str) -> MemoryRecord {
        let mut r = MemoryRecord::new("u1", MemoryType::Preference, text, MemorySource::Conversation);
        r.id = id_hint.to_string();
        r
    }

    #[test]
    fn index_and_search() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index
            .upsert(&[
                record("1", "prefers the lights at 40 percent in the evening"),
                record("2", "favorite music is jazz"),
            ])
            .unwrap();
        assert_eq!(index.doc_count(), 2);

        let results = index.search("lights evening", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "1");
    }

    #[test]
    fn upsert_replaces_by_id() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.upsert(&[record("1", "old text about tea")]).unwrap();
        index.upsert(&[record("1", "new text about coffee")]).unwrap();
        assert_eq!(index.doc_count(), 1);

        let results = index.search("coffee", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn query_syntax_is_sanitized() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        index.upsert(&[record("1", "lights at 40 percent")]).unwrap();
        // Raw '(' and ':' would be query-parser syntax errors.
        let results = index.search("lights (at: 40%", 10).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn empty_query_returns_nothing() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        assert!(index.search("  !?  ", 10).unwrap().is_empty());
    }
}
