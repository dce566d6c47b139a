//! One searchable index per repository.

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::Value;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tempfile::TempDir;

use maven_compat::Coordinates;

use crate::pack::IndexRecord;
use crate::schema::ArtifactSchema;
use crate::Error;

/// Heap handed to the tantivy writer. Repository indexes are small;
/// this is the minimum tantivy accepts per thread.
const WRITER_HEAP_BYTES: usize = 15_000_000;

/// A search match, scored by relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub repo_key: String,
    pub record: IndexRecord,
    pub score: f32,
}

/// A tantivy index scoped to one repository, with its reader, writer and
/// query parser. Contexts are replaced wholesale on every indexing pass,
/// so searches never observe a half-built index.
pub struct IndexingContext {
    repo_key: Box<str>,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    query_parser: QueryParser,
    schema: ArtifactSchema,
    // Keeps the backing directory of merged indexes alive until the
    // context is dropped.
    _scratch: Option<TempDir>,
}

impl IndexingContext {
    /// RAM-backed context, used for single concrete repositories.
    pub fn in_ram(repo_key: &str) -> Result<Self, Error> {
        let schema = ArtifactSchema::build();
        let index = Index::create_in_ram(schema.schema.clone());
        Self::with_index(repo_key, index, schema, None)
    }

    /// Scratch-directory context for virtual repository merges, which can
    /// outgrow a comfortable RAM budget. The directory is deleted when the
    /// context goes away.
    pub fn in_scratch_dir(repo_key: &str) -> Result<Self, Error> {
        let scratch = TempDir::new()?;
        let schema = ArtifactSchema::build();
        let index = Index::create_in_dir(scratch.path(), schema.schema.clone())?;
        Self::with_index(repo_key, index, schema, Some(scratch))
    }

    fn with_index(
        repo_key: &str,
        index: Index,
        schema: ArtifactSchema,
        scratch: Option<TempDir>,
    ) -> Result<Self, Error> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let query_parser = QueryParser::for_index(
            &index,
            vec![schema.group, schema.artifact, schema.version, schema.path],
        );
        Ok(IndexingContext {
            repo_key: repo_key.into(),
            reader,
            writer: Mutex::new(writer),
            query_parser,
            schema,
            _scratch: scratch,
        })
    }

    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    /// Queues one record. Not visible to searches until [`Self::commit`].
    pub fn add(&self, record: &IndexRecord) -> Result<(), Error> {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.schema.repo, &*self.repo_key);
        doc.add_text(self.schema.group, &record.coords.group_id);
        doc.add_text(self.schema.artifact, &record.coords.artifact_id);
        doc.add_text(self.schema.version, &record.coords.version);
        if let Some(classifier) = &record.coords.classifier {
            doc.add_text(self.schema.classifier, classifier);
        }
        doc.add_text(self.schema.extension, &record.coords.extension);
        doc.add_text(self.schema.path, &record.path);
        doc.add_u64(self.schema.last_modified, record.last_modified);
        self.writer.lock().add_document(doc)?;
        Ok(())
    }

    /// Publishes queued records and returns the searchable document count.
    pub fn commit(&self) -> Result<u64, Error> {
        {
            let mut writer = self.writer.lock();
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(self.num_docs())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Relevance-ranked matches for a free-text query over the coordinate
    /// and path fields.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, Error> {
        let parsed = self.query_parser.parse_query(query)?;
        let searcher = self.reader.searcher();
        let top = searcher.search(&parsed, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top.len());
        for (score, address) in top {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(hit) = self.to_hit(&doc, score) {
                hits.push(hit);
            }
        }
        Ok(hits)
    }

    fn to_hit(&self, doc: &TantivyDocument, score: f32) -> Option<SearchHit> {
        let text = |field| Some(doc.get_first(field)?.as_str()?.to_string());
        Some(SearchHit {
            repo_key: text(self.schema.repo)?,
            record: IndexRecord {
                coords: Coordinates {
                    group_id: text(self.schema.group)?,
                    artifact_id: text(self.schema.artifact)?,
                    version: text(self.schema.version)?,
                    classifier: text(self.schema.classifier),
                    extension: text(self.schema.extension)?,
                },
                path: text(self.schema.path)?,
                last_modified: doc.get_first(self.schema.last_modified)?.as_u64()?,
            },
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(group: &str, artifact: &str, version: &str) -> IndexRecord {
        IndexRecord {
            coords: Coordinates {
                group_id: group.to_string(),
                artifact_id: artifact.to_string(),
                version: version.to_string(),
                classifier: None,
                extension: "jar".to_string(),
            },
            path: format!(
                "{}/{artifact}/{version}/{artifact}-{version}.jar",
                group.replace('.', "/")
            ),
            last_modified: 100,
        }
    }

    #[test]
    fn additions_surface_after_commit() {
        let context = IndexingContext::in_ram("dev").unwrap();
        context.add(&record("com.example", "widget", "1.0")).unwrap();
        assert_eq!(context.num_docs(), 0);
        assert_eq!(context.commit().unwrap(), 1);

        let hits = context.search("widget", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repo_key, "dev");
        assert_eq!(hits[0].record, record("com.example", "widget", "1.0"));
    }

    #[test]
    fn coordinate_terms_match_across_fields() {
        let context = IndexingContext::in_ram("dev").unwrap();
        context.add(&record("org.apache.maven", "maven-core", "3.9.6")).unwrap();
        context.add(&record("com.example", "widget", "1.0")).unwrap();
        context.commit().unwrap();

        // Group segment.
        assert_eq!(context.search("apache", 10).unwrap().len(), 1);
        // Artifact id fragment, split on the hyphen by the tokenizer.
        assert_eq!(context.search("core", 10).unwrap().len(), 1);
        // Version.
        assert_eq!(context.search("3.9.6", 10).unwrap().len(), 1);
        assert_eq!(context.search("nothing-here", 10).unwrap().len(), 0);
    }

    #[test]
    fn classifier_round_trips_through_the_document() {
        let context = IndexingContext::in_ram("dev").unwrap();
        let mut rec = record("com.example", "widget", "1.0");
        rec.coords.classifier = Some("sources".to_string());
        rec.path = "com/example/widget/1.0/widget-1.0-sources.jar".to_string();
        context.add(&rec).unwrap();
        context.commit().unwrap();

        let hits = context.search("widget", 10).unwrap();
        assert_eq!(hits[0].record.coords.classifier.as_deref(), Some("sources"));
    }

    #[test]
    fn scratch_dir_contexts_behave_like_ram_ones() {
        let context = IndexingContext::in_scratch_dir("all").unwrap();
        context.add(&record("com.example", "widget", "1.0")).unwrap();
        assert_eq!(context.commit().unwrap(), 1);
        assert_eq!(context.search("widget", 10).unwrap().len(), 1);
    }

    #[test]
    fn malformed_queries_error_out() {
        let context = IndexingContext::in_ram("dev").unwrap();
        context.commit().unwrap();
        assert!(context.search("AND AND", 10).is_err());
    }
}
