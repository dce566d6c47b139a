//! Index schema for artifact coordinates.
//!
//! Coordinate fields (group, artifact, version) are tokenized so a query
//! like `maven core` matches `org.apache.maven:maven-core`; repository key,
//! classifier, extension and path are kept raw for exact filtering. All
//! fields are stored so hits reconstruct a full [`crate::IndexRecord`].

use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions,
};

#[derive(Clone, Debug)]
pub struct ArtifactSchema {
    pub schema: Schema,
    pub repo: Field,
    pub group: Field,
    pub artifact: Field,
    pub version: Field,
    pub classifier: Field,
    pub extension: Field,
    pub path: Field,
    pub last_modified: Field,
}

impl ArtifactSchema {
    pub fn build() -> Self {
        let mut schema_builder = Schema::builder();

        let searchable = || {
            TextOptions::default()
                .set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer("default")
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions),
                )
                .set_stored()
        };
        let raw = || {
            TextOptions::default()
                .set_indexing_options(
                    TextFieldIndexing::default()
                        .set_tokenizer("raw")
                        .set_index_option(IndexRecordOption::Basic),
                )
                .set_stored()
        };

        let repo = schema_builder.add_text_field("repo", raw());
        let group = schema_builder.add_text_field("group", searchable());
        let artifact = schema_builder.add_text_field("artifact", searchable());
        let version = schema_builder.add_text_field("version", searchable());
        let classifier = schema_builder.add_text_field("classifier", raw());
        let extension = schema_builder.add_text_field("extension", raw());
        let path = schema_builder.add_text_field("path", raw());

        // Fast field so result ordering by recency stays cheap.
        let last_modified = schema_builder
            .add_u64_field("last_modified", NumericOptions::default().set_fast().set_stored());

        Self {
            schema: schema_builder.build(),
            repo,
            group,
            artifact,
            version,
            classifier,
            extension,
            path,
            last_modified,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Default for ArtifactSchema {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_every_field() {
        let schema = ArtifactSchema::build();
        for name in [
            "repo",
            "group",
            "artifact",
            "version",
            "classifier",
            "extension",
            "path",
            "last_modified",
        ] {
            assert!(schema.schema.get_field(name).is_ok(), "missing {}", name);
        }
    }
}
