use std::collections::BTreeMap;

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ApiClient;
use crate::error::Result;

/// Graph entity. Identity for cleaning purposes is `(name, entity_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
        }
    }
}

/// Directed relationship between two entities, referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type: relation_type.into(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    #[serde(default)]
    pub extraction_time: Option<String>,
    #[serde(default)]
    pub entity_count: usize,
    #[serde(default)]
    pub relationship_count: usize,
    #[serde(default)]
    pub entity_type_counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub edited: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentSummary {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub has_graph: bool,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentDetail {
    pub document_name: String,
    #[serde(default)]
    pub html_raw: String,
    #[serde(default)]
    pub html_cleaned: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub has_knowledge_graph: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadOutcome {
    pub message: String,
    pub document_name: String,
    #[serde(default)]
    pub html_raw: String,
    #[serde(default)]
    pub html_cleaned: String,
    #[serde(default)]
    pub work_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractOutcome {
    pub message: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildOutcome {
    pub message: String,
    #[serde(default)]
    pub neo4j_imported: bool,
    #[serde(default)]
    pub symptom_vectorized: bool,
    #[serde(default)]
    pub rag_vectorized: bool,
    #[serde(default)]
    pub rag_results: Value,
    #[serde(default)]
    pub entity_count: usize,
    #[serde(default)]
    pub relationship_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

/// Which stores to purge when deleting a document. Defaults to all of them.
#[derive(Debug, Clone, Copy)]
pub struct DeleteOptions {
    pub files: bool,
    pub redis: bool,
    pub neo4j: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            files: true,
            redis: true,
            neo4j: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub stats: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Deserialize)]
struct DocumentListing {
    #[serde(default)]
    documents: Vec<DocumentSummary>,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    document_name: &'a str,
}

#[derive(Serialize)]
struct BuildRequest<'a> {
    document_name: &'a str,
    entities: &'a [Entity],
    relationships: &'a [Relationship],
}

impl ApiClient {
    /// Upload a PDF; the backend converts and cleans it into HTML.
    pub async fn upload_document(&self, file_name: &str, bytes: Vec<u8>) -> Result<UploadOutcome> {
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = multipart::Form::new().part("file", part);
        let response = self
            .http()
            .post(self.url("/api/knowledge/upload"))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn extract_entities(&self, document_name: &str) -> Result<ExtractOutcome> {
        self.post_json(
            "/api/knowledge/extract",
            &ExtractRequest { document_name },
        )
        .await
    }

    /// Persist the curated graph: import into Neo4j and vectorize.
    pub async fn build_graph(
        &self,
        document_name: &str,
        entities: &[Entity],
        relationships: &[Relationship],
    ) -> Result<BuildOutcome> {
        self.post_json(
            "/api/knowledge/build",
            &BuildRequest {
                document_name,
                entities,
                relationships,
            },
        )
        .await
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let listing: DocumentListing = self.get_json("/api/knowledge/list").await?;
        Ok(listing.documents)
    }

    pub async fn load_document(&self, document_name: &str) -> Result<DocumentDetail> {
        self.get_json(&format!("/api/knowledge/load/{document_name}"))
            .await
    }

    pub async fn delete_document(
        &self,
        document_name: &str,
        options: DeleteOptions,
    ) -> Result<DeleteOutcome> {
        let response = self
            .http()
            .delete(self.url(&format!("/api/knowledge/delete/{document_name}")))
            .query(&[
                ("delete_files", options.files),
                ("delete_redis", options.redis),
                ("delete_neo4j", options.neo4j),
            ])
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Raw knowledge-graph JSON, for saving locally.
    pub async fn export_graph(&self, document_name: &str) -> Result<Vec<u8>> {
        let response = self
            .http()
            .get(self.url(&format!("/api/knowledge/export/{document_name}")))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Storage statistics from the backend data manager. The shape is owned
    /// by the backend, so it stays untyped.
    pub async fn storage_stats(&self) -> Result<Value> {
        self.get_json("/api/knowledge/stats").await
    }

    pub async fn sync_metadata(&self) -> Result<SyncOutcome> {
        self.post_json("/api/knowledge/sync-metadata", &()).await
    }

    pub async fn cleanup_orphaned(&self, dry_run: bool) -> Result<CleanupOutcome> {
        let response = self
            .http()
            .post(self.url("/api/knowledge/cleanup-orphaned"))
            .query(&[("dry_run", dry_run)])
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_description_defaults_to_empty() {
        let json = r#"{"source": "肺炎", "target": "发热", "relation_type": "HAS_SYMPTOM"}"#;
        let rel: Relationship = serde_json::from_str(json).unwrap();
        assert_eq!(rel.description, "");
    }

    #[test]
    fn listing_with_metadata_deserializes() {
        let json = r#"{"documents": [{
            "name": "肺炎诊疗指南",
            "path": "knowledges/肺炎诊疗指南",
            "has_graph": true,
            "metadata": {
                "extraction_time": "2025-10-20 10:00:00",
                "entity_count": 12,
                "relationship_count": 8,
                "entity_type_counts": {"Disease": 3, "Symptom": 9},
                "edited": true
            }
        }]}"#;
        let listing: DocumentListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.documents.len(), 1);
        let doc = &listing.documents[0];
        assert!(doc.has_graph);
        assert_eq!(doc.metadata.entity_type_counts["Symptom"], 9);
    }

    #[test]
    fn documents_without_graphs_have_empty_metadata() {
        let json = r#"{"documents": [{"name": "raw", "path": "p", "has_graph": false, "metadata": {}}]}"#;
        let listing: DocumentListing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.documents[0].metadata.entity_count, 0);
        assert!(!listing.documents[0].metadata.edited);
    }
}
