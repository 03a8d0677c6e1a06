//! End-to-end tests of the library pipeline: ingest, query, delete, clear
//! and reopen, against both index backends.
//!
//! Embeddings come from the offline hash backend; OCR and generation are
//! scripted so the tests need no external services.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use tempfile::TempDir;

use lumina_rag::config::{Config, EmbeddingConfig};
use lumina_rag::embedding::{BackendLoader, EmbeddingBackend, Embedder, HashEmbedder};
use lumina_rag::generation::{AnswerGenerator, GenerationRequest};
use lumina_rag::index::IndexEntry;
use lumina_rag::models::{ChunkMetadata, DocumentStatus};
use lumina_rag::ocr::{DisabledOcr, OcrEngine};
use lumina_rag::pipeline::{IngestItem, QueryRequest};
use lumina_rag::prompt::NO_CONTEXT_MARKER;
use lumina_rag::{Corpus, ErrorKind, RagError};

// ============ Collaborators ============

/// Recognizes only the images it was given, by exact bytes.
struct ScriptedOcr {
    pages: HashMap<Vec<u8>, String>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    fn new(pages: &[(&[u8], &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(image, text)| (image.to_vec(), text.to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(&self, image: &[u8]) -> lumina_rag::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(image)
            .cloned()
            .ok_or_else(|| RagError::extraction("unrecognized image"))
    }
}

/// Records every request; fails while `failing` is set.
#[derive(Default)]
struct RecordingGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
    failing: AtomicBool,
}

impl RecordingGenerator {
    fn last(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AnswerGenerator for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, request: &GenerationRequest) -> lumina_rag::Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(RagError::generation("service unavailable"));
        }
        Ok(format!("answer from {} blocks", request.blocks.len()))
    }
}

// ============ Setup ============

fn test_config(dir: &Path, backend: &str, model: &str, dims: usize) -> Config {
    let toml = format!(
        r#"
[data]
dir = "{}"

[chunking]
chunk_size = 60
overlap_tokens = 10

[embedding]
provider = "hash"
model = "{}"
dims = {}

[index]
backend = "{}"

[ocr]
provider = "disabled"

[generation]
provider = "disabled"
"#,
        dir.display(),
        model,
        dims,
        backend
    );
    toml::from_str(&toml).unwrap()
}

async fn open_with(
    config: Config,
    ocr: Arc<dyn OcrEngine>,
    generator: Arc<dyn AnswerGenerator>,
) -> lumina_rag::Result<Corpus> {
    let embedder = Arc::new(Embedder::new(config.embedding.clone()));
    Corpus::open(config, embedder, ocr, generator).await
}

async fn open(config: Config) -> (Arc<Corpus>, Arc<RecordingGenerator>) {
    let generator = Arc::new(RecordingGenerator::default());
    let corpus = open_with(config, Arc::new(DisabledOcr), generator.clone())
        .await
        .unwrap();
    (Arc::new(corpus), generator)
}

const RUST_NOTES: &str = "Cargo is the Rust package manager. It builds crates, \
resolves dependencies and runs tests. The borrow checker enforces ownership rules \
at compile time so that memory safety holds without a garbage collector.";

const GARDEN_NOTES: &str = "Tomatoes need full sun and regular watering. Plant basil \
next to them to keep pests away. Harvest when the fruit is deep red and slightly soft.";

/// A PDF whose pages carry only JPEG image XObjects, no text operators.
fn scanned_pdf(pages: &[&[u8]]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for image in pages {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 100,
                "Height" => 100,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            image.to_vec(),
        ));
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![612.into(), 0.into(), 0.into(), 792.into(), 0.into(), 0.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    use std::io::Write;
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn sales_csv(rows: usize) -> String {
    let regions = ["West", "East", "North", "South"];
    let mut csv = String::from("region,quarter,revenue\n");
    for i in 0..rows {
        csv.push_str(&format!(
            "{},Q{},{}\n",
            regions[i % regions.len()],
            i % 4 + 1,
            1000 + i * 37
        ));
    }
    csv
}

// ============ Ingestion ============

#[tokio::test]
async fn test_text_document_indexed_and_answered() {
    let tmp = TempDir::new().unwrap();
    let (corpus, generator) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let report = corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed);
    assert!(report.chunk_count >= 1);
    assert!(report.error_kind.is_none());

    let answer = corpus
        .query(&QueryRequest::new("What does the borrow checker enforce?"))
        .await
        .unwrap();
    assert!(answer.grounded);
    assert_eq!(answer.citations[0].document_id, report.document_id);
    assert_eq!(answer.citations[0].filename, "rust.txt");

    let request = generator.last();
    assert_eq!(request.question, "What does the borrow checker enforce?");
    assert!(request.blocks[0].contains("borrow checker"));
    assert!(request.prompt().contains("[Document 1]"));
}

#[tokio::test]
async fn test_scanned_pdf_indexed_through_ocr() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "memory", "hash-256", 256);
    let ocr = Arc::new(ScriptedOcr::new(&[
        (&b"SCAN-PAGE-1"[..], "Invoice number 1001 issued to Acme Corporation."),
        (&b"SCAN-PAGE-2"[..], "Line items include forty widgets and six gadgets."),
        (&b"SCAN-PAGE-3"[..], "Payment is due within thirty days of delivery."),
    ]));
    let generator = Arc::new(RecordingGenerator::default());
    let corpus = open_with(config, ocr.clone(), generator).await.unwrap();

    let pdf = scanned_pdf(&[&b"SCAN-PAGE-1"[..], &b"SCAN-PAGE-2"[..], &b"SCAN-PAGE-3"[..]]);
    let report = corpus.ingest_bytes("scan.pdf", pdf, None).await.unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed, "{}", report.message);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);

    let context = corpus
        .retrieve(&QueryRequest::new("When is payment due?").with_k(10))
        .await
        .unwrap();
    assert!(!context.blocks.is_empty());
    let all_text: String = context.blocks.iter().map(|b| b.text.as_str()).collect();
    for page in 1..=3 {
        assert!(all_text.contains(&format!("[Page {} - OCR]", page)));
    }
    assert!(all_text.contains("thirty days"));
    assert!(context
        .blocks
        .iter()
        .all(|b| b.citation.document_id == report.document_id));
}

#[tokio::test]
async fn test_scanned_pdf_without_ocr_fails() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let pdf = scanned_pdf(&[&b"SCAN-PAGE-1"[..]]);
    let report = corpus.ingest_bytes("scan.pdf", pdf, None).await.unwrap();
    assert_eq!(report.status, DocumentStatus::Failed);
    assert_eq!(report.chunk_count, 0);

    let doc = corpus.get_document(&report.document_id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error.is_some());
    assert!(corpus
        .index()
        .document_vector_counts()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_csv_query_cites_table_rows() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let csv = corpus
        .ingest_bytes("sales.csv", sales_csv(60).into_bytes(), None)
        .await
        .unwrap();
    assert_eq!(csv.status, DocumentStatus::Indexed);
    assert!(csv.chunk_count >= 5);
    corpus
        .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    let answer = corpus
        .query(&QueryRequest::new("What was the revenue per region and quarter?").with_k(5))
        .await
        .unwrap();
    assert!(!answer.citations.is_empty());
    assert!(answer.citations.len() <= 5);
    assert!(answer
        .citations
        .iter()
        .all(|c| c.filename == "sales.csv" && c.document_id == csv.document_id));

    // Row chunks remember which rows they came from.
    let vector = corpus.embedder().embed_query("revenue").await.unwrap();
    let hits = corpus.index().search(&vector, 3).await.unwrap();
    let origin = hits[0].metadata.origin.as_ref().unwrap();
    assert_eq!(origin.table, "sales.csv");
    assert!(origin.row_start <= origin.row_end);
}

#[tokio::test]
async fn test_docx_paragraphs_indexed() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let docx = docx_with_paragraphs(&[
        "Quarterly planning memo.",
        "The launch moves to the second week of March.",
    ]);
    let report = corpus.ingest_bytes("memo.docx", docx, None).await.unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed, "{}", report.message);

    let context = corpus
        .retrieve(&QueryRequest::new("When is the launch?"))
        .await
        .unwrap();
    assert!(context.blocks[0].text.contains("second week of March"));
}

#[tokio::test]
async fn test_unsupported_format_not_registered() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let err = corpus
        .ingest_bytes("setup.exe", vec![0x4d, 0x5a, 0x90], None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert!(corpus.documents().await.is_empty());
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "memory", "hash-256", 256);

    // Count backend constructions across the concurrent batch.
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let loader: BackendLoader = Arc::new(
        move |cfg: &EmbeddingConfig| -> lumina_rag::Result<Arc<dyn EmbeddingBackend>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashEmbedder::new(&cfg.model, cfg.dims)))
        },
    );
    let embedder = Arc::new(Embedder::with_loader(config.embedding.clone(), loader));
    let corpus = Arc::new(
        Corpus::open(
            config,
            embedder,
            Arc::new(DisabledOcr),
            Arc::new(RecordingGenerator::default()),
        )
        .await
        .unwrap(),
    );

    let results = corpus
        .ingest_batch(vec![
            IngestItem::new("rust.txt", RUST_NOTES.as_bytes().to_vec()),
            IngestItem::new("empty.txt", b"   \n\n  ".to_vec()),
            IngestItem::new("broken.pdf", b"%PDF-1.4 truncated".to_vec()),
            IngestItem::new("tool.exe", vec![0u8; 4]),
            IngestItem::new("garden.txt", GARDEN_NOTES.as_bytes().to_vec()),
        ])
        .await;
    assert_eq!(results.len(), 5);

    let rust = results[0].as_ref().unwrap();
    assert_eq!(rust.filename, "rust.txt");
    assert_eq!(rust.status, DocumentStatus::Indexed);

    let empty = results[1].as_ref().unwrap();
    assert_eq!(empty.status, DocumentStatus::Failed);
    assert_eq!(empty.error_kind, Some(ErrorKind::EmptyContent));

    let broken = results[2].as_ref().unwrap();
    assert_eq!(broken.status, DocumentStatus::Failed);
    assert_eq!(broken.error_kind, Some(ErrorKind::ExtractionFailure));

    assert_eq!(
        results[3].as_ref().unwrap_err().kind(),
        ErrorKind::UnsupportedFormat
    );
    assert_eq!(
        results[4].as_ref().unwrap().status,
        DocumentStatus::Indexed
    );

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    let stats = corpus.stats().await.unwrap();
    assert_eq!(stats.documents, 4);
    assert_eq!(stats.indexed, 2);
    assert_eq!(stats.failed, 2);
    assert!(stats.embedder_initialized);
}

// ============ Query ============

#[tokio::test]
async fn test_query_image_text_merged() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "memory", "hash-256", 256);
    let ocr = Arc::new(ScriptedOcr::new(&[(&b"PHOTO"[..], "Tomato leaves with yellow spots")]));
    let generator = Arc::new(RecordingGenerator::default());
    let corpus = open_with(config, ocr, generator.clone()).await.unwrap();
    corpus
        .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    let answer = corpus
        .query(&QueryRequest::new("What is wrong with my plant?").with_image(b"PHOTO".to_vec()))
        .await
        .unwrap();
    assert_eq!(
        answer.ocr_text.as_deref(),
        Some("Tomato leaves with yellow spots")
    );
    let request = generator.last();
    assert_eq!(
        request.image_text.as_deref(),
        Some("Tomato leaves with yellow spots")
    );
    assert!(request
        .prompt()
        .contains("[Additional Context - User Provided Image]"));

    // An unreadable image does not fail the query.
    let answer = corpus
        .query(&QueryRequest::new("What is wrong with my plant?").with_image(b"BLURRY".to_vec()))
        .await
        .unwrap();
    assert!(answer.ocr_text.is_none());
    assert!(generator.last().image_text.is_none());
}

#[tokio::test]
async fn test_invalid_queries_rejected() {
    let tmp = TempDir::new().unwrap();
    let (corpus, generator) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let err = corpus.query(&QueryRequest::new("   ")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    let err = corpus
        .query(&QueryRequest::new("anything").with_k(0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(generator.count(), 0);
}

#[tokio::test]
async fn test_generation_failure_keeps_retrieved_context() {
    let tmp = TempDir::new().unwrap();
    let (corpus, generator) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;
    corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    generator.failing.store(true, Ordering::SeqCst);
    let err = corpus
        .query(&QueryRequest::new("What does cargo do?"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GenerationServiceFailure);
    let retrieved = err.retrieved_context().cloned().unwrap();
    assert!(!retrieved.blocks.is_empty());

    // Retrying generation alone reuses the context as is.
    generator.failing.store(false, Ordering::SeqCst);
    let answer = corpus.generate_answer(&retrieved).await.unwrap();
    assert_eq!(answer.citations, retrieved.citations());
    assert_eq!(generator.count(), 2);
}

// ============ Delete / clear ============

#[tokio::test]
async fn test_deleted_document_never_cited() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let rust = corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();
    let garden = corpus
        .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    let removed = corpus.delete_document(&rust.document_id).await.unwrap();
    assert_eq!(removed, rust.chunk_count);
    assert!(corpus.get_document(&rust.document_id).await.is_none());

    let answer = corpus
        .query(&QueryRequest::new("What does cargo build?").with_k(10))
        .await
        .unwrap();
    assert!(answer
        .citations
        .iter()
        .all(|c| c.document_id == garden.document_id));

    let err = corpus.delete_document(&rust.document_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_clear_leaves_ungrounded_answers() {
    let tmp = TempDir::new().unwrap();
    let (corpus, generator) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;
    corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    corpus.clear().await.unwrap();
    assert!(corpus.documents().await.is_empty());
    assert_eq!(corpus.index().len().await.unwrap(), 0);

    let answer = corpus
        .query(&QueryRequest::new("What does cargo do?"))
        .await
        .unwrap();
    assert!(!answer.grounded);
    assert!(answer.citations.is_empty());

    let request = generator.last();
    assert!(request.blocks.is_empty());
    assert!(request.prompt().contains(NO_CONTEXT_MARKER));
}

// ============ Reopen ============

#[tokio::test]
async fn test_reopen_restores_corpus() {
    for backend in ["memory", "sqlite"] {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path(), backend, "hash-256", 256);

        let report = {
            let (corpus, _) = open(config.clone()).await;
            corpus
                .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
                .await
                .unwrap()
        };

        let (corpus, _) = open(config).await;
        assert_eq!(corpus.index().backend_name(), backend);
        let doc = corpus.get_document(&report.document_id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert_eq!(corpus.index().len().await.unwrap(), report.chunk_count);

        let answer = corpus
            .query(&QueryRequest::new("What does cargo do?"))
            .await
            .unwrap();
        assert_eq!(answer.citations[0].document_id, report.document_id);
    }
}

#[tokio::test]
async fn test_reopen_reconciles_registry_and_index() {
    for backend in ["memory", "sqlite"] {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path(), backend, "hash-256", 256);

        let (kept, orphan) = {
            let (corpus, _) = open(config.clone()).await;
            let kept = corpus
                .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
                .await
                .unwrap();
            let orphan = corpus
                .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
                .await
                .unwrap();
            (kept, orphan)
        };

        // Simulate a crash: the registry lost one document and still shows
        // another one mid-pipeline.
        let registry = config.registry_path();
        let mut docs: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(&registry).unwrap()).unwrap();
        docs.retain(|d| d["id"] != orphan.document_id.as_str());
        let mut stuck = docs[0].clone();
        stuck["id"] = "stuck-document".into();
        stuck["status"] = "embedding".into();
        docs.push(stuck);
        std::fs::write(&registry, serde_json::to_vec(&docs).unwrap()).unwrap();

        let (corpus, _) = open(config).await;
        let counts = corpus.index().document_vector_counts().await.unwrap();
        assert!(!counts.contains_key(&orphan.document_id), "{}", backend);
        assert_eq!(counts.get(&kept.document_id), Some(&kept.chunk_count));

        let stuck = corpus.get_document("stuck-document").await.unwrap();
        assert_eq!(stuck.status, DocumentStatus::Failed);
        assert!(stuck.error.is_some());
    }
}

#[tokio::test]
async fn test_reopen_with_other_model_fails() {
    let tmp = TempDir::new().unwrap();
    {
        let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;
        corpus
            .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
            .await
            .unwrap();
    }

    let generator: Arc<dyn AnswerGenerator> = Arc::new(RecordingGenerator::default());
    let err = open_with(
        test_config(tmp.path(), "memory", "hash-other", 256),
        Arc::new(DisabledOcr),
        generator.clone(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, RagError::ModelMismatch { .. }), "{}", err);

    let err = open_with(
        test_config(tmp.path(), "memory", "hash-256", 128),
        Arc::new(DisabledOcr),
        generator,
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::EmbeddingDimensionMismatch);
}

#[tokio::test]
async fn test_sqlite_index_rejects_other_model() {
    let tmp = TempDir::new().unwrap();
    {
        let (corpus, _) = open(test_config(tmp.path(), "sqlite", "hash-256", 256)).await;
        corpus
            .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
            .await
            .unwrap();
    }

    let err = open_with(
        test_config(tmp.path(), "sqlite", "hash-192", 192),
        Arc::new(DisabledOcr),
        Arc::new(RecordingGenerator::default()),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, RagError::ModelMismatch { .. }), "{}", err);
}

// ============ Concurrency and limits ============

/// Blocks every `embed_batch` call until the test releases it.
struct GatedBackend {
    inner: HashEmbedder,
    entered: tokio::sync::Notify,
    release: tokio::sync::Semaphore,
}

#[async_trait]
impl EmbeddingBackend for GatedBackend {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_batch(&self, texts: &[String]) -> lumina_rag::Result<Vec<Vec<f32>>> {
        self.entered.notify_one();
        self.release.acquire().await.unwrap().forget();
        self.inner.embed_batch(texts).await
    }
}

/// Panics on every image.
struct PanickingOcr;

#[async_trait]
impl OcrEngine for PanickingOcr {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn recognize(&self, _image: &[u8]) -> lumina_rag::Result<String> {
        panic!("decoder crashed");
    }
}

#[tokio::test]
async fn test_csv_rows_past_excerpt_cap_are_retrievable() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;

    let mut csv = sales_csv(149);
    csv.push_str("Zebraland,Q9,777777\n");
    let report = corpus
        .ingest_bytes("sales.csv", csv.into_bytes(), None)
        .await
        .unwrap();
    assert_eq!(report.status, DocumentStatus::Indexed);

    let context = corpus
        .retrieve(&QueryRequest::new("Zebraland revenue").with_k(50))
        .await
        .unwrap();
    let block = context
        .blocks
        .iter()
        .find(|b| b.text.contains("region: Zebraland"))
        .expect("row 150 should be retrievable");
    assert!(block.text.contains("revenue: 777777"));
    assert!(context.blocks.iter().all(|b| !b.text.contains("Truncated")));
}

#[tokio::test]
async fn test_delete_during_ingest_reports_failed() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "memory", "hash-256", 256);
    let backend = Arc::new(GatedBackend {
        inner: HashEmbedder::new("hash-256", 256),
        entered: tokio::sync::Notify::new(),
        release: tokio::sync::Semaphore::new(0),
    });
    let shared = backend.clone();
    let loader: BackendLoader = Arc::new(
        move |_cfg: &EmbeddingConfig| -> lumina_rag::Result<Arc<dyn EmbeddingBackend>> {
            Ok(shared.clone())
        },
    );
    let embedder = Arc::new(Embedder::with_loader(config.embedding.clone(), loader));
    let corpus = Arc::new(
        Corpus::open(
            config,
            embedder,
            Arc::new(DisabledOcr),
            Arc::new(RecordingGenerator::default()),
        )
        .await
        .unwrap(),
    );

    let ingesting = {
        let corpus = corpus.clone();
        tokio::spawn(async move {
            corpus
                .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
                .await
        })
    };

    backend.entered.notified().await;
    let docs = corpus.documents().await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].status, DocumentStatus::Embedding);
    let id = docs[0].id.clone();
    corpus.delete_document(&id).await.unwrap();

    backend.release.add_permits(16);
    let report = ingesting.await.unwrap().unwrap();
    assert_eq!(report.status, DocumentStatus::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::NotFound));
    assert!(corpus.get_document(&id).await.is_none());
    assert!(!corpus
        .index()
        .document_vector_counts()
        .await
        .unwrap()
        .contains_key(&id));
}

#[tokio::test]
async fn test_context_budget_keeps_best_ranked_prefix() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path(), "memory", "hash-256", 256);
    config.retrieval.context_budget_tokens = 100;
    let (corpus, _) = open(config).await;
    corpus
        .ingest_bytes("sales.csv", sales_csv(60).into_bytes(), None)
        .await
        .unwrap();

    let question = "What was the revenue per region?";
    let vector = corpus.embedder().embed_query(question).await.unwrap();
    let ranked = corpus.index().search(&vector, 5).await.unwrap();
    assert_eq!(ranked.len(), 5);

    let context = corpus
        .retrieve(&QueryRequest::new(question).with_k(5))
        .await
        .unwrap();
    assert!(!context.blocks.is_empty());
    assert!(context.blocks.len() < ranked.len());
    for (block, hit) in context.blocks.iter().zip(&ranked) {
        assert_eq!(block.citation.document_id, hit.metadata.document_id);
        assert_eq!(block.citation.chunk_index, hit.metadata.chunk_index);
    }
    let used: usize = context
        .blocks
        .iter()
        .map(|b| b.text.split_whitespace().count())
        .sum();
    assert!(context.blocks.len() == 1 || used <= 100);
}

#[tokio::test]
async fn test_top_block_kept_even_over_budget() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path(), "memory", "hash-256", 256);
    config.retrieval.context_budget_tokens = 5;
    let (corpus, generator) = open(config).await;
    corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();
    corpus
        .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    let answer = corpus
        .query(&QueryRequest::new("What does the borrow checker enforce?"))
        .await
        .unwrap();
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].filename, "rust.txt");
    assert_eq!(generator.last().blocks.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_during_delete_never_returns_deleted() {
    for backend in ["memory", "sqlite"] {
        let tmp = TempDir::new().unwrap();
        let (corpus, _) = open(test_config(tmp.path(), backend, "hash-256", 256)).await;
        let doomed = corpus
            .ingest_bytes("sales.csv", sales_csv(120).into_bytes(), None)
            .await
            .unwrap();
        let kept = corpus
            .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
            .await
            .unwrap();

        let deleted = Arc::new(AtomicBool::new(false));
        let searcher = {
            let corpus = corpus.clone();
            let deleted = deleted.clone();
            let doomed_id = doomed.document_id.clone();
            tokio::spawn(async move {
                let vector = corpus.embedder().embed_query("revenue region").await.unwrap();
                let mut after = 0;
                while after < 20 {
                    let finished = deleted.load(Ordering::SeqCst);
                    let hits = corpus.index().search(&vector, 10).await.unwrap();
                    let context = corpus
                        .retrieve(&QueryRequest::new("revenue region").with_k(10))
                        .await
                        .unwrap();
                    if finished {
                        assert!(hits.iter().all(|h| h.metadata.document_id != doomed_id));
                        assert!(context
                            .blocks
                            .iter()
                            .all(|b| b.citation.document_id != doomed_id));
                        after += 1;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let writer = {
            let corpus = corpus.clone();
            tokio::spawn(async move {
                corpus
                    .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
                    .await
                    .unwrap()
            })
        };

        tokio::task::yield_now().await;
        let removed = corpus.delete_document(&doomed.document_id).await.unwrap();
        assert_eq!(removed, doomed.chunk_count);
        deleted.store(true, Ordering::SeqCst);

        searcher.await.unwrap();
        assert_eq!(writer.await.unwrap().status, DocumentStatus::Indexed);
        let counts = corpus.index().document_vector_counts().await.unwrap();
        assert!(!counts.contains_key(&doomed.document_id), "{}", backend);
        assert_eq!(counts.get(&kept.document_id), Some(&kept.chunk_count));
    }
}

#[tokio::test]
async fn test_batch_reports_crashed_item_in_place() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), "memory", "hash-256", 256);
    let corpus = Arc::new(
        open_with(
            config,
            Arc::new(PanickingOcr),
            Arc::new(RecordingGenerator::default()),
        )
        .await
        .unwrap(),
    );

    let results = corpus
        .ingest_batch(vec![
            IngestItem::new("rust.txt", RUST_NOTES.as_bytes().to_vec()),
            IngestItem::new("photo.png", vec![0x89, b'P', b'N', b'G']),
            IngestItem::new("garden.txt", GARDEN_NOTES.as_bytes().to_vec()),
        ])
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().filename, "rust.txt");
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap().filename, "garden.txt");
    assert_eq!(results[2].as_ref().unwrap().status, DocumentStatus::Indexed);
}

#[tokio::test]
async fn test_untracked_vectors_do_not_crowd_out_results() {
    let tmp = TempDir::new().unwrap();
    let (corpus, _) = open(test_config(tmp.path(), "memory", "hash-256", 256)).await;
    let rust = corpus
        .ingest_bytes("rust.txt", RUST_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();
    let garden = corpus
        .ingest_bytes("garden.txt", GARDEN_NOTES.as_bytes().to_vec(), None)
        .await
        .unwrap();

    // Vectors of a document the registry does not track, closer to the
    // question than anything indexed.
    let question = "What does cargo build?";
    let vector = corpus.embedder().embed_query(question).await.unwrap();
    let ghosts: Vec<IndexEntry> = (0..4)
        .map(|i| IndexEntry {
            chunk_id: format!("ghost_{}", i),
            vector: vector.clone(),
            metadata: ChunkMetadata {
                document_id: "ghost".to_string(),
                filename: "ghost.txt".to_string(),
                chunk_index: i,
                text: "cargo build".to_string(),
                origin: None,
            },
        })
        .collect();
    corpus.index().add_batch(ghosts).await.unwrap();

    let context = corpus
        .retrieve(&QueryRequest::new(question).with_k(2))
        .await
        .unwrap();
    assert_eq!(context.blocks.len(), 2);
    let mut cited: Vec<&str> = context
        .blocks
        .iter()
        .map(|b| b.citation.document_id.as_str())
        .collect();
    cited.sort();
    let mut expected = vec![rust.document_id.as_str(), garden.document_id.as_str()];
    expected.sort();
    assert_eq!(cited, expected);
}
