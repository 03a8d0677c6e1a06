//! `lumina` subcommands. Each opens the corpus, does one thing, and prints a
//! plain-text summary on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::models::{DocumentFormat, DocumentStatus, IngestReport};
use crate::pipeline::{decode_image_input, IngestItem, QueryRequest};
use crate::stats::format_ts_iso;

/// Create the data directory, registry and (empty) index.
pub async fn run_init(config: Config) -> Result<()> {
    let corpus = Corpus::from_config(config).await?;
    corpus.persist().await?;
    println!("Initialized corpus at {}", corpus.config().data.dir.display());
    Ok(())
}

/// Expand directories into supported files, sorted for stable output.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| DocumentFormat::detect(n, None))
                        .is_some()
                })
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn print_report(report: &IngestReport) {
    let status = match report.status {
        DocumentStatus::Indexed => "ok",
        _ => "FAILED",
    };
    println!(
        "  {:<6} {:<36} {:<32} {:>5} chunks  {}",
        status, report.document_id, report.filename, report.chunk_count, report.message
    );
}

pub async fn run_ingest(config: Config, paths: &[PathBuf]) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        println!("No supported files found.");
        return Ok(());
    }

    let mut items = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = std::fs::read(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        items.push(IngestItem::new(name, bytes));
    }

    let corpus = Arc::new(Corpus::from_config(config).await?);
    println!("ingest {} file(s)", items.len());

    let mut indexed = 0;
    let mut failed = 0;
    for (file, result) in files.iter().zip(corpus.ingest_batch(items).await) {
        match result {
            Ok(report) => {
                if report.status == DocumentStatus::Indexed {
                    indexed += 1;
                } else {
                    failed += 1;
                }
                print_report(&report);
            }
            Err(e) => {
                failed += 1;
                println!("  {:<6} {}: {}", "SKIP", file.display(), e);
            }
        }
    }

    println!("  indexed: {}", indexed);
    println!("  failed:  {}", failed);
    println!("ok");
    Ok(())
}

pub async fn run_ingest_url(config: Config, url: &str) -> Result<()> {
    let corpus = Corpus::from_config(config).await?;
    let report = corpus
        .ingest_url(url)
        .await
        .with_context(|| format!("Failed to ingest {}", url))?;
    print_report(&report);
    Ok(())
}

pub async fn run_ask(
    config: Config,
    question: &str,
    image: Option<&Path>,
    image_data: Option<&str>,
    k: Option<usize>,
) -> Result<()> {
    let mut request = QueryRequest::new(question);
    if let Some(path) = image {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        request = request.with_image(bytes);
    } else if let Some(data) = image_data {
        request = request.with_image(decode_image_input(data)?);
    }
    if let Some(k) = k {
        request = request.with_k(k);
    }

    let corpus = Corpus::from_config(config).await?;
    let answer = corpus.query(&request).await?;

    println!("{}", answer.answer);
    println!();
    if answer.citations.is_empty() {
        println!("Sources: none (answer is not grounded in your documents)");
    } else {
        println!("Sources:");
        for (i, c) in answer.citations.iter().enumerate() {
            println!(
                "  [{}] {} #{}  score {:.4}",
                i + 1,
                c.filename,
                c.chunk_index,
                c.score
            );
            println!("      {}", c.preview.replace('\n', " "));
        }
    }
    if let Some(ocr) = &answer.ocr_text {
        println!();
        println!("Image text:");
        println!("{}", ocr);
    }
    Ok(())
}

pub async fn run_documents(config: Config) -> Result<()> {
    let corpus = Corpus::from_config(config).await?;
    let docs = corpus.documents().await;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10} {:<10} {:>6}  {:<16}  FILENAME",
        "ID", "FORMAT", "STATUS", "CHUNKS", "CREATED"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<10} {:<10} {:>6}  {:<16}  {}",
            d.id,
            d.format.as_str(),
            d.status.as_str(),
            d.chunk_count,
            format_ts_iso(d.created_at.timestamp()),
            d.filename
        );
        if let Some(err) = &d.error {
            println!("{:<36}  error: {}", "", err);
        }
    }
    Ok(())
}

pub async fn run_delete(config: Config, id: &str) -> Result<()> {
    let corpus = Corpus::from_config(config).await?;
    let removed = corpus.delete_document(id).await?;
    println!("Deleted {} ({} vectors)", id, removed);
    Ok(())
}

pub async fn run_clear(config: Config) -> Result<()> {
    let corpus = Corpus::from_config(config).await?;
    corpus.clear().await?;
    println!("Cleared all documents.");
    Ok(())
}
