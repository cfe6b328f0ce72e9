//! Chunk retrieval by id.
//!
//! Fetches a single stored chunk with its full provenance. This is the
//! lookup behind citation links: a diagnosis report references a chunk id,
//! and `medkb get` resolves it back to document, section, and text.

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::store::KnowledgeStore;

/// CLI entry point — resolve a chunk id and print its provenance.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    let store = KnowledgeStore::new(pool.clone());

    let chunk = match store.get_chunk(id).await? {
        Some(chunk) => chunk,
        None => {
            println!("no chunk with id {}", id);
            pool.close().await;
            return Ok(());
        }
    };

    println!("--- Chunk ---");
    println!("id:            {}", chunk.id);
    println!("document:      {}", chunk.document_title);
    println!("section:       {}", chunk.section_title);
    println!("index:         {}", chunk.chunk_index);
    println!("category:      {}", chunk.disease_category);
    if let Some(ref disease_id) = chunk.disease_id {
        println!("disease:       {}", disease_id);
    }
    println!("source type:   {}", chunk.source_type.as_str());
    println!("hash:          {}", chunk.content_hash);
    match (&chunk.embedding, &chunk.embedding_model_id) {
        (Some(vec), Some(model)) => println!("embedding:     {} dims ({})", vec.len(), model),
        (Some(vec), None) => println!("embedding:     {} dims", vec.len()),
        _ => println!("embedding:     none"),
    }
    println!("retrievals:    {}", chunk.retrieval_count);
    println!("active:        {}", chunk.is_active);
    println!();
    println!("--- Text ---");
    println!("{}", chunk.chunk_text);

    pool.close().await;
    Ok(())
}
