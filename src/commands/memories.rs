//! Memory commands: create, list, show, update, delete

use crate::error::{Error, Result};
use crate::models::{Attachment, AudioInput, MediaInput, Memory, MemoryUpdate, NewMemory, Visibility};
use crate::store::MemoryStore;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Options for creating a memory
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub owner_id: String,
    pub title: String,
    pub body: Option<String>,
    pub category: Option<String>,
    pub visibility: Visibility,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub images: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
    pub fallback_image: Option<String>,
}

/// Options for editing a memory; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub title: Option<String>,
    pub body: Option<String>,
    pub clear_body: bool,
    /// Attachment filenames to drop
    pub remove: Vec<String>,
    pub images: Vec<PathBuf>,
    pub audio: Vec<PathBuf>,
}

fn read_image(path: &Path) -> Result<DynamicImage> {
    image::open(path)
        .map_err(|e| Error::InvalidMemory(format!("cannot read image {}: {}", path.display(), e)))
}

/// Create a memory from image and audio files on disk
pub async fn cmd_create(store: &MemoryStore, options: CreateOptions) -> Result<Memory> {
    let images = options
        .images
        .iter()
        .map(|p| read_image(p))
        .collect::<Result<Vec<_>>>()?;
    let audio = options
        .audio
        .into_iter()
        .map(|path| AudioInput::new(path, Duration::ZERO))
        .collect();

    let mut new = NewMemory::new(options.owner_id, options.title).visibility(options.visibility);
    new.body = options.body;
    new.category = options.category;
    new.scheduled_for = options.scheduled_for;

    let media = MediaInput {
        images,
        audio,
        fallback_image: options.fallback_image,
    };

    let memory = store.create_memory_with_media(new, media).await?;
    info!("Created memory {}", memory.id);
    Ok(memory)
}

/// List memories, newest first, optionally for one owner
pub async fn cmd_list(store: &MemoryStore, owner_id: Option<&str>) -> Result<Vec<Memory>> {
    let mut memories = store.all_memories().await?;
    if let Some(owner) = owner_id {
        memories.retain(|m| m.owner_id == owner);
    }
    Ok(memories)
}

pub async fn cmd_show(store: &MemoryStore, id: &str) -> Result<Memory> {
    store
        .get_memory(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Edit title/body and add or drop attachments
pub async fn cmd_update(store: &MemoryStore, id: &str, options: UpdateOptions) -> Result<Memory> {
    let current = cmd_show(store, id).await?;

    let mut attachments: Vec<Attachment> = current
        .attachments
        .into_iter()
        .filter(|a| !options.remove.contains(&a.filename))
        .collect();

    for path in &options.images {
        let name = store.save_image_attachment(read_image(path)?).await?;
        attachments.push(Attachment::image(name));
    }
    for path in &options.audio {
        let name = store.save_audio_attachment(path).await?;
        attachments.push(Attachment::audio(name));
    }

    let body = if options.clear_body {
        None
    } else {
        options.body.or(current.body)
    };
    let update = MemoryUpdate {
        title: options.title.unwrap_or(current.title),
        body,
        attachments,
    };

    store.update_memory(id, update).await?;
    cmd_show(store, id).await
}

pub async fn cmd_delete(store: &MemoryStore, id: &str) -> Result<()> {
    store.delete_memory(id).await?;
    info!("Deleted memory {}", id);
    Ok(())
}

pub fn print_memories(memories: &[Memory]) {
    if memories.is_empty() {
        println!("No memories yet.");
        return;
    }

    println!("{} memories:\n", memories.len());
    for memory in memories {
        println!(
            "  {}  {}  [{}] {} attachment(s)",
            memory.created_at.format("%Y-%m-%d %H:%M"),
            memory.title,
            memory.visibility,
            memory.attachments.len()
        );
        println!("      id: {}  owner: {}", memory.id, memory.owner_id);
    }
}

pub fn print_memory(store: &MemoryStore, memory: &Memory) {
    println!("{}", memory.title);
    println!("  id:         {}", memory.id);
    println!("  owner:      {}", memory.owner_id);
    println!("  created:    {}", memory.created_at.to_rfc3339());
    println!("  visibility: {}", memory.visibility);
    if let Some(when) = memory.scheduled_for {
        println!("  scheduled:  {}", when.to_rfc3339());
    }
    if let Some(category) = &memory.category {
        println!("  category:   {}", category);
    }
    if let Some(body) = &memory.body {
        println!("\n{}\n", body);
    }
    for attachment in &memory.attachments {
        let location = store
            .local_path(attachment)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| attachment.filename.clone());
        println!("  - {} {}", attachment.kind, location);
    }
}
