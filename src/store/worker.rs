//! The single writer: one task owns the index and runs jobs in order.

use super::attachments::AttachmentDir;
use super::fallback::FallbackImageSource;
use super::index::IndexFile;
use crate::clock::{Clock, IdGenerator};
use crate::error::{Error, Result};
use crate::events::{EventBus, Substep};
use crate::models::{Attachment, AttachmentKind, MediaInput, Memory, MemoryUpdate, NewMemory};
use image::DynamicImage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Job {
    SaveImage {
        image: DynamicImage,
        reply: Reply<String>,
    },
    SaveAudio {
        source: PathBuf,
        reply: Reply<String>,
    },
    Add {
        memory: Memory,
        reply: Reply<()>,
    },
    Create {
        new: NewMemory,
        reply: Reply<Memory>,
    },
    CreateWithMedia {
        new: NewMemory,
        media: Box<MediaInput>,
        reply: Reply<Memory>,
    },
    Update {
        id: String,
        update: MemoryUpdate,
        reply: Reply<()>,
    },
    Delete {
        id: String,
        reply: Reply<()>,
    },
    Get {
        id: String,
        reply: Reply<Option<Memory>>,
    },
    Snapshot {
        reply: Reply<Vec<Memory>>,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::SaveImage { .. } => "save_image",
            Job::SaveAudio { .. } => "save_audio",
            Job::Add { .. } => "add",
            Job::Create { .. } => "create",
            Job::CreateWithMedia { .. } => "create_with_media",
            Job::Update { .. } => "update",
            Job::Delete { .. } => "delete",
            Job::Get { .. } => "get",
            Job::Snapshot { .. } => "snapshot",
        }
    }
}

pub(crate) struct Worker {
    pub memories: Vec<Memory>,
    pub index: IndexFile,
    pub attachments: AttachmentDir,
    pub fallback: Arc<dyn FallbackImageSource>,
    pub fallback_timeout: Duration,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    pub events: EventBus,
}

impl Worker {
    pub async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            debug!(job = job.name(), "memory store job started");
            self.handle(job).await;
        }
        debug!("memory store worker stopped");
    }

    // A dropped receiver means the caller stopped waiting; the work is done either way.
    async fn handle(&mut self, job: Job) {
        match job {
            Job::SaveImage { image, reply } => {
                let _ = reply.send(self.save_image(&image).await);
            }
            Job::SaveAudio { source, reply } => {
                let _ = reply.send(self.save_audio(&source).await);
            }
            Job::Add { memory, reply } => {
                let _ = reply.send(self.insert(memory).await.map(|_| ()));
            }
            Job::Create { new, reply } => {
                let _ = reply.send(self.create(new).await);
            }
            Job::CreateWithMedia { new, media, reply } => {
                let _ = reply.send(self.create_with_media(new, *media).await);
            }
            Job::Update { id, update, reply } => {
                let _ = reply.send(self.update(&id, update).await);
            }
            Job::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id).await);
            }
            Job::Get { id, reply } => {
                let found = self.position(&id).map(|idx| self.memories[idx].clone());
                let _ = reply.send(Ok(found));
            }
            Job::Snapshot { reply } => {
                let _ = reply.send(Ok(self.memories.clone()));
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.memories.iter().position(|m| m.id == id)
    }

    async fn persist(&self) -> Result<()> {
        self.index
            .save(&self.memories)
            .await
            .map_err(Error::Persistence)
    }

    async fn save_image(&self, image: &DynamicImage) -> Result<String> {
        self.attachments
            .save_image(image, &self.ids.next_id())
            .await
    }

    async fn save_audio(&self, source: &Path) -> Result<String> {
        self.attachments
            .save_audio(source, &self.ids.next_id())
            .await
    }

    /// Put a memory at the front and persist; undo the insert if the write fails
    async fn insert(&mut self, memory: Memory) -> Result<Memory> {
        if self.position(&memory.id).is_some() {
            return Err(Error::InvalidMemory(format!(
                "a memory with id {} already exists",
                memory.id
            )));
        }

        let id = memory.id.clone();
        self.memories.insert(0, memory.clone());

        if let Err(e) = self.persist().await {
            if let Some(idx) = self.position(&id) {
                self.memories.remove(idx);
            }
            return Err(e);
        }

        info!(id = %id, attachments = memory.attachments.len(), "memory created");
        self.events.memory_created(&id);
        Ok(memory)
    }

    async fn create(&mut self, new: NewMemory) -> Result<Memory> {
        let memory = Memory::from_new(new, self.ids.next_id(), self.clock.now())?;
        self.insert(memory).await
    }

    async fn create_with_media(&mut self, new: NewMemory, media: MediaInput) -> Result<Memory> {
        let mut new = new.validated()?;
        let mut attachments = std::mem::take(&mut new.attachments);

        for image in &media.images {
            match self.save_image(image).await {
                Ok(name) => attachments.push(Attachment::image(name)),
                Err(e) => self.events.substep_failed(Substep::SaveImage, e),
            }
        }

        for audio in &media.audio {
            match self.save_audio(&audio.path).await {
                Ok(name) => attachments.push(Attachment::audio(name)),
                Err(e) => self
                    .events
                    .substep_failed(Substep::SaveAudio, format!("{}: {}", audio.path.display(), e)),
            }
        }

        if !attachments.iter().any(|a| a.kind == AttachmentKind::Image) {
            let fallback = media
                .fallback_image
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty());
            if let Some(reference) = fallback {
                if let Some(name) = self.fallback_attachment(reference).await {
                    attachments.insert(0, Attachment::image(name));
                }
            }
        }

        new.attachments = attachments;
        self.create(new).await
    }

    /// Obtain and store the fallback image within the configured ceiling.
    /// Every failure is reported and yields `None`.
    async fn fallback_attachment(&self, reference: &str) -> Option<String> {
        let fetched =
            tokio::time::timeout(self.fallback_timeout, self.fallback.fetch(reference)).await;

        let image = match fetched {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                self.events
                    .substep_failed(Substep::FallbackImage, format!("{}: {}", reference, e));
                return None;
            }
            Err(_) => {
                self.events.substep_failed(
                    Substep::FallbackImage,
                    format!(
                        "{}: no image after {}s",
                        reference,
                        self.fallback_timeout.as_secs_f32()
                    ),
                );
                return None;
            }
        };

        match self.save_image(&image).await {
            Ok(name) => Some(name),
            Err(e) => {
                self.events.substep_failed(Substep::SaveImage, e);
                None
            }
        }
    }

    async fn update(&mut self, id: &str, update: MemoryUpdate) -> Result<()> {
        let idx = self
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let update = update.validated()?;
        let existing = self.memories[idx].clone();

        let stale: Vec<String> = {
            let kept: HashSet<&str> = update
                .attachments
                .iter()
                .map(|a| a.filename.as_str())
                .collect();
            existing
                .local_filenames()
                .filter(|name| !kept.contains(name))
                .map(String::from)
                .collect()
        };

        let mut deletion_error = None;
        for name in &stale {
            if let Err(e) = self.attachments.remove(name).await {
                self.events
                    .substep_failed(Substep::RemoveAttachment, format!("{}: {}", name, e));
                deletion_error = Some(e);
            }
        }

        let mut updated = existing.clone();
        updated.title = update.title;
        updated.body = update.body;
        updated.attachments = update.attachments;
        self.memories[idx] = updated;

        if let Err(e) = self.persist().await {
            self.memories[idx] = existing;
            return Err(e);
        }

        info!(id = %id, removed_files = stale.len(), "memory updated");
        // The update is durable, but callers still hear about files left behind.
        match deletion_error {
            Some(e) => Err(Error::Io(e)),
            None => Ok(()),
        }
    }

    async fn delete(&mut self, id: &str) -> Result<()> {
        let idx = self
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let files: Vec<String> = self.memories[idx]
            .local_filenames()
            .map(String::from)
            .collect();
        for name in &files {
            if let Err(e) = self.attachments.remove(name).await {
                self.events
                    .substep_failed(Substep::RemoveAttachment, format!("{}: {}", name, e));
            }
        }

        let removed = self.memories.remove(idx);
        if let Err(e) = self.persist().await {
            self.memories.insert(idx, removed);
            return Err(e);
        }

        info!(id = %id, "memory deleted");
        Ok(())
    }
}
