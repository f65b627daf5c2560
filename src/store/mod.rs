//! Local memory store
//!
//! This module owns the durable record of memories and their attachment files:
//! - A JSON index (`memories.json`), newest first, written atomically
//! - A flat attachments folder with store-generated filenames
//! - A single worker task that runs every read and write in submission order
//!
//! Mutations stage the in-memory change, persist the whole index, and undo
//! the staged change if the write fails. Attachment deletions are not undone.

mod attachments;
mod fallback;
mod fsutil;
mod index;
mod worker;

pub use attachments::{encode_jpeg, AttachmentDir};
pub use fallback::{DefaultFallbackSource, FallbackImageSource};
pub use index::IndexFile;

use crate::clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, StoreEvent, Substep};
use crate::models::{Attachment, MediaInput, Memory, MemoryUpdate, NewMemory};
use image::DynamicImage;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};
use worker::{Job, Reply, Worker};

/// The result of a queued store operation.
///
/// The job is already enqueued when this value is returned; dropping it
/// discards the result but does not stop the job.
#[must_use = "the operation runs regardless; await it to observe the result"]
pub struct Pending<T> {
    rx: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> Pending<T> {
    fn closed() -> Self {
        Self { rx: None }
    }

    /// Block the current thread until the result arrives.
    ///
    /// Panics if called from within an async execution context.
    pub fn wait(self) -> Result<T> {
        match self.rx {
            Some(rx) => rx.blocking_recv().map_err(|_| Error::StoreClosed)?,
            None => Err(Error::StoreClosed),
        }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.rx.as_mut() {
            Some(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(result) => {
                    this.rx = None;
                    Poll::Ready(result.unwrap_or(Err(Error::StoreClosed)))
                }
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Ready(Err(Error::StoreClosed)),
        }
    }
}

/// Configures and opens a [`MemoryStore`]
pub struct StoreBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    fallback: Option<Arc<dyn FallbackImageSource>>,
}

impl StoreBuilder {
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn fallback_source(mut self, source: impl FallbackImageSource + 'static) -> Self {
        self.fallback = Some(Arc::new(source));
        self
    }

    /// Load the index and start the worker. Must run inside a tokio runtime.
    pub async fn open(self) -> Result<MemoryStore> {
        let config = self.config;
        config.validate()?;

        tokio::fs::create_dir_all(&config.paths.base_dir).await?;
        let attachments = AttachmentDir::new(&config);
        attachments.ensure().await?;

        let events = EventBus::default();
        let index = IndexFile::new(&config.paths.index_file);
        let memories = load_or_quarantine(&index, &events).await?;

        let fallback = match self.fallback {
            Some(source) => source,
            None => Arc::new(DefaultFallbackSource::new(&config)?),
        };

        info!(
            "Opened memory store at {:?} ({} memories)",
            config.paths.base_dir,
            memories.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            memories,
            index,
            attachments: attachments.clone(),
            fallback,
            fallback_timeout: config.fallback.timeout(),
            clock: self.clock,
            ids: self.ids,
            events: events.clone(),
        };
        tokio::spawn(worker.run(rx));

        Ok(MemoryStore {
            jobs: tx,
            events,
            attachments_dir: attachments.dir().to_path_buf(),
        })
    }
}

async fn load_or_quarantine(index: &IndexFile, events: &EventBus) -> Result<Vec<Memory>> {
    match index.load().await {
        Ok(memories) => Ok(memories),
        Err(Error::Json(e)) => {
            events.substep_failed(Substep::LoadIndex, format!("{:?}: {}", index.path(), e));
            let aside = index.quarantine().await?;
            warn!("Unreadable index moved to {:?}; starting empty", aside);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Handle to the memory store. Cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct MemoryStore {
    jobs: mpsc::UnboundedSender<Job>,
    events: EventBus,
    attachments_dir: PathBuf,
}

impl MemoryStore {
    /// Open a store with the system clock and random ids
    pub async fn open(config: &Config) -> Result<Self> {
        Self::builder(config).open().await
    }

    pub fn builder(config: &Config) -> StoreBuilder {
        StoreBuilder {
            config: config.clone(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            fallback: None,
        }
    }

    fn submit<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Pending<T> {
        let (tx, rx) = oneshot::channel();
        match self.jobs.send(job(tx)) {
            Ok(()) => Pending { rx: Some(rx) },
            Err(_) => Pending::closed(),
        }
    }

    /// Listen for store notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Full path of a stored attachment file
    pub fn attachment_path(&self, filename: &str) -> PathBuf {
        self.attachments_dir.join(filename)
    }

    /// Full path for a local attachment, `None` for remote ones
    pub fn local_path(&self, attachment: &Attachment) -> Option<PathBuf> {
        attachment
            .local_filename()
            .map(|name| self.attachment_path(name))
    }

    /// Re-encode and store an image; resolves to the generated filename
    pub fn save_image_attachment(&self, image: DynamicImage) -> Pending<String> {
        self.submit(|reply| Job::SaveImage { image, reply })
    }

    /// Copy an audio file into the store; resolves to the generated filename
    pub fn save_audio_attachment(&self, source: impl Into<PathBuf>) -> Pending<String> {
        let source = source.into();
        self.submit(|reply| Job::SaveAudio { source, reply })
    }

    /// Insert a caller-built memory at the front and persist
    pub fn add(&self, memory: Memory) -> Pending<()> {
        self.submit(|reply| Job::Add { memory, reply })
    }

    /// Create a memory from already-stored attachments
    pub fn create_memory(&self, new: NewMemory) -> Pending<Memory> {
        self.submit(|reply| Job::Create { new, reply })
    }

    /// Store raw media, add a fallback image if needed, then create the memory,
    /// all as one queued job
    pub fn create_memory_with_media(&self, new: NewMemory, media: MediaInput) -> Pending<Memory> {
        let media = Box::new(media);
        self.submit(|reply| Job::CreateWithMedia { new, media, reply })
    }

    /// Replace title, body, and attachments of an existing memory
    pub fn update_memory(&self, id: impl Into<String>, update: MemoryUpdate) -> Pending<()> {
        let id = id.into();
        self.submit(|reply| Job::Update { id, update, reply })
    }

    pub fn delete_memory(&self, id: impl Into<String>) -> Pending<()> {
        let id = id.into();
        self.submit(|reply| Job::Delete { id, reply })
    }

    pub fn get_memory(&self, id: impl Into<String>) -> Pending<Option<Memory>> {
        let id = id.into();
        self.submit(|reply| Job::Get { id, reply })
    }

    /// Snapshot of every memory, newest first
    pub async fn all_memories(&self) -> Result<Vec<Memory>> {
        self.submit(|reply| Job::Snapshot { reply }).await
    }

    /// Blocking snapshot for synchronous callers outside the async runtime
    pub fn all_memories_blocking(&self) -> Result<Vec<Memory>> {
        self.submit(|reply| Job::Snapshot { reply }).wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SequentialIds, SteppingClock};
    use crate::models::Visibility;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use image::{Rgb, RgbImage};
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoFallback;

    #[async_trait]
    impl FallbackImageSource for NoFallback {
        async fn fetch(&self, reference: &str) -> Result<DynamicImage> {
            Err(Error::Fallback(format!("offline: {}", reference)))
        }
    }

    struct FixedFallback;

    #[async_trait]
    impl FallbackImageSource for FixedFallback {
        async fn fetch(&self, _reference: &str) -> Result<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]))))
        }
    }

    struct SlowFallback;

    #[async_trait]
    impl FallbackImageSource for SlowFallback {
        async fn fetch(&self, _reference: &str) -> Result<DynamicImage> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(Error::Fallback("unreachable".to_string()))
        }
    }

    async fn open_with(
        tmp: &TempDir,
        fallback: impl FallbackImageSource + 'static,
    ) -> (MemoryStore, Config) {
        let mut config = Config::with_base_dir(tmp.path());
        config.fallback.timeout_secs = 1;
        let store = MemoryStore::builder(&config)
            .clock(SteppingClock::new(
                Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
            ))
            .ids(SequentialIds::new("ID"))
            .fallback_source(fallback)
            .open()
            .await
            .unwrap();
        (store, config)
    }

    fn photo() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([200, 100, 50])))
    }

    /// Make the next index write fail: rename onto a non-empty directory errors.
    fn block_index(config: &Config) {
        std::fs::create_dir(&config.paths.index_file).unwrap();
        std::fs::write(config.paths.index_file.join("x"), b"x").unwrap();
    }

    fn unblock_index(config: &Config) {
        std::fs::remove_dir_all(&config.paths.index_file).unwrap();
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamp() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;

        let memory = store
            .create_memory(NewMemory::new("u1", "First"))
            .await
            .unwrap();
        assert_eq!(memory.id, "ID-1");
        assert_eq!(
            memory.created_at,
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
        );
        assert!(memory.attachments.is_empty());
    }

    #[tokio::test]
    async fn test_create_rolls_back_when_persist_fails() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;
        block_index(&config);

        let err = store
            .create_memory(NewMemory::new("u1", "Lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(store.all_memories().await.unwrap().is_empty());

        unblock_index(&config);
        store
            .create_memory(NewMemory::new("u1", "Kept"))
            .await
            .unwrap();
        assert_eq!(store.all_memories().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_rolls_back_when_persist_fails() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;
        let memory = store
            .create_memory(NewMemory::new("u1", "Before"))
            .await
            .unwrap();
        block_index(&config);

        let update = MemoryUpdate {
            title: "After".to_string(),
            body: None,
            attachments: vec![],
        };
        let err = store.update_memory(&memory.id, update).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));

        let current = store.get_memory(&memory.id).await.unwrap().unwrap();
        assert_eq!(current.title, "Before");
    }

    #[tokio::test]
    async fn test_delete_rolls_back_to_same_position() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;
        for title in ["a", "b", "c"] {
            store
                .create_memory(NewMemory::new("u1", title))
                .await
                .unwrap();
        }
        let before = store.all_memories().await.unwrap();
        block_index(&config);

        let err = store.delete_memory(&before[1].id).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(store.all_memories().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_surfaces_failed_file_removal() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;

        // A directory under the attachment name cannot be removed with remove_file.
        let stuck = "img_stuck.jpg";
        std::fs::create_dir(config.paths.attachments_dir.join(stuck)).unwrap();
        let memory = store
            .create_memory(NewMemory::new("u1", "Album").attachments(vec![Attachment::image(stuck)]))
            .await
            .unwrap();

        let update = MemoryUpdate {
            title: "Album v2".to_string(),
            body: Some("edited".to_string()),
            attachments: vec![],
        };
        let err = store.update_memory(&memory.id, update).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let current = store.get_memory(&memory.id).await.unwrap().unwrap();
        assert_eq!(current.title, "Album v2");
        assert!(current.attachments.is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_id_reports_not_found_before_validation() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;

        let update = MemoryUpdate {
            title: "  ".to_string(),
            body: None,
            attachments: vec![],
        };
        let err = store.update_memory("missing", update).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_carries_on_after_failed_file_removal() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;

        let stuck = "img_stuck.jpg";
        std::fs::create_dir(config.paths.attachments_dir.join(stuck)).unwrap();
        std::fs::write(config.paths.attachments_dir.join(stuck).join("x"), b"x").unwrap();
        let memory = store
            .create_memory(NewMemory::new("u1", "Album").attachments(vec![Attachment::image(stuck)]))
            .await
            .unwrap();

        let mut events = store.subscribe();
        store.delete_memory(&memory.id).await.unwrap();

        assert!(store.get_memory(&memory.id).await.unwrap().is_none());
        assert!(store.all_memories().await.unwrap().is_empty());
        match events.recv().await.unwrap() {
            StoreEvent::SubstepFailed { step, detail } => {
                assert_eq!(step, Substep::RemoveAttachment);
                assert!(detail.contains(stuck));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_media_images_then_audio_in_order() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;
        let recording = tmp.path().join("voice.aac");
        std::fs::write(&recording, b"aac").unwrap();

        let media = MediaInput {
            images: vec![photo(), photo()],
            audio: vec![crate::models::AudioInput::new(
                &recording,
                Duration::from_secs(3),
            )],
            fallback_image: Some("https://example.invalid/p.jpg".to_string()),
        };
        let memory = store
            .create_memory_with_media(NewMemory::new("u1", "Mixed"), media)
            .await
            .unwrap();

        let names: Vec<&str> = memory
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, vec!["img_ID-1.jpg", "img_ID-2.jpg", "aud_ID-3.aac"]);
        assert_eq!(memory.id, "ID-4");
    }

    #[tokio::test]
    async fn test_fallback_inserted_first() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, FixedFallback).await;
        let recording = tmp.path().join("voice");
        std::fs::write(&recording, b"m4a").unwrap();

        let media = MediaInput {
            images: vec![],
            audio: vec![crate::models::AudioInput::new(&recording, Duration::ZERO)],
            fallback_image: Some("beach".to_string()),
        };
        let memory = store
            .create_memory_with_media(NewMemory::new("u1", "Beach day"), media)
            .await
            .unwrap();

        assert_eq!(memory.attachments.len(), 2);
        assert_eq!(memory.attachments[0], Attachment::image("img_ID-2.jpg"));
        assert_eq!(memory.attachments[1], Attachment::audio("aud_ID-1.m4a"));
        assert!(store.attachment_path("img_ID-2.jpg").exists());
    }

    #[tokio::test]
    async fn test_blank_fallback_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, FixedFallback).await;

        let media = MediaInput {
            fallback_image: Some("   ".to_string()),
            ..Default::default()
        };
        let memory = store
            .create_memory_with_media(NewMemory::new("u1", "Plain"), media)
            .await
            .unwrap();
        assert!(memory.attachments.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_bounded_by_ceiling() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, SlowFallback).await;
        let mut events = store.subscribe();

        let media = MediaInput {
            fallback_image: Some("https://slow.example.com/p.jpg".to_string()),
            ..Default::default()
        };
        let memory = store
            .create_memory_with_media(NewMemory::new("u1", "Slow"), media)
            .await
            .unwrap();
        assert!(memory.attachments.is_empty());

        match events.recv().await.unwrap() {
            StoreEvent::SubstepFailed { step, .. } => assert_eq!(step, Substep::FallbackImage),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::MemoryCreated {
                id: memory.id.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_failed_image_save_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;

        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let media = MediaInput {
            images: vec![empty, photo()],
            ..Default::default()
        };
        let memory = store
            .create_memory_with_media(NewMemory::new("u1", "Partial"), media)
            .await
            .unwrap();
        assert_eq!(memory.attachments, vec![Attachment::image("img_ID-2.jpg")]);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_id() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;
        let memory = store
            .create_memory(NewMemory::new("u1", "Once").visibility(Visibility::Private))
            .await
            .unwrap();

        let err = store.add(memory.clone()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMemory(_)));
        assert_eq!(store.all_memories().await.unwrap(), vec![memory]);
    }

    #[tokio::test]
    async fn test_invalid_input_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;

        let media = MediaInput {
            images: vec![photo()],
            ..Default::default()
        };
        let err = store
            .create_memory_with_media(NewMemory::new("u1", ""), media)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMemory(_)));
        assert_eq!(
            std::fs::read_dir(&config.paths.attachments_dir).unwrap().count(),
            0
        );
        assert!(!config.paths.index_file.exists());
    }

    #[tokio::test]
    async fn test_dropped_request_still_runs() {
        let tmp = TempDir::new().unwrap();
        let (store, _config) = open_with(&tmp, NoFallback).await;

        drop(store.create_memory(NewMemory::new("u1", "Fire and forget")));

        let all = store.all_memories().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "Fire and forget");
    }

    #[test]
    fn test_blocking_snapshot_outside_runtime() {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (store, _config) = runtime.block_on(open_with(&tmp, NoFallback));
        runtime
            .block_on(store.create_memory(NewMemory::new("u1", "Sync read")))
            .unwrap();

        let all = store.all_memories_blocking().unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_attachment_paths() {
        let tmp = TempDir::new().unwrap();
        let (store, config) = open_with(&tmp, NoFallback).await;

        assert_eq!(
            store.local_path(&Attachment::image("img_a.jpg")),
            Some(config.paths.attachments_dir.join("img_a.jpg"))
        );
        assert_eq!(
            store.local_path(&Attachment::image("https://cdn.example.com/a.jpg")),
            None
        );
    }
}
