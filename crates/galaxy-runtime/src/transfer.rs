//! Outbound transfer lane
//!
//! Each paired connection gets one lane task that runs `send_files` batches
//! strictly one after another, so a connection never has two outbound files
//! in flight. The lane writes frames straight to the channel sink and reports
//! progress on the event broadcast. Aborting the task (connection closed)
//! drops the pending replies, which callers observe as `ConnectionClosed`.

use std::io::SeekFrom;
use std::ops::Range;
use std::sync::Arc;

use galaxy_core::channel::utils::AppEventSender;
use galaxy_core::protocol::{ChunkProgress, FileMetadata, OutboundProgress};
use galaxy_core::{
    AppEvent, ChannelSink, ControlMessage, DeviceCode, Direction, FailedFile, FileId, FileSource,
    OutgoingFile, SendSummary, Timestamp, TransferConfig, TransferError, WireFrame,
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One `send_files` call queued on a lane
pub struct SendJob {
    pub files: Vec<OutgoingFile>,
    pub reply: oneshot::Sender<Result<SendSummary, TransferError>>,
}

/// Handle to a running lane
pub struct TransferLane {
    jobs: mpsc::UnboundedSender<SendJob>,
    task: JoinHandle<()>,
}

impl TransferLane {
    pub fn spawn(
        peer: DeviceCode,
        sink: Arc<dyn ChannelSink>,
        config: TransferConfig,
        events: AppEventSender,
    ) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        let lane = LaneTask {
            peer,
            sink,
            config,
            events,
        };
        let task = tokio::spawn(lane.run(queue));
        Self { jobs, task }
    }

    /// Queue a batch; if the lane is gone the reply is dropped
    pub fn submit(&self, job: SendJob) {
        if self.jobs.send(job).is_err() {
            debug!("transfer lane already stopped");
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for TransferLane {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ----------------------------------------------------------------------------
// Lane Task
// ----------------------------------------------------------------------------

struct LaneTask {
    peer: DeviceCode,
    sink: Arc<dyn ChannelSink>,
    config: TransferConfig,
    events: AppEventSender,
}

/// Why a single file stopped early
enum FileFailure {
    /// Local read error; the batch continues with the next file
    Read(TransferError),
    /// Channel gone; the whole batch fails
    Channel(TransferError),
}

impl LaneTask {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<SendJob>) {
        while let Some(job) = queue.recv().await {
            let result = self.send_batch(job.files).await;
            if let Err(e) = &result {
                error!("Send to {} failed: {}", self.peer, e);
            }
            let _ = job.reply.send(result);
        }
    }

    async fn send_batch(&self, files: Vec<OutgoingFile>) -> Result<SendSummary, TransferError> {
        let mut summary = SendSummary::default();
        for (index, file) in files.into_iter().enumerate() {
            let file_id = FileId::generate(Timestamp::now(), index);
            match self.send_file(file_id.clone(), &file).await {
                Ok(()) => summary.sent.push(file_id),
                Err(FileFailure::Read(e)) => {
                    warn!("Skipping {}: {}", file.name, e);
                    self.emit(AppEvent::error(e.to_string()));
                    summary.failed.push(FailedFile {
                        name: file.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(FileFailure::Channel(e)) => return Err(e),
            }
        }
        Ok(summary)
    }

    async fn send_file(&self, file_id: FileId, file: &OutgoingFile) -> Result<(), FileFailure> {
        let mut source = SourceReader::open(file).await.map_err(FileFailure::Read)?;
        let metadata = FileMetadata::new(
            file_id,
            file.name.clone(),
            source.size(),
            file.mime_type.clone(),
            self.config.chunk_size,
        );

        info!(
            "Sending {} to {} ({} bytes, {} chunks)",
            metadata.name, self.peer, metadata.size, metadata.chunk_count
        );
        self.send_control(&ControlMessage::file_start(&metadata))?;
        self.emit(AppEvent::TransferStarted {
            peer: self.peer.clone(),
            file_id: metadata.file_id.clone(),
            name: metadata.name.clone(),
            size: metadata.size,
            direction: Direction::Outbound,
        });

        let mut progress = OutboundProgress::new(metadata);
        while let Some(range) = progress.next_range(self.config.chunk_size) {
            let chunk = match source.read_range(range).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    let file_id = progress.metadata().file_id.clone();
                    self.send_control(&ControlMessage::FileCancel { file_id })?;
                    return Err(FileFailure::Read(e));
                }
            };

            self.sink
                .send(WireFrame::Binary(chunk))
                .map_err(|_| self.closed())?;
            let update = progress.record_chunk();
            self.emit_progress(update);

            self.wait_for_drain().await;
        }
        if let Some(update) = progress.metadata().empty_file_progress() {
            self.emit_progress(update);
        }

        let file_id = progress.metadata().file_id.clone();
        self.send_control(&ControlMessage::FileEnd { file_id })?;
        debug!("Finished sending {}", progress.metadata().name);
        Ok(())
    }

    fn emit_progress(&self, update: ChunkProgress) {
        self.emit(AppEvent::Progress {
            peer: self.peer.clone(),
            file_id: update.file_id,
            name: update.name,
            done: update.done,
            total: update.total,
            percent: update.percent,
            direction: Direction::Outbound,
        });
    }

    /// Pause while the channel's backlog is above the high-water mark
    async fn wait_for_drain(&self) {
        let mark = self.config.high_water_mark;
        if self.sink.queued_bytes() <= mark {
            return;
        }
        debug!(
            "Backpressure on {}: {} bytes queued",
            self.peer,
            self.sink.queued_bytes()
        );
        while self.sink.queued_bytes() > mark {
            tokio::select! {
                _ = self.sink.queue_changed() => {}
                _ = tokio::time::sleep(self.config.drain_poll_interval) => {}
            }
        }
        debug!("Backpressure on {} cleared", self.peer);
    }

    fn send_control(&self, message: &ControlMessage) -> Result<(), FileFailure> {
        let frame = WireFrame::control(message).map_err(|e| {
            FileFailure::Read(TransferError::FileRead {
                name: message.kind().to_string(),
                reason: e.to_string(),
            })
        })?;
        self.sink.send(frame).map_err(|_| self.closed())
    }

    fn closed(&self) -> FileFailure {
        FileFailure::Channel(TransferError::ConnectionClosed {
            code: self.peer.clone(),
        })
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }
}

// ----------------------------------------------------------------------------
// Source Reading
// ----------------------------------------------------------------------------

/// Reads byte ranges from an outgoing file's source
enum SourceReader {
    Disk { name: String, file: File, size: u64 },
    Memory(Arc<[u8]>),
}

impl SourceReader {
    async fn open(file: &OutgoingFile) -> Result<Self, TransferError> {
        match &file.source {
            FileSource::Bytes(bytes) => Ok(SourceReader::Memory(bytes.clone())),
            FileSource::Path(path) => {
                let read_error = |e: std::io::Error| TransferError::FileRead {
                    name: file.name.clone(),
                    reason: e.to_string(),
                };
                let handle = File::open(path).await.map_err(read_error)?;
                let size = handle.metadata().await.map_err(read_error)?.len();
                Ok(SourceReader::Disk {
                    name: file.name.clone(),
                    file: handle,
                    size,
                })
            }
        }
    }

    fn size(&self) -> u64 {
        match self {
            SourceReader::Disk { size, .. } => *size,
            SourceReader::Memory(bytes) => bytes.len() as u64,
        }
    }

    async fn read_range(&mut self, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
        match self {
            SourceReader::Memory(bytes) => Ok(bytes[range.start as usize..range.end as usize].to_vec()),
            SourceReader::Disk { name, file, .. } => {
                let read_error = |e: std::io::Error| TransferError::FileRead {
                    name: name.clone(),
                    reason: e.to_string(),
                };
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                file.seek(SeekFrom::Start(range.start))
                    .await
                    .map_err(read_error)?;
                file.read_exact(&mut buf).await.map_err(read_error)?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_core::GalaxyConfig;
    use galaxy_core::channel::utils::create_app_event_channel;

    #[tokio::test]
    async fn test_memory_source_reads_ranges() {
        let file = OutgoingFile::from_bytes("a.bin", "application/octet-stream", vec![1, 2, 3, 4, 5]);
        let mut source = SourceReader::open(&file).await.unwrap();
        assert_eq!(source.size(), 5);
        assert_eq!(source.read_range(1..4).await.unwrap(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_disk_source_reads_ranges() {
        let path = std::env::temp_dir().join(format!("galaxy-source-{}.bin", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, (0u8..=255).collect::<Vec<_>>())
            .await
            .unwrap();

        let file = OutgoingFile::from_path(&path, "application/octet-stream");
        let mut source = SourceReader::open(&file).await.unwrap();
        assert_eq!(source.size(), 256);
        assert_eq!(source.read_range(250..256).await.unwrap(), vec![250, 251, 252, 253, 254, 255]);

        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn test_missing_file_is_a_read_error() {
        let file = OutgoingFile::from_path("/definitely/not/here.mp4", "video/mp4");
        let err = SourceReader::open(&file).await.err().unwrap();
        assert!(matches!(err, TransferError::FileRead { .. }));
    }

    #[tokio::test]
    async fn test_lane_streams_file_over_link() {
        let a = DeviceCode::new_unchecked("GT-AAAAAA");
        let b = DeviceCode::new_unchecked("GT-BBBBBB");
        let (ours, mut theirs) = galaxy_harness::memory_link(&a, &b).into_channels();
        let config = GalaxyConfig::testing();
        let (events, _rx) = create_app_event_channel(&config.channels);

        let lane = TransferLane::spawn(b.clone(), ours.sink, config.transfer, events);
        let (reply, done) = oneshot::channel();
        lane.submit(SendJob {
            files: vec![OutgoingFile::from_bytes("clip.mp4", "video/mp4", vec![7u8; 150_000])],
            reply,
        });

        let summary = done.await.unwrap().unwrap();
        assert_eq!(summary.sent.len(), 1);

        let mut kinds = Vec::new();
        let mut chunk_sizes = Vec::new();
        while kinds.last() != Some(&"file-end") {
            match theirs.events.recv().await {
                Some(galaxy_core::ChannelEvent::Message(WireFrame::Text(text))) => {
                    kinds.push(ControlMessage::decode(&text).unwrap().kind())
                }
                Some(galaxy_core::ChannelEvent::Message(WireFrame::Binary(bytes))) => {
                    chunk_sizes.push(bytes.len())
                }
                other => panic!("unexpected channel event {other:?}"),
            }
        }
        assert_eq!(kinds, ["file-start", "file-end"]);
        assert_eq!(chunk_sizes, [65_536, 65_536, 18_928]);
    }
}
