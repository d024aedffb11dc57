//! Clipboard access: provider abstraction plus the snapshot/restore guard.
//!
//! `ClipboardProvider` is the platform adapter (X11 via `xclip` in
//! [`xclip`]). `ClipboardGuard` is what the pipeline talks to: it takes
//! the pre-run snapshot, performs capture reads and result writes, and
//! restores the snapshot on failure.
//!
//! The clipboard is shared with every other application on the desktop.
//! The guard never assumes it is the only writer; it only keeps this
//! pipeline's reads and writes consistent at the moments it makes them.

pub mod xclip;

use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Clipboard access errors.
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    /// The clipboard tool could not be started (not installed, no display).
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    /// The clipboard tool ran but the read/write failed.
    #[error("clipboard access denied: {0}")]
    Denied(String),
}

/// Content held by the clipboard at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    /// No owner, or no target this adapter can read.
    Empty,
    Text(String),
    /// Non-text content, kept verbatim with its MIME/X11 target name.
    Binary { format: String, bytes: Vec<u8> },
}

impl ClipboardContent {
    /// Format tag: `text/plain;charset=utf-8`, the binary target, or `empty`.
    pub fn format(&self) -> &str {
        match self {
            ClipboardContent::Empty => "empty",
            ClipboardContent::Text(_) => "text/plain;charset=utf-8",
            ClipboardContent::Binary { format, .. } => format,
        }
    }

    /// Text content, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClipboardContent::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Size in bytes, for logging.
    pub fn byte_len(&self) -> usize {
        match self {
            ClipboardContent::Empty => 0,
            ClipboardContent::Text(t) => t.len(),
            ClipboardContent::Binary { bytes, .. } => bytes.len(),
        }
    }
}

/// Reads and writes the system clipboard.
///
/// `Send + Sync` because the pipeline runs on tokio worker tasks.
#[async_trait::async_trait]
pub trait ClipboardProvider: Send + Sync {
    /// Read the current clipboard content.
    async fn read(&self) -> Result<ClipboardContent, ClipboardError>;

    /// Replace the clipboard content.
    async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Clipboard state saved before a run, restored if the run fails.
#[derive(Debug, Clone)]
pub struct ClipboardSnapshot {
    content: ClipboardContent,
    captured_at: SystemTime,
    taken: Instant,
}

impl ClipboardSnapshot {
    pub fn content(&self) -> &ClipboardContent {
        &self.content
    }

    pub fn format(&self) -> &str {
        self.content.format()
    }

    /// Wall-clock time the snapshot was taken.
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Time since the snapshot was taken.
    pub fn age(&self) -> std::time::Duration {
        self.taken.elapsed()
    }
}

/// Race-aware clipboard access for one pipeline at a time.
#[derive(Clone)]
pub struct ClipboardGuard {
    provider: Arc<dyn ClipboardProvider>,
}

impl ClipboardGuard {
    pub fn new(provider: Arc<dyn ClipboardProvider>) -> Self {
        Self { provider }
    }

    /// Save the current clipboard without modifying it.
    pub async fn snapshot(&self) -> Result<ClipboardSnapshot, ClipboardError> {
        let content = self.provider.read().await?;
        tracing::debug!(
            provider = self.provider.name(),
            format = content.format(),
            bytes = content.byte_len(),
            "clipboard snapshot taken"
        );
        Ok(ClipboardSnapshot {
            content,
            captured_at: SystemTime::now(),
            taken: Instant::now(),
        })
    }

    /// Read the clipboard as it is right now.
    pub async fn read(&self) -> Result<ClipboardContent, ClipboardError> {
        self.provider.read().await
    }

    /// Set the clipboard to `text`.
    pub async fn write(&self, text: &str) -> Result<(), ClipboardError> {
        self.provider
            .write(&ClipboardContent::Text(text.to_string()))
            .await?;
        tracing::debug!(chars = text.chars().count(), "clipboard written");
        Ok(())
    }

    /// Empty the clipboard (writes empty text).
    pub async fn clear(&self) -> Result<(), ClipboardError> {
        self.provider
            .write(&ClipboardContent::Text(String::new()))
            .await
    }

    /// Put the snapshot back, consuming it.
    ///
    /// An `Empty` snapshot is restored as empty text.
    pub async fn restore(&self, snapshot: ClipboardSnapshot) -> Result<(), ClipboardError> {
        let held = snapshot.age();
        let content = match snapshot.content {
            ClipboardContent::Empty => ClipboardContent::Text(String::new()),
            other => other,
        };
        self.provider.write(&content).await?;
        tracing::debug!(
            format = content.format(),
            held_for_ms = held.as_millis() as u64,
            "clipboard restored"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory clipboard for pipeline tests.

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct FakeClipboard {
        content: Mutex<Option<ClipboardContent>>,
        pub writes: AtomicUsize,
        pub reads: AtomicUsize,
        pub deny_reads: AtomicBool,
        pub deny_writes: AtomicBool,
    }

    impl FakeClipboard {
        pub fn with_text(text: &str) -> Self {
            let clip = Self::default();
            clip.set(ClipboardContent::Text(text.to_string()));
            clip
        }

        pub fn set(&self, content: ClipboardContent) {
            *self.content.lock().unwrap() = Some(content);
        }

        pub fn get(&self) -> ClipboardContent {
            self.content
                .lock()
                .unwrap()
                .clone()
                .unwrap_or(ClipboardContent::Empty)
        }

        pub fn text(&self) -> String {
            self.get().as_text().unwrap_or_default().to_string()
        }
    }

    #[async_trait::async_trait]
    impl ClipboardProvider for FakeClipboard {
        async fn read(&self) -> Result<ClipboardContent, ClipboardError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.deny_reads.load(Ordering::SeqCst) {
                return Err(ClipboardError::Denied("read denied".into()));
            }
            Ok(self.get())
        }

        async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
            if self.deny_writes.load(Ordering::SeqCst) {
                return Err(ClipboardError::Denied("write denied".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.set(content.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeClipboard;
    use super::*;

    #[tokio::test]
    async fn snapshot_does_not_modify() {
        let fake = Arc::new(FakeClipboard::with_text("hello"));
        let guard = ClipboardGuard::new(fake.clone());

        let snap = guard.snapshot().await.unwrap();
        assert_eq!(snap.content(), &ClipboardContent::Text("hello".into()));
        assert_eq!(snap.format(), "text/plain;charset=utf-8");
        assert_eq!(fake.writes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restore_puts_snapshot_back() {
        let fake = Arc::new(FakeClipboard::with_text("original"));
        let guard = ClipboardGuard::new(fake.clone());

        let snap = guard.snapshot().await.unwrap();
        guard.write("scratch").await.unwrap();
        assert_eq!(fake.text(), "scratch");

        guard.restore(snap).await.unwrap();
        assert_eq!(fake.text(), "original");
    }

    #[tokio::test]
    async fn restore_binary_keeps_format() {
        let png = ClipboardContent::Binary {
            format: "image/png".into(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        };
        let fake = Arc::new(FakeClipboard::default());
        fake.set(png.clone());
        let guard = ClipboardGuard::new(fake.clone());

        let snap = guard.snapshot().await.unwrap();
        assert_eq!(snap.format(), "image/png");
        guard.write("text").await.unwrap();
        guard.restore(snap).await.unwrap();
        assert_eq!(fake.get(), png);
    }

    #[tokio::test]
    async fn restore_empty_writes_empty_text() {
        let fake = Arc::new(FakeClipboard::default());
        let guard = ClipboardGuard::new(fake.clone());

        let snap = guard.snapshot().await.unwrap();
        assert_eq!(snap.format(), "empty");
        guard.write("x").await.unwrap();
        guard.restore(snap).await.unwrap();
        assert_eq!(fake.get(), ClipboardContent::Text(String::new()));
    }

    #[tokio::test]
    async fn snapshot_propagates_denial() {
        let fake = Arc::new(FakeClipboard::with_text("x"));
        fake.deny_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let guard = ClipboardGuard::new(fake);
        assert!(matches!(
            guard.snapshot().await,
            Err(ClipboardError::Denied(_))
        ));
    }
}
