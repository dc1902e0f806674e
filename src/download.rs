use crate::catalog::{Job, LinkKind, Track, TrackStream};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use futures::StreamExt;
use indicatif::ProgressBar;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::warn;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f]"#).expect("valid regex"))
}

fn repeated_spaces() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("valid regex"))
}

/// Makes `name` safe to use as a single path component.
pub fn sanitize(name: &str) -> String {
    let cleaned = unsafe_chars().replace_all(name, "_");
    let cleaned = repeated_spaces().replace_all(&cleaned, " ");
    let cleaned = cleaned.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Expands the track file template, without extension.
pub fn track_file_stem(template: &str, track: &Track) -> String {
    let expanded = template
        .replace("{number}", &format!("{:02}", track.number))
        .replace("{artists}", &track.artist_names())
        .replace("{name}", &track.name)
        .replace("{mix_name}", &track.mix_name)
        .replace("{id}", &track.id.to_string());
    // An empty mix name leaves "()" behind in the default template.
    sanitize(&expanded.replace(" ()", ""))
}

/// Where `track` from `job` ends up on disk.
pub fn destination(config: &AppConfig, job: &Job, track: &Track) -> PathBuf {
    let mut path = config.downloads_directory.clone();
    if config.sort_by_context && job.kind != LinkKind::Track {
        path.push(sanitize(&job.title));
    }
    path.push(format!(
        "{}.{}",
        track_file_stem(&config.track_file_template, track),
        config.quality.extension()
    ));
    path
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Writes `stream` to `dest`, going through `<dest>.part`.
///
/// Bytes land in stream order. On any error the partial file is removed and
/// `dest` is left untouched. Returns the number of bytes written.
pub async fn transfer(stream: TrackStream, dest: &Path, bar: &ProgressBar) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await?;
    }
    let part = part_path(dest);
    match write_part(stream, &part, bar).await {
        Ok(written) => {
            fs::rename(&part, dest).await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&part).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("⚠️  Could not remove {}: {}", part.display(), cleanup);
                }
            }
            Err(e)
        }
    }
}

async fn write_part(mut stream: TrackStream, part: &Path, bar: &ProgressBar) -> Result<u64> {
    let mut file = File::create(part).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        bar.inc(chunk.len() as u64);
    }
    file.flush().await?;

    if let Some(expected) = stream.content_length {
        if expected != written {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes, got {}", expected, written),
            )));
        }
    }
    Ok(written)
}

/// Running totals across all batches.
#[derive(Debug, Default)]
pub struct TransferStats {
    downloaded: AtomicUsize,
    skipped_existing: AtomicUsize,
    skipped_in_flight: AtomicUsize,
}

impl TransferStats {
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    pub fn skipped_existing(&self) -> usize {
        self.skipped_existing.load(Ordering::SeqCst)
    }

    /// Tracks skipped because another task was already writing the file.
    pub fn skipped_in_flight(&self) -> usize {
        self.skipped_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn record_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_existing(&self) {
        self.skipped_existing.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_in_flight(&self) {
        self.skipped_in_flight.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Artist, Store};
    use bytes::Bytes;

    fn track(number: u32, mix: &str) -> Track {
        Track {
            id: 77,
            name: "Opus".into(),
            mix_name: mix.into(),
            artists: vec![Artist {
                name: "Eric Prydz".into(),
            }],
            number,
        }
    }

    fn stream(chunks: Vec<Result<Bytes>>, content_length: Option<u64>) -> TrackStream {
        TrackStream {
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        }
    }

    #[test]
    fn sanitize_strips_path_separators_and_control_chars() {
        assert_eq!(sanitize("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize("  spaced   out.  "), "spaced out");
        assert_eq!(sanitize("..."), "untitled");
        assert_eq!(sanitize("tab\there"), "tab_here");
    }

    #[test]
    fn default_template_expansion() {
        let stem = track_file_stem("{number}. {artists} - {name} ({mix_name})", &track(3, "Original Mix"));
        assert_eq!(stem, "03. Eric Prydz - Opus (Original Mix)");

        let no_mix = track_file_stem("{number}. {artists} - {name} ({mix_name})", &track(3, ""));
        assert_eq!(no_mix, "03. Eric Prydz - Opus");

        assert_eq!(track_file_stem("{id}", &track(1, "")), "77");
    }

    #[test]
    fn destination_uses_job_folder_for_collections() {
        let config = AppConfig::parse("username: u\npassword: p\ndownloads_directory: /music\n").unwrap();
        let release = Job {
            store: Store::Beatport,
            kind: LinkKind::Release,
            title: "Opus / Remixes".into(),
            tracks: vec![],
        };
        let single = Job {
            kind: LinkKind::Track,
            ..release.clone()
        };

        assert_eq!(
            destination(&config, &release, &track(1, "Original Mix")),
            PathBuf::from("/music/Opus _ Remixes/01. Eric Prydz - Opus (Original Mix).flac")
        );
        assert_eq!(
            destination(&config, &single, &track(1, "Original Mix")),
            PathBuf::from("/music/01. Eric Prydz - Opus (Original Mix).flac")
        );
    }

    #[tokio::test]
    async fn transfer_writes_chunks_in_order_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("song.flac");
        let bar = ProgressBar::hidden();
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];

        let written = transfer(stream(chunks, Some(6)), &dest, &bar).await.unwrap();

        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert!(!part_path(&dest).exists());
        assert_eq!(bar.position(), 6);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("song.flac");
        let chunks = vec![Ok(Bytes::from_static(b"abc")), Err(Error::Cancelled)];

        let result = transfer(stream(chunks, None), &dest, &ProgressBar::hidden()).await;

        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn short_body_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("short.flac");
        let chunks = vec![Ok(Bytes::from_static(b"abc"))];

        let result = transfer(stream(chunks, Some(10)), &dest, &ProgressBar::hidden()).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!dest.exists());
    }
}
