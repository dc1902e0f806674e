use crate::error::Result;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info};

/// Reads a listing file: one URL per line, blanks and `#` comments ignored.
pub fn read_listing(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_listing(&content))
}

pub fn parse_listing(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Turns command line or prompt entries into URLs.
///
/// Entries ending in `.txt` are read as listing files; everything else is
/// taken as a URL. An unreadable listing is logged and skipped.
pub fn expand_inputs<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    let mut urls = Vec::new();
    for entry in entries {
        let entry = entry.as_ref().trim();
        if entry.is_empty() {
            continue;
        }
        if entry.ends_with(".txt") {
            match read_listing(Path::new(entry)) {
                Ok(listed) => {
                    info!("📄 Read {} URL(s) from {}", listed.len(), entry);
                    urls.extend(listed);
                }
                Err(e) => error!("❌ Could not read {}: {}", entry, e),
            }
        } else {
            urls.push(entry.to_string());
        }
    }
    urls
}

/// Asks for the next batch on stdout and reads one line from `input`.
///
/// Returns `None` at end of input.
pub async fn prompt<R>(input: &mut R) -> Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        write!(stdout, "\nEnter URL(s) or a .txt listing: ")?;
        stdout.flush()?;
    }

    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let entries: Vec<&str> = line.split_whitespace().collect();
    Ok(Some(expand_inputs(&entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_skips_blanks_and_comments() {
        let urls = parse_listing(
            "https://www.beatport.com/track/a/1\r\n\n  # queued for friday\n  https://www.beatport.com/release/b/2  \n",
        );
        assert_eq!(
            urls,
            vec![
                "https://www.beatport.com/track/a/1",
                "https://www.beatport.com/release/b/2"
            ]
        );
    }

    #[test]
    fn expands_listing_files_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let listing = dir.path().join("queue.txt");
        std::fs::write(&listing, "https://www.beatport.com/track/b/2\n").unwrap();

        let entries = vec![
            "https://www.beatport.com/track/a/1".to_string(),
            listing.display().to_string(),
            dir.path().join("missing.txt").display().to_string(),
        ];
        let urls = expand_inputs(&entries);

        assert_eq!(
            urls,
            vec![
                "https://www.beatport.com/track/a/1",
                "https://www.beatport.com/track/b/2"
            ]
        );
    }

    #[tokio::test]
    async fn prompt_splits_on_whitespace_and_reports_eof() {
        let mut input: &[u8] = b"https://www.beatport.com/track/a/1  https://www.beatport.com/track/b/2\n";

        let first = prompt(&mut input).await.unwrap();
        assert_eq!(first.map(|urls| urls.len()), Some(2));

        let second = prompt(&mut input).await.unwrap();
        assert!(second.is_none());
    }
}
