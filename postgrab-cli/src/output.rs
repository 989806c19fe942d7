use crate::{cli::OutputFormat, error::Result};
#[cfg(feature = "colored-output")]
use colored::*;
use postgrab::{MediaAsset, Post};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Media item as it appears in structured output.
#[derive(Debug, Serialize)]
struct MediaSummary<'a> {
    kind: &'a str,
    bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<&'a Path>,
}

#[derive(Debug, Serialize)]
struct PostReport<'a> {
    url: &'a str,
    #[serde(flatten)]
    post: &'a Post,
    media: Vec<MediaSummary<'a>>,
}

pub struct OutputManager {
    colored: bool,
}

impl OutputManager {
    pub fn new(colored: bool) -> Self {
        Self { colored }
    }

    pub fn format_post(
        &self,
        url: &str,
        post: &Post,
        saved: &[PathBuf],
        format: OutputFormat,
    ) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(self.format_pretty(url, post, saved)),
            OutputFormat::Json => self.format_json(url, post, saved, true),
            OutputFormat::JsonCompact => self.format_json(url, post, saved, false),
        }
    }

    pub fn format_failure(&self, url: &str, error: &str, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Pretty => Ok(format!(
                "{} {}\n  {}\n",
                self.colorize("Failed:", &Color::Red, true),
                url,
                error
            )),
            OutputFormat::Json | OutputFormat::JsonCompact => {
                let value = serde_json::json!({
                    "url": url,
                    "status": "error",
                    "message": error,
                });
                Ok(serde_json::to_string(&value)?)
            }
        }
    }

    fn format_pretty(&self, url: &str, post: &Post, saved: &[PathBuf]) -> String {
        let mut output = String::new();
        let title = post.title.as_deref().unwrap_or("(untitled)");
        output.push_str(&self.colorize(title, &Color::Green, true));
        output.push('\n');

        self.push_field(&mut output, "URL", url);
        if let Some(subreddit) = &post.subreddit {
            self.push_field(&mut output, "Subreddit", subreddit);
        }
        if let Some(author) = &post.author {
            self.push_field(&mut output, "Author", author);
        }
        if let Some(posted_at) = &post.posted_at {
            self.push_field(&mut output, "Posted", &posted_at.to_rfc3339());
        }
        self.push_field(
            &mut output,
            "Votes",
            &format!("+{} / -{}", post.up_votes, post.down_votes),
        );
        self.push_field(&mut output, "Comments", &post.comments.to_string());
        if post.is_over_18 {
            self.push_field(&mut output, "NSFW", "yes");
        }
        if let Some(external) = &post.external_url {
            self.push_field(&mut output, "Link", external);
        }

        if !post.media.is_empty() {
            output.push_str(&format!(
                "  {}:\n",
                self.colorize("Media", &Color::Yellow, false)
            ));
            for (i, asset) in post.media.iter().enumerate() {
                let location = saved
                    .get(i)
                    .map(|p| format!(" -> {}", p.display()))
                    .unwrap_or_default();
                output.push_str(&format!(
                    "    {} {} ({}){}\n",
                    self.colorize(&format!("[{}]", i + 1), &Color::Cyan, false),
                    asset.kind,
                    human_bytes(asset.len()),
                    location
                ));
            }
        }

        if let Some(description) = &post.description {
            output.push('\n');
            output.push_str(description);
            output.push('\n');
        }
        output
    }

    fn format_json(&self, url: &str, post: &Post, saved: &[PathBuf], pretty: bool) -> Result<String> {
        let report = PostReport {
            url,
            post,
            media: post
                .media
                .iter()
                .enumerate()
                .map(|(i, asset)| MediaSummary {
                    kind: asset.kind.as_str(),
                    bytes: asset.len(),
                    saved_to: saved.get(i).map(PathBuf::as_path),
                })
                .collect(),
        };
        if pretty {
            Ok(serde_json::to_string_pretty(&report)?)
        } else {
            Ok(serde_json::to_string(&report)?)
        }
    }

    fn push_field(&self, output: &mut String, label: &str, value: &str) {
        output.push_str(&format!(
            "  {}: {}\n",
            self.colorize(label, &Color::Yellow, false),
            value
        ));
    }

    fn colorize(&self, text: &str, color: &Color, bold: bool) -> String {
        #[cfg(feature = "colored-output")]
        {
            if self.colored {
                let colored_text = match color {
                    Color::Green => text.green(),
                    Color::Yellow => text.yellow(),
                    Color::Cyan => text.cyan(),
                    Color::Red => text.red(),
                };
                if bold {
                    colored_text.bold().to_string()
                } else {
                    colored_text.to_string()
                }
            } else {
                text.to_string()
            }
        }

        #[cfg(not(feature = "colored-output"))]
        {
            let _ = (color, bold, self.colored);
            text.to_string()
        }
    }
}

enum Color {
    Green,
    Yellow,
    Cyan,
    Red,
}

fn human_bytes(len: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = len as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{len} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Write every media item of post number `index` as `<dir>/<index>_<n>.<ext>`.
pub async fn save_media(dir: &Path, index: usize, media: &[MediaAsset]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;
    let mut saved = Vec::with_capacity(media.len());
    for (n, asset) in media.iter().enumerate() {
        let path = dir.join(format!("{index}_{}.{}", n + 1, asset.kind.extension()));
        tokio::fs::write(&path, &asset.bytes).await?;
        saved.push(path);
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use postgrab::MediaKind;
    use tempfile::TempDir;

    fn sample_post() -> Post {
        Post {
            author: Some("ferris".into()),
            subreddit: Some("r/rust".into()),
            title: Some("crab pictures".into()),
            description: None,
            media: vec![
                MediaAsset::new(MediaKind::Image, &b"jpeg"[..]),
                MediaAsset::new(MediaKind::Video, vec![0u8; 2048]),
            ],
            external_url: None,
            up_votes: 12,
            down_votes: 1,
            comments: 4,
            is_over_18: false,
            posted_at: None,
        }
    }

    #[test]
    fn json_summarizes_media() {
        let out = OutputManager::new(false)
            .format_post("https://r/x", &sample_post(), &[], OutputFormat::JsonCompact)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["title"], "crab pictures");
        assert_eq!(value["url"], "https://r/x");
        assert_eq!(value["media"][0]["kind"], "image");
        assert_eq!(value["media"][1]["bytes"], 2048);
        assert!(value["media"][0].get("saved_to").is_none());
    }

    #[test]
    fn pretty_lists_media() {
        let out = OutputManager::new(false)
            .format_post("https://r/x", &sample_post(), &[], OutputFormat::Pretty)
            .unwrap();
        assert!(out.starts_with("crab pictures\n"));
        assert!(out.contains("Votes: +12 / -1"));
        assert!(out.contains("[2] video (2.0 KiB)"));
    }

    #[tokio::test]
    async fn saves_media_with_indexed_names() {
        let dir = TempDir::new().unwrap();
        let saved = save_media(dir.path(), 3, &sample_post().media).await.unwrap();
        assert_eq!(saved[0], dir.path().join("3_1.jpg"));
        assert_eq!(saved[1], dir.path().join("3_2.mp4"));
        assert_eq!(std::fs::read(&saved[0]).unwrap(), b"jpeg");
    }
}
