//! DASH manifest (`DASHPlaylist.mpd`) parsing and stream selection.

use serde::Deserialize;

use crate::error::{Result, ScrapeError};

/// File name of the manifest below a post's media base URL.
pub const MANIFEST_FILE: &str = "DASHPlaylist.mpd";

pub const VIDEO_CONTENT_TYPE: &str = "video";
pub const AUDIO_CONTENT_TYPE: &str = "audio";
pub const VIDEO_MIME_TYPE: &str = "video/mp4";
pub const AUDIO_MIME_TYPE: &str = "audio/mp4";

/// Root `<MPD>` element, reduced to what stream selection needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Period {
    #[serde(rename = "AdaptationSet", default)]
    pub adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AdaptationSet {
    #[serde(rename = "@contentType", default)]
    pub content_type: Option<String>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Representation {
    #[serde(rename = "@mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<String>,
}

/// Stream locations relative to the post's media base URL.
/// An unresolved location is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAssets {
    pub video: String,
    pub audio: String,
}

impl StreamAssets {
    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio.is_empty()
    }
}

/// Parse manifest XML, rejecting documents without a period or adaptation sets.
pub fn parse_manifest(xml: &str) -> Result<Manifest> {
    let manifest: Manifest = quick_xml::de::from_str(xml)
        .map_err(|e| ScrapeError::manifest_malformed(format!("invalid MPD document: {e}")))?;
    validate(&manifest)?;
    Ok(manifest)
}

fn validate(manifest: &Manifest) -> Result<()> {
    let period = manifest
        .periods
        .first()
        .ok_or_else(|| ScrapeError::manifest_malformed("MPD has no Period"))?;
    if period.adaptation_sets.is_empty() {
        return Err(ScrapeError::manifest_malformed(
            "first Period has no AdaptationSet",
        ));
    }
    Ok(())
}

/// Pick the video and audio locations from the first period.
///
/// Within each content type the last representation (in document order) with the
/// expected MIME type and a base URL wins; no bandwidth comparison is made.
pub fn resolve(manifest: &Manifest) -> Result<StreamAssets> {
    validate(manifest)?;

    let mut assets = StreamAssets::default();
    for set in &manifest.periods[0].adaptation_sets {
        let (slot, mime) = match set.content_type.as_deref() {
            Some(VIDEO_CONTENT_TYPE) => (&mut assets.video, VIDEO_MIME_TYPE),
            Some(AUDIO_CONTENT_TYPE) => (&mut assets.audio, AUDIO_MIME_TYPE),
            _ => continue,
        };
        for representation in &set.representations {
            if representation.mime_type.as_deref() != Some(mime) {
                continue;
            }
            if let Some(base) = representation.base_urls.first() {
                *slot = base.trim().to_string();
            }
        }
    }
    Ok(assets)
}

/// Resolve a manifest-relative location against the media base URL.
pub fn join_location(base_url: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        location.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" mediaPresentationDuration="PT12.5S" type="static">
  <Period duration="PT12.5S">
    <AdaptationSet contentType="video" segmentAlignment="true">
      <Representation id="1" mimeType="video/mp4" bandwidth="400000" width="480" height="270">
        <BaseURL>v.mp4</BaseURL>
        <SegmentBase indexRange="812-887"><Initialization range="0-811"/></SegmentBase>
      </Representation>
    </AdaptationSet>
    <AdaptationSet contentType="audio">
      <Representation id="5" mimeType="audio/mp4" bandwidth="64000">
        <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>
        <BaseURL>a.mp4</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn resolves_video_and_audio() {
        let manifest = parse_manifest(BASIC).unwrap();
        let assets = resolve(&manifest).unwrap();
        assert_eq!(
            assets,
            StreamAssets {
                video: "v.mp4".into(),
                audio: "a.mp4".into(),
            }
        );
        assert!(assets.has_audio());
    }

    #[test]
    fn resolution_is_idempotent() {
        let manifest = parse_manifest(BASIC).unwrap();
        assert_eq!(resolve(&manifest).unwrap(), resolve(&manifest).unwrap());
    }

    #[test]
    fn last_matching_representation_wins() {
        let xml = r#"<MPD><Period>
            <AdaptationSet contentType="video">
              <Representation mimeType="video/mp4" bandwidth="4800000"><BaseURL>DASH_1080.mp4</BaseURL></Representation>
              <Representation mimeType="video/mp4" bandwidth="1200000"><BaseURL>DASH_480.mp4</BaseURL></Representation>
              <Representation mimeType="video/webm"><BaseURL>DASH_480.webm</BaseURL></Representation>
            </AdaptationSet>
        </Period></MPD>"#;
        let assets = resolve(&parse_manifest(xml).unwrap()).unwrap();
        assert_eq!(assets.video, "DASH_480.mp4");
        assert_eq!(assets.audio, "");
        assert!(!assets.has_audio());
    }

    #[test]
    fn ignores_representations_without_base_url_and_unknown_sets() {
        let xml = r#"<MPD><Period>
            <AdaptationSet contentType="video">
              <Representation mimeType="video/mp4"><BaseURL>DASH_720.mp4</BaseURL></Representation>
              <Representation mimeType="video/mp4"/>
            </AdaptationSet>
            <AdaptationSet contentType="text">
              <Representation mimeType="video/mp4"><BaseURL>captions.mp4</BaseURL></Representation>
            </AdaptationSet>
        </Period></MPD>"#;
        let assets = resolve(&parse_manifest(xml).unwrap()).unwrap();
        assert_eq!(assets.video, "DASH_720.mp4");
    }

    #[test]
    fn only_first_period_is_considered() {
        let manifest = Manifest {
            periods: vec![
                Period {
                    adaptation_sets: vec![AdaptationSet {
                        content_type: Some("video".into()),
                        representations: vec![Representation {
                            mime_type: Some("video/mp4".into()),
                            base_urls: vec!["first.mp4".into()],
                        }],
                    }],
                },
                Period {
                    adaptation_sets: vec![AdaptationSet {
                        content_type: Some("audio".into()),
                        representations: vec![Representation {
                            mime_type: Some("audio/mp4".into()),
                            base_urls: vec!["second.mp4".into()],
                        }],
                    }],
                },
            ],
        };
        let assets = resolve(&manifest).unwrap();
        assert_eq!(assets.video, "first.mp4");
        assert_eq!(assets.audio, "");
    }

    #[test]
    fn missing_structure_is_malformed() {
        let err = parse_manifest("<MPD></MPD>").unwrap_err();
        assert!(matches!(err, ScrapeError::ManifestMalformed { .. }));

        let err = parse_manifest("<MPD><Period></Period></MPD>").unwrap_err();
        assert!(matches!(err, ScrapeError::ManifestMalformed { .. }));

        let err = resolve(&Manifest::default()).unwrap_err();
        assert!(matches!(err, ScrapeError::ManifestMalformed { .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_manifest("<html><body>blocked</body").unwrap_err();
        assert!(matches!(err, ScrapeError::ManifestMalformed { .. }));
    }

    #[test]
    fn joins_relative_locations() {
        assert_eq!(
            join_location("https://v.redd.it/abc123/", "DASH_720.mp4"),
            "https://v.redd.it/abc123/DASH_720.mp4"
        );
        assert_eq!(
            join_location("https://v.redd.it/abc123", "https://cdn.example.com/a.mp4"),
            "https://cdn.example.com/a.mp4"
        );
    }
}
