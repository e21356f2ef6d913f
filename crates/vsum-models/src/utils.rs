//! Source reference helpers shared by the pipeline and the CLI.

use url::Url;

/// Errors that can occur during YouTube ID extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum YoutubeIdError {
    #[error("URL is not a valid YouTube URL")]
    InvalidYoutubeUrl,
    #[error("Video ID has invalid format")]
    InvalidVideoId,
    #[error("Video ID not found in URL")]
    VideoIdNotFound,
}

pub type YoutubeIdResult<T> = Result<T, YoutubeIdError>;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

/// Path prefixes that carry the video ID as the next segment.
const ID_PATH_PREFIXES: &[&str] = &["embed", "v", "shorts", "live"];

/// Whether `reference` looks like an http(s) URL rather than a local path.
pub fn is_remote_url(reference: &str) -> bool {
    match Url::parse(reference.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Whether `reference` is a URL on a YouTube domain.
pub fn is_youtube_url(reference: &str) -> bool {
    parse_youtube(reference.trim()).is_some()
}

fn parse_youtube(reference: &str) -> Option<Url> {
    let url = Url::parse(reference).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let host = host.strip_prefix("m.").unwrap_or(host);
    if YOUTUBE_HOSTS.contains(&host) {
        Some(url)
    } else {
        None
    }
}

/// Extract the 11-character video ID from any common YouTube URL form.
///
/// Handles `watch?v=`, `youtu.be/`, `/embed/`, `/v/`, `/shorts/` and `/live/`.
pub fn extract_youtube_id(reference: &str) -> YoutubeIdResult<String> {
    let url = parse_youtube(reference.trim()).ok_or(YoutubeIdError::InvalidYoutubeUrl)?;

    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        return validate_youtube_id(&v);
    }

    let mut segments = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();

    let is_short_host = url
        .host_str()
        .map(|h| h.eq_ignore_ascii_case("youtu.be"))
        .unwrap_or(false);

    if is_short_host {
        return match segments.first() {
            Some(id) => validate_youtube_id(id),
            None => Err(YoutubeIdError::VideoIdNotFound),
        };
    }

    if segments.len() >= 2 && ID_PATH_PREFIXES.contains(&segments[0]) {
        let id = segments.remove(1);
        return validate_youtube_id(id);
    }

    Err(YoutubeIdError::VideoIdNotFound)
}

fn validate_youtube_id(id: &str) -> YoutubeIdResult<String> {
    let id = id.trim();
    if id.len() != 11 {
        return Err(YoutubeIdError::InvalidVideoId);
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(YoutubeIdError::InvalidVideoId);
    }
    Ok(id.to_string())
}

/// Format seconds as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_youtube_id_forms() {
        for url in [
            "https://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLrAXtmRdnEQy4qtr",
            "https://m.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=30",
            "https://youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/v/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
            "  https://YOUTUBE.COM/watch?v=dQw4w9WgXcQ  ",
        ] {
            assert_eq!(extract_youtube_id(url).unwrap(), "dQw4w9WgXcQ", "{}", url);
        }
    }

    #[test]
    fn test_extract_youtube_id_errors() {
        assert_eq!(
            extract_youtube_id("https://vimeo.com/123"),
            Err(YoutubeIdError::InvalidYoutubeUrl)
        );
        assert_eq!(
            extract_youtube_id("/home/user/video.mp4"),
            Err(YoutubeIdError::InvalidYoutubeUrl)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com"),
            Err(YoutubeIdError::VideoIdNotFound)
        );
        assert_eq!(
            extract_youtube_id("https://youtu.be/"),
            Err(YoutubeIdError::VideoIdNotFound)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com/watch?v=abc123"),
            Err(YoutubeIdError::InvalidVideoId)
        );
        assert_eq!(
            extract_youtube_id("https://youtube.com/watch?v=abc123def!!"),
            Err(YoutubeIdError::InvalidVideoId)
        );
    }

    #[test]
    fn test_is_remote_url() {
        assert!(is_remote_url("https://example.com/video.mp4"));
        assert!(is_remote_url("http://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_remote_url("/tmp/video.mp4"));
        assert!(!is_remote_url("video.mp4"));
        assert!(!is_remote_url("C:\\videos\\a.mp4"));
        assert!(!is_remote_url("file:///tmp/a.mp4"));
    }

    #[test]
    fn test_is_youtube_url() {
        assert!(is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_youtube_url("https://notyoutube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(59.6), "1:00");
        assert_eq!(format_duration(900.0), "15:00");
        assert_eq!(format_duration(3725.0), "1:02:05");
        assert_eq!(format_duration(f64::NAN), "0:00");
    }
}
