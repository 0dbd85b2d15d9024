//! Content platform detection.
//!
//! The browser agent only reports pages that look like a single piece of
//! saveable content. These patterns decide which URLs qualify, and
//! [`ContentTracker`] reports each such page once per visit.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::message::Message;

// ============================================================================
// Patterns
// ============================================================================

static INSTAGRAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"instagram\.com/(?:reel|reels|p)/([^/?]+)").expect("instagram regex is valid")
});

static YOUTUBE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube\.com/watch\?v=([^&]+)|youtube\.com/shorts/([^/?]+)")
        .expect("youtube regex is valid")
});

static TWITTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:twitter|x)\.com/[A-Za-z0-9_]+/status/([0-9]+)").expect("twitter regex is valid")
});

static TIKTOK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"tiktok\.com/@[A-Za-z0-9_.]+/video/([0-9]+)").expect("tiktok regex is valid")
});

// ============================================================================
// Platform
// ============================================================================

/// Content platform recognised from a page URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Instagram posts and reels.
    Instagram,
    /// YouTube videos and shorts.
    Youtube,
    /// Twitter / X status pages.
    Twitter,
    /// TikTok videos.
    Tiktok,
}

impl Platform {
    /// Detection order. First match wins.
    pub const ALL: [Platform; 4] = [
        Platform::Instagram,
        Platform::Youtube,
        Platform::Twitter,
        Platform::Tiktok,
    ];

    /// Returns the platform whose pattern matches `url`, if any.
    #[must_use]
    pub fn detect(url: &str) -> Option<Platform> {
        Self::ALL.into_iter().find(|p| p.pattern().is_match(url))
    }

    /// Extracts the content identifier (post code, video id, status id).
    #[must_use]
    pub fn content_id<'a>(&self, url: &'a str) -> Option<&'a str> {
        let captures = self.pattern().captures(url)?;
        captures
            .iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str())
    }

    /// Returns the wire name used in `content-update` frames.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Youtube => "youtube",
            Self::Twitter => "twitter",
            Self::Tiktok => "tiktok",
        }
    }

    fn pattern(&self) -> &'static Regex {
        match self {
            Self::Instagram => &*INSTAGRAM,
            Self::Youtube => &*YOUTUBE,
            Self::Twitter => &*TWITTER,
            Self::Tiktok => &*TIKTOK,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ContentTracker
// ============================================================================

/// Turns a stream of page URLs into `content-update` messages.
///
/// A content page is reported when it is first seen. Seeing it again is
/// silent until the page changes; leaving for a non-content page forgets it,
/// so coming back reports it again.
#[derive(Debug, Clone, Default)]
pub struct ContentTracker {
    /// Last reported content URL.
    last: Option<String>,
}

impl ContentTracker {
    /// Creates a tracker that has reported nothing.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current page and returns the update to send, if any.
    pub fn observe(&mut self, url: &str, title: &str) -> Option<Message> {
        if self.last.as_deref() == Some(url) {
            return None;
        }

        match Message::content_update_for(url, title) {
            Some(update) => {
                self.last = Some(url.to_string());
                Some(update)
            }
            None => {
                self.last = None;
                None
            }
        }
    }

    /// Returns the content URL last reported, if still current.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_instagram() {
        for url in [
            "https://www.instagram.com/p/ABC123/",
            "https://instagram.com/reel/XYZ",
            "https://instagram.com/reels/XYZ?igsh=1",
        ] {
            assert_eq!(Platform::detect(url), Some(Platform::Instagram), "{url}");
        }
        assert_eq!(
            Platform::Instagram.content_id("https://instagram.com/p/ABC123/"),
            Some("ABC123")
        );
    }

    #[test]
    fn test_detect_youtube() {
        let watch = "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10";
        assert_eq!(Platform::detect(watch), Some(Platform::Youtube));
        assert_eq!(Platform::Youtube.content_id(watch), Some("dQw4w9WgXcQ"));

        let short = "https://youtube.com/shorts/abc_def";
        assert_eq!(Platform::detect(short), Some(Platform::Youtube));
        assert_eq!(Platform::Youtube.content_id(short), Some("abc_def"));
    }

    #[test]
    fn test_detect_twitter_and_x() {
        assert_eq!(
            Platform::detect("https://twitter.com/rustlang/status/12345"),
            Some(Platform::Twitter)
        );
        assert_eq!(
            Platform::detect("https://x.com/rustlang/status/999"),
            Some(Platform::Twitter)
        );
    }

    #[test]
    fn test_detect_tiktok() {
        let url = "https://www.tiktok.com/@some.user/video/7001";
        assert_eq!(Platform::detect(url), Some(Platform::Tiktok));
        assert_eq!(Platform::Tiktok.content_id(url), Some("7001"));
    }

    #[test]
    fn test_non_content_pages() {
        for url in [
            "https://instagram.com/",
            "https://instagram.com/someuser",
            "https://youtube.com/feed/subscriptions",
            "https://x.com/home",
            "https://example.com/p/ABC",
        ] {
            assert_eq!(Platform::detect(url), None, "{url}");
        }
    }

    #[test]
    fn test_word_characters_are_ascii_only() {
        assert_eq!(Platform::detect("https://x.com/rust_lang9/status/42"), Some(Platform::Twitter));
        assert_eq!(Platform::detect("https://x.com/jos\u{e9}/status/42"), None);
        assert_eq!(Platform::detect("https://twitter.com/a/status/\u{0661}\u{0662}"), None);
        assert_eq!(
            Platform::detect("https://www.tiktok.com/@caf\u{e9}/video/7001"),
            None
        );
    }

    #[test]
    fn test_tracker_reports_each_page_once() {
        let mut tracker = ContentTracker::new();
        let post = "https://instagram.com/p/ABC";

        let update = tracker.observe(post, "first").unwrap();
        assert_eq!(update, Message::content_update_for(post, "first").unwrap());
        assert_eq!(tracker.current(), Some(post));

        // Same page, e.g. a title change or a repeated poll
        assert!(tracker.observe(post, "renamed").is_none());

        let video = "https://youtube.com/shorts/xyz";
        assert!(tracker.observe(video, "v").is_some());
        assert_eq!(tracker.current(), Some(video));
    }

    #[test]
    fn test_tracker_forgets_after_non_content_page() {
        let mut tracker = ContentTracker::new();
        let post = "https://instagram.com/p/ABC";

        assert!(tracker.observe(post, "t").is_some());
        assert!(tracker.observe("https://instagram.com/explore", "").is_none());
        assert_eq!(tracker.current(), None);
        assert!(tracker.observe("https://instagram.com/explore", "").is_none());

        // Coming back is a new visit
        assert!(tracker.observe(post, "t").is_some());
    }
}
