use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a bulletin's material came from. Web captures get a main source per
/// extractor (e.g. `youtube`) and a sub-source per uploader under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Source {
    pub id: i64,
    pub title: String,
    pub parent_id: Option<i64>,
    /// Identifier assigned by the capturing tool, e.g. a channel id
    pub etl_id: Option<String>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What is known about an uploader when locating its sub-source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceHints {
    pub uploader_id: Option<String>,
    pub uploader: Option<String>,
    /// Channel and uploader URLs, matched against source comments
    pub urls: Vec<String>,
}

impl SourceHints {
    pub fn is_empty(&self) -> bool {
        self.uploader_id.is_none() && self.uploader.is_none() && self.urls.is_empty()
    }

    /// Title for a newly created sub-source.
    pub fn title(&self) -> Option<String> {
        self.uploader
            .clone()
            .or_else(|| self.uploader_id.clone())
            .or_else(|| self.urls.first().cloned())
    }

    pub fn matches(&self, source: &Source) -> bool {
        let by_id = matches!(
            (&self.uploader_id, &source.etl_id),
            (Some(a), Some(b)) if a == b
        );
        let by_title = self
            .uploader
            .as_ref()
            .is_some_and(|u| u.eq_ignore_ascii_case(&source.title));
        let by_url = source.comment.as_ref().is_some_and(|comment| {
            self.urls
                .iter()
                .any(|url| !url.is_empty() && comment.contains(url.as_str()))
        });
        by_id || by_title || by_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(title: &str, etl_id: Option<&str>, comment: Option<&str>) -> Source {
        Source {
            id: 1,
            title: title.into(),
            parent_id: Some(0),
            etl_id: etl_id.map(String::from),
            comment: comment.map(String::from),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_hint_matching() {
        let hints = SourceHints {
            uploader_id: Some("UC123".into()),
            uploader: Some("Field Desk".into()),
            urls: vec!["https://example.org/c/fielddesk".into()],
        };
        assert!(hints.matches(&source("other", Some("UC123"), None)));
        assert!(hints.matches(&source("field desk", None, None)));
        assert!(hints.matches(&source(
            "x",
            None,
            Some("channel: https://example.org/c/fielddesk")
        )));
        assert!(!hints.matches(&source("x", Some("UC999"), Some("nothing"))));
        assert_eq!(hints.title().as_deref(), Some("Field Desk"));
    }
}
