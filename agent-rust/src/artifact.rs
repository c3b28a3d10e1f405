use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

/// How a renderer should present an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Csv,
    Excel,
    Text,
    Pdf,
    Other,
}

impl MediaKind {
    /// Classify from the task API's type hint, falling back to the
    /// response content type when the hint is not recognized.
    #[must_use]
    pub fn from_type_hint(hint: &str, content_type: Option<&str>) -> Self {
        match hint.trim().to_ascii_lowercase().as_str() {
            "image" | "png" | "jpg" | "jpeg" | "gif" | "webp" => Self::Image,
            "csv" => Self::Csv,
            "excel" | "xlsx" | "xls" => Self::Excel,
            "text" | "txt" | "markdown" | "md" => Self::Text,
            "pdf" => Self::Pdf,
            _ => content_type.map_or(Self::Other, Self::from_content_type),
        }
    }

    fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime.starts_with("image/") {
            Self::Image
        } else if mime == "text/csv" {
            Self::Csv
        } else if mime.contains("spreadsheetml") || mime == "application/vnd.ms-excel" {
            Self::Excel
        } else if mime == "application/pdf" {
            Self::Pdf
        } else if mime.starts_with("text/") {
            Self::Text
        } else {
            Self::Other
        }
    }

    /// MIME type offered for download when the task API sent none.
    #[must_use]
    pub fn default_mime(self) -> &'static str {
        match self {
            Self::Image => "image/png",
            Self::Csv => "text/csv",
            Self::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Text => "text/plain",
            Self::Pdf => "application/pdf",
            Self::Other => "application/octet-stream",
        }
    }
}

/// A file downloaded from a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub filename: String,
    pub media_kind: MediaKind,
    /// The type hint as reported by the task API.
    pub type_hint: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Artifact {
    #[must_use]
    pub fn download_mime(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or_else(|| self.media_kind.default_mime())
    }

    /// Inline `data:` URL for previews.
    #[must_use]
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.download_mime(),
            STANDARD.encode(&self.bytes)
        )
    }

    /// Text content for kinds that can be previewed as text.
    #[must_use]
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self.media_kind {
            MediaKind::Csv | MediaKind::Text => Some(String::from_utf8_lossy(&self.bytes)),
            MediaKind::Image | MediaKind::Excel | MediaKind::Pdf | MediaKind::Other => None,
        }
    }
}

/// Message id to artifacts. Readable by anyone holding a handle, written
/// only by the conversation engine.
#[derive(Clone, Default)]
pub struct ArtifactRegistry {
    slots: Arc<RwLock<HashMap<String, Vec<Artifact>>>>,
}

impl ArtifactRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts shown next to the message, in production order.
    #[must_use]
    pub fn artifacts(&self, message_id: &str) -> Vec<Artifact> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(message_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn has_slot(&self, message_id: &str) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.contains_key(message_id)
    }

    #[must_use]
    pub fn message_ids(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.keys().cloned().collect()
    }

    /// Create an empty slot for the message if it has none yet.
    pub(crate) fn init_slot(&self, message_id: &str) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry(message_id.to_string()).or_default();
    }

    pub(crate) fn attach(&self, message_id: &str, artifacts: Vec<Artifact>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(message_id.to_string())
            .or_default()
            .extend(artifacts);
    }

    pub(crate) fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.clear();
    }
}

#[cfg(test)]
pub(crate) fn test_artifact(id: &str, filename: &str, hint: &str) -> Artifact {
    Artifact {
        id: id.to_string(),
        filename: filename.to_string(),
        media_kind: MediaKind::from_type_hint(hint, None),
        type_hint: hint.to_string(),
        bytes: b"name,value\nAcme,1\n".to_vec(),
        content_type: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_hints_map_to_media_kinds() {
        assert_eq!(MediaKind::from_type_hint("csv", None), MediaKind::Csv);
        assert_eq!(MediaKind::from_type_hint("Excel", None), MediaKind::Excel);
        assert_eq!(MediaKind::from_type_hint("image", None), MediaKind::Image);
        assert_eq!(MediaKind::from_type_hint("pdf", None), MediaKind::Pdf);
        assert_eq!(MediaKind::from_type_hint("text", None), MediaKind::Text);
        assert_eq!(MediaKind::from_type_hint("unknown", None), MediaKind::Other);
    }

    #[test]
    fn unknown_hint_falls_back_to_content_type() {
        assert_eq!(
            MediaKind::from_type_hint("unknown", Some("image/webp")),
            MediaKind::Image
        );
        assert_eq!(
            MediaKind::from_type_hint("report", Some("application/pdf")),
            MediaKind::Pdf
        );
        assert_eq!(
            MediaKind::from_type_hint("", Some("text/csv; charset=utf-8")),
            MediaKind::Csv
        );
        assert_eq!(
            MediaKind::from_type_hint("", Some("application/zip")),
            MediaKind::Other
        );
    }

    #[test]
    fn previews() {
        let mut artifact = test_artifact("f1", "out.csv", "csv");
        assert_eq!(artifact.download_mime(), "text/csv");
        assert_eq!(artifact.as_text().as_deref(), Some("name,value\nAcme,1\n"));

        artifact.media_kind = MediaKind::Image;
        artifact.content_type = Some("image/png".to_string());
        artifact.bytes = vec![0, 1, 2];
        assert_eq!(artifact.as_text(), None);
        assert_eq!(artifact.data_url(), "data:image/png;base64,AAEC");
    }

    #[test]
    fn registry_slots_accumulate_and_clear() {
        let registry = ArtifactRegistry::new();
        let reader = registry.clone();

        registry.init_slot("msg_1");
        assert!(reader.has_slot("msg_1"));
        assert!(reader.artifacts("msg_1").is_empty());

        registry.attach("msg_1", vec![test_artifact("f1", "a.csv", "csv")]);
        registry.attach("msg_1", vec![test_artifact("f2", "b.csv", "csv")]);
        registry.init_slot("msg_1");

        let names: Vec<_> = reader
            .artifacts("msg_1")
            .into_iter()
            .map(|artifact| artifact.filename)
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
        assert!(reader.artifacts("msg_2").is_empty());

        registry.clear();
        assert!(reader.message_ids().is_empty());
    }
}
