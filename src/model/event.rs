use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sys::message::WindowHandle;

/// Notifications published to a view's subscribers, on the affine thread.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum ViewEvent {
    DocumentReady {
        window: WindowHandle,
    },
    TitleChanged {
        window: WindowHandle,
        title: String,
    },
    FilesDropped {
        window: WindowHandle,
        paths: Vec<PathBuf>,
    },
    Destroyed {
        window: WindowHandle,
    },
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::DocumentReady { .. } => "document_ready",
            ViewEvent::TitleChanged { .. } => "title_changed",
            ViewEvent::FilesDropped { .. } => "files_dropped",
            ViewEvent::Destroyed { .. } => "destroyed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_tagged() {
        let event = ViewEvent::FilesDropped {
            window: WindowHandle::new(5),
            paths: vec![PathBuf::from("/tmp/a.txt")],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            serde_json::json!({"type": "files_dropped", "window": 5, "paths": ["/tmp/a.txt"]}),
            json
        );
        assert_eq!("files_dropped", event.name());
    }
}
