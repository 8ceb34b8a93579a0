//! Names used on the live client transport.

use crate::stage::Stage;

/// Inbound client frame joining a subject group.
pub const SUBSCRIBE_EVENT: &str = "subscribe:subject";

/// Inbound client frame leaving a subject group.
pub const UNSUBSCRIBE_EVENT: &str = "unsubscribe:subject";

/// Group name for the connections following one subject.
pub fn subject_group(subject_id: &str) -> String {
    format!("subject:{subject_id}")
}

/// Direct notification name, e.g. `separate:started` or `download:error`.
pub fn notification_event(stage: Stage, suffix: &str) -> String {
    format!("{stage}:{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_name() {
        assert_eq!(subject_group("t1"), "subject:t1");
    }

    #[test]
    fn notification_names() {
        assert_eq!(
            notification_event(Stage::Separate, "started"),
            "separate:started"
        );
        assert_eq!(notification_event(Stage::Download, "error"), "download:error");
    }
}
